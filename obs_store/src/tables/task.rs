use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde_json::json;

use obs_core::error::DeviceError;
use obs_core::image::{Binning, Exposure, Purpose, Rectangle, ShutterState};
use obs_queue::{DeviceSelector, TaskParameters, TaskState};

use crate::db::{diesel_err, DbConnection};
use crate::schema::tasks;

use super::Adapter;

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = tasks)]
pub struct TaskRow {
    pub id: i64,
    pub instrument: String,
    pub devices_json: String,
    pub exposure_json: String,
    pub desired_temperature: Option<f64>,
    pub filter: Option<i64>,
    pub output_repository: String,
    pub purpose: i64,
    pub state: String,
    pub state_detail: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

fn devices_to_json(devices: &DeviceSelector) -> String {
    json!({
        "camera": devices.camera,
        "ccd": devices.ccd,
        "cooler": devices.cooler,
        "filter_wheel": devices.filter_wheel,
        "mount": devices.mount,
        "focuser": devices.focuser,
    })
    .to_string()
}

fn devices_from_json(text: &str) -> DeviceSelector {
    let v: serde_json::Value = serde_json::from_str(text).unwrap_or_default();
    let idx = |k: &str| v.get(k).and_then(|x| x.as_u64()).map(|x| x as usize);
    DeviceSelector {
        camera: idx("camera"),
        ccd: idx("ccd"),
        cooler: idx("cooler"),
        filter_wheel: idx("filter_wheel"),
        mount: idx("mount"),
        focuser: idx("focuser"),
    }
}

fn exposure_to_json(exposure: &Exposure) -> String {
    json!({
        "frame": {
            "origin_x": exposure.frame.origin_x,
            "origin_y": exposure.frame.origin_y,
            "width": exposure.frame.width,
            "height": exposure.frame.height,
        },
        "binning": { "x": exposure.binning.x, "y": exposure.binning.y },
        "exposure_time_ms": exposure.exposure_time.as_millis() as u64,
        "gain": exposure.gain,
        "vmax_limit": exposure.vmax_limit,
        "shutter_open": matches!(exposure.shutter, ShutterState::Open),
    })
    .to_string()
}

fn exposure_from_json(text: &str, purpose: Purpose) -> Exposure {
    let v: serde_json::Value = serde_json::from_str(text).unwrap_or_default();
    let get_u32 = |path: &[&str]| -> u32 {
        let mut cur = &v;
        for key in path {
            cur = cur.get(key).unwrap_or(&serde_json::Value::Null);
        }
        cur.as_u64().unwrap_or(0) as u32
    };
    let frame = Rectangle {
        origin_x: get_u32(&["frame", "origin_x"]),
        origin_y: get_u32(&["frame", "origin_y"]),
        width: get_u32(&["frame", "width"]),
        height: get_u32(&["frame", "height"]),
    };
    let binning = Binning {
        x: get_u32(&["binning", "x"]).max(1),
        y: get_u32(&["binning", "y"]).max(1),
    };
    let exposure_time_ms = v.get("exposure_time_ms").and_then(|x| x.as_u64()).unwrap_or(0);
    Exposure {
        frame,
        binning,
        exposure_time: std::time::Duration::from_millis(exposure_time_ms),
        gain: v.get("gain").and_then(|x| x.as_f64()).unwrap_or(0.0),
        vmax_limit: v.get("vmax_limit").and_then(|x| x.as_f64()).unwrap_or(f64::INFINITY),
        shutter: if v.get("shutter_open").and_then(|x| x.as_bool()).unwrap_or(true) {
            ShutterState::Open
        } else {
            ShutterState::Closed
        },
        purpose,
    }
}

fn purpose_from_i64(v: i64) -> Purpose {
    match v {
        0 => Purpose::Light,
        1 => Purpose::Dark,
        2 => Purpose::Flat,
        3 => Purpose::Bias,
        4 => Purpose::Test,
        5 => Purpose::Guide,
        6 => Purpose::Focus,
        _ => Purpose::Preview,
    }
}

fn state_to_columns(state: &TaskState) -> (&'static str, Option<String>) {
    match state {
        TaskState::Pending => ("pending", None),
        TaskState::Executing => ("executing", None),
        TaskState::Complete { filename, width, height } => (
            "complete",
            Some(json!({ "filename": filename, "width": width, "height": height }).to_string()),
        ),
        TaskState::Cancelled => ("cancelled", None),
        TaskState::Failed { cause } => ("failed", Some(cause.clone())),
    }
}

fn columns_to_state(state: &str, detail: Option<&str>) -> TaskState {
    match state {
        "pending" => TaskState::Pending,
        "executing" => TaskState::Executing,
        "complete" => {
            let v: serde_json::Value =
                serde_json::from_str(detail.unwrap_or("{}")).unwrap_or_default();
            TaskState::Complete {
                filename: v.get("filename").and_then(|x| x.as_str()).unwrap_or("").to_string(),
                width: v.get("width").and_then(|x| x.as_u64()).unwrap_or(0) as u32,
                height: v.get("height").and_then(|x| x.as_u64()).unwrap_or(0) as u32,
            }
        }
        "cancelled" => TaskState::Cancelled,
        "failed" => TaskState::Failed {
            cause: detail.unwrap_or("").to_string(),
        },
        other => panic!("unknown persisted task state {}", other),
    }
}

impl TaskRow {
    pub fn from_parameters(parameters: &TaskParameters, state: &TaskState) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        let (state, state_detail) = state_to_columns(state);
        TaskRow {
            id: 0,
            instrument: parameters.instrument.clone(),
            devices_json: devices_to_json(&parameters.devices),
            exposure_json: exposure_to_json(&parameters.exposure),
            desired_temperature: parameters.desired_temperature,
            filter: parameters.filter.map(|f| f as i64),
            output_repository: parameters.output_repository.clone(),
            purpose: parameters.purpose as i64,
            state: state.to_string(),
            state_detail,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn to_parameters(&self) -> TaskParameters {
        let purpose = purpose_from_i64(self.purpose);
        TaskParameters {
            instrument: self.instrument.clone(),
            devices: devices_from_json(&self.devices_json),
            exposure: exposure_from_json(&self.exposure_json, purpose),
            desired_temperature: self.desired_temperature,
            filter: self.filter.map(|f| f as usize),
            output_repository: self.output_repository.clone(),
            purpose,
        }
    }

    pub fn to_state(&self) -> TaskState {
        columns_to_state(&self.state, self.state_detail.as_deref())
    }
}

pub struct TaskAdapter;

#[async_trait]
impl Adapter<TaskRow> for TaskAdapter {
    fn table_name(&self) -> &'static str {
        "tasks"
    }

    async fn add(&self, conn: &mut DbConnection, value: &TaskRow) -> Result<i64, DeviceError> {
        diesel::insert_into(tasks::table)
            .values(value)
            .returning(tasks::id)
            .get_result(conn)
            .await
            .map_err(diesel_err)
    }

    async fn update(&self, conn: &mut DbConnection, id: i64, value: &TaskRow) -> Result<(), DeviceError> {
        let mut value = value.clone();
        value.updated_at = chrono::Utc::now().to_rfc3339();
        diesel::update(tasks::table.filter(tasks::id.eq(id)))
            .set(value)
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn by_id(&self, conn: &mut DbConnection, id: i64) -> Result<TaskRow, DeviceError> {
        tasks::table
            .filter(tasks::id.eq(id))
            .select(TaskRow::as_select())
            .first(conn)
            .await
            .map_err(diesel_err)
    }

    async fn remove(&self, conn: &mut DbConnection, id: i64) -> Result<(), DeviceError> {
        diesel::delete(tasks::table.filter(tasks::id.eq(id)))
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn count(&self, conn: &mut DbConnection) -> Result<i64, DeviceError> {
        tasks::table.count().get_result(conn).await.map_err(diesel_err)
    }
}
