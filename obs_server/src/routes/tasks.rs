//! Task queue endpoints (§4.E, §6): submit/query/cancel/remove against the
//! live in-process [`TaskQueue`], with a submission persisted to the
//! `tasks` table for audit/recovery purposes via [`obs_store::tables::task`].

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use obs_core::image::{Binning, Exposure, Purpose, Rectangle, ShutterState};
use obs_queue::{DeviceSelector, TaskId, TaskParameters, TaskState};
use obs_store::tables::task::TaskAdapter;
use obs_store::Adapter;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tasks", get(list_tasks).post(submit_task))
        .route("/api/tasks/:id", get(get_task).delete(remove_task))
        .route("/api/tasks/:id/cancel", post(cancel_task))
}

#[derive(Deserialize, Default)]
struct DeviceSelectorDto {
    #[serde(default)]
    camera: Option<usize>,
    #[serde(default)]
    ccd: Option<usize>,
    #[serde(default)]
    cooler: Option<usize>,
    #[serde(default)]
    filter_wheel: Option<usize>,
    #[serde(default)]
    mount: Option<usize>,
    #[serde(default)]
    focuser: Option<usize>,
}

impl From<DeviceSelectorDto> for DeviceSelector {
    fn from(dto: DeviceSelectorDto) -> Self {
        DeviceSelector {
            camera: dto.camera,
            ccd: dto.ccd,
            cooler: dto.cooler,
            filter_wheel: dto.filter_wheel,
            mount: dto.mount,
            focuser: dto.focuser,
        }
    }
}

#[derive(Deserialize)]
struct SubmitTaskDto {
    instrument: String,
    #[serde(default)]
    devices: DeviceSelectorDto,
    origin_x: u32,
    origin_y: u32,
    width: u32,
    height: u32,
    #[serde(default = "one")]
    bin_x: u32,
    #[serde(default = "one")]
    bin_y: u32,
    exposure_time_ms: u64,
    #[serde(default)]
    gain: f64,
    #[serde(default)]
    desired_temperature: Option<f64>,
    #[serde(default)]
    filter: Option<usize>,
    output_repository: String,
    #[serde(default)]
    purpose: Option<Purpose>,
}

fn one() -> u32 {
    1
}

impl From<SubmitTaskDto> for TaskParameters {
    fn from(dto: SubmitTaskDto) -> Self {
        TaskParameters {
            instrument: dto.instrument,
            devices: dto.devices.into(),
            exposure: Exposure {
                frame: Rectangle {
                    origin_x: dto.origin_x,
                    origin_y: dto.origin_y,
                    width: dto.width,
                    height: dto.height,
                },
                binning: Binning { x: dto.bin_x, y: dto.bin_y },
                exposure_time: Duration::from_millis(dto.exposure_time_ms),
                gain: dto.gain,
                vmax_limit: f64::INFINITY,
                shutter: ShutterState::Open,
                purpose: dto.purpose.unwrap_or(Purpose::Light),
            },
            desired_temperature: dto.desired_temperature,
            filter: dto.filter,
            output_repository: dto.output_repository,
            purpose: dto.purpose.unwrap_or(Purpose::Light),
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
enum TaskStateDto {
    Pending,
    Executing,
    Complete { filename: String, width: u32, height: u32 },
    Cancelled,
    Failed { cause: String },
}

impl From<&TaskState> for TaskStateDto {
    fn from(state: &TaskState) -> Self {
        match state {
            TaskState::Pending => TaskStateDto::Pending,
            TaskState::Executing => TaskStateDto::Executing,
            TaskState::Complete { filename, width, height } => TaskStateDto::Complete {
                filename: filename.clone(),
                width: *width,
                height: *height,
            },
            TaskState::Cancelled => TaskStateDto::Cancelled,
            TaskState::Failed { cause } => TaskStateDto::Failed { cause: cause.clone() },
        }
    }
}

#[derive(Serialize)]
struct TaskDto {
    id: TaskId,
    instrument: String,
    state: TaskStateDto,
}

async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(dto): Json<SubmitTaskDto>,
) -> Result<Json<TaskId>, ApiError> {
    let parameters: TaskParameters = dto.into();

    {
        let mut conn = state.db.lock().await;
        TaskAdapter
            .add(&mut conn, &obs_store::tables::task::TaskRow::from_parameters(
                &parameters,
                &TaskState::Pending,
            ))
            .await?;
    }

    let id = state.task_queue.submit(parameters).await;
    Ok(Json(id))
}

async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<TaskDto>> {
    let entries = state.task_queue.query_all().await;
    Json(
        entries
            .iter()
            .map(|e| TaskDto {
                id: e.id,
                instrument: e.parameters.instrument.clone(),
                state: (&e.state).into(),
            })
            .collect(),
    )
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
) -> Result<Json<TaskDto>, ApiError> {
    let entry = state
        .task_queue
        .query(id)
        .await
        .ok_or_else(|| obs_core::error::DeviceError::NotFound(format!("task {}", id)))?;
    Ok(Json(TaskDto {
        id: entry.id,
        instrument: entry.parameters.instrument.clone(),
        state: (&entry.state).into(),
    }))
}

async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
) -> Result<(), ApiError> {
    state.task_queue.cancel(id).await?;
    Ok(())
}

async fn remove_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
) -> Result<(), ApiError> {
    state.task_queue.remove(id).await?;
    Ok(())
}
