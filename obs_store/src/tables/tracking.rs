use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use obs_core::error::DeviceError;
use obs_core::events::{ControlType, TrackingPoint};

use crate::db::{diesel_err, DbConnection};
use crate::schema::{tracking_points, tracking_runs};

use super::Adapter;

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = tracking_runs)]
pub struct TrackingRunRow {
    pub id: i64,
    pub instrument: String,
    pub control_type: String,
    pub started_at: String,
}

impl TrackingRunRow {
    pub fn new(instrument: &str) -> Self {
        TrackingRunRow {
            id: 0,
            instrument: instrument.to_string(),
            control_type: "guide_port".to_string(),
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = tracking_points)]
pub struct TrackingPointRow {
    pub id: i64,
    pub run_id: i64,
    pub at: String,
    pub offset_x: f64,
    pub offset_y: f64,
    pub correction_ra: f64,
    pub correction_dec: f64,
}

fn control_type_str(control: ControlType) -> &'static str {
    match control {
        ControlType::GuidePort => "guide_port",
        ControlType::AdaptiveOptics => "adaptive_optics",
    }
}

impl TrackingPointRow {
    pub fn from_point(run_id: i64, point: &TrackingPoint) -> Self {
        let at = chrono::DateTime::<chrono::Utc>::from(point.at).to_rfc3339();
        TrackingPointRow {
            id: 0,
            run_id,
            at,
            offset_x: point.star_offset.0,
            offset_y: point.star_offset.1,
            correction_ra: point.correction_issued.0,
            correction_dec: point.correction_issued.1,
        }
    }
}

pub struct TrackingRunAdapter;

#[async_trait]
impl Adapter<TrackingRunRow> for TrackingRunAdapter {
    fn table_name(&self) -> &'static str {
        "tracking_runs"
    }

    async fn add(&self, conn: &mut DbConnection, value: &TrackingRunRow) -> Result<i64, DeviceError> {
        diesel::insert_into(tracking_runs::table)
            .values(value)
            .returning(tracking_runs::id)
            .get_result(conn)
            .await
            .map_err(diesel_err)
    }

    async fn update(&self, conn: &mut DbConnection, id: i64, value: &TrackingRunRow) -> Result<(), DeviceError> {
        diesel::update(tracking_runs::table.filter(tracking_runs::id.eq(id)))
            .set(value)
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn by_id(&self, conn: &mut DbConnection, id: i64) -> Result<TrackingRunRow, DeviceError> {
        tracking_runs::table
            .filter(tracking_runs::id.eq(id))
            .select(TrackingRunRow::as_select())
            .first(conn)
            .await
            .map_err(diesel_err)
    }

    async fn remove(&self, conn: &mut DbConnection, id: i64) -> Result<(), DeviceError> {
        diesel::delete(tracking_runs::table.filter(tracking_runs::id.eq(id)))
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn count(&self, conn: &mut DbConnection) -> Result<i64, DeviceError> {
        tracking_runs::table.count().get_result(conn).await.map_err(diesel_err)
    }
}

pub struct TrackingPointAdapter;

#[async_trait]
impl Adapter<TrackingPointRow> for TrackingPointAdapter {
    fn table_name(&self) -> &'static str {
        "tracking_points"
    }

    async fn add(&self, conn: &mut DbConnection, value: &TrackingPointRow) -> Result<i64, DeviceError> {
        diesel::insert_into(tracking_points::table)
            .values(value)
            .returning(tracking_points::id)
            .get_result(conn)
            .await
            .map_err(diesel_err)
    }

    async fn update(
        &self,
        conn: &mut DbConnection,
        id: i64,
        value: &TrackingPointRow,
    ) -> Result<(), DeviceError> {
        diesel::update(tracking_points::table.filter(tracking_points::id.eq(id)))
            .set(value)
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn by_id(&self, conn: &mut DbConnection, id: i64) -> Result<TrackingPointRow, DeviceError> {
        tracking_points::table
            .filter(tracking_points::id.eq(id))
            .select(TrackingPointRow::as_select())
            .first(conn)
            .await
            .map_err(diesel_err)
    }

    async fn remove(&self, conn: &mut DbConnection, id: i64) -> Result<(), DeviceError> {
        diesel::delete(tracking_points::table.filter(tracking_points::id.eq(id)))
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn count(&self, conn: &mut DbConnection) -> Result<i64, DeviceError> {
        tracking_points::table
            .count()
            .get_result(conn)
            .await
            .map_err(diesel_err)
    }
}

/// Finds (or lazily opens) today's tracking run for `instrument` and
/// appends `point` to it. A guiding session spans many cycles; this keeps
/// one `tracking_runs` row per session rather than one per point.
pub async fn append_point(
    conn: &mut DbConnection,
    run_id: i64,
    point: &TrackingPoint,
) -> Result<(), DeviceError> {
    TrackingPointAdapter
        .add(conn, &TrackingPointRow::from_point(run_id, point))
        .await?;
    Ok(())
}

pub async fn start_run(conn: &mut DbConnection, instrument: &str, control: ControlType) -> Result<i64, DeviceError> {
    let mut row = TrackingRunRow::new(instrument);
    row.control_type = control_type_str(control).to_string();
    TrackingRunAdapter.add(conn, &row).await
}
