use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde_json::json;

use obs_core::error::DeviceError;
use obs_core::events::{CalibrationPoint, CalibrationResult};

use crate::db::{diesel_err, DbConnection};
use crate::schema::{calibration_points, calibrations};

use super::Adapter;

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = calibrations)]
pub struct CalibrationRow {
    pub id: i64,
    pub instrument: String,
    pub coefficients_json: String,
    pub determinant: f64,
    pub created_at: String,
}

impl CalibrationRow {
    pub fn from_result(instrument: &str, result: &CalibrationResult) -> Self {
        CalibrationRow {
            id: 0,
            instrument: instrument.to_string(),
            coefficients_json: json!(result.coefficients).to_string(),
            determinant: result.determinant,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn to_result(&self) -> CalibrationResult {
        let coefficients: Vec<f64> = serde_json::from_str(&self.coefficients_json).unwrap_or_default();
        let mut out = [0.0f64; 6];
        for (i, v) in coefficients.into_iter().take(6).enumerate() {
            out[i] = v;
        }
        CalibrationResult {
            coefficients: out,
            determinant: self.determinant,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = calibration_points)]
pub struct CalibrationPointRow {
    pub id: i64,
    pub calibration_id: i64,
    pub elapsed_ms: i64,
    pub commanded_ra: f64,
    pub commanded_dec: f64,
    pub observed_ra: f64,
    pub observed_dec: f64,
}

impl CalibrationPointRow {
    pub fn from_point(calibration_id: i64, point: &CalibrationPoint) -> Self {
        CalibrationPointRow {
            id: 0,
            calibration_id,
            elapsed_ms: point.elapsed.as_millis() as i64,
            commanded_ra: point.commanded.0,
            commanded_dec: point.commanded.1,
            observed_ra: point.observed.0,
            observed_dec: point.observed.1,
        }
    }

    pub fn to_point(&self) -> CalibrationPoint {
        CalibrationPoint {
            elapsed: std::time::Duration::from_millis(self.elapsed_ms.max(0) as u64),
            commanded: (self.commanded_ra, self.commanded_dec),
            observed: (self.observed_ra, self.observed_dec),
        }
    }
}

pub struct CalibrationAdapter;

#[async_trait]
impl Adapter<CalibrationRow> for CalibrationAdapter {
    fn table_name(&self) -> &'static str {
        "calibrations"
    }

    async fn add(&self, conn: &mut DbConnection, value: &CalibrationRow) -> Result<i64, DeviceError> {
        diesel::insert_into(calibrations::table)
            .values(value)
            .returning(calibrations::id)
            .get_result(conn)
            .await
            .map_err(diesel_err)
    }

    async fn update(&self, conn: &mut DbConnection, id: i64, value: &CalibrationRow) -> Result<(), DeviceError> {
        diesel::update(calibrations::table.filter(calibrations::id.eq(id)))
            .set(value)
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn by_id(&self, conn: &mut DbConnection, id: i64) -> Result<CalibrationRow, DeviceError> {
        calibrations::table
            .filter(calibrations::id.eq(id))
            .select(CalibrationRow::as_select())
            .first(conn)
            .await
            .map_err(diesel_err)
    }

    async fn remove(&self, conn: &mut DbConnection, id: i64) -> Result<(), DeviceError> {
        diesel::delete(calibrations::table.filter(calibrations::id.eq(id)))
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn count(&self, conn: &mut DbConnection) -> Result<i64, DeviceError> {
        calibrations::table.count().get_result(conn).await.map_err(diesel_err)
    }
}

pub struct CalibrationPointAdapter;

#[async_trait]
impl Adapter<CalibrationPointRow> for CalibrationPointAdapter {
    fn table_name(&self) -> &'static str {
        "calibration_points"
    }

    async fn add(&self, conn: &mut DbConnection, value: &CalibrationPointRow) -> Result<i64, DeviceError> {
        diesel::insert_into(calibration_points::table)
            .values(value)
            .returning(calibration_points::id)
            .get_result(conn)
            .await
            .map_err(diesel_err)
    }

    async fn update(
        &self,
        conn: &mut DbConnection,
        id: i64,
        value: &CalibrationPointRow,
    ) -> Result<(), DeviceError> {
        diesel::update(calibration_points::table.filter(calibration_points::id.eq(id)))
            .set(value)
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn by_id(&self, conn: &mut DbConnection, id: i64) -> Result<CalibrationPointRow, DeviceError> {
        calibration_points::table
            .filter(calibration_points::id.eq(id))
            .select(CalibrationPointRow::as_select())
            .first(conn)
            .await
            .map_err(diesel_err)
    }

    async fn remove(&self, conn: &mut DbConnection, id: i64) -> Result<(), DeviceError> {
        diesel::delete(calibration_points::table.filter(calibration_points::id.eq(id)))
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn count(&self, conn: &mut DbConnection) -> Result<i64, DeviceError> {
        calibration_points::table
            .count()
            .get_result(conn)
            .await
            .map_err(diesel_err)
    }
}

/// Persists a whole calibration run: the final `coefficients`/`determinant`
/// plus every sample point that produced them, so a later review can
/// re-derive or audit the fit.
pub async fn save_run(
    conn: &mut DbConnection,
    instrument: &str,
    result: &CalibrationResult,
    points: &[CalibrationPoint],
) -> Result<i64, DeviceError> {
    let calibration_id = CalibrationAdapter
        .add(conn, &CalibrationRow::from_result(instrument, result))
        .await?;
    for point in points {
        CalibrationPointAdapter
            .add(conn, &CalibrationPointRow::from_point(calibration_id, point))
            .await?;
    }
    Ok(calibration_id)
}
