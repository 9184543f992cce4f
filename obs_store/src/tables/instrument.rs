use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use obs_core::error::DeviceError;

use crate::db::{diesel_err, DbConnection};
use crate::schema::{instrument_components, instruments};

use super::Adapter;

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = instruments)]
pub struct InstrumentRow {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = instrument_components)]
pub struct InstrumentComponentRow {
    pub id: i64,
    pub instrument_id: i64,
    pub role: String,
    pub device_name: String,
}

pub struct InstrumentAdapter;

#[async_trait]
impl Adapter<InstrumentRow> for InstrumentAdapter {
    fn table_name(&self) -> &'static str {
        "instruments"
    }

    async fn add(&self, conn: &mut DbConnection, value: &InstrumentRow) -> Result<i64, DeviceError> {
        diesel::insert_into(instruments::table)
            .values(value)
            .returning(instruments::id)
            .get_result(conn)
            .await
            .map_err(diesel_err)
    }

    async fn update(&self, conn: &mut DbConnection, id: i64, value: &InstrumentRow) -> Result<(), DeviceError> {
        diesel::update(instruments::table.filter(instruments::id.eq(id)))
            .set(value)
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn by_id(&self, conn: &mut DbConnection, id: i64) -> Result<InstrumentRow, DeviceError> {
        instruments::table
            .filter(instruments::id.eq(id))
            .select(InstrumentRow::as_select())
            .first(conn)
            .await
            .map_err(diesel_err)
    }

    async fn remove(&self, conn: &mut DbConnection, id: i64) -> Result<(), DeviceError> {
        diesel::delete(instruments::table.filter(instruments::id.eq(id)))
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn count(&self, conn: &mut DbConnection) -> Result<i64, DeviceError> {
        instruments::table.count().get_result(conn).await.map_err(diesel_err)
    }
}

pub struct InstrumentComponentAdapter;

#[async_trait]
impl Adapter<InstrumentComponentRow> for InstrumentComponentAdapter {
    fn table_name(&self) -> &'static str {
        "instrument_components"
    }

    async fn add(&self, conn: &mut DbConnection, value: &InstrumentComponentRow) -> Result<i64, DeviceError> {
        diesel::insert_into(instrument_components::table)
            .values(value)
            .returning(instrument_components::id)
            .get_result(conn)
            .await
            .map_err(diesel_err)
    }

    async fn update(
        &self,
        conn: &mut DbConnection,
        id: i64,
        value: &InstrumentComponentRow,
    ) -> Result<(), DeviceError> {
        diesel::update(instrument_components::table.filter(instrument_components::id.eq(id)))
            .set(value)
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn by_id(&self, conn: &mut DbConnection, id: i64) -> Result<InstrumentComponentRow, DeviceError> {
        instrument_components::table
            .filter(instrument_components::id.eq(id))
            .select(InstrumentComponentRow::as_select())
            .first(conn)
            .await
            .map_err(diesel_err)
    }

    async fn remove(&self, conn: &mut DbConnection, id: i64) -> Result<(), DeviceError> {
        diesel::delete(instrument_components::table.filter(instrument_components::id.eq(id)))
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn count(&self, conn: &mut DbConnection) -> Result<i64, DeviceError> {
        instrument_components::table
            .count()
            .get_result(conn)
            .await
            .map_err(diesel_err)
    }
}

/// Reads back every `(role, device_name)` component row bound to `name`,
/// creating no row and returning `NotFound` if the instrument is unknown.
pub async fn components_for(
    conn: &mut DbConnection,
    name: &str,
) -> Result<Vec<(String, String)>, DeviceError> {
    let instrument = instruments::table
        .filter(instruments::name.eq(name))
        .select(InstrumentRow::as_select())
        .first(conn)
        .await
        .map_err(diesel_err)?;

    let rows: Vec<InstrumentComponentRow> = instrument_components::table
        .filter(instrument_components::instrument_id.eq(instrument.id))
        .select(InstrumentComponentRow::as_select())
        .load(conn)
        .await
        .map_err(diesel_err)?;

    Ok(rows.into_iter().map(|r| (r.role, r.device_name)).collect())
}
