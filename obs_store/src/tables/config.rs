//! `GlobalConfigTable` (§6): read-through key-value configuration with no
//! in-memory cache, so a write from one process is visible to another on
//! its very next read.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use obs_core::error::DeviceError;

use crate::db::{diesel_err, DbConnection};
use crate::schema::global_config;

use super::Adapter;

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = global_config)]
pub struct GlobalConfigRow {
    pub id: i64,
    pub domain: String,
    pub section: String,
    pub name: String,
    pub value: String,
}

pub struct GlobalConfigAdapter;

#[async_trait]
impl Adapter<GlobalConfigRow> for GlobalConfigAdapter {
    fn table_name(&self) -> &'static str {
        "global_config"
    }

    async fn add(&self, conn: &mut DbConnection, value: &GlobalConfigRow) -> Result<i64, DeviceError> {
        diesel::insert_into(global_config::table)
            .values(value)
            .returning(global_config::id)
            .get_result(conn)
            .await
            .map_err(diesel_err)
    }

    async fn update(&self, conn: &mut DbConnection, id: i64, value: &GlobalConfigRow) -> Result<(), DeviceError> {
        diesel::update(global_config::table.filter(global_config::id.eq(id)))
            .set(value)
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn by_id(&self, conn: &mut DbConnection, id: i64) -> Result<GlobalConfigRow, DeviceError> {
        global_config::table
            .filter(global_config::id.eq(id))
            .select(GlobalConfigRow::as_select())
            .first(conn)
            .await
            .map_err(diesel_err)
    }

    async fn remove(&self, conn: &mut DbConnection, id: i64) -> Result<(), DeviceError> {
        diesel::delete(global_config::table.filter(global_config::id.eq(id)))
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn count(&self, conn: &mut DbConnection) -> Result<i64, DeviceError> {
        global_config::table.count().get_result(conn).await.map_err(diesel_err)
    }
}

/// Reads `(domain, section, name)` directly from the table every call —
/// never cached, so an operator editing the database by hand takes effect
/// immediately.
pub async fn get(
    conn: &mut DbConnection,
    domain: &str,
    section: &str,
    name: &str,
) -> Result<Option<String>, DeviceError> {
    let row: Option<GlobalConfigRow> = global_config::table
        .filter(global_config::domain.eq(domain))
        .filter(global_config::section.eq(section))
        .filter(global_config::name.eq(name))
        .select(GlobalConfigRow::as_select())
        .first(conn)
        .await
        .optional()
        .map_err(diesel_err)?;
    Ok(row.map(|r| r.value))
}

pub async fn set(
    conn: &mut DbConnection,
    domain: &str,
    section: &str,
    name: &str,
    value: &str,
) -> Result<(), DeviceError> {
    let existing: Option<GlobalConfigRow> = global_config::table
        .filter(global_config::domain.eq(domain))
        .filter(global_config::section.eq(section))
        .filter(global_config::name.eq(name))
        .select(GlobalConfigRow::as_select())
        .first(conn)
        .await
        .optional()
        .map_err(diesel_err)?;

    match existing {
        Some(row) => {
            diesel::update(global_config::table.filter(global_config::id.eq(row.id)))
                .set(global_config::value.eq(value))
                .execute(conn)
                .await
                .map_err(diesel_err)?;
        }
        None => {
            diesel::insert_into(global_config::table)
                .values(GlobalConfigRow {
                    id: 0,
                    domain: domain.to_string(),
                    section: section.to_string(),
                    name: name.to_string(),
                    value: value.to_string(),
                })
                .execute(conn)
                .await
                .map_err(diesel_err)?;
        }
    }
    Ok(())
}
