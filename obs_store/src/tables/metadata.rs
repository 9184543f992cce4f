use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use obs_core::error::DeviceError;
use obs_core::image::{Metadata, MetadataValue};

use crate::db::{diesel_err, DbConnection};
use crate::schema::metadata;

use super::Adapter;

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = metadata)]
pub struct MetadataRow {
    pub id: i64,
    pub image_id: i64,
    pub key: String,
    pub value_kind: i64,
    pub value_str: Option<String>,
    pub value_int: Option<i64>,
    pub value_float: Option<f64>,
    pub comment: Option<String>,
}

const KIND_STR: i64 = 0;
const KIND_INT: i64 = 1;
const KIND_FLOAT: i64 = 2;
const KIND_BOOL: i64 = 3;

impl MetadataRow {
    fn from_card(image_id: i64, key: &str, value: &MetadataValue, comment: Option<&str>) -> Self {
        let (value_kind, value_str, value_int, value_float) = match value {
            MetadataValue::Str(s) => (KIND_STR, Some(s.clone()), None, None),
            MetadataValue::Int(i) => (KIND_INT, None, Some(*i), None),
            MetadataValue::Float(f) => (KIND_FLOAT, None, None, Some(*f)),
            MetadataValue::Bool(b) => (KIND_BOOL, None, Some(*b as i64), None),
        };
        MetadataRow {
            id: 0,
            image_id,
            key: key.to_string(),
            value_kind,
            value_str,
            value_int,
            value_float,
            comment: comment.map(str::to_string),
        }
    }

    fn to_value(&self) -> MetadataValue {
        match self.value_kind {
            KIND_STR => MetadataValue::Str(self.value_str.clone().unwrap_or_default()),
            KIND_INT => MetadataValue::Int(self.value_int.unwrap_or(0)),
            KIND_FLOAT => MetadataValue::Float(self.value_float.unwrap_or(0.0)),
            KIND_BOOL => MetadataValue::Bool(self.value_int.unwrap_or(0) != 0),
            other => panic!("unknown metadata value_kind {}", other),
        }
    }
}

pub struct MetadataAdapter;

#[async_trait]
impl Adapter<MetadataRow> for MetadataAdapter {
    fn table_name(&self) -> &'static str {
        "metadata"
    }

    async fn add(&self, conn: &mut DbConnection, value: &MetadataRow) -> Result<i64, DeviceError> {
        diesel::insert_into(metadata::table)
            .values(value)
            .returning(metadata::id)
            .get_result(conn)
            .await
            .map_err(diesel_err)
    }

    async fn update(&self, conn: &mut DbConnection, id: i64, value: &MetadataRow) -> Result<(), DeviceError> {
        diesel::update(metadata::table.filter(metadata::id.eq(id)))
            .set(value)
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn by_id(&self, conn: &mut DbConnection, id: i64) -> Result<MetadataRow, DeviceError> {
        metadata::table
            .filter(metadata::id.eq(id))
            .select(MetadataRow::as_select())
            .first(conn)
            .await
            .map_err(diesel_err)
    }

    async fn remove(&self, conn: &mut DbConnection, id: i64) -> Result<(), DeviceError> {
        diesel::delete(metadata::table.filter(metadata::id.eq(id)))
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn count(&self, conn: &mut DbConnection) -> Result<i64, DeviceError> {
        metadata::table
            .count()
            .get_result(conn)
            .await
            .map_err(diesel_err)
    }
}

/// Inserts every card of `meta` as a row owned by `image_id`, in the image's
/// own insertion order (so a later `fetch_for_image` round-trips the FITS
/// header order that mattered enough for [`Metadata`] to preserve it).
pub async fn insert_for_image(
    conn: &mut DbConnection,
    image_id: i64,
    meta: &Metadata,
) -> Result<(), DeviceError> {
    for (key, card) in meta.iter() {
        let row = MetadataRow::from_card(image_id, key, &card.value, card.comment.as_deref());
        diesel::insert_into(metadata::table)
            .values(&row)
            .execute(conn)
            .await
            .map_err(diesel_err)?;
    }
    Ok(())
}

pub async fn fetch_for_image(conn: &mut DbConnection, image_id: i64) -> Result<Metadata, DeviceError> {
    let rows: Vec<MetadataRow> = metadata::table
        .filter(metadata::image_id.eq(image_id))
        .select(MetadataRow::as_select())
        .load(conn)
        .await
        .map_err(diesel_err)?;

    let mut out = Metadata::new();
    for row in rows {
        out.set(row.key.clone(), row.to_value(), row.comment.as_deref());
    }
    Ok(out)
}
