use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use obs_core::error::DeviceError;
use obs_core::image::{Image, PixelBuffer, Purpose};

use crate::db::{diesel_err, DbConnection};
use crate::schema::images;

use super::Adapter;

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = images)]
pub struct ImageRow {
    pub id: i64,
    pub uuid: String,
    pub repository: String,
    pub filename: String,
    pub filesize: i64,
    pub purpose: i64,
    pub width: i64,
    pub height: i64,
    pub bitdepth: i64,
    pub pixeltype: String,
    pub ccd_temperature: Option<f64>,
    pub bayer_pattern: Option<String>,
    pub captured_at: String,
}

fn pixel_type_name(pixels: &PixelBuffer) -> (&'static str, i64) {
    match pixels {
        PixelBuffer::U8(_) => ("u8", 8),
        PixelBuffer::U16(_) => ("u16", 16),
        PixelBuffer::F32(_) => ("f32", 32),
        PixelBuffer::Rgb8(_) => ("rgb8", 24),
    }
}

impl ImageRow {
    /// Builds the database row for `image` once it has already been written
    /// to `filename` under `repository`, `filesize` bytes on disk.
    pub fn new(
        repository: String,
        filename: String,
        filesize: u64,
        purpose: Purpose,
        image: &Image,
        ccd_temperature: Option<f64>,
    ) -> Self {
        let (pixeltype, bitdepth) = pixel_type_name(&image.pixels);
        ImageRow {
            id: 0,
            uuid: uuid::Uuid::new_v4().to_string(),
            repository,
            filename,
            filesize: filesize as i64,
            purpose: purpose as i64,
            width: image.width as i64,
            height: image.height as i64,
            bitdepth,
            pixeltype: pixeltype.to_string(),
            ccd_temperature,
            bayer_pattern: image.bayer_pattern.clone(),
            captured_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

pub struct ImageAdapter;

#[async_trait]
impl Adapter<ImageRow> for ImageAdapter {
    fn table_name(&self) -> &'static str {
        "images"
    }

    async fn add(&self, conn: &mut DbConnection, value: &ImageRow) -> Result<i64, DeviceError> {
        diesel::insert_into(images::table)
            .values(value)
            .returning(images::id)
            .get_result(conn)
            .await
            .map_err(diesel_err)
    }

    async fn update(&self, conn: &mut DbConnection, id: i64, value: &ImageRow) -> Result<(), DeviceError> {
        diesel::update(images::table.filter(images::id.eq(id)))
            .set(value)
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn by_id(&self, conn: &mut DbConnection, id: i64) -> Result<ImageRow, DeviceError> {
        images::table
            .filter(images::id.eq(id))
            .select(ImageRow::as_select())
            .first(conn)
            .await
            .map_err(diesel_err)
    }

    /// SQLite cascades the `metadata` rows for `id` once `PRAGMA foreign_keys`
    /// is on (set in [`crate::db::establish_connection`]); this only needs
    /// to delete the image row itself.
    async fn remove(&self, conn: &mut DbConnection, id: i64) -> Result<(), DeviceError> {
        diesel::delete(images::table.filter(images::id.eq(id)))
            .execute(conn)
            .await
            .map_err(diesel_err)?;
        Ok(())
    }

    async fn count(&self, conn: &mut DbConnection) -> Result<i64, DeviceError> {
        images::table
            .count()
            .get_result(conn)
            .await
            .map_err(diesel_err)
    }
}

/// Looks up the row for a saved `(repository, filename)` pair, the natural
/// key a caller holding only a [`crate::repository::FileImageRepository`]
/// filename actually has — `by_id` alone can't support repository-level
/// removal since the caller never sees the row id.
pub async fn find_by_filename(
    conn: &mut DbConnection,
    repository: &str,
    filename: &str,
) -> Result<Option<ImageRow>, DeviceError> {
    images::table
        .filter(images::repository.eq(repository))
        .filter(images::filename.eq(filename))
        .select(ImageRow::as_select())
        .first(conn)
        .await
        .optional()
        .map_err(diesel_err)
}
