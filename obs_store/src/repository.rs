//! Concrete image repository (§6) and tracking-history sink (§4.D.3),
//! backed by the tables in [`crate::tables`]: writing an image to disk
//! and recording it in the database happen as a single operation.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use obs_core::error::DeviceError;
use obs_core::events::TrackingPoint;
use obs_core::image::{Image, MetadataValue, Purpose};
use obs_guide::guider::{ImageSink, TrackingSink};
use obs_queue::{ImageRepository, SavedImage};

use crate::db::DbConnection;
use crate::fits;
use crate::tables::image::{self, ImageAdapter, ImageRow};
use crate::tables::metadata;
use crate::tables::Adapter;
use crate::tables::tracking::append_point;

fn unique_filename() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("{}.fits", &raw[..8])
}

fn ccd_temperature(image: &Image) -> Option<f64> {
    match image.metadata.get("CCD-TEMP").map(|c| &c.value) {
        Some(MetadataValue::Float(f)) => Some(*f),
        Some(MetadataValue::Int(i)) => Some(*i as f64),
        _ => None,
    }
}

/// A filesystem directory of `<repository>/<uuid-prefix>.fits` files plus a
/// SQLite database (conventionally `<basedir>/.files.db`) indexing them.
pub struct FileImageRepository {
    base_dir: PathBuf,
    conn: Mutex<DbConnection>,
}

impl FileImageRepository {
    pub fn new(base_dir: PathBuf, conn: DbConnection) -> Self {
        FileImageRepository {
            base_dir,
            conn: Mutex::new(conn),
        }
    }
}

#[async_trait]
impl ImageRepository for FileImageRepository {
    async fn save(&self, image: &Image, purpose: Purpose, repository: &str) -> Result<SavedImage, DeviceError> {
        let dir = self.base_dir.join(repository);
        tokio::fs::create_dir_all(&dir).await?;

        let filename = unique_filename();
        let bytes = fits::encode(image);
        let filesize = bytes.len() as u64;
        tokio::fs::write(dir.join(&filename), &bytes).await?;

        let row = ImageRow::new(
            repository.to_string(),
            filename.clone(),
            filesize,
            purpose,
            image,
            ccd_temperature(image),
        );

        let mut conn = self.conn.lock().await;
        let image_id = ImageAdapter.add(&mut conn, &row).await?;
        metadata::insert_for_image(&mut conn, image_id, &image.metadata).await?;

        Ok(SavedImage {
            filename,
            width: image.width,
            height: image.height,
        })
    }

    /// §6/§8's *Repository remove* law: unlinks the on-disk file, then
    /// deletes the image row (the `metadata` foreign key cascades, per
    /// `ImageAdapter::remove`'s own doc comment).
    async fn remove(&self, repository: &str, filename: &str) -> Result<(), DeviceError> {
        let mut conn = self.conn.lock().await;
        let row = image::find_by_filename(&mut conn, repository, filename)
            .await?
            .ok_or_else(|| DeviceError::NotFound(format!("image {}/{}", repository, filename)))?;

        let path = self.base_dir.join(repository).join(filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        ImageAdapter.remove(&mut conn, row.id).await
    }
}

/// Persists every [`TrackingPoint`] under a single tracking-run row.
/// [`TrackingSink::record`] is synchronous (the guiding loop never awaits
/// its history sink, per §4.D.3's "never blocks the loop" contract), so the
/// actual write is fire-and-forget on a spawned task — mirroring the
/// cancel-on-drop background-task idiom in `obs_core::device::ccd::capture_image`.
pub struct DbTrackingSink {
    conn: Arc<Mutex<DbConnection>>,
    run_id: i64,
}

impl DbTrackingSink {
    pub fn new(conn: Arc<Mutex<DbConnection>>, run_id: i64) -> Self {
        DbTrackingSink { conn, run_id }
    }
}

impl TrackingSink for DbTrackingSink {
    fn record(&self, point: &TrackingPoint) {
        let conn = self.conn.clone();
        let run_id = self.run_id;
        let point = point.clone();
        tokio::spawn(async move {
            let mut conn = conn.lock().await;
            if let Err(e) = append_point(&mut conn, run_id, &point).await {
                tracing::error!("failed to persist tracking point: {}", e);
            }
        });
    }
}

/// Fire-and-forget preview save: [`ImageSink::save`] is also synchronous,
/// for the same reason as [`DbTrackingSink`].
pub struct FileImageSink {
    repository: Arc<FileImageRepository>,
    repository_name: String,
}

impl FileImageSink {
    pub fn new(repository: Arc<FileImageRepository>, repository_name: String) -> Self {
        FileImageSink {
            repository,
            repository_name,
        }
    }
}

impl ImageSink for FileImageSink {
    fn save(&self, image: &Image) {
        let repository = self.repository.clone();
        let repository_name = self.repository_name.clone();
        let image = image.clone();
        tokio::spawn(async move {
            if let Err(e) = repository.save(&image, Purpose::Guide, &repository_name).await {
                tracing::error!("failed to persist guide image: {}", e);
            }
        });
    }
}
