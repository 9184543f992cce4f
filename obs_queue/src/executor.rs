//! Task executor (§4.E): acquires devices, drives cooler/filter-wheel/
//! exposure, and stores the result. Resource release on every exit path is
//! structural — `DeviceSet`'s `Arc` clones simply drop when `run_inner`
//! returns, on whichever path it returns, rather than needing a manual
//! `finally`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::error;

use obs_core::device::ccd::capture_image;
use obs_core::device::cooler::wait_stable;
use obs_core::device::filter_wheel::FilterWheelState;
use obs_core::device::{Ccd, Cooler, FilterWheel};
use obs_core::error::DeviceError;
use obs_core::image::{Image, MetadataValue, Purpose};

use crate::entry::{TaskParameters, TaskState};
use crate::scheduler::TaskRunner;

/// The concrete device handles one task execution needs, already resolved
/// from the task's instrument + [`crate::entry::DeviceSelector`] by the
/// caller — that resolution step belongs to the instrument/locator glue,
/// not to the generic executor.
pub struct DeviceSet {
    pub ccd: Arc<dyn Ccd>,
    pub cooler: Option<Arc<dyn Cooler>>,
    pub filter_wheel: Option<Arc<dyn FilterWheel>>,
}

/// Resolves a task's instrument + device selector into concrete device
/// handles.
#[async_trait]
pub trait DeviceResolver: Send + Sync {
    async fn resolve(&self, parameters: &TaskParameters) -> Result<DeviceSet, DeviceError>;
}

pub struct SavedImage {
    pub filename: String,
    pub width: u32,
    pub height: u32,
}

/// Stores a completed exposure into whatever image repository the
/// deployment configures (§4.G/§6's filesystem-plus-SQLite repository in
/// production; an in-memory stub in tests).
#[async_trait]
pub trait ImageRepository: Send + Sync {
    async fn save(&self, image: &Image, purpose: Purpose, repository: &str) -> Result<SavedImage, DeviceError>;

    /// Deletes the on-disk file and its database row (cascading to
    /// metadata rows); §6/§8's *Repository remove* law.
    async fn remove(&self, repository: &str, filename: &str) -> Result<(), DeviceError>;
}

pub struct Executor<R, I> {
    pub resolver: Arc<R>,
    pub repository: Arc<I>,
    pub cooler_wait: Duration,
    pub filter_wheel_wait: Duration,
}

#[async_trait]
impl<R: DeviceResolver + 'static, I: ImageRepository + 'static> TaskRunner for Executor<R, I> {
    async fn run(&self, parameters: &TaskParameters, cancel: &AtomicBool) -> TaskState {
        match self.run_inner(parameters, cancel).await {
            Ok(state) => state,
            Err(DeviceError::Cancelled) => TaskState::Cancelled,
            Err(e) => {
                error!(error = %e, "task execution failed");
                TaskState::Failed { cause: e.to_string() }
            }
        }
    }
}

impl<R: DeviceResolver + 'static, I: ImageRepository + 'static> Executor<R, I> {
    async fn run_inner(
        &self,
        parameters: &TaskParameters,
        cancel: &AtomicBool,
    ) -> Result<TaskState, DeviceError> {
        let devices = self.resolver.resolve(parameters).await?;

        if cancel.load(Ordering::SeqCst) {
            return Err(DeviceError::Cancelled);
        }

        if let (Some(cooler), Some(target)) = (&devices.cooler, parameters.desired_temperature) {
            cooler.set_temperature(target).await?;
            wait_stable(cooler.as_ref(), self.cooler_wait).await?;
        }

        if let (Some(wheel), Some(index)) = (&devices.filter_wheel, parameters.filter) {
            wheel.select(index).await?;
            wait_filter_idle(wheel.as_ref(), self.filter_wheel_wait).await?;
        }

        if cancel.load(Ordering::SeqCst) {
            return Err(DeviceError::Cancelled);
        }

        let image_future = capture_image(devices.ccd.clone(), parameters.exposure.clone());
        tokio::pin!(image_future);

        let mut image = tokio::select! {
            result = &mut image_future => result?,
            _ = wait_for_cancel(cancel) => {
                let _ = devices.ccd.cancel_exposure().await;
                return Err(DeviceError::Cancelled);
            }
        };

        image.metadata.set(
            "EXPTIME",
            MetadataValue::Float(parameters.exposure.exposure_time.as_secs_f64()),
            Some("seconds"),
        );
        if let (Some(wheel), Some(index)) = (&devices.filter_wheel, parameters.filter) {
            if let Some(name) = wheel.filter_name(index) {
                image.metadata.set("FILTER", MetadataValue::Str(name), None);
            }
        }
        if let Some(cooler) = &devices.cooler {
            let actual = cooler.get_actual_temperature().await;
            image.metadata.set("CCD-TEMP", MetadataValue::Float(actual), Some("degrees C"));
        }
        if let Some(target) = parameters.desired_temperature {
            image.metadata.set("SET-TEMP", MetadataValue::Float(target), Some("degrees C"));
        }

        let saved = self
            .repository
            .save(&image, parameters.purpose, &parameters.output_repository)
            .await?;

        Ok(TaskState::Complete {
            filename: saved.filename,
            width: saved.width,
            height: saved.height,
        })
    }
}

async fn wait_for_cancel(cancel: &AtomicBool) {
    loop {
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn wait_filter_idle(wheel: &dyn FilterWheel, timeout: Duration) -> Result<(), DeviceError> {
    obs_async::timeout(timeout, async {
        loop {
            if wheel.state().await != FilterWheelState::Moving {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .map_err(|_| DeviceError::Timeout)
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use obs_core::device::{Device, ExposureStatus};
    use obs_core::events::EventBus;
    use obs_core::image::{CcdInfo, Exposure, PixelBuffer, Rectangle};
    use obs_core::name::{DeviceName, DeviceType};

    use crate::entry::DeviceSelector;

    struct StubCcd {
        name: DeviceName,
        events: EventBus,
        info: CcdInfo,
    }

    impl Device for StubCcd {
        fn name(&self) -> &DeviceName {
            &self.name
        }
        fn events(&self) -> &EventBus {
            &self.events
        }
    }

    #[async_trait]
    impl Ccd for StubCcd {
        fn info(&self) -> &CcdInfo {
            &self.info
        }
        async fn start_exposure(&self, _exposure: Exposure) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn exposure_status(&self) -> ExposureStatus {
            ExposureStatus::Exposed
        }
        async fn wait(&self) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn get_image(&self) -> Result<Image, DeviceError> {
            Ok(Image::new(4, 4, PixelBuffer::U16(vec![100; 16])))
        }
        async fn cancel_exposure(&self) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn start_stream(&self, _exposure: Exposure) -> Result<(), DeviceError> {
            Err(DeviceError::CannotStream("not supported".into()))
        }
        async fn stop_stream(&self) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    struct FixedResolver(Arc<StubCcd>);
    #[async_trait]
    impl DeviceResolver for FixedResolver {
        async fn resolve(&self, _parameters: &TaskParameters) -> Result<DeviceSet, DeviceError> {
            Ok(DeviceSet {
                ccd: self.0.clone(),
                cooler: None,
                filter_wheel: None,
            })
        }
    }

    struct InMemoryRepository(Mutex<Vec<String>>);
    #[async_trait]
    impl ImageRepository for InMemoryRepository {
        async fn save(
            &self,
            image: &Image,
            _purpose: Purpose,
            _repository: &str,
        ) -> Result<SavedImage, DeviceError> {
            let filename = format!("frame-{:04}.fits", self.0.lock().unwrap().len());
            self.0.lock().unwrap().push(filename.clone());
            Ok(SavedImage {
                filename,
                width: image.width,
                height: image.height,
            })
        }

        async fn remove(&self, _repository: &str, filename: &str) -> Result<(), DeviceError> {
            let mut saved = self.0.lock().unwrap();
            let before = saved.len();
            saved.retain(|f| f != filename);
            if saved.len() == before {
                return Err(DeviceError::NotFound(format!("image {}", filename)));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_executor_completes_with_saved_filename() {
        let ccd = Arc::new(StubCcd {
            name: DeviceName::new(DeviceType::Ccd, vec!["stub".into()]),
            events: EventBus::default(),
            info: CcdInfo {
                width: 4,
                height: 4,
                pixel_width_um: 5.0,
                pixel_height_um: 5.0,
                binning_modes: vec![],
                has_shutter: false,
                has_cooler: false,
                has_guide_port: false,
                default_frame: Rectangle::full_frame(4, 4),
            },
        });
        let executor = Executor {
            resolver: Arc::new(FixedResolver(ccd)),
            repository: Arc::new(InMemoryRepository(Mutex::new(Vec::new()))),
            cooler_wait: Duration::from_secs(1),
            filter_wheel_wait: Duration::from_secs(1),
        };

        let parameters = TaskParameters {
            instrument: "scope1".into(),
            devices: DeviceSelector { ccd: Some(0), ..Default::default() },
            exposure: Exposure::new(Rectangle::full_frame(4, 4), Duration::from_millis(1)),
            desired_temperature: None,
            filter: None,
            output_repository: "repo".into(),
            purpose: Purpose::Light,
        };
        let cancel = AtomicBool::new(false);
        let state = executor.run(&parameters, &cancel).await;
        assert!(matches!(state, TaskState::Complete { filename, .. } if filename == "frame-0000.fits"));
    }

    #[tokio::test]
    async fn test_repository_remove_deletes_and_then_fails_not_found() {
        let repository = InMemoryRepository(Mutex::new(Vec::new()));
        let image = Image::new(1, 1, PixelBuffer::U16(vec![0]));
        let saved = repository.save(&image, Purpose::Light, "repo").await.unwrap();

        repository.remove("repo", &saved.filename).await.unwrap();
        assert!(matches!(
            repository.remove("repo", &saved.filename).await,
            Err(DeviceError::NotFound(_))
        ));
    }
}
