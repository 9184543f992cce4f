use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex;

use crate::device::{Ccd, Device, ExposureStatus};
use crate::error::DeviceError;
use crate::events::{Event, EventBus};
use crate::image::{CcdInfo, Exposure, Image, PixelBuffer};
use crate::name::DeviceName;

struct Inner {
    status: ExposureStatus,
    image: Option<Image>,
    streaming: bool,
}

/// A noise-generating sensor: `startExposure` schedules a background task
/// that sleeps for the requested exposure time and then fills a frame with
/// Gaussian-ish read noise around a flat bias level.
pub struct SimCcd {
    name: DeviceName,
    events: EventBus,
    info: CcdInfo,
    inner: Arc<Mutex<Inner>>,
    notify: Arc<tokio::sync::Notify>,
}

impl SimCcd {
    pub fn new(name: DeviceName, info: CcdInfo) -> Self {
        SimCcd {
            name,
            events: EventBus::default(),
            info,
            inner: Arc::new(Mutex::new(Inner {
                status: ExposureStatus::Idle,
                image: None,
                streaming: false,
            })),
            notify: Arc::new(tokio::sync::Notify::new()),
        }
    }

    fn render(info: &CcdInfo, exposure: &Exposure) -> Image {
        let mut rng = rand::thread_rng();
        let n = (info.width * info.height) as usize;
        let bias = 1000.0 + exposure.gain * 10.0;
        let pixels: Vec<u16> = (0..n)
            .map(|_| (bias + rng.gen_range(-20.0..20.0)).clamp(0.0, u16::MAX as f64) as u16)
            .collect();
        let mut image = Image::new(info.width, info.height, PixelBuffer::U16(pixels));
        image.metadata.set(
            "EXPTIME",
            crate::image::MetadataValue::Float(exposure.exposure_time.as_secs_f64()),
            Some("seconds"),
        );
        image
    }
}

impl Device for SimCcd {
    fn name(&self) -> &DeviceName {
        &self.name
    }
    fn events(&self) -> &EventBus {
        &self.events
    }
}

#[async_trait]
impl Ccd for SimCcd {
    fn info(&self) -> &CcdInfo {
        &self.info
    }

    async fn start_exposure(&self, exposure: Exposure) -> Result<(), DeviceError> {
        {
            let mut inner = self.inner.lock().await;
            if !matches!(inner.status, ExposureStatus::Idle | ExposureStatus::Exposed) {
                return Err(DeviceError::BadState {
                    expected: "Idle or Exposed".to_string(),
                    found: format!("{:?}", inner.status),
                });
            }
            inner.status = ExposureStatus::Exposing;
            inner.image = None;
        }

        let inner = self.inner.clone();
        let notify = self.notify.clone();
        let info = self.info.clone();
        let duration = exposure.exposure_time;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let mut guard = inner.lock().await;
            if matches!(guard.status, ExposureStatus::Exposing) {
                guard.image = Some(SimCcd::render(&info, &exposure));
                guard.status = ExposureStatus::Exposed;
            }
            notify.notify_waiters();
        });
        Ok(())
    }

    async fn exposure_status(&self) -> ExposureStatus {
        self.inner.lock().await.status
    }

    async fn wait(&self) -> Result<(), DeviceError> {
        loop {
            let notified = self.notify.notified();
            {
                let inner = self.inner.lock().await;
                match inner.status {
                    ExposureStatus::Exposing => {}
                    ExposureStatus::Broken => {
                        return Err(DeviceError::DeviceFailure("sensor fault".into()))
                    }
                    _ => return Ok(()),
                }
            }
            notified.await;
        }
    }

    async fn get_image(&self) -> Result<Image, DeviceError> {
        let mut inner = self.inner.lock().await;
        if !matches!(inner.status, ExposureStatus::Exposed) {
            return Err(DeviceError::BadState {
                expected: "Exposed".to_string(),
                found: format!("{:?}", inner.status),
            });
        }
        let image = inner.image.take().ok_or(DeviceError::DeviceFailure(
            "exposed but no image buffered".into(),
        ))?;
        inner.status = ExposureStatus::Idle;
        Ok(image)
    }

    async fn cancel_exposure(&self) -> Result<(), DeviceError> {
        let mut inner = self.inner.lock().await;
        inner.status = ExposureStatus::Idle;
        inner.image = None;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn start_stream(&self, exposure: Exposure) -> Result<(), DeviceError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.streaming {
                return Err(DeviceError::BadState {
                    expected: "not streaming".to_string(),
                    found: "streaming".to_string(),
                });
            }
            inner.streaming = true;
            inner.status = ExposureStatus::Streaming;
        }
        let inner = self.inner.clone();
        let info = self.info.clone();
        let events = self.events.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            loop {
                {
                    let guard = inner.lock().await;
                    if !guard.streaming {
                        break;
                    }
                }
                tokio::time::sleep(exposure.exposure_time.max(Duration::from_millis(1))).await;
                let still_streaming = inner.lock().await.streaming;
                if !still_streaming {
                    break;
                }
                let image = SimCcd::render(&info, &exposure);
                events.emit(Event::ImageReady {
                    device: name.clone(),
                    image: Arc::new(image),
                });
            }
        });
        Ok(())
    }

    async fn stop_stream(&self) -> Result<(), DeviceError> {
        let mut inner = self.inner.lock().await;
        inner.streaming = false;
        inner.status = ExposureStatus::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::image::Rectangle;

    fn info() -> CcdInfo {
        CcdInfo {
            width: 4,
            height: 4,
            pixel_width_um: 3.8,
            pixel_height_um: 3.8,
            binning_modes: vec![crate::image::Binning { x: 1, y: 1 }],
            has_shutter: true,
            has_cooler: true,
            has_guide_port: false,
            default_frame: Rectangle::full_frame(4, 4),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_expose_wait_get_image_roundtrip() {
        let ccd = SimCcd::new(
            DeviceName::new(crate::name::DeviceType::Ccd, vec!["sim".into(), "cam0".into()]),
            info(),
        );
        let exposure = Exposure::new(Rectangle::full_frame(4, 4), Duration::from_millis(5));
        ccd.start_exposure(exposure).await.unwrap();
        ccd.wait().await.unwrap();
        assert_eq!(ccd.exposure_status().await, ExposureStatus::Exposed);
        let image = ccd.get_image().await.unwrap();
        assert!(image.size_invariant_holds());
        assert_eq!(ccd.exposure_status().await, ExposureStatus::Idle);
    }

    #[tokio::test]
    async fn test_get_image_before_exposed_errors() {
        let ccd = SimCcd::new(
            DeviceName::new(crate::name::DeviceType::Ccd, vec!["sim".into(), "cam0".into()]),
            info(),
        );
        assert!(matches!(
            ccd.get_image().await,
            Err(DeviceError::BadState { .. })
        ));
    }
}
