use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use obs_async::{timeout, OnDropFutureExt};

use crate::error::DeviceError;
use crate::image::{CcdInfo, Exposure, Image};

use super::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureStatus {
    Idle,
    Exposing,
    Exposed,
    Cancelling,
    Streaming,
    Broken,
}

/// The exposure/readout capability (§4.B). `startExposure` is only legal
/// from `Idle`/`Exposed`; `getImage` is only legal from `Exposed` and
/// clears the ready image as a side effect.
#[async_trait]
pub trait Ccd: Device {
    fn info(&self) -> &CcdInfo;

    async fn start_exposure(&self, exposure: Exposure) -> Result<(), DeviceError>;

    async fn exposure_status(&self) -> ExposureStatus;

    /// Blocks (asynchronously) until the exposure completes or fails.
    async fn wait(&self) -> Result<(), DeviceError>;

    /// Legal only from `Exposed`; transitions back to `Idle` and clears the
    /// ready image.
    async fn get_image(&self) -> Result<Image, DeviceError>;

    async fn cancel_exposure(&self) -> Result<(), DeviceError>;

    async fn start_stream(&self, exposure: Exposure) -> Result<(), DeviceError>;

    async fn stop_stream(&self) -> Result<(), DeviceError>;
}

/// Convenience wrapper implementing the common "expose, wait with a
/// generous deadline, cancel on drop" pattern every caller of a [`Ccd`]
/// needs: a `timeout(..).on_drop(|| { abort if still exposing })` around
/// the sequence, so that a cancelled future tears down the hardware
/// exposure instead of leaking it.
pub async fn capture_image(ccd: Arc<dyn Ccd>, exposure: Exposure) -> Result<Image, DeviceError> {
    let budget = exposure.exposure_time + Duration::from_secs(10);
    let ccd_for_drop = ccd.clone();

    let fut = async move {
        ccd.start_exposure(exposure).await?;
        ccd.wait().await?;
        ccd.get_image().await
    }
    .on_drop(move || {
        let ccd = ccd_for_drop.clone();
        tokio::spawn(async move {
            if matches!(
                ccd.exposure_status().await,
                ExposureStatus::Exposing | ExposureStatus::Exposed
            ) {
                let _ = ccd.cancel_exposure().await;
            }
        });
    });

    timeout(budget, fut).await.map_err(|_| DeviceError::Timeout)?
}
