use async_trait::async_trait;

use crate::error::DeviceError;

use super::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterWheelState {
    Idle,
    Moving,
    Unknown,
}

/// §9's Open Question on filter-wheel readiness timeout is resolved at 20 s
/// default (the middle of the 10/20/30 s range observed across callers).
pub const DEFAULT_READINESS_TIMEOUT_SECS: u64 = 20;

/// Filter selection (§4.B). `select` is asynchronous; the wheel's own task
/// reports completion via the device's event bus. Issuing `select` while
/// `Moving` fails with `BadState`.
#[async_trait]
pub trait FilterWheel: Device {
    fn n_filters(&self) -> usize;
    async fn current_position(&self) -> usize;
    fn filter_name(&self, index: usize) -> Option<String>;
    async fn select(&self, index: usize) -> Result<(), DeviceError>;
    async fn state(&self) -> FilterWheelState;
}

pub async fn select_by_name(
    wheel: &dyn FilterWheel,
    name: &str,
) -> Result<(), DeviceError> {
    let index = (0..wheel.n_filters())
        .find(|&i| wheel.filter_name(i).as_deref() == Some(name))
        .ok_or_else(|| DeviceError::NotFound(format!("filter {}", name)))?;
    wheel.select(index).await
}

pub fn guard_select(state: FilterWheelState) -> Result<(), DeviceError> {
    if state == FilterWheelState::Moving {
        return Err(DeviceError::BadState {
            expected: "Idle or Unknown".to_string(),
            found: "Moving".to_string(),
        });
    }
    Ok(())
}
