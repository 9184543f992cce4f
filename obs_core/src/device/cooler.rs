use async_trait::async_trait;
use std::time::Duration;

use obs_async::{sleep, timeout};

use crate::error::DeviceError;

use super::Device;

/// Default stability threshold: `|actual - set| < 3 K` (§4.B).
pub const DEFAULT_STABILITY_THRESHOLD_K: f64 = 3.0;

const MIN_TEMPERATURE_K: f64 = 0.0;
const MAX_TEMPERATURE_K: f64 = 350.0;

/// Thermoelectric cooler control (§4.B). Guard rails reject `T <= 0 K` and
/// `T >= 350 K`.
#[async_trait]
pub trait Cooler: Device {
    async fn set_temperature(&self, kelvin: f64) -> Result<(), DeviceError>;
    async fn get_set_temperature(&self) -> f64;
    async fn get_actual_temperature(&self) -> f64;
    async fn set_on(&self, on: bool) -> Result<(), DeviceError>;
    async fn is_on(&self) -> bool;
    fn stability_threshold(&self) -> f64 {
        DEFAULT_STABILITY_THRESHOLD_K
    }
}

pub fn validate_temperature(kelvin: f64) -> Result<(), DeviceError> {
    if kelvin <= MIN_TEMPERATURE_K || kelvin >= MAX_TEMPERATURE_K {
        return Err(DeviceError::BadState {
            expected: format!("({}, {}) K", MIN_TEMPERATURE_K, MAX_TEMPERATURE_K),
            found: format!("{} K", kelvin),
        });
    }
    Ok(())
}

/// `true` once `|actual - set| < threshold`.
pub async fn is_stable(cooler: &dyn Cooler) -> bool {
    (cooler.get_actual_temperature().await - cooler.get_set_temperature().await).abs()
        < cooler.stability_threshold()
}

/// Polls once per second until stable or `wait_timeout` elapses (§5), as a
/// polling loop over an async sleep rather than a condition variable.
pub async fn wait_stable(cooler: &dyn Cooler, wait_timeout: Duration) -> Result<(), DeviceError> {
    timeout(wait_timeout, async {
        loop {
            if is_stable(cooler).await {
                return;
            }
            sleep(Duration::from_secs(1)).await;
        }
    })
    .await
    .map_err(|_| DeviceError::Timeout)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_guard_rails() {
        assert!(validate_temperature(0.0).is_err());
        assert!(validate_temperature(350.0).is_err());
        assert!(validate_temperature(-10.0).is_err());
        assert!(validate_temperature(200.0).is_ok());
    }
}
