use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::device::{Device, Mount, MountState};
use crate::device::mount::{AzmAlt, RaDec};
use crate::error::DeviceError;
use crate::events::EventBus;
use crate::name::DeviceName;

struct Inner {
    state: MountState,
    ra_dec: RaDec,
}

/// A mount that "slews" instantly in simulated wall-clock terms but runs the
/// move on a background task so `goto` is cancellable mid-flight, mirroring
/// the genuinely-asynchronous contract a real mount has.
pub struct SimMount {
    name: DeviceName,
    events: EventBus,
    inner: std::sync::Arc<Mutex<Inner>>,
}

impl SimMount {
    pub fn new(name: DeviceName) -> Self {
        SimMount {
            name,
            events: EventBus::default(),
            inner: std::sync::Arc::new(Mutex::new(Inner {
                state: MountState::Idle,
                ra_dec: RaDec { ra_hours: 0.0, dec_degrees: 0.0 },
            })),
        }
    }
}

impl Device for SimMount {
    fn name(&self) -> &DeviceName {
        &self.name
    }
    fn events(&self) -> &EventBus {
        &self.events
    }
}

#[async_trait]
impl Mount for SimMount {
    async fn goto(&self, target: RaDec) -> Result<(), DeviceError> {
        {
            let mut inner = self.inner.lock().await;
            inner.state = MountState::Goto;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut inner = self.inner.lock().await;
        if matches!(inner.state, MountState::Goto) {
            inner.ra_dec = target;
            inner.state = MountState::Tracking;
        }
        Ok(())
    }

    async fn cancel(&self) -> Result<(), DeviceError> {
        let mut inner = self.inner.lock().await;
        inner.state = MountState::Idle;
        Ok(())
    }

    async fn state(&self) -> MountState {
        self.inner.lock().await.state
    }

    async fn get_ra_dec(&self) -> RaDec {
        self.inner.lock().await.ra_dec
    }

    async fn get_azm_alt(&self) -> AzmAlt {
        // A flat, non-refracting sim horizon model is enough to exercise
        // the trait's shape; real alt/az conversion belongs in a driver
        // that knows the mount's actual site coordinates.
        AzmAlt { azimuth_degrees: 0.0, altitude_degrees: 0.0 }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::name::DeviceType;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_goto_then_tracking() {
        let mount = SimMount::new(DeviceName::new(DeviceType::Mount, vec!["sim".into()]));
        mount.goto(RaDec { ra_hours: 5.5, dec_degrees: 20.0 }).await.unwrap();
        assert_eq!(mount.state().await, MountState::Tracking);
        assert_eq!(mount.get_ra_dec().await, RaDec { ra_hours: 5.5, dec_degrees: 20.0 });
    }

    #[tokio::test]
    async fn test_cancel_returns_idle() {
        let mount = SimMount::new(DeviceName::new(DeviceType::Mount, vec!["sim".into()]));
        mount.cancel().await.unwrap();
        assert_eq!(mount.state().await, MountState::Idle);
    }
}
