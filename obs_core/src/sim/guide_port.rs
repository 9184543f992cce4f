use std::sync::Arc;

use async_trait::async_trait;

use crate::device::guide_port::{Channel, GuidePortDriver, PulseIntegrator};
use crate::device::{Device, GuideBits, GuidePort};
use crate::error::DeviceError;
use crate::events::EventBus;
use crate::name::DeviceName;

struct NullDriver;
impl GuidePortDriver for NullDriver {
    fn start(&self, _channel: Channel) {}
    fn stop(&self, _channel: Channel) {}
}

/// Wraps a [`PulseIntegrator`] driving a no-op backend: a real driver would
/// toggle relay lines here, but the integration math above it is identical.
pub struct SimGuidePort {
    name: DeviceName,
    events: EventBus,
    integrator: PulseIntegrator,
}

impl SimGuidePort {
    pub fn new(name: DeviceName) -> Self {
        SimGuidePort {
            name,
            events: EventBus::default(),
            integrator: PulseIntegrator::spawn(Arc::new(NullDriver)),
        }
    }
}

impl Device for SimGuidePort {
    fn name(&self) -> &DeviceName {
        &self.name
    }
    fn events(&self) -> &EventBus {
        &self.events
    }
}

#[async_trait]
impl GuidePort for SimGuidePort {
    fn active(&self) -> GuideBits {
        self.integrator.active()
    }

    async fn activate(
        &self,
        ra_plus: f64,
        ra_minus: f64,
        dec_plus: f64,
        dec_minus: f64,
    ) -> Result<(), DeviceError> {
        self.integrator.activate(ra_plus, ra_minus, dec_plus, dec_minus)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::name::DeviceType;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_activate_then_clears() {
        let port = SimGuidePort::new(DeviceName::new(DeviceType::GuidePort, vec!["sim".into()]));
        port.activate(0.05, 0.0, 0.0, 0.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(port.active().ra_plus);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!port.active().ra_plus);
    }
}
