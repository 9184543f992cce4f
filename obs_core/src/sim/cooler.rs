use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::device::{Cooler, Device};
use crate::error::DeviceError;
use crate::events::{CoolerInfo, Event, EventBus};
use crate::name::DeviceName;

struct Inner {
    set_point: f64,
    actual: f64,
    on: bool,
}

/// A cooler that exponentially relaxes its actual temperature toward the
/// set point once per `tick`, rather than jumping instantly — this gives
/// [`crate::device::cooler::wait_stable`] something real to poll.
pub struct SimCooler {
    name: DeviceName,
    events: EventBus,
    inner: Mutex<Inner>,
}

impl SimCooler {
    pub fn new(name: DeviceName, ambient: f64) -> Self {
        SimCooler {
            name,
            events: EventBus::default(),
            inner: Mutex::new(Inner {
                set_point: ambient,
                actual: ambient,
                on: false,
            }),
        }
    }

    /// Advances the simulated thermal relaxation by one tick, approaching
    /// the set point by a third of the remaining gap. Intended to be
    /// driven by a test or a background task on a fixed interval.
    pub async fn tick(&self) {
        let mut inner = self.inner.lock().await;
        if inner.on {
            let gap = inner.set_point - inner.actual;
            inner.actual += gap / 3.0;
        }
        self.events.emit(Event::CoolerInfo(CoolerInfo {
            set_temperature: inner.set_point,
            actual_temperature: inner.actual,
            is_on: inner.on,
        }));
    }
}

impl Device for SimCooler {
    fn name(&self) -> &DeviceName {
        &self.name
    }
    fn events(&self) -> &EventBus {
        &self.events
    }
}

#[async_trait]
impl Cooler for SimCooler {
    async fn set_temperature(&self, kelvin: f64) -> Result<(), DeviceError> {
        crate::device::cooler::validate_temperature(kelvin)?;
        self.inner.lock().await.set_point = kelvin;
        Ok(())
    }

    async fn get_set_temperature(&self) -> f64 {
        self.inner.lock().await.set_point
    }

    async fn get_actual_temperature(&self) -> f64 {
        self.inner.lock().await.actual
    }

    async fn set_on(&self, on: bool) -> Result<(), DeviceError> {
        self.inner.lock().await.on = on;
        Ok(())
    }

    async fn is_on(&self) -> bool {
        self.inner.lock().await.on
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::name::DeviceType;

    #[tokio::test]
    async fn test_relaxes_toward_set_point() {
        let cooler = SimCooler::new(DeviceName::new(DeviceType::Cooler, vec!["sim".into()]), 20.0);
        cooler.set_temperature(-10.0).await.unwrap();
        cooler.set_on(true).await.unwrap();
        let before = cooler.get_actual_temperature().await;
        for _ in 0..5 {
            cooler.tick().await;
        }
        let after = cooler.get_actual_temperature().await;
        assert!(after < before);
    }
}
