use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::device::filter_wheel::{guard_select, DEFAULT_READINESS_TIMEOUT_SECS};
use crate::device::{Device, FilterWheel, FilterWheelState};
use crate::error::DeviceError;
use crate::events::EventBus;
use crate::name::DeviceName;

struct Inner {
    position: usize,
    state: FilterWheelState,
}

/// A filter wheel whose `select` sleeps a fixed settle time before
/// reporting `Idle` again, modelling the mechanical travel every real
/// wheel needs.
pub struct SimFilterWheel {
    name: DeviceName,
    events: EventBus,
    filters: Vec<String>,
    settle_time: Duration,
    inner: Mutex<Inner>,
}

impl SimFilterWheel {
    pub fn new(name: DeviceName, filters: Vec<String>) -> Self {
        SimFilterWheel {
            name,
            events: EventBus::default(),
            filters,
            settle_time: Duration::from_millis(200),
            inner: Mutex::new(Inner {
                position: 0,
                state: FilterWheelState::Idle,
            }),
        }
    }
}

impl Device for SimFilterWheel {
    fn name(&self) -> &DeviceName {
        &self.name
    }
    fn events(&self) -> &EventBus {
        &self.events
    }
}

#[async_trait]
impl FilterWheel for SimFilterWheel {
    fn n_filters(&self) -> usize {
        self.filters.len()
    }

    async fn current_position(&self) -> usize {
        self.inner.lock().await.position
    }

    fn filter_name(&self, index: usize) -> Option<String> {
        self.filters.get(index).cloned()
    }

    async fn select(&self, index: usize) -> Result<(), DeviceError> {
        if index >= self.filters.len() {
            return Err(DeviceError::NotFound(format!("filter index {}", index)));
        }
        {
            let inner = self.inner.lock().await;
            guard_select(inner.state)?;
        }
        self.inner.lock().await.state = FilterWheelState::Moving;

        let deadline = self.settle_time.min(Duration::from_secs(DEFAULT_READINESS_TIMEOUT_SECS));
        tokio::time::sleep(deadline).await;

        let mut inner = self.inner.lock().await;
        inner.position = index;
        inner.state = FilterWheelState::Idle;
        Ok(())
    }

    async fn state(&self) -> FilterWheelState {
        self.inner.lock().await.state
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::name::DeviceType;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_select_settles_then_idle() {
        let wheel = SimFilterWheel::new(
            DeviceName::new(DeviceType::FilterWheel, vec!["sim".into()]),
            vec!["Ha".into(), "OIII".into(), "SII".into()],
        );
        wheel.select(2).await.unwrap();
        assert_eq!(wheel.current_position().await, 2);
        assert_eq!(wheel.state().await, FilterWheelState::Idle);
    }

    #[tokio::test]
    async fn test_select_out_of_range_errors() {
        let wheel = SimFilterWheel::new(
            DeviceName::new(DeviceType::FilterWheel, vec!["sim".into()]),
            vec!["Ha".into()],
        );
        assert!(matches!(wheel.select(5).await, Err(DeviceError::NotFound(_))));
    }
}
