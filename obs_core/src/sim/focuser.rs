use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::device::focuser::plan_moves;
use crate::device::{Device, Focuser};
use crate::error::DeviceError;
use crate::events::EventBus;
use crate::name::DeviceName;

/// A focuser that issues the backlash-compensated move sequence `plan_moves`
/// computes, sleeping briefly per step to model motor travel time.
pub struct SimFocuser {
    name: DeviceName,
    events: EventBus,
    min: i32,
    max: i32,
    backlash: i32,
    position: Mutex<i32>,
}

impl SimFocuser {
    pub fn new(name: DeviceName, min: i32, max: i32, backlash: i32, start: i32) -> Self {
        SimFocuser {
            name,
            events: EventBus::default(),
            min,
            max,
            backlash,
            position: Mutex::new(start),
        }
    }
}

impl Device for SimFocuser {
    fn name(&self) -> &DeviceName {
        &self.name
    }
    fn events(&self) -> &EventBus {
        &self.events
    }
}

#[async_trait]
impl Focuser for SimFocuser {
    fn min(&self) -> i32 {
        self.min
    }

    fn max(&self) -> i32 {
        self.max
    }

    async fn current(&self) -> i32 {
        *self.position.lock().await
    }

    fn backlash(&self) -> i32 {
        self.backlash
    }

    async fn moveto(&self, target: i32) -> Result<(), DeviceError> {
        if target < self.min || target > self.max {
            return Err(DeviceError::BadState {
                expected: format!("[{}, {}]", self.min, self.max),
                found: target.to_string(),
            });
        }
        let current = self.current().await;
        for step in plan_moves(current, target, self.backlash) {
            tokio::time::sleep(Duration::from_millis(5)).await;
            *self.position.lock().await = step;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::name::DeviceType;

    #[tokio::test]
    async fn test_moveto_overshoots_then_settles() {
        let focuser = SimFocuser::new(
            DeviceName::new(DeviceType::Focuser, vec!["sim".into()]),
            0,
            10000,
            250,
            5000,
        );
        focuser.moveto(3000).await.unwrap();
        assert_eq!(focuser.current().await, 3000);
    }

    #[tokio::test]
    async fn test_moveto_out_of_range_errors() {
        let focuser = SimFocuser::new(
            DeviceName::new(DeviceType::Focuser, vec!["sim".into()]),
            0,
            10000,
            250,
            5000,
        );
        assert!(matches!(
            focuser.moveto(20000).await,
            Err(DeviceError::BadState { .. })
        ));
    }
}
