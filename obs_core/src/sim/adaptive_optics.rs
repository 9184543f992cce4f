use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::device::adaptive_optics::validate_point;
use crate::device::{AdaptiveOptics, Device};
use crate::error::DeviceError;
use crate::events::EventBus;
use crate::image::Point2;
use crate::name::DeviceName;

pub struct SimAdaptiveOptics {
    name: DeviceName,
    events: EventBus,
    position: Mutex<Point2<f64>>,
}

impl SimAdaptiveOptics {
    pub fn new(name: DeviceName) -> Self {
        SimAdaptiveOptics {
            name,
            events: EventBus::default(),
            position: Mutex::new(Point2 { x: 0.0, y: 0.0 }),
        }
    }
}

impl Device for SimAdaptiveOptics {
    fn name(&self) -> &DeviceName {
        &self.name
    }
    fn events(&self) -> &EventBus {
        &self.events
    }
}

#[async_trait]
impl AdaptiveOptics for SimAdaptiveOptics {
    async fn set(&self, point: Point2<f64>) -> Result<(), DeviceError> {
        validate_point(point)?;
        *self.position.lock().await = point;
        Ok(())
    }

    async fn get(&self) -> Point2<f64> {
        *self.position.lock().await
    }

    async fn center(&self) -> Result<(), DeviceError> {
        *self.position.lock().await = Point2 { x: 0.0, y: 0.0 };
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::name::DeviceType;

    #[tokio::test]
    async fn test_set_get_center() {
        let ao = SimAdaptiveOptics::new(DeviceName::new(DeviceType::AdaptiveOptics, vec!["sim".into()]));
        ao.set(Point2 { x: 0.3, y: -0.2 }).await.unwrap();
        assert_eq!(ao.get().await, Point2 { x: 0.3, y: -0.2 });
        ao.center().await.unwrap();
        assert_eq!(ao.get().await, Point2 { x: 0.0, y: 0.0 });
    }

    #[tokio::test]
    async fn test_set_rejects_out_of_range() {
        let ao = SimAdaptiveOptics::new(DeviceName::new(DeviceType::AdaptiveOptics, vec!["sim".into()]));
        assert!(ao.set(Point2 { x: 2.0, y: 0.0 }).await.is_err());
    }
}
