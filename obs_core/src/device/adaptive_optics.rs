use async_trait::async_trait;

use crate::error::DeviceError;
use crate::image::Point2;

use super::Device;

/// Tip/tilt adaptive-optics actuator (§4.B). `set` requires `|x|,|y| <= 1`.
#[async_trait]
pub trait AdaptiveOptics: Device {
    async fn set(&self, point: Point2<f64>) -> Result<(), DeviceError>;
    async fn get(&self) -> Point2<f64>;
    async fn center(&self) -> Result<(), DeviceError>;
}

pub fn validate_point(point: Point2<f64>) -> Result<(), DeviceError> {
    if point.x.abs() > 1.0 || point.y.abs() > 1.0 {
        return Err(DeviceError::BadState {
            expected: "|x|,|y| <= 1".to_string(),
            found: format!("({}, {})", point.x, point.y),
        });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validate_point() {
        assert!(validate_point(Point2 { x: 0.5, y: -0.5 }).is_ok());
        assert!(validate_point(Point2 { x: 1.1, y: 0.0 }).is_err());
    }
}
