use async_trait::async_trait;

use crate::error::DeviceError;

use super::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Idle,
    Aligned,
    Tracking,
    Goto,
    Limit,
    Parked,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaDec {
    pub ra_hours: f64,
    pub dec_degrees: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AzmAlt {
    pub azimuth_degrees: f64,
    pub altitude_degrees: f64,
}

#[async_trait]
pub trait Mount: Device {
    async fn goto(&self, target: RaDec) -> Result<(), DeviceError>;
    async fn cancel(&self) -> Result<(), DeviceError>;
    async fn state(&self) -> MountState;
    async fn get_ra_dec(&self) -> RaDec;
    async fn get_azm_alt(&self) -> AzmAlt;
}
