//! Guiding core (§4.D): trackers, calibration, the periodic guiding loop,
//! and backlash analysis, built on the device capability traits and event
//! bus in `obs_core`.

pub mod backlash;
pub mod calibration;
pub mod guider;
pub mod tracker;

pub use backlash::{run_backlash_analysis, Axis};
pub use calibration::{run_calibration, solve_calibration, Actuator, GuidePortActuator};
pub use guider::{run_guiding, GuideMatrix, GuiderConfig, ImageSink, TrackingSink};
pub use tracker::Tracker;
