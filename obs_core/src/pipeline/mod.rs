//! Image Pipeline (§4.C): the `Imager` calibration-frame applicator, the
//! streaming worker + bounded `ImageQueue`, and dark/flat acquisition.

pub mod calibration_frames;
pub mod imager;
pub mod stream;

pub use imager::Imager;
pub use stream::{ImageQueue, ImageQueueEntry, Stream};
