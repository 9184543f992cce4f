//! In-process simulator backends (§4.B's "Non-goals" excludes *vendor SDK*
//! integrations, not simulation — these give every capability trait a
//! working, deterministic implementation usable in tests and demos without
//! hardware).

pub mod adaptive_optics;
pub mod ccd;
pub mod cooler;
pub mod filter_wheel;
pub mod focuser;
pub mod guide_port;
pub mod locator;
pub mod mount;

pub use adaptive_optics::SimAdaptiveOptics;
pub use ccd::SimCcd;
pub use cooler::SimCooler;
pub use filter_wheel::SimFilterWheel;
pub use focuser::SimFocuser;
pub use guide_port::SimGuidePort;
pub use locator::{SimLocator, SimLocatorFactory};
pub use mount::SimMount;
