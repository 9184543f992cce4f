//! Polymorphic capability contracts (§4.B).
//!
//! Per §9's first redesign flag, there is no `Device` base class with
//! `Camera`/`Ccd`/… subclasses. Instead each capability is its own small
//! trait; a concrete driver struct implements whichever subset it actually
//! supports. Every device additionally exposes its [`DeviceName`], a
//! [`Properties`](crate::properties::Properties) snapshot, and an
//! [`EventBus`](crate::events::EventBus) it pushes state-change events to.

pub mod adaptive_optics;
pub mod ccd;
pub mod cooler;
pub mod filter_wheel;
pub mod focuser;
pub mod guide_port;
pub mod mount;

use crate::events::EventBus;
use crate::name::DeviceName;

/// Identity and observability shared by every device capability.
pub trait Device: Send + Sync {
    fn name(&self) -> &DeviceName;
    fn events(&self) -> &EventBus;
}

pub use adaptive_optics::AdaptiveOptics;
pub use ccd::{Ccd, ExposureStatus};
pub use cooler::Cooler;
pub use filter_wheel::{FilterWheel, FilterWheelState};
pub use focuser::Focuser;
pub use guide_port::{GuideBits, GuidePort};
pub use mount::{Mount, MountState, RaDec};
