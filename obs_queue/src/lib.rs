//! Task queue (§4.E): a persisted, FIFO-fair, conflict-serialized queue of
//! exposure tasks built on `obs_core`'s device capability traits.

pub mod entry;
pub mod executor;
pub mod scheduler;

pub use entry::{DeviceSelector, TaskId, TaskParameters, TaskQueueEntry, TaskState};
pub use executor::{DeviceResolver, DeviceSet, Executor, ImageRepository, SavedImage};
pub use scheduler::{run_scheduler, TaskQueue, TaskRunner};
