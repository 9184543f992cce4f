//! Task queue data model (§3, §4.E): `TaskParameters`/`TaskQueueEntry` and
//! the state machine governing the latter's lifecycle.

use std::time::SystemTime;

use obs_core::image::{Exposure, Purpose};

pub type TaskId = u64;

/// Which device indices, under a task's instrument, this task needs. Two
/// tasks `blocks()` each other iff they share an instrument and at least
/// one non-`None` index here in common.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSelector {
    pub camera: Option<usize>,
    pub ccd: Option<usize>,
    pub cooler: Option<usize>,
    pub filter_wheel: Option<usize>,
    pub mount: Option<usize>,
    pub focuser: Option<usize>,
}

impl DeviceSelector {
    fn shares_device(&self, other: &DeviceSelector) -> bool {
        fn overlaps(a: Option<usize>, b: Option<usize>) -> bool {
            matches!((a, b), (Some(x), Some(y)) if x == y)
        }
        overlaps(self.camera, other.camera)
            || overlaps(self.ccd, other.ccd)
            || overlaps(self.cooler, other.cooler)
            || overlaps(self.filter_wheel, other.filter_wheel)
            || overlaps(self.mount, other.mount)
            || overlaps(self.focuser, other.focuser)
    }
}

#[derive(Debug, Clone)]
pub struct TaskParameters {
    pub instrument: String,
    pub devices: DeviceSelector,
    pub exposure: Exposure,
    pub desired_temperature: Option<f64>,
    pub filter: Option<usize>,
    pub output_repository: String,
    pub purpose: Purpose,
}

impl TaskParameters {
    /// The §8 law `T1.blocks(T2) ⇔ T2.blocks(T1)` holds by construction:
    /// this is a symmetric shared-device-under-shared-instrument check.
    pub fn blocks(&self, other: &TaskParameters) -> bool {
        self.instrument == other.instrument && self.devices.shares_device(&other.devices)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Pending,
    Executing,
    Complete { filename: String, width: u32, height: u32 },
    Cancelled,
    Failed { cause: String },
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Complete { .. } | TaskState::Cancelled | TaskState::Failed { .. }
        )
    }

    /// §8 invariant 6's legal-predecessor table: PENDING may go to
    /// EXECUTING or straight to CANCELLED (submitted-then-cancelled);
    /// EXECUTING may go to any of the three terminal states. Every other
    /// transition, including any transition out of a terminal state, is
    /// illegal.
    fn reachable_from(&self, previous: &TaskState) -> bool {
        matches!(
            (previous, self),
            (TaskState::Pending, TaskState::Executing)
                | (TaskState::Pending, TaskState::Cancelled)
                | (TaskState::Executing, TaskState::Complete { .. })
                | (TaskState::Executing, TaskState::Cancelled)
                | (TaskState::Executing, TaskState::Failed { .. })
        )
    }
}

#[derive(Debug, Clone)]
pub struct TaskQueueEntry {
    pub id: TaskId,
    pub parameters: TaskParameters,
    pub state: TaskState,
    pub last_change: SystemTime,
}

impl TaskQueueEntry {
    pub fn new(id: TaskId, parameters: TaskParameters) -> Self {
        TaskQueueEntry {
            id,
            parameters,
            state: TaskState::Pending,
            last_change: SystemTime::now(),
        }
    }

    /// Transitions to `next`. Panics on an illegal transition or a
    /// transition attempted from a terminal state — a programming error in
    /// the scheduler/executor, not a runtime condition a caller recovers
    /// from, since §8 invariant 6 makes terminal states immutable by
    /// contract.
    pub fn transition(&mut self, next: TaskState) {
        assert!(
            next.reachable_from(&self.state),
            "illegal task transition: {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
        self.last_change = SystemTime::now();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;
    use obs_core::image::Rectangle;

    fn params(instrument: &str, ccd: Option<usize>) -> TaskParameters {
        TaskParameters {
            instrument: instrument.to_string(),
            devices: DeviceSelector { ccd, ..Default::default() },
            exposure: Exposure::new(Rectangle::full_frame(4, 4), Duration::from_secs(1)),
            desired_temperature: None,
            filter: None,
            output_repository: "repo".to_string(),
            purpose: Purpose::Light,
        }
    }

    #[test]
    fn test_blocks_is_symmetric() {
        let a = params("scope1", Some(0));
        let b = params("scope1", Some(0));
        let c = params("scope1", Some(1));
        let d = params("scope2", Some(0));
        assert!(a.blocks(&b));
        assert!(b.blocks(&a));
        assert!(!a.blocks(&c));
        assert!(!a.blocks(&d));
    }

    #[test]
    fn test_legal_transitions() {
        let mut entry = TaskQueueEntry::new(1, params("scope1", Some(0)));
        entry.transition(TaskState::Executing);
        entry.transition(TaskState::Complete {
            filename: "x.fits".into(),
            width: 4,
            height: 4,
        });
        assert!(entry.state.is_terminal());
    }

    #[test]
    #[should_panic]
    fn test_terminal_state_is_immutable() {
        let mut entry = TaskQueueEntry::new(1, params("scope1", Some(0)));
        entry.transition(TaskState::Cancelled);
        entry.transition(TaskState::Executing);
    }

    #[test]
    #[should_panic]
    fn test_cannot_skip_executing() {
        let mut entry = TaskQueueEntry::new(1, params("scope1", Some(0)));
        entry.transition(TaskState::Complete {
            filename: "x.fits".into(),
            width: 4,
            height: 4,
        });
    }
}
