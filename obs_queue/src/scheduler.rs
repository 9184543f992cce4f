//! The task queue and its scheduler (§4.E): `submit`/`cancel`/`query`/
//! `remove` plus the single scheduler loop that scans PENDING entries in
//! submission order and spawns executors for unblocked ones.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use obs_core::error::DeviceError;
use obs_core::events::EventBus;

use crate::entry::{TaskId, TaskParameters, TaskQueueEntry, TaskState};

/// Runs one task to completion, observing `cancel` at its suspension
/// points. Implemented by [`crate::executor::Executor`] in production.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, parameters: &TaskParameters, cancel: &AtomicBool) -> TaskState;
}

pub struct TaskQueue {
    entries: Arc<Mutex<BTreeMap<TaskId, TaskQueueEntry>>>,
    cancel_flags: Arc<Mutex<BTreeMap<TaskId, Arc<AtomicBool>>>>,
    next_id: AtomicU64,
    events: EventBus,
}

impl Default for TaskQueue {
    fn default() -> Self {
        TaskQueue {
            entries: Arc::new(Mutex::new(BTreeMap::new())),
            cancel_flags: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(1),
            events: EventBus::default(),
        }
    }
}

impl TaskQueue {
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn submit(&self, parameters: TaskParameters) -> TaskId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry = TaskQueueEntry::new(id, parameters);
        self.entries.lock().await.insert(id, entry);
        id
    }

    /// Cancels a task. A PENDING task is cancelled immediately in place; an
    /// EXECUTING task has its cancel flag raised and transitions to
    /// CANCELLED once its running executor observes the flag and returns.
    pub async fn cancel(&self, id: TaskId) -> Result<(), DeviceError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| DeviceError::NotFound(format!("task {}", id)))?;
        match entry.state {
            TaskState::Pending => {
                entry.transition(TaskState::Cancelled);
                Ok(())
            }
            TaskState::Executing => {
                if let Some(flag) = self.cancel_flags.lock().await.get(&id) {
                    flag.store(true, Ordering::SeqCst);
                }
                Ok(())
            }
            _ => Err(DeviceError::BadState {
                expected: "Pending or Executing".into(),
                found: format!("{:?}", entry.state),
            }),
        }
    }

    pub async fn query(&self, id: TaskId) -> Option<TaskQueueEntry> {
        self.entries.lock().await.get(&id).cloned()
    }

    pub async fn query_all(&self) -> Vec<TaskQueueEntry> {
        self.entries.lock().await.values().cloned().collect()
    }

    pub async fn remove(&self, id: TaskId) -> Result<(), DeviceError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get(&id)
            .ok_or_else(|| DeviceError::NotFound(format!("task {}", id)))?;
        if !entry.state.is_terminal() {
            return Err(DeviceError::BadState {
                expected: "terminal".into(),
                found: format!("{:?}", entry.state),
            });
        }
        entries.remove(&id);
        Ok(())
    }
}

/// Runs the scheduler loop until `stop` is raised, polling every
/// `poll_interval`. One instance per queue (§5).
pub async fn run_scheduler(
    queue: Arc<TaskQueue>,
    runner: Arc<dyn TaskRunner>,
    poll_interval: Duration,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::SeqCst) {
        schedule_pass(&queue, &runner).await;
        tokio::time::sleep(poll_interval).await;
    }
}

async fn schedule_pass(queue: &Arc<TaskQueue>, runner: &Arc<dyn TaskRunner>) {
    let runnable: Vec<TaskId> = {
        let mut entries = queue.entries.lock().await;
        let executing: Vec<TaskParameters> = entries
            .values()
            .filter(|e| matches!(e.state, TaskState::Executing))
            .map(|e| e.parameters.clone())
            .collect();

        let mut pending: Vec<TaskId> = entries
            .iter()
            .filter(|(_, e)| matches!(e.state, TaskState::Pending))
            .map(|(id, _)| *id)
            .collect();
        pending.sort_unstable();

        let mut scheduled_this_pass: Vec<TaskParameters> = Vec::new();
        let mut runnable = Vec::new();
        for id in pending {
            let params = entries[&id].parameters.clone();
            let blocked = executing.iter().any(|e| e.blocks(&params))
                || scheduled_this_pass.iter().any(|e| e.blocks(&params));
            if !blocked {
                scheduled_this_pass.push(params);
                runnable.push(id);
            }
        }

        for id in &runnable {
            entries.get_mut(id).unwrap().transition(TaskState::Executing);
        }
        runnable
    };

    for id in runnable {
        spawn_executor(queue.clone(), runner.clone(), id).await;
    }
}

async fn spawn_executor(queue: Arc<TaskQueue>, runner: Arc<dyn TaskRunner>, id: TaskId) {
    let cancel_flag = Arc::new(AtomicBool::new(false));
    queue.cancel_flags.lock().await.insert(id, cancel_flag.clone());

    let parameters = queue
        .entries
        .lock()
        .await
        .get(&id)
        .expect("entry exists, just transitioned to Executing")
        .parameters
        .clone();

    tokio::spawn(async move {
        let result = runner.run(&parameters, &cancel_flag).await;
        info!(task = id, state = ?result, "task finished executing");

        let mut entries = queue.entries.lock().await;
        if let Some(entry) = entries.get_mut(&id) {
            entry.transition(result);
        }
        queue.cancel_flags.lock().await.remove(&id);
    });
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration as StdDuration;

    use obs_core::image::{Exposure, Rectangle};

    use crate::entry::DeviceSelector;

    struct InstantSuccess;
    #[async_trait]
    impl TaskRunner for InstantSuccess {
        async fn run(&self, _parameters: &TaskParameters, _cancel: &AtomicBool) -> TaskState {
            TaskState::Complete {
                filename: "done.fits".into(),
                width: 4,
                height: 4,
            }
        }
    }

    struct BlockUntilCancelled;
    #[async_trait]
    impl TaskRunner for BlockUntilCancelled {
        async fn run(&self, _parameters: &TaskParameters, cancel: &AtomicBool) -> TaskState {
            loop {
                if cancel.load(Ordering::SeqCst) {
                    return TaskState::Cancelled;
                }
                tokio::time::sleep(StdDuration::from_millis(5)).await;
            }
        }
    }

    fn params(instrument: &str, ccd: usize) -> TaskParameters {
        TaskParameters {
            instrument: instrument.to_string(),
            devices: DeviceSelector { ccd: Some(ccd), ..Default::default() },
            exposure: Exposure::new(Rectangle::full_frame(4, 4), StdDuration::from_millis(1)),
            desired_temperature: None,
            filter: None,
            output_repository: "repo".into(),
            purpose: obs_core::image::Purpose::Light,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_conflicting_tasks_never_run_simultaneously() {
        let queue = Arc::new(TaskQueue::default());
        let runner: Arc<dyn TaskRunner> = Arc::new(BlockUntilCancelled);
        let stop = Arc::new(AtomicBool::new(false));

        let first = queue.submit(params("scope1", 0)).await;
        let second = queue.submit(params("scope1", 0)).await;

        let scheduler = tokio::spawn(run_scheduler(
            queue.clone(),
            runner,
            StdDuration::from_millis(5),
            stop.clone(),
        ));

        tokio::time::sleep(StdDuration::from_millis(30)).await;
        let first_entry = queue.query(first).await.unwrap();
        let second_entry = queue.query(second).await.unwrap();
        assert!(matches!(first_entry.state, TaskState::Executing));
        assert!(matches!(second_entry.state, TaskState::Pending));

        queue.cancel(first).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        let second_entry = queue.query(second).await.unwrap();
        assert!(matches!(second_entry.state, TaskState::Executing));

        stop.store(true, Ordering::SeqCst);
        queue.cancel(second).await.unwrap();
        let _ = scheduler.await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unrelated_tasks_run_concurrently() {
        let queue = Arc::new(TaskQueue::default());
        let runner: Arc<dyn TaskRunner> = Arc::new(InstantSuccess);
        let stop = Arc::new(AtomicBool::new(false));

        let a = queue.submit(params("scope1", 0)).await;
        let b = queue.submit(params("scope2", 0)).await;

        schedule_pass(&queue, &runner).await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let a_entry = queue.query(a).await.unwrap();
        let b_entry = queue.query(b).await.unwrap();
        assert!(matches!(a_entry.state, TaskState::Complete { .. }));
        assert!(matches!(b_entry.state, TaskState::Complete { .. }));
        stop.store(true, Ordering::SeqCst);
    }
}
