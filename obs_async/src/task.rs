use std::{
    future::{self, Future},
    ops::{Deref, DerefMut},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::{
    select,
    sync::mpsc::{self, Receiver, Sender},
};

use crate::{
    notify::{AsyncLockable, Notify},
    MaybeSend,
};

pub trait Joinable<T> {
    fn join(&mut self) -> impl std::future::Future<Output = Result<T, Error>>;
}

pub trait Abortable {
    fn abort(&self);
    fn abort_on_drop(mut self, abort: bool) -> Self
    where
        Self: Sized,
    {
        self.set_abort_on_drop(abort);
        self
    }

    fn set_abort_on_drop(&mut self, abort: bool);
}

pub trait Task<S> {
    type AsyncLock: AsyncLockable<Status<S>>;

    fn status(&self) -> &Arc<Self::AsyncLock>;
}

#[derive(Debug)]
pub enum Error {
    /// The task was spawned and then aborted (or the runtime dropped it)
    /// before producing a value.
    Aborted,
    /// `join()` was called after the task's output had already been taken.
    Completed,
    /// `join()` was called on a task that was constructed via
    /// [`AsyncTask::default`] and never actually spawned.
    Pending,
}

/// The lifecycle of one [`AsyncTask`]: `Pending` (constructed but not yet
/// spawned, via [`AsyncTask::default`]) → `Running(S)` → `Completed` or
/// `Aborted`.
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "S: Serialize", deserialize = "S: Deserialize<'de>"))]
pub enum Status<S> {
    Pending,
    Running(S),
    Completed,
    Aborted,
}

impl<S> Status<S> {
    pub async fn with_state<'a, V, R, F>(&'a self, func: F) -> Result<V, Error>
    where
        F: FnOnce(&S) -> R + 'a,
        R: Future<Output = V> + 'a,
    {
        let future = {
            match self {
                Status::Running(status) => Ok(func(status)),
                Status::Pending => Err(Error::Pending),
                Status::Completed => Err(Error::Completed),
                Status::Aborted => Err(Error::Aborted),
            }
        };
        match future {
            Ok(future) => Ok(future.await),
            Err(e) => Err(e),
        }
    }

    pub fn running(&self) -> bool {
        matches!(self, Status::Running(_))
    }
}

/// A spawned (or not-yet-spawned) unit of async work paired with a
/// [`Notify`]-backed status that can be subscribed to. Built via one of the
/// free `spawn*` functions (immediately running), or via [`Default`] plus a
/// later call to [`AsyncTask::spawn`] (starts `Pending`, the shape
/// [`crate::agent::Agent`] builds on so a caller can observe the
/// not-yet-started state before committing to a `state`/`func` pair).
pub struct AsyncTask<T, S> {
    abort_tx: Sender<()>,
    output_rx: Receiver<Result<T, Error>>,
    status: Arc<Notify<Status<S>>>,
    abort_on_drop: bool,
    timeout: Option<Duration>,
}

impl<T, S> Default for AsyncTask<T, S> {
    /// A task that has not been spawned yet: status is `Pending`, `abort`
    /// is a no-op, and `join` never resolves until [`AsyncTask::spawn`] is
    /// called.
    fn default() -> Self {
        let (abort_tx, _abort_rx) = mpsc::channel::<()>(1);
        let (_output_tx, output_rx) = mpsc::channel::<Result<T, Error>>(1);
        AsyncTask {
            abort_tx,
            output_rx,
            status: Arc::new(Notify::new(Status::Pending)),
            abort_on_drop: false,
            timeout: None,
        }
    }
}

impl<T, S> Drop for AsyncTask<T, S> {
    fn drop(&mut self) {
        if self.abort_on_drop {
            self.abort();
        }
    }
}
impl<A: Abortable, D: Deref<Target = A> + DerefMut> Abortable for D {
    fn abort(&self) {
        self.deref().abort()
    }

    fn set_abort_on_drop(&mut self, abort: bool) {
        self.deref_mut().set_abort_on_drop(abort);
    }
}
impl<T, S> Abortable for AsyncTask<T, S> {
    fn abort(&self) {
        let _ = self.abort_tx.try_send(());
    }

    fn set_abort_on_drop(&mut self, abort: bool) {
        self.abort_on_drop = abort;
    }
}
impl<T, S: Send + Sync + 'static> Task<S> for AsyncTask<T, S> {
    type AsyncLock = crate::notify::Notify<Status<S>>;

    fn status(&self) -> &Arc<Self::AsyncLock> {
        &self.status
    }
}

impl<T, S> Joinable<T> for AsyncTask<T, S> {
    async fn join(&mut self) -> Result<T, Error> {
        match self.output_rx.recv().await {
            Some(r) => r,
            None => Err(Error::Aborted),
        }
    }
}

impl<T, S> AsyncTask<T, S> {
    /// Bounds the wrapped future's run time: once spawned (by
    /// [`AsyncTask::spawn`]), the task reports `Aborted` if the future
    /// hasn't produced a value within `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<T: MaybeSend + 'static, S: MaybeSend + Sync + 'static> AsyncTask<T, S> {
    /// Spawns `func(&state)` on this (possibly `Default`-constructed,
    /// `Pending`) task, driving its existing [`Notify`]-backed status
    /// through `Running(state)` → `Completed`/`Aborted` so subscribers that
    /// attached before the spawn observe every transition.
    pub fn spawn<F, U>(&mut self, state: S, func: F)
    where
        F: FnOnce(&S) -> U,
        U: Future<Output = T> + MaybeSend + 'static,
    {
        let (abort_tx, mut abort_rx) = mpsc::channel::<()>(1);
        let (output_tx, output_rx) = mpsc::channel::<Result<T, Error>>(1);
        let future = func(&state);
        let status = self.status.clone();
        let deadline = self.timeout;

        spawn_platform(async move {
            *status.write().await = Status::Running(state);

            let abort = async move {
                if abort_rx.recv().await.is_none() {
                    future::pending::<()>().await;
                }
            };
            let body = async move {
                match deadline {
                    Some(d) => crate::timeout(d, future).await.ok(),
                    None => Some(future.await),
                }
            };

            let result = select! {
                r = body => match r {
                    Some(r) => {
                        if output_tx.try_send(Ok(r)).is_ok() {
                            Status::Completed
                        } else {
                            Status::Aborted
                        }
                    }
                    None => {
                        let _ = output_tx.try_send(Err(Error::Aborted));
                        Status::Aborted
                    }
                },
                _ = abort => {
                    if output_tx.try_send(Err(Error::Aborted)).is_ok() {
                        Status::Aborted
                    } else {
                        Status::Completed
                    }
                },
            };
            *status.write().await = result;
        });

        self.abort_tx = abort_tx;
        self.output_rx = output_rx;
    }
}

pub fn spawn_with_state<
    S: MaybeSend + Sync + 'static,
    F: FnOnce(&S) -> U,
    U: Future<Output = ()> + MaybeSend + 'static,
>(
    state: S,
    func: F,
) -> AsyncTask<(), S> {
    spawn(state, func)
}

pub fn spawn_with_value<T: MaybeSend + 'static, U: Future<Output = T> + MaybeSend + 'static>(
    future: U,
) -> AsyncTask<T, ()> {
    spawn((), |_| future)
}

pub fn spawn<
    T: MaybeSend + 'static,
    S: MaybeSend + Sync + 'static,
    F: FnOnce(&S) -> U,
    U: Future<Output = T> + MaybeSend + 'static,
>(
    state: S,
    func: F,
) -> AsyncTask<T, S> {
    let (abort_tx, mut abort_rx) = mpsc::channel::<()>(1);
    let (output_tx, output_rx) = mpsc::channel::<Result<T, Error>>(1);
    let future = func(&state);
    let status = Arc::new(Notify::new(Status::Running(state)));

    spawn_platform({
        let status = status.clone();
        async move {
            let abort = async move {
                if let None = abort_rx.recv().await {
                    future::pending::<()>().await;
                }
            };

            let result = select! {
                r = future => {
                    if let Ok(_) = output_tx.try_send(Ok(r)) {
                        Status::Completed
                    } else {
                        Status::Aborted
                    }
                },
                _ = abort => {
                    if let Ok(_) =  output_tx.try_send(Err(Error::Aborted))  {
                        Status::Aborted
                    } else {
                        Status::Completed
                    }
                 },
            };
            *status.write().await = result;
        }
    });

    AsyncTask {
        abort_tx,
        output_rx,
        status,
        abort_on_drop: false,
        timeout: None,
    }
}

#[cfg(not(target_family = "wasm"))]
fn spawn_platform<F: Future<Output = ()> + MaybeSend + 'static>(future: F) {
    tokio::task::spawn(future);
}

#[cfg(target_family = "wasm")]
fn spawn_platform<F: Future<Output = ()> + MaybeSend + 'static>(future: F) {
    wasm_bindgen_futures::spawn_local(future);
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_default_is_pending_until_spawn() {
        let mut task: AsyncTask<u32, u32> = AsyncTask::default();
        {
            let status = task.status().read().await;
            assert!(matches!(&*status, Status::Pending));
        }
        task.spawn(7, |n| {
            let n = *n;
            async move { n * 2 }
        });
        let result = task.join().await.unwrap();
        assert_eq!(result, 14);
    }
}
