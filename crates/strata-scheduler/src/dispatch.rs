// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The executor contract between schedulers and worker threads.
//!
//! A [`Dispatcher`] runs blocking work off the consumer thread and later runs
//! the matching completion on the consumer thread. Streams subscribe a wake
//! handler that the consumer runs whenever a worker pokes its [`WakeHandle`].

use std::fmt;
use std::sync::Arc;

use strata_core::StrataError;
use tokio::sync::oneshot;

/// Blocking portion of a work item. Runs on a worker thread.
pub type BlockingWork = Box<dyn FnOnce() + Send + 'static>;

/// Completion of a work item. Runs on the consumer thread.
pub type AfterWork = Box<dyn FnOnce() + 'static>;

/// Consumer-side handler for a stream's wake-ups.
pub type WakeHandler = Box<dyn FnMut() -> Flow + 'static>;

/// Whether a wake handler expects further wake-ups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Pending,
    Finished,
}

/// Thread-safe handle that schedules a subscribed handler on the consumer.
#[derive(Clone)]
pub struct WakeHandle {
    wake: Arc<dyn Fn() + Send + Sync>,
}

impl WakeHandle {
    pub fn new<F>(wake: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            wake: Arc::new(wake),
        }
    }

    /// Never blocks the caller.
    pub fn wake(&self) {
        (self.wake)();
    }
}

impl fmt::Debug for WakeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeHandle").finish_non_exhaustive()
    }
}

/// Executor collaborator used by every scheduled operation.
pub trait Dispatcher {
    /// Runs `work` off the consumer thread, then `after` on it.
    ///
    /// `after` must run even if `work` panicked.
    fn dispatch(&self, work: BlockingWork, after: AfterWork);

    /// Registers a wake handler. The handler stays registered until it
    /// returns [`Flow::Finished`].
    fn subscribe(&self, handler: WakeHandler) -> WakeHandle;
}

/// Typed dispatch: the value produced by `work` reaches `after`.
///
/// If the worker panics, `after` receives [`StrataError::Internal`] so the
/// caller still gets to release whatever it holds.
pub fn dispatch_with<D, T, W, A>(dispatcher: &D, work: W, after: A)
where
    D: Dispatcher + ?Sized,
    T: Send + 'static,
    W: FnOnce() -> T + Send + 'static,
    A: FnOnce(Result<T, StrataError>) + 'static,
{
    let (tx, mut rx) = oneshot::channel();
    dispatcher.dispatch(
        Box::new(move || {
            let _ = tx.send(work());
        }),
        Box::new(move || {
            let result = rx
                .try_recv()
                .map_err(|_| StrataError::Internal("worker finished without a result".into()));
            after(result);
        }),
    );
}
