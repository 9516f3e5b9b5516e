// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tokio-backed consumer loop.
//!
//! Blocking work runs on tokio's blocking pool. Workers never touch scheduler
//! state: they report back by sending a [`Signal`] over one unbounded channel,
//! and [`EventLoop::run_until_idle`] runs the matching completion or wake
//! handler on the consumer task.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use strata_core::StrataError;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::dispatch::{AfterWork, BlockingWork, Dispatcher, Flow, WakeHandle, WakeHandler};

#[derive(Debug, Clone, Copy)]
enum Signal {
    Done(u64),
    Wake(u64),
}

struct Inner {
    runtime: Handle,
    tx: mpsc::UnboundedSender<Signal>,
    rx: RefCell<Option<mpsc::UnboundedReceiver<Signal>>>,
    next_id: Cell<u64>,
    jobs: RefCell<HashMap<u64, AfterWork>>,
    streams: RefCell<HashMap<u64, WakeHandler>>,
}

/// Single-threaded consumer for scheduled work. Cheap to clone.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<Inner>,
}

impl EventLoop {
    /// Creates a loop bound to the current tokio runtime.
    pub fn new() -> Result<Self, StrataError> {
        let runtime = Handle::try_current()
            .map_err(|e| StrataError::Internal(format!("no tokio runtime: {e}")))?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            inner: Rc::new(Inner {
                runtime,
                tx,
                rx: RefCell::new(Some(rx)),
                next_id: Cell::new(1),
                jobs: RefCell::new(HashMap::new()),
                streams: RefCell::new(HashMap::new()),
            }),
        })
    }

    /// This loop as a shared dispatcher handle.
    pub fn dispatcher(&self) -> Rc<dyn Dispatcher> {
        Rc::new(self.clone())
    }

    /// Blocking jobs whose completion has not run yet.
    pub fn outstanding(&self) -> usize {
        self.inner.jobs.borrow().len()
    }

    /// Subscribed streams that have not finished.
    pub fn live_streams(&self) -> usize {
        self.inner.streams.borrow().len()
    }

    /// Runs completions and wake handlers until no blocking job is
    /// outstanding and every signal already sent has been handled.
    ///
    /// Workers send a stream's final wake before their job's `Done`, so an
    /// idle loop has also delivered everything those jobs produced.
    pub async fn run_until_idle(&self) -> Result<(), StrataError> {
        let mut rx = self
            .inner
            .rx
            .borrow_mut()
            .take()
            .ok_or_else(|| StrataError::Internal("event loop is already running".into()))?;

        loop {
            while let Ok(signal) = rx.try_recv() {
                self.deliver(signal);
            }
            if self.outstanding() == 0 {
                break;
            }
            match rx.recv().await {
                Some(signal) => self.deliver(signal),
                None => break,
            }
        }

        *self.inner.rx.borrow_mut() = Some(rx);
        Ok(())
    }

    fn next_id(&self) -> u64 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }

    fn deliver(&self, signal: Signal) {
        match signal {
            Signal::Done(id) => {
                let after = self.inner.jobs.borrow_mut().remove(&id);
                match after {
                    Some(after) => after(),
                    None => debug!(job = id, "completion for unknown job ignored"),
                }
            }
            Signal::Wake(id) => {
                let handler = self.inner.streams.borrow_mut().remove(&id);
                let Some(mut handler) = handler else {
                    return;
                };
                if handler() == Flow::Pending {
                    self.inner.streams.borrow_mut().insert(id, handler);
                } else {
                    debug!(stream = id, "stream finished");
                }
            }
        }
    }
}

impl Dispatcher for EventLoop {
    fn dispatch(&self, work: BlockingWork, after: AfterWork) {
        let id = self.next_id();
        self.inner.jobs.borrow_mut().insert(id, after);
        let tx = self.inner.tx.clone();
        self.inner.runtime.spawn_blocking(move || {
            if panic::catch_unwind(AssertUnwindSafe(work)).is_err() {
                error!(job = id, "blocking work panicked");
            }
            let _ = tx.send(Signal::Done(id));
        });
    }

    fn subscribe(&self, handler: WakeHandler) -> WakeHandle {
        let id = self.next_id();
        self.inner.streams.borrow_mut().insert(id, handler);
        let tx = self.inner.tx.clone();
        WakeHandle::new(move || {
            let _ = tx.send(Signal::Wake(id));
        })
    }
}
