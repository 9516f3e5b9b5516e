// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Streaming aggregator: bridges a worker-thread producer to in-order,
//! exactly-once delivery on the consumer.
//!
//! The producer pushes into a buffer under a short-held mutex and wakes the
//! consumer. The consumer swaps the whole buffer out and reads the terminal
//! outcome in the same critical section, then runs callbacks with no lock
//! held. Reading both together is what makes "done and drained" reliable.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use strata_core::StrataError;

use crate::dispatch::{Dispatcher, Flow, WakeHandle};
use crate::reply::Reply;

struct Shared<T> {
    buffer: Vec<T>,
    outcome: Option<Result<(), StrataError>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Worker-side end of a stream. `Send`, so it can move into blocking work or
/// an engine hook.
pub struct Producer<T> {
    shared: Arc<Mutex<Shared<T>>>,
    wake: WakeHandle,
    finished: bool,
}

impl<T> Producer<T> {
    /// Appends one item and wakes the consumer. Never blocks on the consumer.
    pub fn push(&self, item: T) {
        lock(&self.shared).buffer.push(item);
        self.wake.wake();
    }

    /// Ends the stream with `outcome`.
    pub fn finish(mut self, outcome: Result<(), StrataError>) {
        self.complete(outcome);
    }

    fn complete(&mut self, outcome: Result<(), StrataError>) {
        if self.finished {
            return;
        }
        self.finished = true;
        lock(&self.shared).outcome = Some(outcome);
        self.wake.wake();
    }
}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        self.complete(Err(StrataError::Internal("stream producer dropped".into())));
    }
}

/// Opens a stream on `dispatcher`.
///
/// `on_item` runs once per produced item, in production order.
/// `on_complete` runs exactly once, after the last item, with the number of
/// items delivered or the terminal error. A terminal error that
/// `on_complete` has no callback for goes to `fallback`.
pub fn stream<D, T, I, E>(
    dispatcher: &D,
    mut on_item: I,
    on_complete: Reply<usize>,
    fallback: E,
) -> Producer<T>
where
    D: Dispatcher + ?Sized,
    T: Send + 'static,
    I: FnMut(T) + 'static,
    E: FnOnce(StrataError) + 'static,
{
    let shared = Arc::new(Mutex::new(Shared {
        buffer: Vec::new(),
        outcome: None,
    }));
    let consumer = Arc::clone(&shared);
    let mut delivered = 0usize;
    let mut terminal = Some((on_complete, fallback));

    let wake = dispatcher.subscribe(Box::new(move || {
        let (items, outcome) = {
            let mut guard = lock(&consumer);
            (std::mem::take(&mut guard.buffer), guard.outcome.take())
        };
        for item in items {
            on_item(item);
            delivered += 1;
        }
        let Some(outcome) = outcome else {
            return Flow::Pending;
        };
        if let Some((on_complete, fallback)) = terminal.take() {
            if let Some(err) = on_complete.send(outcome.map(|()| delivered)) {
                fallback(err);
            }
        }
        Flow::Finished
    }));

    Producer {
        shared,
        wake,
        finished: false,
    }
}
