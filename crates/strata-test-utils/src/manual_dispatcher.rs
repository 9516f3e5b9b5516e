// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic dispatcher for scheduler tests.
//!
//! `ManualDispatcher` never runs anything on its own. Dispatched jobs wait
//! until the test runs them, in any order it likes, so overlap and ordering
//! scenarios are reproducible without timing.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use strata_scheduler::{AfterWork, BlockingWork, Dispatcher, Flow, WakeHandle, WakeHandler};

struct Job {
    id: u64,
    work: BlockingWork,
    after: AfterWork,
}

/// A dispatcher driven step by step from the test body.
#[derive(Default)]
pub struct ManualDispatcher {
    jobs: RefCell<VecDeque<Job>>,
    streams: RefCell<HashMap<u64, WakeHandler>>,
    wakes: Arc<Mutex<VecDeque<u64>>>,
    next_id: Cell<u64>,
    dispatched: Cell<usize>,
}

impl ManualDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs dispatched but not yet run.
    pub fn pending_jobs(&self) -> usize {
        self.jobs.borrow().len()
    }

    /// Total jobs ever dispatched.
    pub fn dispatched(&self) -> usize {
        self.dispatched.get()
    }

    /// Ids of waiting jobs, oldest first.
    pub fn job_ids(&self) -> Vec<u64> {
        self.jobs.borrow().iter().map(|job| job.id).collect()
    }

    /// Runs the oldest waiting job. Returns `false` if there was none.
    pub fn run_next(&self) -> bool {
        let job = self.jobs.borrow_mut().pop_front();
        match job {
            Some(job) => {
                self.complete(job);
                true
            }
            None => false,
        }
    }

    /// Runs the waiting job at `index` (0 = oldest), out of order.
    pub fn run_at(&self, index: usize) -> bool {
        let job = self.jobs.borrow_mut().remove(index);
        match job {
            Some(job) => {
                self.complete(job);
                true
            }
            None => false,
        }
    }

    /// Runs jobs until none are waiting, including jobs dispatched by
    /// completions along the way. Returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    /// Delivers pending stream wake-ups on the current thread.
    pub fn pump_wakes(&self) {
        loop {
            let next = self
                .wakes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(id) = next else {
                break;
            };
            let handler = self.streams.borrow_mut().remove(&id);
            if let Some(mut handler) = handler {
                if handler() == Flow::Pending {
                    self.streams.borrow_mut().insert(id, handler);
                }
            }
        }
    }

    /// Streams that have not finished.
    pub fn live_streams(&self) -> usize {
        self.streams.borrow().len()
    }

    fn complete(&self, job: Job) {
        let Job { id, work, after } = job;
        if panic::catch_unwind(AssertUnwindSafe(work)).is_err() {
            tracing::error!(job = id, "blocking work panicked");
        }
        self.pump_wakes();
        after();
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }
}

impl Dispatcher for ManualDispatcher {
    fn dispatch(&self, work: BlockingWork, after: AfterWork) {
        let id = self.next_id();
        self.dispatched.set(self.dispatched.get() + 1);
        self.jobs.borrow_mut().push_back(Job { id, work, after });
    }

    fn subscribe(&self, handler: WakeHandler) -> WakeHandle {
        let id = self.next_id();
        self.streams.borrow_mut().insert(id, handler);
        let wakes = Arc::clone(&self.wakes);
        WakeHandle::new(move || {
            wakes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(id);
        })
    }
}
