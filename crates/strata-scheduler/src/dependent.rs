// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Statement-level scheduler.
//!
//! A dependent resource runs one operation at a time and only after its own
//! preparation succeeded. Each operation also holds a shared lease on the
//! parent resource, so the parent's exclusivity barrier and serialize mode
//! apply to statement work too. The dependent keeps its parent alive through
//! an `Rc` for as long as it exists.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use strata_core::StrataError;
use tracing::{debug, warn};

use crate::emitter::ErrorChannel;
use crate::lifecycle::DependentState;
use crate::queue::{discard_all, reject_all, WorkQueue};
use crate::reply::Reply;
use crate::resource::{DrainGuard, Lease, ResourceScheduler};
use crate::work::{Operation, WorkItem};

/// Scheduler for one dependent resource.
pub struct DependentScheduler {
    label: String,
    parent: Rc<ResourceScheduler>,
    state: Cell<DependentState>,
    queue: RefCell<WorkQueue<DependentLease>>,
    errors: Rc<dyn ErrorChannel>,
    drain_guard: DrainGuard,
}

impl DependentScheduler {
    pub fn new(
        label: impl Into<String>,
        parent: Rc<ResourceScheduler>,
        errors: Rc<dyn ErrorChannel>,
    ) -> Rc<Self> {
        Rc::new(Self {
            label: label.into(),
            parent,
            state: Cell::new(DependentState::default()),
            queue: RefCell::new(WorkQueue::new()),
            errors,
            drain_guard: DrainGuard::default(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn parent(&self) -> &Rc<ResourceScheduler> {
        &self.parent
    }

    pub fn state(&self) -> DependentState {
        self.state.get()
    }

    pub fn queued(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Starts `item` now or queues it. Submissions to a finalized resource
    /// are queued and the queue is cleaned immediately.
    pub fn submit(self: &Rc<Self>, item: WorkItem<DependentLease>) {
        let state = self.state.get();
        if state.finalized {
            self.queue.borrow_mut().push(item);
            self.clean_queue();
        } else if state.must_queue() {
            self.queue.borrow_mut().push(item);
            debug!(resource = %self.label, queued = self.queued(), "statement work queued");
        } else {
            self.start(item);
        }
    }

    /// Submits an operation that needs both this resource and a shared lease
    /// on the parent. `begin` runs once both are held.
    ///
    /// If the parent rejects the operation (closed), this resource is
    /// unlocked and drained and the error goes to `reply`, or to this
    /// resource's error channel when `reply` has no callback.
    pub fn submit_with_parent<T, F>(self: &Rc<Self>, reply: Reply<T>, begin: F)
    where
        T: 'static,
        F: FnOnce(Reply<T>, LeasePair) + 'static,
    {
        self.submit(WorkItem::new(reply, true, move |reply, dependent: DependentLease| {
            let Some(scheduler) = dependent.scheduler.clone() else {
                return;
            };
            let acquire = Acquire {
                dependent,
                reply,
                begin,
            };
            scheduler
                .parent
                .submit(WorkItem::from_operation(Box::new(acquire), false));
        }));
    }

    /// Submits the preparation of this resource to the parent as shared
    /// work. `begin` receives the parent lease; its completion must call
    /// [`DependentScheduler::on_prepare_complete`] before releasing it.
    ///
    /// A rejected preparation finalizes this resource.
    pub fn prepare_with<T, F>(self: &Rc<Self>, reply: Reply<T>, begin: F)
    where
        T: 'static,
        F: FnOnce(Reply<T>, Lease) + 'static,
    {
        let prepare = Prepare {
            dependent: Rc::clone(self),
            reply,
            begin,
        };
        self.parent
            .submit(WorkItem::from_operation(Box::new(prepare), false));
    }

    /// Starts the next queued item if allowed, or cleans the queue once
    /// finalized. Nested calls fold into the outermost one.
    pub fn drain(self: &Rc<Self>) {
        self.drain_guard.run(|| self.drain_pass());
    }

    fn drain_pass(self: &Rc<Self>) {
        let state = self.state.get();
        if state.finalized {
            self.clean_queue();
            return;
        }
        if state.must_queue() {
            return;
        }
        let item = self.queue.borrow_mut().pop();
        if let Some(item) = item {
            self.start(item);
        }
    }

    /// Records the outcome of preparation. A failed preparation finalizes
    /// the resource; anything queued is discarded.
    pub fn on_prepare_complete(self: &Rc<Self>, success: bool) {
        if success {
            let mut state = self.state.get();
            state.prepared = true;
            self.state.set(state);
            debug!(resource = %self.label, "statement prepared");
            self.drain();
        } else {
            self.on_finalize();
        }
    }

    /// Marks the resource finalized and resolves its queue. Idempotent.
    pub fn on_finalize(self: &Rc<Self>) {
        let mut state = self.state.get();
        if !state.finalized {
            state.finalized = true;
            self.state.set(state);
            debug!(resource = %self.label, queued = self.queued(), "statement finalized");
        }
        self.clean_queue();
    }

    fn start(self: &Rc<Self>, item: WorkItem<DependentLease>) {
        let mut state = self.state.get();
        assert!(!state.locked, "statement work started while locked");
        state.locked = true;
        self.state.set(state);
        item.begin(DependentLease {
            scheduler: Some(Rc::clone(self)),
        });
    }

    fn unlock(&self) {
        let mut state = self.state.get();
        state.locked = false;
        self.state.set(state);
    }

    fn clean_queue(&self) {
        let items = self.queue.borrow_mut().take_all();
        if items.is_empty() {
            return;
        }
        if self.state.get().prepared {
            let rejection = reject_all(items, &StrataError::AlreadyFinalized);
            if rejection.needs_shared_error() {
                self.errors.emit_error(StrataError::AlreadyFinalized);
            }
        } else {
            let discarded = discard_all(items);
            debug!(resource = %self.label, discarded, "queue of unprepared statement discarded");
        }
    }
}

impl fmt::Debug for DependentScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependentScheduler")
            .field("label", &self.label)
            .field("state", &self.state.get())
            .field("queued", &self.queued())
            .finish()
    }
}

/// Proof that an operation is running on a dependent resource.
#[must_use = "a lease must be released when its operation completes"]
pub struct DependentLease {
    scheduler: Option<Rc<DependentScheduler>>,
}

impl DependentLease {
    pub fn scheduler(&self) -> Option<&Rc<DependentScheduler>> {
        self.scheduler.as_ref()
    }

    /// Unlocks and drains the resource.
    pub fn release(self) {
        if let Some(scheduler) = self.finish() {
            scheduler.drain();
        }
    }

    /// Unlocks without draining.
    pub fn finish(mut self) -> Option<Rc<DependentScheduler>> {
        let scheduler = self.scheduler.take()?;
        scheduler.unlock();
        Some(scheduler)
    }

    /// Ends the resource from inside its own operation. The lock is kept;
    /// queued work is resolved.
    pub fn finalize(mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.on_finalize();
        }
    }
}

impl Drop for DependentLease {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            warn!(resource = %scheduler.label, "statement lease dropped without release");
            scheduler.unlock();
        }
    }
}

impl fmt::Debug for DependentLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependentLease")
            .field("live", &self.scheduler.is_some())
            .finish()
    }
}

/// The leases held by a running statement operation.
#[must_use = "leases must be released when the operation completes"]
#[derive(Debug)]
pub struct LeasePair {
    pub dependent: DependentLease,
    pub parent: Lease,
}

impl LeasePair {
    /// Completion protocol: unlock the statement, settle the parent lease,
    /// then drain the statement and the parent, in that order.
    pub fn release(self) {
        let LeasePair { dependent, parent } = self;
        let dependent = dependent.finish();
        let parent = parent.finish();
        if let Some(dependent) = dependent {
            dependent.drain();
        }
        if let Some(parent) = parent {
            parent.drain();
        }
    }
}

struct Acquire<T, F> {
    dependent: DependentLease,
    reply: Reply<T>,
    begin: F,
}

impl<T, F> Operation<Lease> for Acquire<T, F>
where
    F: FnOnce(Reply<T>, LeasePair),
{
    fn begin(self: Box<Self>, parent: Lease) {
        let Acquire {
            dependent,
            reply,
            begin,
        } = *self;
        begin(reply, LeasePair { dependent, parent });
    }

    fn reject(self: Box<Self>, err: StrataError) -> bool {
        let Acquire {
            dependent, reply, ..
        } = *self;
        let errors = dependent.scheduler().map(|s| Rc::clone(&s.errors));
        if !reply.fail(err.clone()) {
            if let Some(errors) = errors {
                errors.emit_error(err);
            }
        }
        dependent.release();
        true
    }
}

struct Prepare<T, F> {
    dependent: Rc<DependentScheduler>,
    reply: Reply<T>,
    begin: F,
}

impl<T, F> Operation<Lease> for Prepare<T, F>
where
    F: FnOnce(Reply<T>, Lease),
{
    fn begin(self: Box<Self>, parent: Lease) {
        let Prepare { reply, begin, .. } = *self;
        begin(reply, parent);
    }

    fn reject(self: Box<Self>, err: StrataError) -> bool {
        let Prepare {
            dependent, reply, ..
        } = *self;
        if !reply.fail(err.clone()) {
            dependent.errors.emit_error(err);
        }
        dependent.on_prepare_complete(false);
        true
    }
}
