// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection-level scheduler.
//!
//! Decides, for every submitted work item, whether it starts now or waits in
//! the resource queue, and starts queued items whenever the lifecycle state
//! changes. Exclusive items hold the lock for their whole flight; shared items
//! are counted in `pending`. The two never overlap.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use strata_core::StrataError;
use tracing::{debug, info, warn};

use crate::emitter::ErrorChannel;
use crate::lifecycle::ResourceState;
use crate::queue::{reject_all, WorkQueue};
use crate::work::WorkItem;

/// Scheduler for one shared resource.
pub struct ResourceScheduler {
    label: String,
    state: Cell<ResourceState>,
    queue: RefCell<WorkQueue<Lease>>,
    errors: Rc<dyn ErrorChannel>,
    drain_guard: DrainGuard,
}

impl ResourceScheduler {
    /// A scheduler for a resource whose open has not completed yet. Work
    /// submitted before then is queued.
    pub fn new(label: impl Into<String>, errors: Rc<dyn ErrorChannel>) -> Rc<Self> {
        Rc::new(Self {
            label: label.into(),
            state: Cell::new(ResourceState::default()),
            queue: RefCell::new(WorkQueue::new()),
            errors,
            drain_guard: DrainGuard::default(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> ResourceState {
        self.state.get()
    }

    pub fn queued(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Starts `item` now or queues it.
    ///
    /// On a closed resource the item is rejected with
    /// [`StrataError::ResourceClosed`] without ever starting; with no
    /// callback to take the error it goes to the error channel.
    pub fn submit(self: &Rc<Self>, mut item: WorkItem<Lease>) {
        let state = self.state.get();
        if state.is_closed() {
            debug!(resource = %self.label, "rejecting work on closed resource");
            if !item.reject(StrataError::ResourceClosed) {
                self.errors.emit_error(StrataError::ResourceClosed);
            }
            return;
        }

        let exclusive = item.is_exclusive() || state.serialize;
        // Nothing overtakes queued work.
        if state.must_queue(exclusive) || self.queued() > 0 {
            if state.serialize {
                item.mark_exclusive();
            }
            self.queue.borrow_mut().push(item);
            debug!(
                resource = %self.label,
                exclusive,
                queued = self.queued(),
                pending = state.pending,
                "work queued"
            );
        } else {
            self.start(item, exclusive);
        }
    }

    /// Starts as much queued work as the current state allows, or fails the
    /// whole queue once the resource is closed.
    ///
    /// Work that completes inside its own `begin` drains again from within
    /// this call; such nested calls are folded into the outermost one, so
    /// the stack stays flat however long the queue is.
    pub fn drain(self: &Rc<Self>) {
        self.drain_guard.run(|| self.drain_pass());
    }

    fn drain_pass(self: &Rc<Self>) {
        if self.state.get().is_closed() {
            let items = self.queue.borrow_mut().take_all();
            if items.is_empty() {
                return;
            }
            let rejection = reject_all(items, &StrataError::ResourceClosed);
            debug!(resource = %self.label, resolved = rejection.resolved, "queue failed after close");
            if rejection.needs_shared_error() {
                self.errors.emit_error(StrataError::ResourceClosed);
            }
            return;
        }

        loop {
            let state = self.state.get();
            if !state.admits_drain() {
                break;
            }
            let head = self.queue.borrow().peek_exclusive();
            let Some(head_exclusive) = head else {
                break;
            };
            let exclusive = head_exclusive || state.serialize;
            if exclusive && state.pending > 0 {
                break;
            }
            let item = self.queue.borrow_mut().pop();
            let Some(item) = item else {
                break;
            };
            self.start(item, exclusive);
            if exclusive {
                break;
            }
        }
    }

    /// Records the outcome of the open transition. A failed open closes the
    /// resource for good.
    pub fn on_open_complete(self: &Rc<Self>, success: bool) {
        let mut state = self.state.get();
        assert!(
            !state.open && !state.locked,
            "open completed on a resource that is not opening"
        );
        if success {
            state.open = true;
            info!(resource = %self.label, "resource opened");
        } else {
            state.locked = true;
            warn!(resource = %self.label, "resource failed to open");
        }
        self.state.set(state);
        self.drain();
    }

    /// Records the outcome of an exclusive close. On success the resource
    /// stays locked for good and queued work fails; otherwise the lock is
    /// released and the resource keeps working.
    pub fn on_close_complete(self: &Rc<Self>, lease: Lease, success: bool) {
        assert!(lease.exclusive, "close must run as an exclusive operation");
        if success {
            let _ = lease.disarm();
            let mut state = self.state.get();
            state.open = false;
            self.state.set(state);
            info!(resource = %self.label, queued = self.queued(), "resource closed");
            self.drain();
        } else {
            lease.release();
        }
    }

    /// Switches serialize mode. Returns the previous setting. Does not drain;
    /// callers leaving serialize mode should drain afterwards.
    pub fn set_serialize(&self, serialize: bool) -> bool {
        let mut state = self.state.get();
        let previous = state.serialize;
        state.serialize = serialize;
        self.state.set(state);
        previous
    }

    fn start(self: &Rc<Self>, item: WorkItem<Lease>, exclusive: bool) {
        let mut state = self.state.get();
        assert!(!state.locked, "work started while resource is locked");
        if exclusive {
            assert!(state.pending == 0, "exclusive work started with shared work in flight");
            state.locked = true;
        } else {
            state.pending += 1;
        }
        self.state.set(state);
        debug!(resource = %self.label, exclusive, pending = state.pending, "work started");
        item.begin(Lease {
            scheduler: Some(Rc::clone(self)),
            exclusive,
        });
    }

    fn settle(&self, exclusive: bool) {
        let mut state = self.state.get();
        if exclusive {
            assert!(state.locked, "exclusive lease released on an unlocked resource");
            state.locked = false;
        } else {
            assert!(state.pending > 0, "shared lease released with nothing pending");
            state.pending -= 1;
        }
        self.state.set(state);
    }
}

/// Folds re-entrant drains into the outermost one.
#[derive(Default)]
pub(crate) struct DrainGuard {
    active: Cell<bool>,
    again: Cell<bool>,
}

impl DrainGuard {
    /// Runs `pass` until no nested call asked for another one. A call made
    /// while a pass is running only records the request.
    pub(crate) fn run(&self, mut pass: impl FnMut()) {
        if self.active.replace(true) {
            self.again.set(true);
            return;
        }
        let _reset = ResetOnDrop(&self.active);
        loop {
            self.again.set(false);
            pass();
            if !self.again.get() {
                break;
            }
        }
    }
}

struct ResetOnDrop<'a>(&'a Cell<bool>);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl fmt::Debug for ResourceScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceScheduler")
            .field("label", &self.label)
            .field("state", &self.state.get())
            .field("queued", &self.queued())
            .finish()
    }
}

/// Proof that a work item is running on a resource.
///
/// Returned to the scheduler when the work item completes. Dropping an
/// unreleased lease settles the bookkeeping without draining.
#[must_use = "a lease must be released when its operation completes"]
pub struct Lease {
    scheduler: Option<Rc<ResourceScheduler>>,
    exclusive: bool,
}

impl Lease {
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn scheduler(&self) -> Option<&Rc<ResourceScheduler>> {
        self.scheduler.as_ref()
    }

    /// Completes the operation and drains the resource.
    pub fn release(self) {
        if let Some(scheduler) = self.finish() {
            scheduler.drain();
        }
    }

    /// Completes the operation without draining. The caller drains the
    /// returned scheduler when it is done with its own bookkeeping.
    pub fn finish(mut self) -> Option<Rc<ResourceScheduler>> {
        let scheduler = self.scheduler.take()?;
        scheduler.settle(self.exclusive);
        Some(scheduler)
    }

    fn disarm(mut self) -> Option<Rc<ResourceScheduler>> {
        self.scheduler.take()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            warn!(resource = %scheduler.label, "lease dropped without release");
            scheduler.settle(self.exclusive);
        }
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("exclusive", &self.exclusive)
            .field("live", &self.scheduler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::Emitter;
    use crate::reply::Reply;

    type Leases = Rc<RefCell<Vec<(u32, Lease)>>>;

    fn scheduler() -> (Rc<ResourceScheduler>, Rc<Emitter<StrataError>>) {
        let errors = Rc::new(Emitter::new("db"));
        let channel: Rc<dyn ErrorChannel> = errors.clone();
        (ResourceScheduler::new("db", channel), errors)
    }

    fn hold(leases: &Leases, tag: u32, exclusive: bool) -> WorkItem<Lease> {
        let leases = Rc::clone(leases);
        WorkItem::new(Reply::<()>::none(), exclusive, move |_reply, lease| {
            leases.borrow_mut().push((tag, lease));
        })
    }

    fn release(leases: &Leases, tag: u32) {
        let lease = {
            let mut held = leases.borrow_mut();
            let index = held.iter().position(|(t, _)| *t == tag).expect("lease held");
            held.remove(index).1
        };
        lease.release();
    }

    fn running(leases: &Leases) -> Vec<u32> {
        leases.borrow().iter().map(|(tag, _)| *tag).collect()
    }

    #[test]
    fn queues_until_open() {
        let (sched, _) = scheduler();
        let leases: Leases = Rc::default();
        sched.submit(hold(&leases, 1, false));
        sched.submit(hold(&leases, 2, false));
        assert!(running(&leases).is_empty());
        assert_eq!(sched.queued(), 2);

        sched.on_open_complete(true);
        assert_eq!(running(&leases), vec![1, 2]);
        assert_eq!(sched.state().pending, 2);
    }

    #[test]
    fn exclusive_waits_then_blocks_later_work() {
        let (sched, _) = scheduler();
        sched.on_open_complete(true);
        let leases: Leases = Rc::default();
        sched.submit(hold(&leases, 1, false));
        sched.submit(hold(&leases, 2, true));
        sched.submit(hold(&leases, 3, false));
        assert_eq!(running(&leases), vec![1]);

        release(&leases, 1);
        assert_eq!(running(&leases), vec![2]);
        assert!(sched.state().locked);

        release(&leases, 2);
        assert_eq!(running(&leases), vec![3]);
        assert!(!sched.state().locked);
    }

    #[test]
    fn new_shared_work_does_not_overtake_running_exclusive() {
        let (sched, _) = scheduler();
        sched.on_open_complete(true);
        let leases: Leases = Rc::default();
        sched.submit(hold(&leases, 1, true));
        sched.submit(hold(&leases, 2, false));
        assert_eq!(running(&leases), vec![1]);
        assert_eq!(sched.state().pending, 0);
        release(&leases, 1);
        assert_eq!(running(&leases), vec![2]);
    }

    #[test]
    fn failed_open_closes_and_fails_queue() {
        let (sched, errors) = scheduler();
        let results = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&results);
        sched.submit(WorkItem::new(
            Reply::<()>::new(move |r| sink.borrow_mut().push(r)),
            false,
            |_reply, _lease| panic!("must not start"),
        ));
        let unhandled = Rc::new(Cell::new(0));
        let counter = Rc::clone(&unhandled);
        errors.on(move |_| counter.set(counter.get() + 1));

        sched.on_open_complete(false);
        assert!(sched.state().is_closed());
        assert!(matches!(
            results.borrow().as_slice(),
            [Err(StrataError::ResourceClosed)]
        ));
        assert_eq!(unhandled.get(), 0);
    }

    #[test]
    fn close_failure_keeps_resource_usable() {
        let (sched, _) = scheduler();
        sched.on_open_complete(true);
        let leases: Leases = Rc::default();
        sched.submit(hold(&leases, 1, true));
        sched.submit(hold(&leases, 2, false));
        let lease = leases.borrow_mut().pop().expect("close lease").1;
        sched.on_close_complete(lease, false);
        assert!(sched.state().open);
        assert_eq!(running(&leases), vec![2]);
    }

    #[test]
    fn set_serialize_reports_previous() {
        let (sched, _) = scheduler();
        assert!(!sched.set_serialize(true));
        assert!(sched.set_serialize(false));
        assert!(!sched.state().serialize);
    }

    #[test]
    fn synchronous_exclusive_work_drains_without_recursion() {
        let (sched, _) = scheduler();
        let done = Rc::new(Cell::new(0u32));
        for _ in 0..50_000 {
            let done = Rc::clone(&done);
            sched.submit(WorkItem::new(Reply::<()>::none(), true, move |_reply, lease: Lease| {
                done.set(done.get() + 1);
                lease.release();
            }));
        }
        sched.on_open_complete(true);
        assert_eq!(done.get(), 50_000);
        assert_eq!(sched.queued(), 0);
        assert!(!sched.state().locked);
    }

    #[test]
    fn successful_close_fails_remaining_queue() {
        let (sched, _) = scheduler();
        let results = Rc::new(RefCell::new(Vec::new()));
        let close_lease: Rc<RefCell<Option<Lease>>> = Rc::default();
        let slot = Rc::clone(&close_lease);
        sched.submit(WorkItem::new(Reply::<()>::none(), true, move |_reply, lease| {
            *slot.borrow_mut() = Some(lease);
        }));
        let sink = Rc::clone(&results);
        sched.submit(WorkItem::new(
            Reply::<()>::new(move |r| sink.borrow_mut().push(r)),
            false,
            |_reply, _lease| panic!("must not start"),
        ));
        sched.on_open_complete(true);
        let lease = close_lease.borrow_mut().take().expect("close lease");
        sched.on_close_complete(lease, true);
        assert!(matches!(
            results.borrow().as_slice(),
            [Err(StrataError::ResourceClosed)]
        ));
    }

    #[test]
    fn dropped_lease_settles_bookkeeping() {
        let (sched, _) = scheduler();
        sched.on_open_complete(true);
        let leases: Leases = Rc::default();
        sched.submit(hold(&leases, 1, false));
        assert_eq!(sched.state().pending, 1);
        leases.borrow_mut().clear();
        assert_eq!(sched.state().pending, 0);
    }
}
