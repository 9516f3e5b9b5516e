// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the resource and statement schedulers.
//!
//! Work runs on a `ManualDispatcher`, so every test decides exactly when each
//! blocking job finishes. A `Probe` watches every start and completion and
//! counts exclusivity violations.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use proptest::prelude::*;
use strata_core::StrataError;
use strata_scheduler::{
    dispatch_with, stream, DependentScheduler, Emitter, ErrorChannel, Lease, LeasePair, Reply,
    ResourceScheduler, WorkItem,
};
use strata_test_utils::{capture, ManualDispatcher, Recorder};

#[derive(Default)]
struct Probe {
    shared_running: Cell<usize>,
    exclusive_running: Cell<bool>,
    max_running: Cell<usize>,
    violations: Cell<usize>,
    starts: RefCell<Vec<String>>,
}

impl Probe {
    fn enter(&self, tag: &str, exclusive: bool) {
        if self.exclusive_running.get() || (exclusive && self.shared_running.get() > 0) {
            self.violations.set(self.violations.get() + 1);
        }
        if exclusive {
            self.exclusive_running.set(true);
        } else {
            self.shared_running.set(self.shared_running.get() + 1);
        }
        let running = self.shared_running.get() + usize::from(self.exclusive_running.get());
        self.max_running.set(self.max_running.get().max(running));
        self.starts.borrow_mut().push(tag.to_string());
    }

    fn leave(&self, exclusive: bool) {
        if exclusive {
            self.exclusive_running.set(false);
        } else {
            self.shared_running.set(self.shared_running.get() - 1);
        }
    }
}

struct Harness {
    dispatcher: Rc<ManualDispatcher>,
    scheduler: Rc<ResourceScheduler>,
    errors: Rc<Emitter<StrataError>>,
    probe: Rc<Probe>,
    recorder: Recorder<()>,
}

impl Harness {
    fn new() -> Self {
        let errors = Rc::new(Emitter::new("db"));
        let channel: Rc<dyn ErrorChannel> = errors.clone();
        Self {
            dispatcher: Rc::new(ManualDispatcher::new()),
            scheduler: ResourceScheduler::new("db", channel),
            errors,
            probe: Rc::new(Probe::default()),
            recorder: Recorder::new(),
        }
    }

    fn open() -> Self {
        let harness = Self::new();
        harness.scheduler.on_open_complete(true);
        harness
    }

    /// Submits an operation whose blocking part is one dispatcher job.
    fn submit(&self, tag: &str, exclusive: bool) {
        self.submit_with(tag, exclusive, self.recorder.reply(tag));
    }

    fn submit_with(&self, tag: &str, exclusive: bool, reply: Reply<()>) {
        let dispatcher = Rc::clone(&self.dispatcher);
        let probe = Rc::clone(&self.probe);
        let tag = tag.to_string();
        self.scheduler
            .submit(WorkItem::new(reply, exclusive, move |reply, lease: Lease| {
                let exclusive = lease.is_exclusive();
                probe.enter(&tag, exclusive);
                dispatch_with(&*dispatcher, || (), move |_| {
                    probe.leave(exclusive);
                    let _ = reply.send(Ok(()));
                    lease.release();
                });
            }));
    }

    /// Submits an exclusive close that succeeds.
    fn close(&self, tag: &str) {
        let dispatcher = Rc::clone(&self.dispatcher);
        let probe = Rc::clone(&self.probe);
        let scheduler = Rc::clone(&self.scheduler);
        let tag = tag.to_string();
        self.scheduler.submit(WorkItem::new(
            self.recorder.reply(tag.clone()),
            true,
            move |reply, lease: Lease| {
                probe.enter(&tag, true);
                dispatch_with(&*dispatcher, || (), move |_| {
                    probe.leave(true);
                    scheduler.on_close_complete(lease, true);
                    let _ = reply.send(Ok(()));
                });
            },
        ));
    }
}

// ---- Scenario A: shared work runs concurrently ----

#[test]
fn test_shared_operations_dispatch_before_any_completes() {
    let h = Harness::open();
    for tag in ["a", "b", "c"] {
        h.submit(tag, false);
    }

    assert_eq!(h.dispatcher.pending_jobs(), 3);
    assert_eq!(h.scheduler.state().pending, 3);
    assert_eq!(h.probe.max_running.get(), 3);

    h.dispatcher.run_all();
    assert_eq!(h.recorder.len(), 3);
    assert_eq!(h.scheduler.state().pending, 0);
    assert_eq!(h.probe.violations.get(), 0);
}

// ---- Scenario B: serialize mode ----

#[test]
fn test_serialize_mode_runs_one_at_a_time_in_order() {
    let h = Harness::open();
    h.scheduler.set_serialize(true);
    for tag in ["x", "y", "z"] {
        h.submit(tag, false);
    }

    assert_eq!(h.dispatcher.pending_jobs(), 1);
    assert_eq!(h.scheduler.queued(), 2);

    h.dispatcher.run_next();
    assert_eq!(h.recorder.tags(), vec!["x"]);
    assert_eq!(h.dispatcher.pending_jobs(), 1);

    h.dispatcher.run_all();
    assert_eq!(h.recorder.tags(), vec!["x", "y", "z"]);
    assert_eq!(h.probe.max_running.get(), 1);
}

#[test]
fn test_parallelize_after_serialize_releases_queue() {
    let h = Harness::open();
    h.scheduler.set_serialize(true);
    h.submit("first", false);
    h.submit("second", false);
    h.scheduler.set_serialize(false);
    h.scheduler.drain();
    // "second" was queued under serialize mode and stays exclusive.
    assert_eq!(h.dispatcher.pending_jobs(), 1);

    h.dispatcher.run_next();
    h.submit("third", false);
    h.submit("fourth", false);
    assert_eq!(h.dispatcher.pending_jobs(), 1);
    h.dispatcher.run_next();
    assert_eq!(h.dispatcher.pending_jobs(), 2);
    h.dispatcher.run_all();
    assert_eq!(h.recorder.tags(), vec!["first", "second", "third", "fourth"]);
}

// ---- Scenario C: close waits for shared work ----

#[test]
fn test_close_waits_for_pending_then_rejects_new_work() {
    let h = Harness::open();
    h.submit("a", false);
    h.submit("b", false);
    h.close("close");
    assert_eq!(h.scheduler.queued(), 1);

    h.dispatcher.run_next();
    assert_eq!(h.scheduler.queued(), 1);
    assert_eq!(h.dispatcher.pending_jobs(), 1);

    h.dispatcher.run_next();
    assert_eq!(h.scheduler.queued(), 0);
    assert!(h.scheduler.state().locked);

    h.dispatcher.run_next();
    assert!(h.scheduler.state().is_closed());
    assert_eq!(h.recorder.tags(), vec!["a", "b", "close"]);

    let dispatched = h.dispatcher.dispatched();
    h.submit("late", false);
    assert_eq!(h.dispatcher.dispatched(), dispatched);
    assert!(matches!(h.recorder.error("late"), Some(StrataError::ResourceClosed)));
    assert_eq!(h.probe.violations.get(), 0);
}

#[test]
fn test_close_fails_work_queued_behind_it() {
    let h = Harness::open();
    let errors = capture(&h.errors);
    h.close("close");
    h.submit("queued", false);
    h.submit_with("silent", false, Reply::none());

    h.dispatcher.run_all();
    assert!(matches!(h.recorder.error("queued"), Some(StrataError::ResourceClosed)));
    // One queued item had a callback, so the shared channel stays quiet.
    assert!(errors.borrow().is_empty());
}

#[test]
fn test_close_without_callbacks_raises_one_shared_error() {
    let h = Harness::open();
    let errors = capture(&h.errors);
    h.close("close");
    h.submit_with("one", false, Reply::none());
    h.submit_with("two", false, Reply::none());

    h.dispatcher.run_all();
    assert_eq!(errors.borrow().len(), 1);
    assert!(matches!(errors.borrow()[0], StrataError::ResourceClosed));
}

#[test]
fn test_submit_to_closed_without_callback_goes_to_error_channel() {
    let h = Harness::open();
    let errors = capture(&h.errors);
    h.close("close");
    h.dispatcher.run_all();

    h.submit_with("orphan", false, Reply::none());
    assert_eq!(errors.borrow().len(), 1);
    assert!(h.probe.starts.borrow().iter().all(|tag| tag != "orphan"));
}

#[test]
fn test_shared_work_never_overtakes_queued_exclusive() {
    let h = Harness::open();
    h.submit("a", false);
    h.submit("exclusive", true);
    h.submit("b", false);
    assert_eq!(*h.probe.starts.borrow(), vec!["a"]);

    h.dispatcher.run_all();
    assert_eq!(*h.probe.starts.borrow(), vec!["a", "exclusive", "b"]);
}

// ---- Scenario D: statement finalization ----

struct StatementFixture {
    harness: Harness,
    stmt: Rc<DependentScheduler>,
    stmt_errors: Rc<Emitter<StrataError>>,
    held: Rc<RefCell<Vec<LeasePair>>>,
}

impl StatementFixture {
    fn prepared() -> Self {
        let harness = Harness::open();
        let stmt_errors = Rc::new(Emitter::new("stmt"));
        let channel: Rc<dyn ErrorChannel> = stmt_errors.clone();
        let stmt = DependentScheduler::new("stmt", Rc::clone(&harness.scheduler), channel);
        stmt.on_prepare_complete(true);
        Self {
            harness,
            stmt,
            stmt_errors,
            held: Rc::default(),
        }
    }

    /// Starts an operation and keeps its leases until `release_held`.
    fn hold(&self) {
        let held = Rc::clone(&self.held);
        self.stmt
            .submit_with_parent(Reply::<()>::none(), move |_reply, pair| {
                held.borrow_mut().push(pair)
            });
    }

    fn release_held(&self) {
        let pairs: Vec<LeasePair> = self.held.borrow_mut().drain(..).collect();
        for pair in pairs {
            pair.release();
        }
    }

    fn queue(&self, reply: Reply<()>) {
        self.stmt
            .submit_with_parent(reply, |_reply, _pair| panic!("queued work must not start"));
    }
}

#[test]
fn test_finalize_with_mixed_callbacks_raises_no_shared_error() {
    let f = StatementFixture::prepared();
    let errors = capture(&f.stmt_errors);
    let recorder: Recorder<()> = Recorder::new();
    f.hold();
    f.queue(recorder.reply("with_callback"));
    f.queue(Reply::none());
    assert_eq!(f.stmt.queued(), 2);

    f.stmt.on_finalize();
    assert!(matches!(
        recorder.error("with_callback"),
        Some(StrataError::AlreadyFinalized)
    ));
    assert_eq!(recorder.count("with_callback"), 1);
    assert!(errors.borrow().is_empty());
    f.release_held();
}

#[test]
fn test_finalize_without_callbacks_raises_exactly_one_error() {
    let f = StatementFixture::prepared();
    let errors = capture(&f.stmt_errors);
    f.hold();
    f.queue(Reply::none());
    f.queue(Reply::none());

    f.stmt.on_finalize();
    assert_eq!(errors.borrow().len(), 1);
    f.release_held();
    f.stmt.on_finalize();
    assert_eq!(errors.borrow().len(), 1);
}

#[test]
fn test_statement_completion_unblocks_parent_exclusive() {
    let f = StatementFixture::prepared();
    f.hold();
    assert_eq!(f.harness.scheduler.state().pending, 1);
    f.harness.submit("exclusive", true);
    assert_eq!(f.harness.scheduler.queued(), 1);

    f.release_held();
    assert_eq!(f.harness.scheduler.queued(), 0);
    assert!(f.harness.scheduler.state().locked);
    f.harness.dispatcher.run_all();
    assert_eq!(f.harness.recorder.tags(), vec!["exclusive"]);
}

#[test]
fn test_statement_runs_one_operation_at_a_time() {
    let f = StatementFixture::prepared();
    f.hold();
    f.hold();
    assert_eq!(f.held.borrow().len(), 1);
    assert_eq!(f.stmt.queued(), 1);

    let first = f.held.borrow_mut().remove(0);
    first.release();
    assert_eq!(f.held.borrow().len(), 1);
    f.release_held();
    assert!(!f.stmt.state().locked);
}

// ---- Streaming aggregator ----

#[test]
fn test_stream_delivers_rows_then_one_terminal_callback() {
    let dispatcher = ManualDispatcher::new();
    let order = Rc::new(RefCell::new(Vec::new()));
    let rows = Rc::clone(&order);
    let done = Rc::clone(&order);
    let producer = stream(
        &dispatcher,
        move |n: i64| rows.borrow_mut().push(format!("row{n}")),
        Reply::new(move |r: Result<usize, StrataError>| {
            done.borrow_mut().push(format!("done{}", r.unwrap()))
        }),
        |_err| panic!("no fallback expected"),
    );
    dispatch_with(
        &dispatcher,
        move || {
            for n in 0..3 {
                producer.push(n);
            }
            producer.finish(Ok(()));
        },
        |_| {},
    );
    dispatcher.run_all();
    assert_eq!(*order.borrow(), vec!["row0", "row1", "row2", "done3"]);
    assert_eq!(dispatcher.live_streams(), 0);
}

#[test]
fn test_stream_survives_interleaved_wakes() {
    let dispatcher = ManualDispatcher::new();
    let rows = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&rows);
    let completed = Rc::new(Cell::new(None));
    let done = Rc::clone(&completed);
    let producer = stream(
        &dispatcher,
        move |n: u32| sink.borrow_mut().push(n),
        Reply::new(move |r: Result<usize, StrataError>| done.set(r.ok())),
        |_err| {},
    );
    producer.push(1);
    dispatcher.pump_wakes();
    producer.push(2);
    producer.push(3);
    assert_eq!(*rows.borrow(), vec![1]);
    producer.finish(Ok(()));
    dispatcher.pump_wakes();
    assert_eq!(*rows.borrow(), vec![1, 2, 3]);
    assert_eq!(completed.get(), Some(3));
}

// ---- Properties ----

proptest! {
    #[test]
    fn prop_serialize_mode_preserves_submission_order(flags in proptest::collection::vec(any::<bool>(), 1..40)) {
        let h = Harness::open();
        h.scheduler.set_serialize(true);
        let tags: Vec<String> = (0..flags.len()).map(|i| format!("op{i}")).collect();
        for (tag, exclusive) in tags.iter().zip(&flags) {
            h.submit(tag, *exclusive);
        }
        h.dispatcher.run_all();
        prop_assert_eq!(h.recorder.tags(), tags);
        prop_assert_eq!(h.probe.max_running.get(), 1);
    }

    #[test]
    fn prop_exclusive_barrier_holds_under_any_completion_order(
        flags in proptest::collection::vec(any::<bool>(), 1..30),
        picks in proptest::collection::vec(any::<prop::sample::Index>(), 0..60),
    ) {
        let h = Harness::open();
        let tags: Vec<String> = (0..flags.len()).map(|i| format!("op{i}")).collect();
        for (tag, exclusive) in tags.iter().zip(&flags) {
            h.submit(tag, *exclusive);
        }
        for pick in picks {
            let waiting = h.dispatcher.pending_jobs();
            if waiting == 0 {
                break;
            }
            h.dispatcher.run_at(pick.index(waiting));
        }
        h.dispatcher.run_all();

        prop_assert_eq!(h.probe.violations.get(), 0);
        prop_assert_eq!(h.probe.starts.borrow().clone(), tags);
        prop_assert_eq!(h.recorder.len(), flags.len());
        prop_assert_eq!(h.scheduler.state().pending, 0);
        prop_assert!(!h.scheduler.state().locked);
    }

    #[test]
    fn prop_closed_resource_never_starts_work(count in 1usize..20) {
        let h = Harness::open();
        h.close("close");
        h.dispatcher.run_all();
        let dispatched = h.dispatcher.dispatched();
        for i in 0..count {
            h.submit(&format!("late{i}"), i % 3 == 0);
        }
        prop_assert_eq!(h.dispatcher.dispatched(), dispatched);
        prop_assert_eq!(h.probe.starts.borrow().len(), 1);
        for i in 0..count {
            let tag = format!("late{i}");
            prop_assert!(matches!(h.recorder.error(&tag), Some(StrataError::ResourceClosed)));
        }
    }

    #[test]
    fn prop_finalize_resolves_each_queued_item_once(callbacks in proptest::collection::vec(any::<bool>(), 0..20)) {
        let f = StatementFixture::prepared();
        let errors = capture(&f.stmt_errors);
        let recorder: Recorder<()> = Recorder::new();
        f.hold();
        for (i, has_callback) in callbacks.iter().enumerate() {
            if *has_callback {
                f.queue(recorder.reply(format!("item{i}")));
            } else {
                f.queue(Reply::none());
            }
        }
        f.stmt.on_finalize();
        f.release_held();
        f.stmt.on_finalize();

        let with_callback = callbacks.iter().filter(|c| **c).count();
        prop_assert_eq!(recorder.len(), with_callback);
        for (i, has_callback) in callbacks.iter().enumerate() {
            if *has_callback {
                prop_assert_eq!(recorder.count(&format!("item{i}")), 1);
            }
        }
        let expected_shared = usize::from(!callbacks.is_empty() && with_callback == 0);
        prop_assert_eq!(errors.borrow().len(), expected_shared);
    }

    #[test]
    fn prop_stream_delivers_every_row_exactly_once(count in 0usize..200) {
        let dispatcher = ManualDispatcher::new();
        let rows = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&rows);
        let total = Rc::new(Cell::new(None));
        let done = Rc::clone(&total);
        let at_done = Rc::clone(&rows);
        let producer = stream(
            &dispatcher,
            move |n: usize| sink.borrow_mut().push(n),
            Reply::new(move |r: Result<usize, StrataError>| {
                assert!(done.get().is_none());
                done.set(Some((r.ok(), at_done.borrow().len())));
            }),
            |_err| {},
        );
        dispatch_with(&dispatcher, move || {
            for n in 0..count {
                producer.push(n);
            }
            producer.finish(Ok(()));
        }, |_| {});
        dispatcher.run_all();

        prop_assert_eq!(rows.borrow().clone(), (0..count).collect::<Vec<_>>());
        prop_assert_eq!(total.get(), Some((Some(count), count)));
    }
}
