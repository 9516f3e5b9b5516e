// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The database handle.
//!
//! A [`Database`] is created immediately and opens in the background. Every
//! operation goes through the connection-level [`ResourceScheduler`]: work
//! submitted before the open completes waits in the queue, exclusive
//! operations (`exec`, `close`, `configure`, `wait`) run alone, and statement
//! work runs as shared items.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use rusqlite::hooks::Action;
use rusqlite::Connection;
use strata_config::DatabaseConfig;
use strata_core::{OpenMode, StrataError, UpdateAction, UpdateEvent};
use strata_scheduler::{
    dispatch_with, stream, Dispatcher, Emitter, ErrorChannel, Lease, Producer, Reply,
    ResourceScheduler, WorkItem,
};
use tracing::{debug, info};

use crate::connection::{self, lock, with_connection, SharedConnection};
use crate::events::DatabaseEvent;
use crate::statement::{Statement, StatementInner};
use crate::trace::{self, Profiled};

/// Busy timeout applied when none is configured.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Runtime settings changed through [`Database::configure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    BusyTimeout(Duration),
    /// Enables or disables [`DatabaseEvent::Update`] notifications.
    UpdateHook(bool),
    /// Enables or disables [`DatabaseEvent::Trace`] for every statement run.
    Trace(bool),
    /// Enables or disables [`DatabaseEvent::Profile`] timings.
    Profile(bool),
}

/// An asynchronously opened SQLite connection. Cloning yields another handle
/// to the same connection.
#[derive(Clone)]
pub struct Database {
    inner: Rc<DatabaseInner>,
}

pub(crate) struct DatabaseInner {
    path: String,
    dispatcher: Rc<dyn Dispatcher>,
    scheduler: Rc<ResourceScheduler>,
    events: Rc<Emitter<DatabaseEvent>>,
    conn: SharedConnection,
    statements: RefCell<Vec<Weak<StatementInner>>>,
}

impl Database {
    /// Opens `path` in the background with the default busy timeout.
    ///
    /// `reply` receives the outcome of the open; without a callback a failure
    /// is raised as [`DatabaseEvent::Error`]. A failed open closes the handle
    /// for good and fails any queued work with [`StrataError::ResourceClosed`].
    pub fn open(
        dispatcher: Rc<dyn Dispatcher>,
        path: impl Into<String>,
        mode: OpenMode,
        reply: Reply<()>,
    ) -> Self {
        Self::start(dispatcher, path.into(), mode, DEFAULT_BUSY_TIMEOUT, reply)
    }

    /// Opens the database described by `config`, entering serialize mode
    /// first when configured.
    pub fn open_with_config(
        dispatcher: Rc<dyn Dispatcher>,
        config: &DatabaseConfig,
        reply: Reply<()>,
    ) -> Self {
        let db = Self::start(
            dispatcher,
            config.path.clone(),
            config.mode,
            config.busy_timeout(),
            reply,
        );
        if config.serialize {
            db.serialize();
        }
        db
    }

    fn start(
        dispatcher: Rc<dyn Dispatcher>,
        path: String,
        mode: OpenMode,
        busy_timeout: Duration,
        reply: Reply<()>,
    ) -> Self {
        let events = Rc::new(Emitter::new(path.clone()));
        let channel: Rc<dyn ErrorChannel> = events.clone();
        let db = Self {
            inner: Rc::new(DatabaseInner {
                scheduler: ResourceScheduler::new(path.clone(), channel),
                path,
                dispatcher,
                events,
                conn: SharedConnection::default(),
                statements: RefCell::new(Vec::new()),
            }),
        };

        debug!(resource = %db.inner.path, %mode, "opening database");
        let conn = db.inner.conn.clone();
        let path = db.inner.path.clone();
        let handle = db.clone();
        dispatch_with(
            &*db.inner.dispatcher,
            move || connection::open(&conn, &path, mode, busy_timeout),
            move |result| {
                let result = result.and_then(|opened| opened);
                let opened = result.is_ok();
                handle.deliver(reply, result);
                if opened {
                    handle.inner.events.emit(&DatabaseEvent::Open);
                }
                handle.inner.scheduler.on_open_complete(opened);
            },
        );
        db
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// `true` once the open completed and until a close succeeds.
    pub fn is_open(&self) -> bool {
        self.inner.scheduler.state().open
    }

    /// Registers a listener for [`DatabaseEvent`]s.
    pub fn on<F>(&self, listener: F)
    where
        F: FnMut(&DatabaseEvent) + 'static,
    {
        self.inner.events.on(listener);
    }

    pub fn scheduler(&self) -> &Rc<ResourceScheduler> {
        &self.inner.scheduler
    }

    pub(crate) fn dispatcher(&self) -> Rc<dyn Dispatcher> {
        Rc::clone(&self.inner.dispatcher)
    }

    pub(crate) fn connection(&self) -> SharedConnection {
        self.inner.conn.clone()
    }

    // --- Operations ---

    /// Runs one or more `;`-separated statements as an exclusive operation.
    pub fn exec(&self, sql: impl Into<String>, reply: Reply<()>) {
        let sql = sql.into();
        self.schedule(true, reply, move |conn| conn.execute_batch(&sql));
    }

    /// Completes once every earlier operation has finished. Nothing submitted
    /// later starts before it.
    pub fn wait(&self, reply: Reply<()>) {
        let db = self.clone();
        self.inner
            .scheduler
            .submit(WorkItem::new(reply, true, move |reply, lease: Lease| {
                db.deliver(reply, Ok(()));
                lease.release();
            }));
    }

    /// Closes the connection once everything submitted earlier has finished.
    ///
    /// On success live statements are finalized, [`DatabaseEvent::Close`] is
    /// raised and anything still queued fails with
    /// [`StrataError::ResourceClosed`]. On failure the connection stays open.
    pub fn close(&self, reply: Reply<()>) {
        let db = self.clone();
        self.inner
            .scheduler
            .submit(WorkItem::new(reply, true, move |reply, lease: Lease| {
                let conn = db.inner.conn.clone();
                let handle = db.clone();
                dispatch_with(
                    &*db.inner.dispatcher,
                    move || connection::close(&conn),
                    move |result| {
                        let result = result.and_then(|closed| closed);
                        let closed = result.is_ok();
                        if closed {
                            handle.finalize_statements();
                        }
                        handle.deliver(reply, result);
                        if closed {
                            handle.inner.events.emit(&DatabaseEvent::Close);
                        }
                        handle.inner.scheduler.on_close_complete(lease, closed);
                    },
                );
            }));
    }

    /// Compiles `sql` in the background. The returned statement queues its
    /// operations until preparation completes.
    pub fn prepare(&self, sql: impl Into<String>, reply: Reply<()>) -> Statement {
        let statement = Statement::new(self, sql.into(), reply);
        let mut statements = self.inner.statements.borrow_mut();
        statements.retain(|weak| weak.strong_count() > 0);
        statements.push(statement.downgrade());
        statement
    }

    /// Changes a runtime setting as an exclusive operation.
    pub fn configure(&self, setting: Setting, reply: Reply<()>) {
        match setting {
            Setting::BusyTimeout(timeout) => {
                self.schedule(true, reply, move |conn| conn.busy_timeout(timeout));
            }
            Setting::UpdateHook(true) => {
                let producer = self.event_stream("update", DatabaseEvent::Update);
                self.schedule(true, reply, move |conn| {
                    conn.update_hook(Some(
                        move |action: Action, database: &str, table: &str, rowid: i64| {
                            if let Some(action) = update_action(action) {
                                producer.push(UpdateEvent {
                                    action,
                                    database: database.to_string(),
                                    table: table.to_string(),
                                    rowid,
                                });
                            }
                        },
                    ));
                    Ok(())
                });
            }
            Setting::UpdateHook(false) => {
                self.schedule(true, reply, |conn| {
                    conn.update_hook(None::<fn(Action, &str, &str, i64)>);
                    Ok(())
                });
            }
            Setting::Trace(enabled) => {
                let producer = enabled.then(|| self.event_stream("trace", DatabaseEvent::Trace));
                let tracers = self.inner.conn.tracers();
                self.schedule(true, reply, move |conn| {
                    let mut tracers = lock(&tracers);
                    tracers.trace = producer;
                    trace::install(conn, &tracers);
                    Ok(())
                });
            }
            Setting::Profile(enabled) => {
                let producer = enabled.then(|| {
                    self.event_stream("profile", |Profiled { sql, duration }| {
                        DatabaseEvent::Profile { sql, duration }
                    })
                });
                let tracers = self.inner.conn.tracers();
                self.schedule(true, reply, move |conn| {
                    let mut tracers = lock(&tracers);
                    tracers.profile = producer;
                    trace::install(conn, &tracers);
                    Ok(())
                });
            }
        }
    }

    // --- Execution mode ---

    /// From now on every operation runs alone, in submission order.
    pub fn serialize(&self) {
        if !self.inner.scheduler.set_serialize(true) {
            debug!(resource = %self.inner.path, "serialize mode on");
        }
    }

    /// Lets shared operations overlap again and starts whatever the switch
    /// unblocked.
    pub fn parallelize(&self) {
        if self.inner.scheduler.set_serialize(false) {
            debug!(resource = %self.inner.path, "serialize mode off");
        }
        self.inner.scheduler.drain();
    }

    /// Submits everything `f` submits in serialize mode, then restores the
    /// previous mode.
    pub fn serialize_with<R>(&self, f: impl FnOnce(&Database) -> R) -> R {
        self.with_mode(true, f)
    }

    /// Submits everything `f` submits in parallel mode, then restores the
    /// previous mode.
    pub fn parallelize_with<R>(&self, f: impl FnOnce(&Database) -> R) -> R {
        self.with_mode(false, f)
    }

    fn with_mode<R>(&self, serialize: bool, f: impl FnOnce(&Database) -> R) -> R {
        let previous = self.inner.scheduler.set_serialize(serialize);
        if !serialize {
            self.inner.scheduler.drain();
        }
        let out = f(self);
        self.inner.scheduler.set_serialize(previous);
        self.inner.scheduler.drain();
        out
    }

    // --- Internals ---

    /// Schedules `work` against the connection and delivers its result.
    fn schedule<T, W>(&self, exclusive: bool, reply: Reply<T>, work: W)
    where
        T: Send + 'static,
        W: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let db = self.clone();
        self.inner
            .scheduler
            .submit(WorkItem::new(reply, exclusive, move |reply, lease: Lease| {
                let conn = db.inner.conn.clone();
                let handle = db.clone();
                dispatch_with(
                    &*db.inner.dispatcher,
                    move || with_connection(&conn, work),
                    move |result| {
                        handle.deliver(reply, result.and_then(|value| value));
                        lease.release();
                    },
                );
            }));
    }

    /// A stream whose items are raised as database events. It ends when the
    /// producer is dropped.
    fn event_stream<T, F>(&self, name: &'static str, to_event: F) -> Producer<T>
    where
        T: Send + 'static,
        F: Fn(T) -> DatabaseEvent + 'static,
    {
        let events = Rc::clone(&self.inner.events);
        let label = self.inner.path.clone();
        stream(
            &*self.inner.dispatcher,
            move |item: T| {
                events.emit(&to_event(item));
            },
            Reply::none(),
            move |err| debug!(resource = %label, stream = name, error = %err, "event stream ended"),
        )
    }

    /// Sends `result` to `reply`, or raises it as an error event.
    fn deliver<T>(&self, reply: Reply<T>, result: Result<T, StrataError>) {
        if let Some(err) = reply.send(result) {
            self.inner.events.emit_error(err);
        }
    }

    fn finalize_statements(&self) {
        let live: Vec<_> = self
            .inner
            .statements
            .borrow_mut()
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect();
        if !live.is_empty() {
            info!(resource = %self.inner.path, statements = live.len(), "finalizing statements on close");
        }
        for statement in live {
            StatementInner::teardown(&statement);
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.inner.path)
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

fn update_action(action: Action) -> Option<UpdateAction> {
    match action {
        Action::SQLITE_INSERT => Some(UpdateAction::Insert),
        Action::SQLITE_UPDATE => Some(UpdateAction::Update),
        Action::SQLITE_DELETE => Some(UpdateAction::Delete),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_test_utils::{ManualDispatcher, Recorder};

    fn capture(db: &Database) -> Rc<RefCell<Vec<DatabaseEvent>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        db.on(move |event| sink.borrow_mut().push(event.clone()));
        seen
    }

    fn open_memory(dispatcher: &Rc<ManualDispatcher>) -> (Database, Recorder<()>) {
        let opened = Recorder::new();
        let dyn_dispatcher: Rc<dyn Dispatcher> = dispatcher.clone();
        let db = Database::open(
            dyn_dispatcher,
            ":memory:",
            OpenMode::ReadWriteCreate,
            opened.reply("open"),
        );
        (db, opened)
    }

    #[test]
    fn work_waits_for_open() {
        let dispatcher = Rc::new(ManualDispatcher::new());
        let (db, opened) = open_memory(&dispatcher);
        let done = Recorder::new();
        db.exec("CREATE TABLE t (x)", done.reply("exec"));

        assert!(!db.is_open());
        assert_eq!(dispatcher.pending_jobs(), 1, "only the open is dispatched");
        assert_eq!(db.scheduler().queued(), 1);

        dispatcher.run_all();
        assert!(db.is_open());
        assert_eq!(opened.tags(), vec!["open"]);
        assert_eq!(done.tags(), vec!["exec"]);
        assert!(done.error("exec").is_none());
    }

    #[test]
    fn many_queued_waits_complete_in_order() {
        let dispatcher = Rc::new(ManualDispatcher::new());
        let (db, _opened) = open_memory(&dispatcher);
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..20_000u32 {
            let order = Rc::clone(&order);
            db.wait(Reply::new(move |r: Result<(), StrataError>| {
                assert!(r.is_ok());
                order.borrow_mut().push(i);
            }));
        }
        dispatcher.run_all();

        let order = order.borrow();
        assert_eq!(order.len(), 20_000);
        assert!(order.windows(2).all(|w| w[0] < w[1]));
        assert!(!db.scheduler().state().locked);
    }

    #[test]
    fn failed_open_fails_queued_work() {
        let dispatcher = Rc::new(ManualDispatcher::new());
        let dir = strata_test_utils::TempDatabase::new().expect("temp dir");
        let missing = dir.dir().join("missing").join("db.sqlite");
        let opened = Recorder::new();
        let dyn_dispatcher: Rc<dyn Dispatcher> = dispatcher.clone();
        let db = Database::open(
            dyn_dispatcher,
            missing.to_string_lossy(),
            OpenMode::ReadWrite,
            opened.reply("open"),
        );
        let done = Recorder::new();
        db.exec("SELECT 1", done.reply("exec"));
        dispatcher.run_all();

        assert_eq!(opened.error("open").map(|e| e.code()), Some("SQLITE_CANTOPEN"));
        assert!(matches!(done.error("exec"), Some(StrataError::ResourceClosed)));
        assert!(db.scheduler().state().is_closed());
    }

    #[test]
    fn errors_without_callback_become_events() {
        let dispatcher = Rc::new(ManualDispatcher::new());
        let (db, _opened) = open_memory(&dispatcher);
        let events = capture(&db);
        db.exec("NOT SQL", Reply::none());
        dispatcher.run_all();

        let events = events.borrow();
        assert!(matches!(events[0], DatabaseEvent::Open));
        let err = events[1].as_error().expect("error event");
        assert_eq!(err.code(), "SQLITE_ERROR");
    }

    #[test]
    fn close_runs_after_shared_work_and_rejects_later_work() {
        let dispatcher = Rc::new(ManualDispatcher::new());
        let (db, _opened) = open_memory(&dispatcher);
        dispatcher.run_all();

        let log = Recorder::new();
        db.close(log.reply("close"));
        db.exec("SELECT 1", log.reply("late"));
        dispatcher.run_all();

        assert_eq!(log.tags(), vec!["close", "late"]);
        assert!(log.error("close").is_none());
        assert!(matches!(log.error("late"), Some(StrataError::ResourceClosed)));
        assert!(!db.is_open());

        db.wait(log.reply("after"));
        assert!(matches!(log.error("after"), Some(StrataError::ResourceClosed)));
    }

    #[test]
    fn serialize_with_restores_previous_mode() {
        let dispatcher = Rc::new(ManualDispatcher::new());
        let (db, _opened) = open_memory(&dispatcher);
        dispatcher.run_all();

        db.serialize_with(|db| {
            db.exec("CREATE TABLE a (x)", Reply::none());
            db.exec("CREATE TABLE b (x)", Reply::none());
        });
        assert!(!db.scheduler().state().serialize);
        dispatcher.run_all();
        assert_eq!(db.scheduler().queued(), 0);
    }
}
