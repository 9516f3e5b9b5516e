// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prepared statements.
//!
//! A [`Statement`] runs its operations one at a time through its own
//! [`DependentScheduler`], each under a shared lease of the database. The
//! compiled statement lives in the connection's statement cache; the handle
//! only carries the SQL, the retained parameters and the `get` cursor.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use strata_core::{Params, Row, RunInfo, StrataError};
use strata_scheduler::{
    dispatch_with, stream, DependentLease, DependentScheduler, Dispatcher, Emitter, ErrorChannel,
    Lease, LeasePair, Reply, WorkItem,
};
use tracing::debug;

use crate::connection::{lock, with_connection, SharedConnection};
use crate::database::Database;
use crate::values::{bind, column_names, read_row};

/// Where the statement stands between operations.
#[derive(Debug, Default)]
struct Cursor {
    params: Params,
    /// Rows already handed out by `get` since the last rewind.
    consumed: usize,
    /// The last step reached the end; `get` returns nothing until rewound.
    done: bool,
}

impl Cursor {
    /// Replaces the retained parameters when new ones are given, then rewinds.
    fn rebind(&mut self, params: Params) {
        if !params.is_empty() {
            self.params = params;
        }
        self.rewind();
    }

    fn rewind(&mut self) {
        self.consumed = 0;
        self.done = false;
    }
}

/// A statement prepared on a [`Database`]. Cloning yields another handle to
/// the same statement.
#[derive(Clone)]
pub struct Statement {
    inner: Rc<StatementInner>,
}

pub(crate) struct StatementInner {
    sql: String,
    scheduler: Rc<DependentScheduler>,
    errors: Rc<Emitter<StrataError>>,
    dispatcher: Rc<dyn Dispatcher>,
    conn: SharedConnection,
    cursor: Arc<Mutex<Cursor>>,
    /// Keeps the database alive until the statement is finalized.
    db: RefCell<Option<Database>>,
}

impl StatementInner {
    /// Finalizes the statement because its database closed.
    pub(crate) fn teardown(this: &Rc<Self>) {
        this.scheduler.on_finalize();
        this.db.borrow_mut().take();
    }
}

impl Statement {
    pub(crate) fn new(db: &Database, sql: String, reply: Reply<()>) -> Self {
        let errors = Rc::new(Emitter::new(sql.clone()));
        let channel: Rc<dyn ErrorChannel> = errors.clone();
        let parent = db.scheduler();
        let statement = Self {
            inner: Rc::new(StatementInner {
                scheduler: DependentScheduler::new(sql.clone(), Rc::clone(parent), channel),
                sql,
                errors,
                dispatcher: db.dispatcher(),
                conn: db.connection(),
                cursor: Arc::new(Mutex::new(Cursor::default())),
                db: RefCell::new(Some(db.clone())),
            }),
        };

        let handle = statement.clone();
        statement
            .inner
            .scheduler
            .prepare_with(reply, move |reply, lease: Lease| {
                let sql = handle.inner.sql.clone();
                let conn = handle.inner.conn.clone();
                let after = handle.clone();
                dispatch_with(
                    &*handle.inner.dispatcher,
                    move || {
                        with_connection(&conn, |conn| conn.prepare_cached(&sql).map(drop))
                    },
                    move |result| {
                        let result = result.and_then(|prepared| prepared);
                        let prepared = result.is_ok();
                        after.deliver(reply, result);
                        after.inner.scheduler.on_prepare_complete(prepared);
                        if !prepared {
                            after.inner.db.borrow_mut().take();
                        }
                        lease.release();
                    },
                );
            });
        statement
    }

    pub(crate) fn downgrade(&self) -> Weak<StatementInner> {
        Rc::downgrade(&self.inner)
    }

    pub fn sql(&self) -> &str {
        &self.inner.sql
    }

    pub fn scheduler(&self) -> &Rc<DependentScheduler> {
        &self.inner.scheduler
    }

    /// Registers a listener for errors that had no callback of their own.
    pub fn on_error<F>(&self, listener: F)
    where
        F: FnMut(&StrataError) + 'static,
    {
        self.inner.errors.on(listener);
    }

    // --- Operations ---

    /// Binds `params` for later operations. Empty parameters keep the
    /// current bindings.
    pub fn bind(&self, params: Params, reply: Reply<()>) {
        self.schedule(reply, move |_conn, stmt, cursor| {
            if !params.is_empty() {
                bind(stmt, &params)?;
                cursor.rebind(params);
            }
            Ok(())
        });
    }

    /// Returns the next row, or `None` once the statement has no more.
    ///
    /// Consecutive calls without parameters walk the result set. New
    /// parameters start it over.
    pub fn get(&self, params: Params, reply: Reply<Option<Row>>) {
        self.schedule(reply, move |_conn, stmt, cursor| {
            if !params.is_empty() {
                cursor.rebind(params);
            }
            if cursor.done {
                return Ok(None);
            }
            bind(stmt, &cursor.params)?;
            let names = column_names(stmt);
            let readonly = stmt.readonly();
            let mut rows = stmt.raw_query();
            for _ in 0..cursor.consumed {
                if rows.next()?.is_none() {
                    cursor.done = true;
                    return Ok(None);
                }
            }
            match rows.next()? {
                Some(row) => {
                    let row = read_row(row, &names)?;
                    cursor.consumed += 1;
                    // A write must not run again on the next call.
                    cursor.done = !readonly;
                    Ok(Some(row))
                }
                None => {
                    cursor.done = true;
                    Ok(None)
                }
            }
        });
    }

    /// Executes one step and reports the rowid of the last insert and the
    /// number of rows changed.
    pub fn run(&self, params: Params, reply: Reply<RunInfo>) {
        self.schedule(reply, move |conn, stmt, cursor| {
            cursor.rebind(params);
            bind(stmt, &cursor.params)?;
            let mut rows = stmt.raw_query();
            if rows.next()?.is_some() {
                cursor.consumed = 1;
            } else {
                cursor.done = true;
            }
            drop(rows);
            Ok(RunInfo {
                last_insert_rowid: conn.last_insert_rowid(),
                changes: conn.changes(),
            })
        });
    }

    /// Collects every row.
    pub fn all(&self, params: Params, reply: Reply<Vec<Row>>) {
        self.schedule(reply, move |_conn, stmt, cursor| {
            cursor.rebind(params);
            bind(stmt, &cursor.params)?;
            let names = column_names(stmt);
            let mut rows = stmt.raw_query();
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(read_row(row, &names)?);
            }
            cursor.done = true;
            Ok(out)
        });
    }

    /// Streams rows to `on_row` as the worker produces them. `on_complete`
    /// receives the number of rows delivered; without a callback a failure
    /// goes to the statement's error listeners.
    pub fn each<F>(&self, params: Params, on_row: F, on_complete: Reply<usize>)
    where
        F: FnMut(Row) + 'static,
    {
        let handle = self.clone();
        self.inner
            .scheduler
            .submit_with_parent(on_complete, move |on_complete, leases: LeasePair| {
                let errors = Rc::clone(&handle.inner.errors);
                let producer = stream(
                    &*handle.inner.dispatcher,
                    on_row,
                    on_complete,
                    move |err| errors.emit_error(err),
                );
                let conn = handle.inner.conn.clone();
                let cursor = Arc::clone(&handle.inner.cursor);
                let sql = handle.inner.sql.clone();
                dispatch_with(
                    &*handle.inner.dispatcher,
                    move || {
                        let outcome = with_connection(&conn, |conn| {
                            let mut stmt = conn.prepare_cached(&sql)?;
                            let mut cursor = lock(&cursor);
                            cursor.rebind(params);
                            bind(&mut stmt, &cursor.params)?;
                            let names = column_names(&stmt);
                            let mut rows = stmt.raw_query();
                            while let Some(row) = rows.next()? {
                                producer.push(read_row(row, &names)?);
                            }
                            cursor.done = true;
                            Ok(())
                        });
                        producer.finish(outcome);
                    },
                    // The stream has already reported by the time this runs.
                    move |_| leases.release(),
                );
            });
    }

    /// Rewinds the `get` cursor. Bindings are kept.
    pub fn reset(&self, reply: Reply<()>) {
        self.schedule(reply, |_conn, _stmt, cursor| {
            cursor.rewind();
            Ok(())
        });
    }

    /// Ends the statement. Anything submitted afterwards fails with
    /// [`StrataError::AlreadyFinalized`].
    pub fn finalize(&self, reply: Reply<()>) {
        let handle = self.clone();
        self.inner
            .scheduler
            .submit(WorkItem::new(reply, true, move |reply, lease: DependentLease| {
                debug!(statement = %handle.inner.sql, "finalizing statement");
                handle.deliver(reply, Ok(()));
                lease.finalize();
                handle.inner.db.borrow_mut().take();
            }));
    }

    // --- Internals ---

    /// Runs `work` against the cached statement under both leases.
    fn schedule<T, W>(&self, reply: Reply<T>, work: W)
    where
        T: Send + 'static,
        W: FnOnce(&Connection, &mut rusqlite::Statement<'_>, &mut Cursor) -> rusqlite::Result<T>
            + Send
            + 'static,
    {
        let handle = self.clone();
        self.inner
            .scheduler
            .submit_with_parent(reply, move |reply, leases: LeasePair| {
                let conn = handle.inner.conn.clone();
                let cursor = Arc::clone(&handle.inner.cursor);
                let sql = handle.inner.sql.clone();
                let after = handle.clone();
                dispatch_with(
                    &*handle.inner.dispatcher,
                    move || {
                        with_connection(&conn, |conn| {
                            let mut stmt = conn.prepare_cached(&sql)?;
                            let mut cursor = lock(&cursor);
                            work(conn, &mut stmt, &mut cursor)
                        })
                    },
                    move |result| {
                        after.deliver(reply, result.and_then(|value| value));
                        leases.release();
                    },
                );
            });
    }

    fn deliver<T>(&self, reply: Reply<T>, result: Result<T, StrataError>) {
        if let Some(err) = reply.send(result) {
            self.inner.errors.emit_error(err);
        }
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.inner.sql)
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}
