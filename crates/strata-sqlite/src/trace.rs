// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Statement trace and profile notifications.
//!
//! The engine's trace hook is a plain function and cannot capture the
//! connection it fires for. Every engine call goes through
//! [`crate::connection::with_connection`] on one thread with the connection
//! mutex held, so the connection's producers are published in a thread-local
//! for exactly that span and the hook picks them up from there.

use std::cell::RefCell;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::trace::{TraceEvent, TraceEventCodes};
use rusqlite::Connection;
use strata_scheduler::Producer;

use crate::connection::lock;

/// A statement that finished running.
#[derive(Debug)]
pub(crate) struct Profiled {
    pub(crate) sql: String,
    pub(crate) duration: Duration,
}

/// Producers fed by the hook. Dropping one ends its stream.
#[derive(Default)]
pub(crate) struct Tracers {
    pub(crate) trace: Option<Producer<String>>,
    pub(crate) profile: Option<Producer<Profiled>>,
}

impl Tracers {
    fn mask(&self) -> TraceEventCodes {
        let mut mask = TraceEventCodes::empty();
        if self.trace.is_some() {
            mask |= TraceEventCodes::SQLITE_TRACE_STMT;
        }
        if self.profile.is_some() {
            mask |= TraceEventCodes::SQLITE_TRACE_PROFILE;
        }
        mask
    }

    /// Drops both producers.
    pub(crate) fn clear(&mut self) {
        self.trace = None;
        self.profile = None;
    }
}

pub(crate) type SharedTracers = Arc<Mutex<Tracers>>;

thread_local! {
    static ACTIVE: RefCell<Option<SharedTracers>> = const { RefCell::new(None) };
}

/// Runs `f` with `tracers` receiving the hook events raised on this thread.
pub(crate) fn scoped<R>(tracers: &SharedTracers, f: impl FnOnce() -> R) -> R {
    let previous = ACTIVE.with(|active| active.replace(Some(Arc::clone(tracers))));
    let _restore = Restore(previous);
    f()
}

struct Restore(Option<SharedTracers>);

impl Drop for Restore {
    fn drop(&mut self) {
        let previous = self.0.take();
        let _ = ACTIVE.try_with(|active| *active.borrow_mut() = previous);
    }
}

/// Registers the hook for whichever producers are present, or removes it.
pub(crate) fn install(conn: &Connection, tracers: &Tracers) {
    let mask = tracers.mask();
    if mask.is_empty() {
        conn.trace_v2(mask, None);
    } else {
        conn.trace_v2(mask, Some(on_event));
    }
}

fn on_event(event: TraceEvent<'_>) {
    let Some(tracers) = ACTIVE.with(|active| active.borrow().clone()) else {
        return;
    };
    let tracers = lock(&tracers);
    match event {
        TraceEvent::Stmt(stmt, sql) => {
            if let Some(producer) = &tracers.trace {
                // Trigger programs report a `--` comment rather than SQL.
                let text = if sql.starts_with("--") {
                    sql.to_string()
                } else {
                    stmt.expanded_sql().unwrap_or_else(|| sql.to_string())
                };
                producer.push(text);
            }
        }
        TraceEvent::Profile(stmt, duration) => {
            if let Some(producer) = &tracers.profile {
                producer.push(Profiled {
                    sql: stmt.sql().into_owned(),
                    duration,
                });
            }
        }
        _ => {}
    }
}
