// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The shared engine handle and the calls made on worker threads.
//!
//! The scheduler already keeps exclusive and shared work apart. The mutex
//! only covers the engine call itself, since one `rusqlite::Connection` must
//! not be used from two threads at once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::{ffi, Connection, OpenFlags};
use strata_core::{OpenMode, StrataError};

use crate::trace::{self, SharedTracers};

/// Prepared statements kept per connection.
const STATEMENT_CACHE_CAPACITY: usize = 128;

/// The engine handle and the trace producers fed while it runs.
#[derive(Clone, Default)]
pub(crate) struct SharedConnection {
    /// `None` before open completes and after close.
    handle: Arc<Mutex<Option<Connection>>>,
    tracers: SharedTracers,
}

impl SharedConnection {
    pub(crate) fn tracers(&self) -> SharedTracers {
        Arc::clone(&self.tracers)
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn open_flags(mode: OpenMode) -> OpenFlags {
    let access = match mode {
        OpenMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
        OpenMode::ReadWrite => OpenFlags::SQLITE_OPEN_READ_WRITE,
        OpenMode::ReadWriteCreate => {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        }
    };
    access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX
}

/// Opens the engine handle and installs it into `slot`.
pub(crate) fn open(
    slot: &SharedConnection,
    path: &str,
    mode: OpenMode,
    busy_timeout: Duration,
) -> Result<(), StrataError> {
    let conn = Connection::open_with_flags(path, open_flags(mode)).map_err(engine_error)?;
    conn.busy_timeout(busy_timeout).map_err(engine_error)?;
    conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
    *lock(&slot.handle) = Some(conn);
    Ok(())
}

/// Closes the engine handle. On failure the handle is put back and stays
/// usable.
pub(crate) fn close(slot: &SharedConnection) -> Result<(), StrataError> {
    let mut guard = lock(&slot.handle);
    let Some(conn) = guard.take() else {
        return Ok(());
    };
    match conn.close() {
        Ok(()) => {
            lock(&slot.tracers).clear();
            Ok(())
        }
        Err((conn, err)) => {
            *guard = Some(conn);
            Err(engine_error(err))
        }
    }
}

/// Runs `f` against the open connection. Trace events raised meanwhile go
/// to this connection's producers.
pub(crate) fn with_connection<T, F>(slot: &SharedConnection, f: F) -> Result<T, StrataError>
where
    F: FnOnce(&Connection) -> rusqlite::Result<T>,
{
    let guard = lock(&slot.handle);
    let conn = guard.as_ref().ok_or(StrataError::ResourceClosed)?;
    trace::scoped(&slot.tracers, || f(conn)).map_err(engine_error)
}

/// Maps an engine error to [`StrataError::OperationFailed`].
pub fn engine_error(err: rusqlite::Error) -> StrataError {
    match err {
        rusqlite::Error::SqliteFailure(failure, message) => StrataError::operation(
            failure.extended_code,
            message.unwrap_or_else(|| failure.to_string()),
        ),
        rusqlite::Error::InvalidParameterName(name) => {
            StrataError::operation(ffi::SQLITE_RANGE, format!("no such parameter: {name}"))
        }
        rusqlite::Error::InvalidParameterCount(given, expected) => StrataError::operation(
            ffi::SQLITE_RANGE,
            format!("{given} parameters given, statement takes {expected}"),
        ),
        rusqlite::Error::InvalidPath(path) => StrataError::operation(
            ffi::SQLITE_CANTOPEN,
            format!("invalid path: {}", path.display()),
        ),
        other => StrataError::operation(ffi::SQLITE_ERROR, other.to_string()),
    }
}
