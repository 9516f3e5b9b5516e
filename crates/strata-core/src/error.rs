// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Strata workspace.

use std::sync::Arc;

use thiserror::Error;

/// Primary result code used for scheduler-detected misuse (closed handle,
/// finalized statement). Matches the engine's `SQLITE_MISUSE`.
pub const MISUSE: i32 = 21;

/// The primary error type used by the scheduler and the SQLite binding.
///
/// Scheduler-detected errors are resolved against every queued item of a
/// resource, so the type is `Clone`. Sources are held behind `Arc` for that
/// reason.
#[derive(Debug, Clone, Error)]
pub enum StrataError {
    /// Work was submitted to, or drained from, a permanently closed resource.
    #[error("SQLITE_MISUSE: Database handle is closed")]
    ResourceClosed,

    /// Work was submitted to, or drained from, a finalized statement.
    #[error("SQLITE_MISUSE: Statement is already finalized")]
    AlreadyFinalized,

    /// The blocking call itself failed inside the engine.
    #[error("{}: {message}", code_label(.code))]
    OperationFailed { code: i32, message: String },

    /// Configuration errors (invalid TOML, bad values).
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O errors outside the engine (reading scripts, config files).
    #[error("io error: {source}")]
    Io { source: Arc<std::io::Error> },

    /// Internal or unexpected errors (worker panics, dropped producers).
    #[error("internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// Builds an engine failure from a primary result code and message.
    pub fn operation(code: i32, message: impl Into<String>) -> Self {
        Self::OperationFailed {
            code,
            message: message.into(),
        }
    }

    /// The engine result code associated with this error.
    ///
    /// Scheduler-detected errors report [`MISUSE`]; errors that never reached
    /// the engine report `SQLITE_ERROR` (1).
    pub fn errno(&self) -> i32 {
        match self {
            Self::ResourceClosed | Self::AlreadyFinalized => MISUSE,
            Self::OperationFailed { code, .. } => *code,
            Self::Config(_) | Self::Io { .. } | Self::Internal(_) => 1,
        }
    }

    /// Symbolic code name, e.g. `SQLITE_MISUSE`.
    pub fn code(&self) -> &'static str {
        code_name(self.errno())
    }

    /// Whether this error was produced by the scheduler rather than the engine.
    pub fn is_scheduler_error(&self) -> bool {
        matches!(self, Self::ResourceClosed | Self::AlreadyFinalized)
    }
}

impl From<std::io::Error> for StrataError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            source: Arc::new(source),
        }
    }
}

fn code_label(code: &i32) -> &'static str {
    code_name(*code)
}

/// Maps a primary engine result code to its symbolic name.
pub fn code_name(code: i32) -> &'static str {
    // Extended codes carry the primary code in the low byte.
    match code & 0xff {
        0 => "SQLITE_OK",
        1 => "SQLITE_ERROR",
        2 => "SQLITE_INTERNAL",
        3 => "SQLITE_PERM",
        4 => "SQLITE_ABORT",
        5 => "SQLITE_BUSY",
        6 => "SQLITE_LOCKED",
        7 => "SQLITE_NOMEM",
        8 => "SQLITE_READONLY",
        9 => "SQLITE_INTERRUPT",
        10 => "SQLITE_IOERR",
        11 => "SQLITE_CORRUPT",
        12 => "SQLITE_NOTFOUND",
        13 => "SQLITE_FULL",
        14 => "SQLITE_CANTOPEN",
        15 => "SQLITE_PROTOCOL",
        16 => "SQLITE_EMPTY",
        17 => "SQLITE_SCHEMA",
        18 => "SQLITE_TOOBIG",
        19 => "SQLITE_CONSTRAINT",
        20 => "SQLITE_MISMATCH",
        21 => "SQLITE_MISUSE",
        22 => "SQLITE_NOLFS",
        23 => "SQLITE_AUTH",
        24 => "SQLITE_FORMAT",
        25 => "SQLITE_RANGE",
        26 => "SQLITE_NOTADB",
        100 => "SQLITE_ROW",
        101 => "SQLITE_DONE",
        _ => "UNKNOWN",
    }
}
