// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Strata workspace.
//!
//! This crate provides the error type and the value types exchanged between
//! the operation scheduler, the SQLite binding and the command-line front end.

pub mod error;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::{code_name, StrataError, MISUSE};
pub use types::{OpenMode, Params, Row, RunInfo, UpdateAction, UpdateEvent, Value};

/// Convenience alias used across the workspace.
pub type Result<T, E = StrataError> = std::result::Result<T, E>;
