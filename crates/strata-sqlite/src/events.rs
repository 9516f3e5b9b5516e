// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events raised on a [`crate::Database`].

use std::time::Duration;

use strata_core::{StrataError, UpdateEvent};
use strata_scheduler::ErrorEvent;

#[derive(Debug, Clone)]
pub enum DatabaseEvent {
    /// The background open succeeded.
    Open,
    /// The connection closed.
    Close,
    /// An operation failed and had no callback of its own.
    Error(StrataError),
    /// A row changed while the update hook was enabled.
    Update(UpdateEvent),
    /// A statement started running, with bound parameters expanded.
    Trace(String),
    /// A statement finished running.
    Profile { sql: String, duration: Duration },
}

impl DatabaseEvent {
    pub fn as_error(&self) -> Option<&StrataError> {
        match self {
            DatabaseEvent::Error(err) => Some(err),
            _ => None,
        }
    }
}

impl ErrorEvent for DatabaseEvent {
    fn from_error(err: StrataError) -> Self {
        DatabaseEvent::Error(err)
    }
}
