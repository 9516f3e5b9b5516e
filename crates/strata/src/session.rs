// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Opening and closing the database for one command run.

use std::cell::RefCell;
use std::rc::Rc;

use strata_config::DatabaseConfig;
use strata_core::StrataError;
use strata_scheduler::{EventLoop, Reply};
use strata_sqlite::Database;
use tracing::debug;

/// Holds the outcome of one operation until the loop goes idle.
pub struct Slot<T> {
    outcome: Rc<RefCell<Option<Result<T, StrataError>>>>,
}

impl<T: 'static> Slot<T> {
    pub fn new() -> Self {
        Self {
            outcome: Rc::new(RefCell::new(None)),
        }
    }

    pub fn reply(&self) -> Reply<T> {
        let outcome = Rc::clone(&self.outcome);
        Reply::new(move |result| *outcome.borrow_mut() = Some(result))
    }

    /// The recorded outcome. An operation that never completed is an error.
    pub fn take(&self) -> Result<T, StrataError> {
        self.outcome
            .borrow_mut()
            .take()
            .unwrap_or_else(|| Err(StrataError::Internal("operation never completed".into())))
    }
}

impl<T: 'static> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// An open database and the loop that drives it.
pub struct Session {
    pub event_loop: EventLoop,
    pub db: Database,
}

impl Session {
    pub async fn open(config: &DatabaseConfig) -> Result<Self, StrataError> {
        let event_loop = EventLoop::new()?;
        let opened = Slot::new();
        let db = Database::open_with_config(event_loop.dispatcher(), config, opened.reply());
        event_loop.run_until_idle().await?;
        opened.take()?;
        debug!(path = %config.path, "session opened");
        Ok(Self { event_loop, db })
    }

    /// Runs everything submitted so far to completion.
    pub async fn settle(&self) -> Result<(), StrataError> {
        self.event_loop.run_until_idle().await
    }

    pub async fn close(self) -> Result<(), StrataError> {
        let closed = Slot::new();
        self.db.close(closed.reply());
        self.settle().await?;
        closed.take()
    }
}
