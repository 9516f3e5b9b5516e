// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite handles scheduled by `strata-scheduler`.
//!
//! [`Database`] and [`Statement`] expose callback-style operations. Each call
//! becomes a work item; the blocking engine call runs on a worker through the
//! database's [`strata_scheduler::Dispatcher`] and its callback runs back on
//! the consumer thread.
//!
//! ```no_run
//! # async fn demo() -> Result<(), strata_core::StrataError> {
//! use strata_core::{OpenMode, Params};
//! use strata_scheduler::{EventLoop, Reply};
//! use strata_sqlite::Database;
//!
//! let event_loop = EventLoop::new()?;
//! let db = Database::open(event_loop.dispatcher(), ":memory:", OpenMode::default(), Reply::none());
//! db.exec("CREATE TABLE t (x INTEGER)", Reply::none());
//! let stmt = db.prepare("SELECT count(*) AS n FROM t", Reply::none());
//! stmt.get(Params::None, Reply::new(|row| println!("{row:?}")));
//! event_loop.run_until_idle().await?;
//! # Ok(())
//! # }
//! ```

mod connection;
pub mod database;
pub mod events;
pub mod statement;
mod trace;
mod values;

pub use connection::engine_error;
pub use database::{Database, Setting, DEFAULT_BUSY_TIMEOUT};
pub use events::DatabaseEvent;
pub use statement::Statement;
