// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `strata exec` command implementation.

use strata_config::StrataConfig;
use strata_core::StrataError;

use crate::session::{Session, Slot};

/// Runs `sql` as one batch.
pub async fn run_exec(config: &StrataConfig, sql: String) -> Result<(), StrataError> {
    let session = Session::open(&config.database).await?;
    let done = Slot::new();
    session.db.exec(sql, done.reply());
    session.settle().await?;
    let outcome = done.take();
    session.close().await?;
    outcome?;
    eprintln!("ok");
    Ok(())
}
