// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `strata query` command implementation.
//!
//! Rows are printed to stdout as JSON lines, one object per row with columns
//! in select order. The row count goes to stderr so stdout stays pipeable.

use std::io::Write;

use strata_config::StrataConfig;
use strata_core::{Params, Row, StrataError};
use tracing::warn;

use crate::session::{Session, Slot};

/// Runs `sql` and prints its rows. With `stream`, rows are printed as the
/// worker produces them instead of after the whole result is collected.
pub async fn run_query(config: &StrataConfig, sql: String, stream: bool) -> Result<(), StrataError> {
    let session = Session::open(&config.database).await?;
    let prepared = Slot::new();
    let stmt = session.db.prepare(sql, prepared.reply());

    let outcome = if stream {
        let count = Slot::new();
        stmt.each(Params::None, print_row, count.reply());
        session.settle().await?;
        prepared.take().and_then(|()| count.take())
    } else {
        let rows = Slot::<Vec<Row>>::new();
        stmt.all(Params::None, rows.reply());
        session.settle().await?;
        prepared.take().and_then(|()| rows.take()).map(|rows| {
            let total = rows.len();
            rows.into_iter().for_each(print_row);
            total
        })
    };
    session.close().await?;

    let total = outcome?;
    eprintln!("{total} row{}", if total == 1 { "" } else { "s" });
    Ok(())
}

fn print_row(row: Row) {
    match serde_json::to_string(&row) {
        Ok(line) => {
            let mut out = std::io::stdout().lock();
            if let Err(e) = writeln!(out, "{line}") {
                warn!(error = %e, "failed to write row");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize row"),
    }
}
