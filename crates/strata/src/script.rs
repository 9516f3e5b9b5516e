// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `strata script` command implementation.
//!
//! The script is split into statements and every statement is submitted up
//! front in serialize mode, so they run one at a time in file order. A
//! failing statement does not stop the ones after it.

use std::path::Path;

use strata_config::StrataConfig;
use strata_core::StrataError;
use tracing::info;

use crate::session::{Session, Slot};

/// Splits `text` into statements. A statement ends at a line whose last
/// non-blank character is `;`. Blank lines and `--` comment lines between
/// statements are skipped.
pub fn split_statements(text: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if current.is_empty() && (trimmed.is_empty() || trimmed.starts_with("--")) {
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
        if trimmed.ends_with(';') {
            statements.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        statements.push(current);
    }
    statements
}

/// First line of a statement, for reporting.
fn summary(statement: &str) -> &str {
    statement.lines().next().unwrap_or_default().trim()
}

pub async fn run_script(config: &StrataConfig, file: &Path) -> Result<(), StrataError> {
    let text = std::fs::read_to_string(file)?;
    let statements = split_statements(&text);
    info!(file = %file.display(), statements = statements.len(), "running script");

    let session = Session::open(&config.database).await?;
    let slots: Vec<Slot<()>> = session.db.serialize_with(|db| {
        statements
            .iter()
            .map(|sql| {
                let slot = Slot::new();
                db.exec(sql.clone(), slot.reply());
                slot
            })
            .collect()
    });
    session.settle().await?;

    let mut failed = 0usize;
    for (index, (sql, slot)) in statements.iter().zip(&slots).enumerate() {
        match slot.take() {
            Ok(()) => println!("[{}] ok    {}", index + 1, summary(sql)),
            Err(e) => {
                failed += 1;
                println!("[{}] error {}: {e}", index + 1, summary(sql));
            }
        }
    }
    session.close().await?;

    if failed > 0 {
        return Err(StrataError::Internal(format!(
            "{failed} of {} statements failed",
            statements.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_terminated_lines() {
        let script = "-- schema\nCREATE TABLE t (\n  x INTEGER\n);\n\nINSERT INTO t VALUES (1);\nSELECT * FROM t";
        let statements = split_statements(script);
        assert_eq!(
            statements,
            vec![
                "CREATE TABLE t (\n  x INTEGER\n);",
                "INSERT INTO t VALUES (1);",
                "SELECT * FROM t",
            ]
        );
    }

    #[test]
    fn empty_script_has_no_statements() {
        assert!(split_statements("\n  \n-- nothing here\n").is_empty());
    }

    #[test]
    fn summary_is_first_line() {
        assert_eq!(summary("CREATE TABLE t (\n x\n);"), "CREATE TABLE t (");
    }
}
