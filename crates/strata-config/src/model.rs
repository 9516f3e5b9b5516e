// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model.
//!
//! Every struct rejects unknown keys so typos surface at startup instead of
//! being silently ignored.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_core::OpenMode;

/// Top-level Strata configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StrataConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How the database handle is opened and scheduled.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Database file, or `:memory:` for a private in-memory database.
    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default)]
    pub mode: OpenMode,

    /// How long a statement waits on a locked database before failing with
    /// `SQLITE_BUSY`.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Start in serialize mode: every operation runs alone, in order.
    #[serde(default)]
    pub serialize: bool,
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            mode: OpenMode::default(),
            busy_timeout_ms: default_busy_timeout_ms(),
            serialize: false,
        }
    }
}

fn default_path() -> String {
    ":memory:".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
