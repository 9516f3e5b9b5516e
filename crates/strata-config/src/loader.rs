// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Later layers override earlier ones:
//! 1. compiled defaults
//! 2. `/etc/strata/strata.toml`
//! 3. `<config dir>/strata/strata.toml`
//! 4. `./strata.toml`
//! 5. `STRATA_*` environment variables

#![allow(clippy::result_large_err)] // figment::Error is external

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::StrataConfig;

pub const FILE_NAME: &str = "strata.toml";
pub const SYSTEM_PATH: &str = "/etc/strata/strata.toml";

/// The per-user config file, if the platform has a config directory.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("strata").join(FILE_NAME))
}

/// Every file layer in merge order.
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(SYSTEM_PATH)];
    paths.extend(user_config_path());
    paths.push(PathBuf::from(FILE_NAME));
    paths
}

/// The full Figment stack, before extraction.
pub fn build_figment() -> Figment {
    search_paths()
        .into_iter()
        .fold(defaults(), |figment, path| figment.merge(Toml::file(path)))
        .merge(env_provider())
}

/// Loads configuration from the standard locations plus the environment.
pub fn load_config() -> Result<StrataConfig, figment::Error> {
    build_figment().extract()
}

/// Loads one explicit file plus the environment; the standard locations are
/// skipped.
pub fn load_config_from_path(path: &Path) -> Result<StrataConfig, figment::Error> {
    defaults()
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Loads from a TOML string over the defaults only.
pub fn load_config_from_str(toml_content: &str) -> Result<StrataConfig, figment::Error> {
    defaults().merge(Toml::string(toml_content)).extract()
}

fn defaults() -> Figment {
    Figment::new().merge(Serialized::defaults(StrataConfig::default()))
}

/// `STRATA_DATABASE_BUSY_TIMEOUT_MS` must become `database.busy_timeout_ms`,
/// so only the section prefix is turned into a dot. Keys arrive in their
/// original case.
fn env_provider() -> Env {
    Env::prefixed("STRATA_").map(|key| {
        key.as_str()
            .to_ascii_lowercase()
            .replacen("database_", "database.", 1)
            .replacen("logging_", "logging.", 1)
            .into()
    })
}
