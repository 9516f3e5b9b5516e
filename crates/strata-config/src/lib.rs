// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for Strata.
//!
//! TOML files merged over compiled defaults, overridden by `STRATA_*`
//! environment variables, then validated. Errors come back as miette
//! diagnostics with typo suggestions.
//!
//! ```no_run
//! use strata_config::load_and_validate;
//!
//! let config = load_and_validate().expect("config errors");
//! println!("database: {}", config.database.path);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

use std::path::Path;

pub use diagnostic::{render_errors, ConfigError};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::{DatabaseConfig, LoggingConfig, StrataConfig};

/// Loads from the standard locations and validates.
pub fn load_and_validate() -> Result<StrataConfig, Vec<ConfigError>> {
    finish(loader::load_config(), read_sources(&loader::search_paths()))
}

/// Loads one explicit file (plus the environment) and validates.
pub fn load_and_validate_path(path: &Path) -> Result<StrataConfig, Vec<ConfigError>> {
    if !path.exists() {
        return Err(vec![ConfigError::Other(format!(
            "config file `{}` does not exist",
            path.display()
        ))]);
    }
    finish(
        loader::load_config_from_path(path),
        read_sources(&[path.to_path_buf()]),
    )
}

/// Loads from a TOML string and validates.
pub fn load_and_validate_str(toml_content: &str) -> Result<StrataConfig, Vec<ConfigError>> {
    finish(
        loader::load_config_from_str(toml_content),
        vec![("<inline>".to_string(), toml_content.to_string())],
    )
}

/// Renders the effective configuration as TOML.
pub fn to_toml(config: &StrataConfig) -> Result<String, ConfigError> {
    toml::to_string_pretty(config).map_err(|e| ConfigError::Other(e.to_string()))
}

#[allow(clippy::result_large_err)]
fn finish(
    loaded: Result<StrataConfig, figment::Error>,
    sources: Vec<(String, String)>,
) -> Result<StrataConfig, Vec<ConfigError>> {
    match loaded {
        Ok(config) => {
            validation::validate_config(&config)?;
            tracing::debug!(path = %config.database.path, "configuration loaded");
            Ok(config)
        }
        Err(err) => Err(diagnostic::figment_to_config_errors(err, &sources)),
    }
}

/// File contents for span lookup, keyed the way Figment reports origins.
fn read_sources(paths: &[std::path::PathBuf]) -> Vec<(String, String)> {
    paths
        .iter()
        .filter_map(|path| {
            let content = std::fs::read_to_string(path).ok()?;
            // Figment records relative files by their absolute path.
            let key = std::path::absolute(path)
                .unwrap_or_else(|_| path.clone())
                .display()
                .to_string();
            Some((key, content))
        })
        .collect()
}
