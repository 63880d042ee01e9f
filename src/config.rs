//! Global configuration parsing and validation.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::{AppError, Result};

fn default_listen_addr() -> String {
    "127.0.0.1:4460".into()
}

fn default_outbound_queue_depth() -> usize {
    16
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// TCP address the relay listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Bound on the per-session outbound frame queue. A depth of at least 2
    /// keeps a producer from blocking while the writer is reporting that
    /// producer's own failure.
    #[serde(default = "default_outbound_queue_depth")]
    pub outbound_queue_depth: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            outbound_queue_depth: default_outbound_queue_depth(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if the file cannot be read, parsed, or
    /// fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!(
                "cannot read config file '{}': {err}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] on parse or validation failure.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.trim().is_empty() {
            return Err(AppError::Config("listen_addr must not be empty".into()));
        }
        if self.outbound_queue_depth < 2 {
            return Err(AppError::Config(format!(
                "outbound_queue_depth must be at least 2, got {}",
                self.outbound_queue_depth
            )));
        }
        Ok(())
    }
}
