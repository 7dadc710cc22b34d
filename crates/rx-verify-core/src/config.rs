//! Workflow configuration.
//!
//! Every field has a default, so `{}` is a valid configuration and partial
//! JSON only overrides what it names.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_LOG_FILTER: &str = "rx_verify_core=info";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Catalog matching settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Most suggestions kept per line
    pub max_suggestions: usize,
    /// Name similarity a candidate needs to be auto-mapped
    pub name_match_threshold: f64,
    /// Extraction confidence a line needs to be auto-mapped
    pub auto_map_confidence: f64,
    pub search_timeout_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_suggestions: 5,
            name_match_threshold: 0.90,
            auto_map_confidence: 0.80,
            search_timeout_ms: 3000,
        }
    }
}

impl ReconcilerConfig {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }
}

/// Top-level workflow settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkflowConfig {
    pub reconciler: ReconcilerConfig,
    pub order_timeout_ms: u64,
    /// Default `EnvFilter` directive; `RUST_LOG` overrides it
    pub log_filter: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            reconciler: ReconcilerConfig::default(),
            order_timeout_ms: 5000,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl WorkflowConfig {
    /// Parse and validate JSON.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: WorkflowConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_millis(self.order_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.reconciler;
        for (name, value) in [
            ("name_match_threshold", r.name_match_threshold),
            ("auto_map_confidence", r.auto_map_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if r.max_suggestions == 0 {
            return Err(ConfigError::Invalid("max_suggestions must be positive".into()));
        }
        if r.search_timeout_ms == 0 || self.order_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        Ok(())
    }
}
