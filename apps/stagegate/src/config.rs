//! # Configuration
//!
//! Optional `stagegate.toml`. A missing file means defaults; a present but
//! malformed file is an error.
//!
//! ```toml
//! [approval]
//! default_expiry_days = 7
//!
//! [storage]
//! backend = "redb"   # or "memory"
//! ```

use serde::{Deserialize, Serialize};
use stagegate_core::PipelineConfig;
use stagegate_core::PipelineError;
use stagegate_core::primitives::DEFAULT_APPROVAL_EXPIRY_DAYS;
use std::path::Path;

/// Where records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// redb database file (persistent)
    #[default]
    Redb,
    /// In-process tables, discarded on exit
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Days before an unanswered approval request expires
    #[serde(default = "default_expiry_days")]
    pub default_expiry_days: i64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            default_expiry_days: default_expiry_days(),
        }
    }
}

fn default_expiry_days() -> i64 {
    DEFAULT_APPROVAL_EXPIRY_DAYS
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,
}

impl AppConfig {
    /// Read `path`, or fall back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::InvalidInput(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
            .map_err(|e| PipelineError::InvalidInput(format!("{}: {}", path.display(), e)))
    }

    /// Parse TOML text.
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Engine settings derived from this file.
    pub fn pipeline_config(&self) -> Result<PipelineConfig, PipelineError> {
        PipelineConfig::with_expiry_days(self.approval.default_expiry_days)
    }
}
