//! Capture bridge configuration management

use crate::error::{Error, Result};
use crate::extract::DEFAULT_BUDGET;
use crate::session::store::{DEFAULT_FLAGGED_CAPACITY, DEFAULT_LIVE_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main capture bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// HTTP listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Session buffer sizing
    #[serde(default)]
    pub buffers: BufferConfig,

    /// Body preview and extraction limits
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed CORS origins (empty = any origin)
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
            cors_origins: Vec::new(),
        }
    }
}

/// Session buffer sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Capacity of the buffer holding every ingested session
    pub live_capacity: usize,

    /// Capacity of the buffer holding flagged sessions
    pub flagged_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            live_capacity: DEFAULT_LIVE_CAPACITY,
            flagged_capacity: DEFAULT_FLAGGED_CAPACITY,
        }
    }
}

/// Body preview and extraction limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Byte budget for smart extraction
    pub default_budget: usize,

    /// Bodies longer than this are truncated in previews
    pub preview_bytes: usize,

    /// Bodies longer than this are logged when fetched
    pub large_body_warning_bytes: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            default_budget: DEFAULT_BUDGET,
            preview_bytes: 50_000,
            large_body_warning_bytes: 100_000,
        }
    }
}

impl BridgeConfig {
    /// Load and validate a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.buffers.live_capacity == 0 {
            return Err(Error::Config("buffers.live_capacity must be greater than 0".to_string()));
        }
        if self.buffers.flagged_capacity == 0 {
            return Err(Error::Config(
                "buffers.flagged_capacity must be greater than 0".to_string(),
            ));
        }
        if self.extraction.default_budget == 0 {
            return Err(Error::Config(
                "extraction.default_budget must be greater than 0".to_string(),
            ));
        }
        if self.extraction.preview_bytes == 0 {
            return Err(Error::Config(
                "extraction.preview_bytes must be greater than 0".to_string(),
            ));
        }
        if self.server.host.trim().is_empty() {
            return Err(Error::Config("server.host must not be empty".to_string()));
        }
        Ok(())
    }
}
