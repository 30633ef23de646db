//! Configuration module for Sockgate
//!
//! TOML configuration loading and the typed config structures.

mod embedded;
mod server;

pub use embedded::EmbeddedConfig;
pub use server::{LimitsConfig, ServerConfig, TimeoutConfig};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Standalone server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Embedded-client mode; when present, the binary runs the embedded
    /// local server instead of the standalone one
    #[serde(default)]
    pub embedded: Option<EmbeddedConfig>,
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse configuration")
}
