//! Client configuration

use std::path::Path;

use anyhow::Context;
use net_transport::TcpConfig;
use serde::{Deserialize, Serialize};

/// Settings loaded from `--config`, then overridden by flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub transport: TcpConfig,
    /// Pre-shared passphrase; the device derives the same secret from it
    pub passphrase: String,
}

impl ClientConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }
}
