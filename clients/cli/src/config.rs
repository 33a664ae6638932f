//! CLI configuration

use cosmiccipher_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// CLI configuration file
///
/// ```toml
/// [engine]
/// prekeys_per_bundle = 8
///
/// [engine.password_kdf]
/// memory_kib = 65536
/// iterations = 3
/// parallelism = 1
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Engine settings
    pub engine: EngineConfig,
}

impl CliConfig {
    /// Load config from `path`, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
                toml::from_str(&content)?
            }
            None => Self::default(),
        };
        config.engine.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
