//! Configuration loading for the daemon
//!
//! Reads the static TOML configuration, writing a default file on first start.

use orv_core::{OrvError, Result, StaticConfig};
use std::path::Path;
use tokio::fs;
use tracing::info;

/// Load the static config from `path`, creating it with defaults if missing.
pub(crate) async fn load_or_create(path: &Path) -> Result<StaticConfig> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        info!(
            "Static config not found at {}. Creating with defaults.",
            path.display()
        );

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                OrvError::Config(format!(
                    "Failed to create config directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let config = StaticConfig::default();
        let toml_str = config
            .to_toml()
            .map_err(|e| OrvError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, &toml_str)
            .await
            .map_err(|e| OrvError::Config(format!("Failed to write config file: {}", e)))?;

        return Ok(config);
    }

    let content = fs::read_to_string(path)
        .await
        .map_err(|e| OrvError::Config(format!("Failed to read config file: {}", e)))?;

    StaticConfig::from_toml(&content)
        .map_err(|e| OrvError::Config(format!("Failed to parse config file: {}", e)))
}
