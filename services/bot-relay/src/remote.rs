//! In-place configuration updates received over the command topic.

use std::fs;
use std::path::PathBuf;

use tracing::info;

use crate::config::RelayConfig;
use crate::error::RelayError;

/// Applies configuration payloads pushed while the engine is running.
/// The engine watches the override file and hot-reloads it, so applying
/// an update is a matter of rewriting the file atomically enough for a
/// single reader.
pub struct RemoteConfigWriter {
    override_path: PathBuf,
    persistent_path: PathBuf,
    last_applied: Option<String>,
}

impl RemoteConfigWriter {
    pub fn new(cfg: &RelayConfig) -> Self {
        Self {
            override_path: cfg.override_path(),
            persistent_path: cfg.controllers_path(),
            last_applied: None,
        }
    }

    /// Apply a JSON configuration payload. Returns `Ok(true)` when the
    /// override file was rewritten and `Ok(false)` when the payload is
    /// identical to the last applied one.
    pub fn apply(&mut self, payload: &[u8]) -> Result<bool, RelayError> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| RelayError::ConfigGeneration(format!("invalid update payload: {}", e)))?;
        let canonical = serde_json::to_string(&value)
            .map_err(|e| RelayError::ConfigGeneration(e.to_string()))?;

        if self.last_applied.as_deref() == Some(canonical.as_str()) {
            info!("Configuration update matches the applied one, skipping");
            return Ok(false);
        }

        let yaml = serde_yaml::to_string(&value)
            .map_err(|e| RelayError::ConfigGeneration(e.to_string()))?;
        fs::write(&self.override_path, &yaml)?;

        // Keep the boot-time controllers file in sync so a restart picks
        // up the same configuration, but only if one was generated.
        if self.persistent_path.exists() {
            fs::write(&self.persistent_path, &yaml)?;
        }

        self.last_applied = Some(canonical);
        info!("Applied configuration update to {}", self.override_path.display());
        Ok(true)
    }
}
