use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store_path: PathBuf,
    pub poll_interval_ms: u64,
    /// Only used when no block cursor has been persisted yet.
    pub start_block: u64,
    pub transaction_timeout_secs: u64,
    pub update_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("swap_sync.sqlite3"),
            poll_interval_ms: 1_000,
            start_block: 0,
            transaction_timeout_secs: 86_400,
            update_channel_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read engine config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse engine config {}", path.display()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "poll_interval_ms": 25, "store_path": "/tmp/x.sqlite3" }"#)?;

        let cfg = EngineConfig::load(&path)?;
        assert_eq!(cfg.poll_interval(), Duration::from_millis(25));
        assert_eq!(cfg.store_path, PathBuf::from("/tmp/x.sqlite3"));
        assert_eq!(cfg.transaction_timeout_secs, 86_400);
        assert_eq!(cfg.start_block, 0);
        Ok(())
    }
}
