use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::SyncPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub data: DataConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    /// Root directory holding `manifest.json`, `versions_index.json`,
    /// `versions/`, `patches/` and `compacted/`.
    pub root: PathBuf,
    #[serde(default = "default_dataset")]
    pub dataset: String,
}

fn default_dataset() -> String {
    "default_cards".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    #[serde(default = "default_compacted_threshold")]
    pub compacted_threshold_missed: usize,
    #[serde(default = "default_force_full_threshold")]
    pub force_full_threshold_missed: usize,
    #[serde(default = "default_retention_days")]
    pub compacted_retention_days: usize,
    #[serde(default = "default_publish_time")]
    pub expected_publish_time_utc: String,
    #[serde(default = "default_unlock_lag")]
    pub refresh_unlock_lag_minutes: u32,
}

fn default_compacted_threshold() -> usize {
    5
}
fn default_force_full_threshold() -> usize {
    21
}
fn default_retention_days() -> usize {
    21
}
fn default_publish_time() -> String {
    "22:30".to_string()
}
fn default_unlock_lag() -> u32 {
    60
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            compacted_threshold_missed: default_compacted_threshold(),
            force_full_threshold_missed: default_force_full_threshold(),
            compacted_retention_days: default_retention_days(),
            expected_publish_time_utc: default_publish_time(),
            refresh_unlock_lag_minutes: default_unlock_lag(),
        }
    }
}

impl PolicyConfig {
    /// The policy block as published in the manifest.
    pub fn to_sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            compacted_threshold_missed: self.compacted_threshold_missed,
            force_full_threshold_missed: self.force_full_threshold_missed,
            compacted_retention_days: self.compacted_retention_days,
            expected_publish_time_utc: self.expected_publish_time_utc.clone(),
            refresh_unlock_lag_minutes: self.refresh_unlock_lag_minutes,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_req_per_minute")]
    pub max_req_per_minute: u32,
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}
fn default_max_req_per_minute() -> u32 {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_req_per_minute: default_max_req_per_minute(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.data.dataset.is_empty() {
        anyhow::bail!("data.dataset must not be empty");
    }

    if config.policy.compacted_threshold_missed == 0 {
        anyhow::bail!("policy.compacted_threshold_missed must be >= 1");
    }

    if config.policy.force_full_threshold_missed <= config.policy.compacted_threshold_missed {
        anyhow::bail!(
            "policy.force_full_threshold_missed ({}) must be greater than policy.compacted_threshold_missed ({})",
            config.policy.force_full_threshold_missed,
            config.policy.compacted_threshold_missed
        );
    }

    if config.server.bind.is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    if config.server.max_req_per_minute == 0 {
        anyhow::bail!("server.max_req_per_minute must be >= 1");
    }

    Ok(config)
}
