use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::authority::ServiceOptions;
use crate::common::ChatSettings;

pub const DEFAULT_CONFIG_PATH: &str = "config/chat.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub settings: ChatSettings,
    /// Per-client inbox size; deliveries beyond it are dropped.
    pub inbox_capacity: usize,
    /// Recent messages replayed to late joiners.
    pub join_replay: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let options = ServiceOptions::default();
        Self {
            settings: ChatSettings::default(),
            inbox_capacity: options.inbox_capacity,
            join_replay: options.join_replay,
        }
    }
}

impl AppConfig {
    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            inbox_capacity: self.inbox_capacity,
            join_replay: self.join_replay,
            ..ServiceOptions::default()
        }
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => accept_or_default(config, path),
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

/// Settings the authority would refuse never leave the loader.
fn accept_or_default(config: AppConfig, path: &Path) -> AppConfig {
    if let Err(err) = config.settings.validate() {
        log::warn!("Config file {} rejected: {err}", path.display());
        return AppConfig::default();
    }
    if config.inbox_capacity == 0 {
        log::warn!(
            "Config file {} has inbox_capacity 0; using {}",
            path.display(),
            AppConfig::default().inbox_capacity
        );
        return AppConfig {
            inbox_capacity: AppConfig::default().inbox_capacity,
            ..config
        };
    }
    config
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}
