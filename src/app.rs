use crate::error::ConfigError;
use crate::sync::messages::DEFAULT_MATCH_WINDOW_SECS;
use crate::sync::scheduler::SchedulerConfig;
use directories::{BaseDirs, ProjectDirs};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub inactivity_delay_ms: u64,
    pub enabled: bool,
    pub chat_limit: usize,
    pub message_limit: usize,
    pub match_window_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: 10_000,
            max_interval_ms: 300_000,
            inactivity_delay_ms: 30_000,
            enabled: true,
            chat_limit: 1000,
            message_limit: 50,
            match_window_secs: DEFAULT_MATCH_WINDOW_SECS,
        }
    }
}

impl SyncSettings {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            min_interval: Duration::from_millis(self.min_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            inactivity_delay: Duration::from_millis(self.inactivity_delay_ms),
            enabled: self.enabled,
        }
        .normalized()
    }
}

impl Settings {
    // TOML is the canonical format. A JSON state file left by older builds is
    // converted to TOML the first time it is read.
    pub fn toml_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("bb-sync.toml"))
    }

    fn legacy_json_path() -> Option<PathBuf> {
        let proj = ProjectDirs::from("com", "example", "BlueBubblesGTK")?;
        Some(proj.config_dir().join("state.json"))
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.password.is_empty()
    }

    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::toml_path().ok_or(ConfigError::NoConfigDir)?;
        load_with_legacy(&path, Self::legacy_json_path().as_deref())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::toml_path().ok_or(ConfigError::NoConfigDir)?;
        save_to_path(&path, self)
    }
}

/// Missing file means defaults.
pub fn load_from_path(path: &Path) -> Result<Settings, ConfigError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(toml::from_str(&text)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(Settings::default()),
        Err(err) => Err(err.into()),
    }
}

pub fn save_to_path(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = toml::to_string_pretty(settings)?;
    fs::write(path, text)?;
    Ok(())
}

pub fn load_with_legacy(path: &Path, legacy: Option<&Path>) -> Result<Settings, ConfigError> {
    if path.exists() {
        return load_from_path(path);
    }
    if let Some(legacy) = legacy {
        match fs::read(legacy) {
            Ok(bytes) => {
                let settings: Settings = serde_json::from_slice(&bytes)?;
                save_to_path(path, &settings)?;
                info!("migrated {} to {}", legacy.display(), path.display());
                return Ok(settings);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(Settings::default())
}
