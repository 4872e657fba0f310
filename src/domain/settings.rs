use crate::domain::retry::MAX_ATTEMPTS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "heart_rate".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,

    // Retry policy
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    // BLE timing
    #[serde(default = "default_known_address_timeout_secs")]
    pub known_address_timeout_secs: u64,
    #[serde(default = "default_discovery_window_secs")]
    pub discovery_window_secs: u64,
    #[serde(default = "default_filtered_scan_timeout_secs")]
    pub filtered_scan_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            known_address_timeout_secs: default_known_address_timeout_secs(),
            discovery_window_secs: default_discovery_window_secs(),
            filtered_scan_timeout_secs: default_filtered_scan_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    MAX_ATTEMPTS
}
fn default_retry_delay_secs() -> u64 {
    5
}
fn default_known_address_timeout_secs() -> u64 {
    10
}
fn default_discovery_window_secs() -> u64 {
    5
}
fn default_filtered_scan_timeout_secs() -> u64 {
    10
}
fn default_connect_timeout_secs() -> u64 {
    20
}

impl Settings {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            timing: SessionTiming {
                known_address_timeout: Duration::from_secs(self.known_address_timeout_secs),
                discovery_window: Duration::from_secs(self.discovery_window_secs),
                filtered_scan_timeout: Duration::from_secs(self.filtered_scan_timeout_secs),
            },
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Time bounds handed to each acquisition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    pub known_address_timeout: Duration,
    pub discovery_window: Duration,
    pub filtered_scan_timeout: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Settings::default().controller_config().timing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub timing: SessionTiming,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Settings::default().controller_config()
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load settings from the user config directory, writing the defaults
    /// there on first run.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Self::open(settings_path)
    }

    pub fn open(settings_path: PathBuf) -> anyhow::Result<Self> {
        let first_run = !settings_path.exists();
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        let service = Self {
            settings,
            settings_path,
        };
        if first_run {
            service.save()?;
        }
        Ok(service)
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("MiBandHeartRate");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}
