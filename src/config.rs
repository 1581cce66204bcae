//! Configuration loading and management
//!
//! `Config` holds the daemon's runtime paths. `Settings` is the persisted,
//! user-editable part: colors, discovery filter, transport and timings. The
//! UI edits settings through IPC and the daemon writes them back to disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::color::Rgb;
use crate::link::Transport;

/// Environment variable overriding the data directory
pub const HOME_ENV: &str = "BUSYLIGHT_HOME";

/// Named pipe used for IPC on Windows
#[cfg(windows)]
pub const PIPE_NAME: &str = r"\\.\pipe\busylight-daemon";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Persisted settings file
    pub settings_path: PathBuf,

    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os(HOME_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .context("failed to locate the user data directory")?
                .join("busylight"),
        };

        Ok(Self::with_data_dir(data_dir))
    }

    /// Configuration rooted at an explicit directory
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            settings_path: data_dir.join("settings.json"),
            socket_path: data_dir.join("daemon.sock"),
            data_dir,
        }
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create data directory at {:?}", self.data_dir))?;
        Ok(())
    }

    pub fn settings_store(&self) -> SettingsStore {
        SettingsStore::new(&self.settings_path)
    }
}

/// User-editable settings, persisted as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Which peripheral transport to drive
    pub transport: Transport,

    /// Color shown while the microphone is in use
    #[serde(alias = "mic_color")]
    pub active_color: Rgb,

    /// Color shown while the microphone is idle
    pub idle_color: Rgb,

    /// Substring matched against advertised BLE names
    #[serde(alias = "bluetooth_filter")]
    pub discovery_filter: String,

    /// Substring matched against serial port descriptions
    pub serial_marker: String,

    /// Serial port picked by hand, skips discovery when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_port: Option<String>,

    /// Start monitoring as soon as the daemon is up
    pub auto_start: bool,

    /// Connect to the peripheral as soon as the daemon is up
    pub auto_connect: bool,

    pub poll_interval_secs: u64,
    pub session_check_secs: u64,
    pub keep_alive_secs: u64,
    pub scan_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub send_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            transport: Transport::Ble,
            active_color: Rgb::RED,
            idle_color: Rgb::GREEN,
            discovery_filter: "busy_light_".to_string(),
            serial_marker: "USB".to_string(),
            serial_port: None,
            auto_start: true,
            auto_connect: false,
            poll_interval_secs: 3,
            session_check_secs: 2,
            keep_alive_secs: 180,
            scan_timeout_secs: 5,
            connect_timeout_secs: 10,
            send_timeout_secs: 5,
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        clamped_secs(self.poll_interval_secs)
    }

    pub fn session_check_interval(&self) -> Duration {
        clamped_secs(self.session_check_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn scan_timeout(&self) -> Duration {
        clamped_secs(self.scan_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        clamped_secs(self.connect_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        clamped_secs(self.send_timeout_secs)
    }

    /// Discovery filter for the configured transport
    pub fn filter(&self) -> &str {
        match self.transport {
            Transport::Ble => &self.discovery_filter,
            Transport::Serial => &self.serial_marker,
        }
    }
}

/// Longest interval or timeout honored from the settings file
const MAX_INTERVAL_SECS: u64 = 3600;

/// Zero intervals would spin and huge ones overflow deadline arithmetic
fn clamped_secs(secs: u64) -> Duration {
    Duration::from_secs(secs.clamp(1, MAX_INTERVAL_SECS))
}

/// Reads and writes the settings file
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, falling back to defaults when the file does not exist
    pub fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read settings file at {:?}", self.path))?;

        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse settings file at {:?}", self.path))
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create settings directory at {:?}", dir))?;
        }

        let serialized =
            serde_json::to_string_pretty(settings).context("failed to serialize settings")?;

        fs::write(&self.path, serialized)
            .with_context(|| format!("failed to write settings file at {:?}", self.path))?;

        Ok(())
    }
}
