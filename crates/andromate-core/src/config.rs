//! Configuration for andromate.
//!
//! All tool paths, settle delays and proxy endpoints live in one
//! [`AndromateConfig`], constructed once at startup and handed to the
//! [`Device`](crate::device::Device) and [`ProxyControl`](crate::proxy::ProxyControl)
//! that need it. It is stored as JSON in `~/.andromate/config.json`.
//!
//! # Example
//!
//! ```no_run
//! use andromate_core::config::AndromateConfig;
//!
//! // Load (returns defaults if file doesn't exist)
//! let config = AndromateConfig::load();
//! println!("adb: {}", config.adb_path);
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

const CONFIG_DIR: &str = ".andromate";
const CONFIG_FILENAME: &str = "config.json";

/// Returns the andromate home directory (`~/.andromate`), creating it if needed.
///
/// Falls back to the current directory when no home directory can be
/// determined.
pub fn andromate_dir() -> PathBuf {
    let dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR);
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// Returns the default config file path.
pub fn config_path() -> PathBuf {
    andromate_dir().join(CONFIG_FILENAME)
}

/// Device, proxy and OCR settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AndromateConfig {
    /// Path or name of the `adb` executable.
    pub adb_path: String,
    /// Device serial passed as `adb -s`; `None` targets the only attached device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    /// On-device path that `uiautomator dump` writes to.
    pub dump_path: String,
    /// Delay after every device shell command, in milliseconds.
    pub settle_ms: u64,
    /// Extra delay after launching, clearing or switching apps.
    pub launch_settle_ms: u64,
    /// Duration of a swipe gesture.
    pub swipe_duration_ms: u64,
    /// Extra delay after a swipe or navigation key.
    pub swipe_settle_ms: u64,
    /// Interval between two checks of a wait helper.
    pub poll_interval_ms: u64,
    /// Tag used when writing to the device log.
    pub log_tag: String,
    /// Path or name of the `tesseract` executable.
    pub tesseract_path: String,
    pub proxy: ProxyConfig,
}

impl Default for AndromateConfig {
    fn default() -> Self {
        Self {
            adb_path: "adb".to_string(),
            serial: None,
            dump_path: "/sdcard/window_dump.xml".to_string(),
            settle_ms: 300,
            launch_settle_ms: 500,
            swipe_duration_ms: 200,
            swipe_settle_ms: 200,
            poll_interval_ms: 1000,
            log_tag: "andromate".to_string(),
            tesseract_path: "tesseract".to_string(),
            proxy: ProxyConfig::default(),
        }
    }
}

/// Settings for the intercepting proxy and its HTTP control interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Origin of the control endpoints, reached through the proxy itself.
    pub control_origin: String,
    /// Proxy listener that control requests are sent through. `None` sends
    /// them directly to `control_origin`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listener: Option<String>,
    /// Path to the proxy application binary.
    pub app_path: PathBuf,
    /// Name used to kill running instances.
    pub process_name: String,
    /// How long to wait for the proxy to boot before configuring it.
    pub boot_wait_ms: u64,
    /// Delay between the control calls made right after launch.
    pub control_settle_ms: u64,
    /// Throttling presets, short key to preset name.
    pub throttling_presets: BTreeMap<String, String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        let throttling_presets = [("512", "512 kbps ISDN/DSL"), ("256", "256 kbps ISDN/DSL")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            control_origin: "http://control.charles".to_string(),
            listener: Some("http://localhost:8888".to_string()),
            app_path: PathBuf::from("/Applications/Charles.app/Contents/MacOS/Charles"),
            process_name: "Charles".to_string(),
            boot_wait_ms: 10_000,
            control_settle_ms: 1000,
            throttling_presets,
        }
    }
}

/// Errors loading an explicitly requested config file.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl AndromateConfig {
    /// Load config from `~/.andromate/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        Self::load_or_default(&config_path())
    }

    /// Load config from `path`, using defaults when the file is missing or
    /// cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Load config from an explicit path. Unlike [`load`](Self::load), a
    /// missing or invalid file is an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save config to `~/.andromate/config.json`.
    pub fn save(&self) -> std::io::Result<()> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn launch_settle(&self) -> Duration {
        Duration::from_millis(self.launch_settle_ms)
    }

    pub fn swipe_settle(&self) -> Duration {
        Duration::from_millis(self.swipe_settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
