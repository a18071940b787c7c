//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/event-reporter/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/event-reporter/` (~/.config/event-reporter/)
//! - Data: `$XDG_DATA_HOME/event-reporter/` (~/.local/share/event-reporter/)
//! - State/Logs: `$XDG_STATE_HOME/event-reporter/` (~/.local/state/event-reporter/)
//! - Runtime: `$XDG_RUNTIME_DIR/event-reporter/` (socket and its lock)
//!
//! The device password lives next to the config file in `<stem>-priv.toml`
//! and is written once, after the device first registers.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "event-reporter";

/// One day
const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// One hour
const MAX_TIMEOUT_SECS: u64 = 60 * 60;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Returns XDG_RUNTIME_DIR or the system temp directory
fn xdg_runtime_dir() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => std::env::temp_dir(),
    }
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Device identity on the reporting server
    #[serde(default)]
    pub device: DeviceConfig,

    /// Delivery loop tuning
    #[serde(default)]
    pub reporter: ReporterConfig,

    /// Local enqueue endpoint
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Queue storage
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Who this device is and where it reports to
#[derive(Debug, Deserialize, Default, Clone)]
pub struct DeviceConfig {
    /// API server URL (e.g., `https://api.cacophony.org.nz`)
    #[serde(default)]
    pub server_url: String,

    /// Group the device registers into
    #[serde(default)]
    pub group: String,

    /// Device name, unique within the group
    #[serde(default)]
    pub device_name: String,
}

/// Delivery loop configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ReporterConfig {
    /// Seconds between delivery passes
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Random spread applied to each interval, in seconds
    #[serde(default = "default_jitter_secs")]
    pub jitter_secs: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            jitter_secs: default_jitter_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ReporterConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_secs(self.jitter_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_interval_secs() -> u64 {
    10
}

fn default_jitter_secs() -> u64 {
    3
}

fn default_timeout_secs() -> u64 {
    30
}

/// Local IPC configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct IpcConfig {
    /// Override for the socket path
    pub socket_path: Option<PathBuf>,
}

/// Queue storage configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct StoreConfig {
    /// Override for the SQLite database path
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Contents of the private credentials file
#[derive(Debug, Serialize, Deserialize)]
struct PrivateConfig {
    #[serde(default)]
    password: Option<String>,
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific path
    ///
    /// The device section has no sensible defaults, so a missing file is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let device = &self.device;
        if device.server_url.trim().is_empty() {
            return Err(Error::Config("device.server_url is required".to_string()));
        }
        if !(device.server_url.starts_with("http://") || device.server_url.starts_with("https://"))
        {
            return Err(Error::Config(format!(
                "device.server_url must be an http(s) URL, got {:?}",
                device.server_url
            )));
        }
        if device.group.trim().is_empty() {
            return Err(Error::Config("device.group is required".to_string()));
        }
        if device.device_name.trim().is_empty() {
            return Err(Error::Config("device.device_name is required".to_string()));
        }
        if self.reporter.interval_secs == 0 {
            return Err(Error::Config(
                "reporter.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.reporter.timeout_secs == 0 {
            return Err(Error::Config(
                "reporter.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.reporter.interval_secs > MAX_INTERVAL_SECS {
            return Err(Error::Config(format!(
                "reporter.interval_secs must be at most {}",
                MAX_INTERVAL_SECS
            )));
        }
        if self.reporter.jitter_secs > self.reporter.interval_secs {
            return Err(Error::Config(
                "reporter.jitter_secs must not exceed reporter.interval_secs".to_string(),
            ));
        }
        if self.reporter.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(Error::Config(format!(
                "reporter.timeout_secs must be at most {}",
                MAX_TIMEOUT_SECS
            )));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/event-reporter/config.toml` (~/.config/event-reporter/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join(APP_DIR).join("config.toml")
    }

    /// Returns the data directory path (for the queue database)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join(APP_DIR)
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join(APP_DIR)
    }

    /// Returns the runtime directory path (for the socket)
    pub fn runtime_dir() -> PathBuf {
        xdg_runtime_dir().join(APP_DIR)
    }

    /// Returns the default database file path
    ///
    /// `$XDG_DATA_HOME/event-reporter/events.db`
    pub fn default_database_path() -> PathBuf {
        Self::data_dir().join("events.db")
    }

    /// Returns the default socket path
    ///
    /// `$XDG_RUNTIME_DIR/event-reporter/events.sock`
    pub fn default_socket_path() -> PathBuf {
        Self::runtime_dir().join("events.sock")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/event-reporter/event-reporter.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("event-reporter.log")
    }

    /// Database path after applying the `[store]` override
    pub fn database_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(Self::default_database_path)
    }

    /// Socket path after applying the `[ipc]` override
    pub fn socket_path(&self) -> PathBuf {
        self.ipc
            .socket_path
            .clone()
            .unwrap_or_else(Self::default_socket_path)
    }
}

/// Path of the private credentials file that sits beside `config_file`.
///
/// `/etc/event-reporter.toml` becomes `/etc/event-reporter-priv.toml`.
pub fn credentials_path(config_file: &Path) -> PathBuf {
    let stem = config_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string());
    config_file.with_file_name(format!("{}-priv.toml", stem))
}

/// Read the stored device password, if the device has registered before.
pub fn read_password(path: &Path) -> Result<Option<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let private: PrivateConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("failed to parse {:?}: {}", path, e)))?;

    Ok(private.password.filter(|p| !p.is_empty()))
}

/// Persist a newly allocated device password, readable by the owner only.
pub fn write_password(path: &Path, password: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = toml::to_string(&PrivateConfig {
        password: Some(password.to_string()),
    })
    .map_err(|e| Error::Config(format!("failed to encode credentials: {}", e)))?;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        toml::from_str(
            r#"
[device]
server_url = "https://api.example.com"
group = "test-group"
device_name = "sensor-1"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.reporter.interval_secs, 10);
        assert_eq!(config.reporter.jitter_secs, 3);
        assert_eq!(config.reporter.timeout_secs, 30);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[device]
server_url = "https://api.example.com"
group = "test-group"
device_name = "sensor-1"

[reporter]
interval_secs = 60
jitter_secs = 0

[ipc]
socket_path = "/run/events.sock"

[store]
path = "/var/lib/events.db"

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.device.device_name, "sensor-1");
        assert_eq!(config.reporter.interval(), Duration::from_secs(60));
        assert_eq!(config.reporter.jitter(), Duration::ZERO);
        assert_eq!(config.reporter.timeout_secs, 30);
        assert_eq!(config.socket_path(), PathBuf::from("/run/events.sock"));
        assert_eq!(config.database_path(), PathBuf::from("/var/lib/events.db"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validation() {
        assert!(valid_config().validate().is_ok());

        let mut config = valid_config();
        config.device.group = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.device.server_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.reporter.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.reporter.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.reporter.jitter_secs = 10_000_000_000_000_000;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.reporter.interval_secs = MAX_INTERVAL_SECS + 1;
        config.reporter.jitter_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.reporter.interval_secs = 5;
        config.reporter.jitter_secs = 6;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.reporter.timeout_secs = MAX_TIMEOUT_SECS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials_path() {
        assert_eq!(
            credentials_path(Path::new("/etc/event-reporter.toml")),
            PathBuf::from("/etc/event-reporter-priv.toml")
        );
        assert_eq!(
            credentials_path(Path::new("conf/config.toml")),
            PathBuf::from("conf/config-priv.toml")
        );
    }

    #[test]
    fn test_password_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config-priv.toml");

        assert_eq!(read_password(&path).unwrap(), None);

        write_password(&path, "s3cret").unwrap();
        assert_eq!(read_password(&path).unwrap().as_deref(), Some("s3cret"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_empty_password_means_unregistered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config-priv.toml");
        std::fs::write(&path, "password = \"\"\n").unwrap();
        assert_eq!(read_password(&path).unwrap(), None);
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
