//! TOML-based configuration persistence for a BattleBump peer.
//!
//! Reads and writes [`AppConfig`] to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\BattleBump\config.toml`
//! - Linux:    `~/.config/battlebump/config.toml`
//! - macOS:    `~/Library/Application Support/BattleBump/config.toml`
//!
//! ```toml
//! [peer]
//! display_name = "living-room-pc"
//! service_token = "RPSgame"
//!
//! [network]
//! discovery_port = 24850
//! advertise_interval_ms = 1000
//! ```
//!
//! Every field carries a serde default, so a missing file, a missing section
//! or a missing key all fall back to the values below.

use std::path::{Path, PathBuf};

use battlebump_core::{identity::device_name, SERVICE_TOKEN};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// An address field is not a valid IP address.
    #[error("invalid {field} {value:?}: expected an IP address")]
    InvalidAddress { field: &'static str, value: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub peer: PeerSection,
    #[serde(default)]
    pub network: NetworkSection,
}

/// Who this peer is and how it reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerSection {
    /// Name shown to other players.  Defaults to the device's host name.
    #[serde(default = "device_name")]
    pub display_name: String,
    /// Discovery namespace.  Both sides must agree.
    #[serde(default = "default_service_token")]
    pub service_token: String,
    /// Mirror swallowed failures to the UI as `ErrorOccurred`.
    #[serde(default)]
    pub report_errors: bool,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Socket settings for discovery and sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    /// Local address every socket binds to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Destination of advertisement datagrams.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
    /// UDP port browsers listen on.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// TCP port for invitations.  `0` lets the OS choose.
    #[serde(default)]
    pub control_port: u16,
    #[serde(default = "default_advertise_interval_ms")]
    pub advertise_interval_ms: u64,
    /// A peer not heard from for this long is reported lost.
    #[serde(default = "default_peer_ttl_ms")]
    pub peer_ttl_ms: u64,
    #[serde(default = "default_invite_timeout_secs")]
    pub invite_timeout_secs: u64,
    /// Stop browsing as soon as one peer has been found.
    #[serde(default = "default_true")]
    pub stop_browsing_after_first_find: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_service_token() -> String {
    SERVICE_TOKEN.to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}
fn default_discovery_port() -> u16 {
    24850
}
fn default_advertise_interval_ms() -> u64 {
    1000
}
fn default_peer_ttl_ms() -> u64 {
    5000
}
fn default_invite_timeout_secs() -> u64 {
    10
}
fn default_true() -> bool {
    true
}

impl Default for PeerSection {
    fn default() -> Self {
        Self {
            display_name: device_name(),
            service_token: default_service_token(),
            report_errors: false,
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            broadcast_address: default_broadcast_address(),
            discovery_port: default_discovery_port(),
            control_port: 0,
            advertise_interval_ms: default_advertise_interval_ms(),
            peer_ttl_ms: default_peer_ttl_ms(),
            invite_timeout_secs: default_invite_timeout_secs(),
            stop_browsing_after_first_find: default_true(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the base directory cannot
/// be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// See [`config_dir`].
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the config from the platform path.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to the platform path.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("BattleBump"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("battlebump"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("BattleBump")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_config_path() -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("battlebump_test_{}", Uuid::new_v4()));
        let path = dir.join("nested").join("config.toml");
        (dir, path)
    }

    #[test]
    fn test_defaults_match_documented_values() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.peer.service_token, "RPSgame");
        assert!(!cfg.peer.report_errors);
        assert_eq!(cfg.peer.log_level, "info");
        assert_eq!(cfg.network.discovery_port, 24850);
        assert_eq!(cfg.network.control_port, 0);
        assert_eq!(cfg.network.advertise_interval_ms, 1000);
        assert_eq!(cfg.network.peer_ttl_ms, 5000);
        assert_eq!(cfg.network.invite_timeout_secs, 10);
        assert!(cfg.network.stop_browsing_after_first_find);
    }

    #[test]
    fn test_default_display_name_is_not_empty() {
        assert!(!PeerSection::default().display_name.is_empty());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("empty document");
        assert_eq!(cfg.network, NetworkSection::default());
        assert_eq!(cfg.peer.service_token, "RPSgame");
    }

    #[test]
    fn test_partial_network_section_overrides_only_given_keys() {
        // Arrange
        let toml_str = r#"
[network]
discovery_port = 30000
stop_browsing_after_first_find = false
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.network.discovery_port, 30000);
        assert!(!cfg.network.stop_browsing_after_first_find);
        assert_eq!(cfg.network.peer_ttl_ms, 5000);
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        let (dir, path) = temp_config_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let (_, path) = temp_config_path();
        let cfg = load_config_from(&path).expect("missing file is not an error");
        assert_eq!(cfg.network, NetworkSection::default());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        // Arrange
        let (dir, path) = temp_config_path();
        let mut cfg = AppConfig::default();
        cfg.peer.display_name = "Callum".to_string();
        cfg.peer.report_errors = true;
        cfg.network.broadcast_address = "192.168.1.255".to_string();

        // Act
        save_config_to(&cfg, &path).expect("save");
        let loaded = load_config_from(&path).expect("load");

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("config.toml"), "got {path:?}");
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_platform_save_then_load_uses_xdg_config_home() {
        // Arrange
        let (dir, _) = temp_config_path();
        let previous = std::env::var_os("XDG_CONFIG_HOME");
        std::env::set_var("XDG_CONFIG_HOME", &dir);
        let mut cfg = AppConfig::default();
        cfg.peer.display_name = "Dave".to_string();

        // Act
        save_config(&cfg).expect("save");
        let loaded = load_config().expect("load");

        // Assert
        assert_eq!(loaded, cfg);
        assert!(dir.join("battlebump").join("config.toml").exists());

        // Cleanup
        match previous {
            Some(value) => std::env::set_var("XDG_CONFIG_HOME", value),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
        std::fs::remove_dir_all(&dir).ok();
    }
}
