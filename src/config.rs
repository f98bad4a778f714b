//! Config module - Manages redcapfs configuration (config.toml).
//!
//! Configuration file contains:
//! - Token store location and default REDCap API URL
//! - HTTP client settings
//! - Study field names used for enrollment, date and site filtering
//! - Event router settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Base URL used when the token store does not carry one.
pub const DEFAULT_BASE_URL: &str = "https://abcd-rc.ucsd.edu/redcap/api/";

/// HTTP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Upper bound for a single remote call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Study-specific field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyConfig {
    /// Participant identifier shared by roster and data rows
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Enrollment checkbox; option 1 is exported as `<field>___1`
    #[serde(default = "default_enroll_field")]
    pub enroll_field: String,

    /// Event the roster is read from
    #[serde(default = "default_baseline_event")]
    pub baseline_event: String,

    /// Field holding each participant's baseline timestamp
    #[serde(default = "default_baseline_timestamp_field")]
    pub baseline_timestamp_field: String,

    /// chrono format of the baseline timestamp
    #[serde(default = "default_baseline_timestamp_format")]
    pub baseline_timestamp_format: String,

    /// Data access group field exported with every record
    #[serde(default = "default_access_group_field")]
    pub access_group_field: String,

    /// Site code is the access group prefix before this delimiter
    #[serde(default = "default_access_group_delimiter")]
    pub access_group_delimiter: String,
}

fn default_id_field() -> String {
    "id_redcap".to_string()
}

fn default_enroll_field() -> String {
    "enroll_total".to_string()
}

fn default_baseline_event() -> String {
    "baseline_year_1_arm_1".to_string()
}

fn default_baseline_timestamp_field() -> String {
    "cp_timestamp_v2".to_string()
}

fn default_baseline_timestamp_format() -> String {
    "%Y-%m-%d %H:%M".to_string()
}

fn default_access_group_field() -> String {
    "redcap_data_access_group".to_string()
}

fn default_access_group_delimiter() -> String {
    "_de".to_string()
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            id_field: default_id_field(),
            enroll_field: default_enroll_field(),
            baseline_event: default_baseline_event(),
            baseline_timestamp_field: default_baseline_timestamp_field(),
            baseline_timestamp_format: default_baseline_timestamp_format(),
            access_group_field: default_access_group_field(),
            access_group_delimiter: default_access_group_delimiter(),
        }
    }
}

impl StudyConfig {
    /// Column carrying checkbox option 1 of the enrollment field.
    pub fn enrolled_column(&self) -> String {
        format!("{}___1", self.enroll_field)
    }
}

/// Event router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// How long a directory pipeline waits for the bridge acknowledgement
    #[serde(default = "default_dir_ready_timeout_secs")]
    pub dir_ready_timeout_secs: u64,

    /// Write `<target>.err` next to a target whose pipeline failed
    #[serde(default = "default_sentinel_files")]
    pub sentinel_files: bool,
}

fn default_dir_ready_timeout_secs() -> u64 {
    10
}

fn default_sentinel_files() -> bool {
    true
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            dir_ready_timeout_secs: default_dir_ready_timeout_secs(),
            sentinel_files: default_sentinel_files(),
        }
    }
}

impl RouterConfig {
    pub fn dir_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.dir_ready_timeout_secs)
    }
}

/// Main redcapfs configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Config version (for future migrations)
    #[serde(default = "default_version")]
    pub version: u32,

    /// Path to the encrypted token store
    #[serde(default = "default_vault_path")]
    pub vault_path: PathBuf,

    /// API URL used until one is stored in the vault
    #[serde(default = "default_base_url")]
    pub default_base_url: String,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub study: StudyConfig,

    #[serde(default)]
    pub router: RouterConfig,
}

fn default_version() -> u32 {
    1
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            vault_path: default_vault_path(),
            default_base_url: default_base_url(),
            client: ClientConfig::default(),
            study: StudyConfig::default(),
            router: RouterConfig::default(),
        }
    }
}

/// Default config directory (~/.config/redcapfs/).
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("redcapfs"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Default config file path.
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Default token store path.
pub fn default_vault_path() -> PathBuf {
    default_config_dir().join(".redcapfs_tokens")
}

impl Config {
    /// Load config from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Cannot parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load from `path` (or the default location) if present, otherwise defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_path);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).with_context(|| "Cannot serialize config to TOML")?;

        std::fs::write(path, content)
            .with_context(|| format!("Cannot write config file: {}", path.display()))?;

        Ok(())
    }
}
