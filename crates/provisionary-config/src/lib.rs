//! Process configuration for provisionary.
//!
//! Layered with figment: built-in defaults, then a TOML file, then
//! `PROVISIONARY_*` environment variables (`__` separates sections, so
//! `PROVISIONARY_PATHS__PROVISIONING` sets `paths.provisioning`). The result
//! is translated into the engine's [`ProvisioningConfig`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use provisionary_core::{AlertingDefaults, AtomicityPolicy, ProvisioningConfig};
use provisionary_store::{DEFAULT_ORG_ID, OrgId};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "PROVISIONARY_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub paths: Paths,

    #[serde(default)]
    pub provisioning: Provisioning,

    #[serde(default)]
    pub alerting: Alerting,

    #[serde(default)]
    pub secrets: Secrets,

    /// Organisations registered in the store.
    #[serde(default = "default_organisations")]
    pub organisations: Vec<OrgId>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: Paths::default(),
            provisioning: Provisioning::default(),
            alerting: Alerting::default(),
            secrets: Secrets::default(),
            organisations: default_organisations(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Paths {
    /// Base directory holding `datasources/`, `dashboards/`, …
    #[serde(default = "default_provisioning_path")]
    pub provisioning: PathBuf,

    /// JSON state file of the local store. Without one the store lives
    /// in memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PathBuf>,

    /// Directory scanned for `<plugin>/plugin.json` manifests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<PathBuf>,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            provisioning: default_provisioning_path(),
            state: None,
            plugins: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Provisioning {
    /// `all_or_nothing` or `best_effort`.
    #[serde(default = "default_atomicity")]
    pub atomicity: String,

    #[serde(default = "default_restart_backoff_ms")]
    pub restart_backoff_ms: u64,
}

impl Default for Provisioning {
    fn default() -> Self {
        Self {
            atomicity: default_atomicity(),
            restart_backoff_ms: default_restart_backoff_ms(),
        }
    }
}

/// Rule group intervals, as humantime strings (`"1m"`, `"10s"`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Alerting {
    #[serde(default = "default_interval")]
    pub default_interval: String,

    #[serde(default = "default_base_interval")]
    pub base_interval: String,
}

impl Default for Alerting {
    fn default() -> Self {
        Self {
            default_interval: default_interval(),
            base_interval: default_base_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Secrets {
    /// Key used to encrypt secure settings in the local store.
    #[serde(default = "default_secret_key")]
    pub secret_key: String,
}

impl Default for Secrets {
    fn default() -> Self {
        Self {
            secret_key: default_secret_key(),
        }
    }
}

fn default_provisioning_path() -> PathBuf {
    PathBuf::from("conf/provisioning")
}
fn default_atomicity() -> String {
    AtomicityPolicy::default().to_string()
}
fn default_restart_backoff_ms() -> u64 {
    1000
}
fn default_interval() -> String {
    "1m".into()
}
fn default_base_interval() -> String {
    "10s".into()
}
fn default_secret_key() -> String {
    "SW2YcwTIb9zpOOhoPsMm".into()
}
fn default_organisations() -> Vec<OrgId> {
    vec![DEFAULT_ORG_ID]
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Validate and convert into the engine's configuration.
    pub fn to_provisioning_config(&self) -> Result<ProvisioningConfig, ConfigError> {
        let atomicity: AtomicityPolicy = self
            .provisioning
            .atomicity
            .parse()
            .map_err(|reason: String| invalid("provisioning.atomicity", reason))?;

        let base_interval = parse_interval("alerting.base_interval", &self.alerting.base_interval)?;
        let default_interval =
            parse_interval("alerting.default_interval", &self.alerting.default_interval)?;
        if default_interval.as_millis() % base_interval.as_millis() != 0 {
            return Err(invalid(
                "alerting.default_interval",
                format!(
                    "must be a multiple of alerting.base_interval ({})",
                    self.alerting.base_interval
                ),
            ));
        }

        if self.paths.provisioning.as_os_str().is_empty() {
            return Err(invalid("paths.provisioning", "must not be empty"));
        }
        if let Some(bad) = self.organisations.iter().find(|id| **id < 1) {
            return Err(invalid(
                "organisations",
                format!("organisation ids must be positive, got {bad}"),
            ));
        }

        Ok(ProvisioningConfig {
            provisioning_path: self.paths.provisioning.clone(),
            atomicity,
            alerting: AlertingDefaults {
                default_interval,
                base_interval,
            },
            restart_backoff: Duration::from_millis(self.provisioning.restart_backoff_ms),
        })
    }
}

fn parse_interval(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    let interval = humantime::parse_duration(raw).map_err(|e| invalid(field, e.to_string()))?;
    if interval.is_zero() {
        return Err(invalid(field, "must be greater than zero"));
    }
    Ok(interval)
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "provisionary", "provisionary").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("provisionary");
    p
}

// ── Config loading ──────────────────────────────────────────────────

fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load from the canonical path plus the environment. A missing file
/// means defaults.
pub fn load_config() -> Result<Config, ConfigError> {
    let config: Config = figment_for(&config_path()).extract()?;
    Ok(config)
}

/// Load from an explicitly named file plus the environment. The file
/// must exist.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let config: Config = figment_for(path).extract()?;
    Ok(config)
}

/// `--config` when given, the canonical path otherwise.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    match explicit {
        Some(path) => load_config_from(path),
        None => load_config(),
    }
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}
