// ── Engine configuration ──
//
// Plain values handed to the orchestrator at construction. Loading them
// from disk or the environment is the job of `provisionary-config`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a provisioner treats a directory containing broken files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomicityPolicy {
    /// Validate every file first; any failure aborts before the first write.
    #[default]
    AllOrNothing,
    /// Apply valid files, then report the broken ones. Orphans are kept.
    BestEffort,
}

impl fmt::Display for AtomicityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllOrNothing => f.write_str("all_or_nothing"),
            Self::BestEffort => f.write_str("best_effort"),
        }
    }
}

impl FromStr for AtomicityPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "all_or_nothing" => Ok(Self::AllOrNothing),
            "best_effort" => Ok(Self::BestEffort),
            other => Err(format!(
                "unknown atomicity policy '{other}' (expected all_or_nothing or best_effort)"
            )),
        }
    }
}

/// Defaults applied to alert rule groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertingDefaults {
    /// Used when a group has no `interval`.
    pub default_interval: Duration,
    /// Every group interval must be a multiple of this.
    pub base_interval: Duration,
}

impl Default for AlertingDefaults {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(60),
            base_interval: Duration::from_secs(10),
        }
    }
}

/// Everything the orchestrator needs besides its service handles.
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    /// Base directory holding the per-kind subdirectories.
    pub provisioning_path: PathBuf,
    pub atomicity: AtomicityPolicy,
    pub alerting: AlertingDefaults,
    /// Pause before restarting a polling epoch that ended on its own.
    pub restart_backoff: Duration,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            provisioning_path: PathBuf::from("conf/provisioning"),
            atomicity: AtomicityPolicy::default(),
            alerting: AlertingDefaults::default(),
            restart_backoff: Duration::from_secs(1),
        }
    }
}

impl ProvisioningConfig {
    pub fn new(provisioning_path: impl Into<PathBuf>) -> Self {
        Self {
            provisioning_path: provisioning_path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_atomicity(mut self, atomicity: AtomicityPolicy) -> Self {
        self.atomicity = atomicity;
        self
    }

    #[must_use]
    pub fn with_restart_backoff(mut self, backoff: Duration) -> Self {
        self.restart_backoff = backoff;
        self
    }

    /// `<provisioning_path>/<kind>`
    pub fn kind_path(&self, kind: &str) -> PathBuf {
        self.provisioning_path.join(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomicity_parses_loosely() {
        assert_eq!("best-effort".parse::<AtomicityPolicy>(), Ok(AtomicityPolicy::BestEffort));
        assert_eq!(" ALL_OR_NOTHING ".parse::<AtomicityPolicy>(), Ok(AtomicityPolicy::AllOrNothing));
        assert!("sometimes".parse::<AtomicityPolicy>().is_err());
    }

    #[test]
    fn kind_path_joins_base() {
        let cfg = ProvisioningConfig::new("/etc/prov");
        assert_eq!(cfg.kind_path("datasources"), PathBuf::from("/etc/prov/datasources"));
        assert_eq!(cfg.atomicity, AtomicityPolicy::AllOrNothing);
    }
}
