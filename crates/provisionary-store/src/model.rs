// ── Stored entity model ──
//
// Canonical shapes of everything the provisioners write. Each entity
// carries a `Provenance` marker: the single source of truth for whether
// a provisioner created it and is therefore allowed to delete it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Organisation identifier.
pub type OrgId = i64;

/// Organisation used when a provisioning file omits one.
pub const DEFAULT_ORG_ID: OrgId = 1;

// ── Provenance ──────────────────────────────────────────────────────

/// Who owns a stored entity.
///
/// Orphan removal only ever considers entities that are not `Manual`.
/// Entities created through the UI or API stay `Manual` forever unless a
/// provisioning file explicitly takes them over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    /// Created by a user or another API client.
    #[default]
    Manual,
    /// Declared by a provisioning file.
    File { path: PathBuf },
    /// Written by a dashboard provider from one of its watched files.
    Provider {
        provider: String,
        path: PathBuf,
        checksum: String,
    },
}

impl Provenance {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File { path: path.into() }
    }

    pub fn is_provisioned(&self) -> bool {
        !matches!(self, Self::Manual)
    }

    /// Provider name for dashboard provenance.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Provider { provider, .. } => Some(provider),
            _ => None,
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::File { path } => write!(f, "file:{}", path.display()),
            Self::Provider { provider, path, .. } => {
                write!(f, "provider:{provider}:{}", path.display())
            }
        }
    }
}

// ── Data sources ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub uid: String,
    pub org_id: OrgId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub access: String,
    pub url: String,
    pub user: String,
    pub database: String,
    pub basic_auth: bool,
    pub basic_auth_user: String,
    pub with_credentials: bool,
    pub is_default: bool,
    pub json_data: serde_json::Value,
    /// Values are ciphertext produced by the secrets service.
    pub secure_json_data: BTreeMap<String, String>,
    pub version: i64,
    pub read_only: bool,
    pub provenance: Provenance,
}

/// A link from one data source to another, owned by its source.
///
/// Correlations have no provenance of their own: they live and die with
/// the source data source they originate from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    pub uid: String,
    pub org_id: OrgId,
    pub source_uid: String,
    pub target_uid: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
}

impl Correlation {
    /// Equal ignoring the generated `uid`.
    pub fn same_link(&self, other: &Self) -> bool {
        self.org_id == other.org_id
            && self.source_uid == other.source_uid
            && self.target_uid == other.target_uid
            && self.label == other.label
            && self.description == other.description
    }
}

// ── Alert notification channels ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notifier {
    pub uid: String,
    pub org_id: OrgId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub is_default: bool,
    pub send_reminder: bool,
    pub frequency_secs: Option<u64>,
    pub disable_resolve_message: bool,
    pub settings: serde_json::Value,
    /// Values are ciphertext produced by the secrets service.
    pub secure_settings: BTreeMap<String, String>,
    pub provenance: Provenance,
}

// ── Plugins ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    App,
    Datasource,
    Panel,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::App => "app",
            Self::Datasource => "datasource",
            Self::Panel => "panel",
        };
        f.write_str(s)
    }
}

/// An installed plugin as reported by the plugin registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMeta {
    pub id: String,
    pub name: String,
    pub kind: PluginKind,
}

/// Per-organisation settings of an app plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSetting {
    pub org_id: OrgId,
    pub plugin_id: String,
    pub enabled: bool,
    pub pinned: bool,
    pub json_data: serde_json::Value,
    /// Values are ciphertext produced by the secrets service.
    pub secure_json_data: BTreeMap<String, String>,
    pub provenance: Provenance,
}

// ── Alert rules ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub uid: String,
    pub org_id: OrgId,
    pub title: String,
    pub folder_uid: String,
    pub rule_group: String,
    pub interval_secs: u64,
    pub condition: String,
    pub data: serde_json::Value,
    pub no_data_state: String,
    pub exec_err_state: String,
    pub for_secs: u64,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub is_paused: bool,
    pub provenance: Provenance,
}

// ── Dashboards & folders ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub uid: String,
    pub org_id: OrgId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub uid: String,
    pub org_id: OrgId,
    pub title: String,
    /// `None` places the dashboard in the General folder.
    pub folder_uid: Option<String>,
    pub data: serde_json::Value,
    pub provenance: Provenance,
}
