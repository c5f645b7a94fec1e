// ── Supporting services ──
//
// Opaque collaborators the provisioners call into: encryption of
// secure settings, quota checks, organisation lookup, the search
// indexer, and the plugin registry.

use std::fmt;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{OrgId, PluginMeta};

/// Symmetric encryption for secure settings.
pub trait SecretsService: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, StoreError>;
    fn decrypt(&self, ciphertext: &str) -> Result<String, StoreError>;
}

#[async_trait]
pub trait OrgStore: Send + Sync {
    async fn org_exists(&self, org_id: OrgId) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaScope {
    AlertRules,
    Datasources,
    Dashboards,
}

impl fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AlertRules => "alert_rules",
            Self::Datasources => "datasources",
            Self::Dashboards => "dashboards",
        };
        f.write_str(s)
    }
}

#[async_trait]
pub trait QuotaService: Send + Sync {
    /// `true` when creating one more entity in `scope` would exceed the quota.
    async fn quota_reached(&self, scope: QuotaScope, org_id: OrgId) -> Result<bool, StoreError>;
}

/// Fire-and-forget signal to rebuild the search index.
pub trait SearchIndexer: Send + Sync {
    fn trigger_reindex(&self);
}

/// Read-only view of the installed plugins.
pub trait PluginRegistry: Send + Sync {
    fn plugin(&self, id: &str) -> Option<PluginMeta>;
}
