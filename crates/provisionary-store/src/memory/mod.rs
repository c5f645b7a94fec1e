// ── In-memory store ──
//
// A single `MemoryStore` implements every store trait plus the org and
// quota services. It is the default backend of the binary (persisted
// through `state`) and the backend every test runs against.

mod collection;
mod state;
mod support;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashSet;
use tokio::sync::watch;
use tracing::debug;

use self::collection::EntityCollection;
use crate::error::StoreError;
use crate::model::{
    AlertRule, Correlation, DEFAULT_ORG_ID, DataSource, Dashboard, Folder, Notifier, OrgId,
    PluginSetting, Provenance,
};
use crate::services::{OrgStore, QuotaScope, QuotaService};
use crate::store::{
    AlertRuleStore, CorrelationStore, DashboardStore, DatasourceStore, NotifierStore,
    PluginSettingsStore,
};

pub use support::{LocalSecrets, ReindexCounter, StaticPluginRegistry};

fn key(org_id: OrgId, id: &str) -> String {
    format!("{org_id}:{id}")
}

fn correlation_key(c: &Correlation) -> String {
    format!("{}:{}:{}", c.org_id, c.source_uid, c.uid)
}

fn generate_uid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Thread-safe in-memory implementation of all store traits.
///
/// Every successful write bumps a store-wide revision observable through
/// [`subscribe()`](Self::subscribe); [`revision()`](Self::revision) doubles
/// as a mutation counter in tests.
pub struct MemoryStore {
    pub(crate) datasources: EntityCollection<DataSource>,
    pub(crate) correlations: EntityCollection<Correlation>,
    pub(crate) notifiers: EntityCollection<Notifier>,
    pub(crate) plugin_settings: EntityCollection<PluginSetting>,
    pub(crate) alert_rules: EntityCollection<AlertRule>,
    pub(crate) folders: EntityCollection<Folder>,
    pub(crate) dashboards: EntityCollection<Dashboard>,
    pub(crate) orgs: DashSet<OrgId>,
    quotas: HashMap<QuotaScope, usize>,
    unavailable: AtomicBool,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store knowing only the default organisation.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0u64);
        let revision = Arc::new(tx);
        let orgs = DashSet::new();
        orgs.insert(DEFAULT_ORG_ID);

        Self {
            datasources: EntityCollection::new(Arc::clone(&revision)),
            correlations: EntityCollection::new(Arc::clone(&revision)),
            notifiers: EntityCollection::new(Arc::clone(&revision)),
            plugin_settings: EntityCollection::new(Arc::clone(&revision)),
            alert_rules: EntityCollection::new(Arc::clone(&revision)),
            folders: EntityCollection::new(Arc::clone(&revision)),
            dashboards: EntityCollection::new(Arc::clone(&revision)),
            orgs,
            quotas: HashMap::new(),
            unavailable: AtomicBool::new(false),
            revision,
        }
    }

    /// Register an additional organisation.
    pub fn with_org(self, org_id: OrgId) -> Self {
        self.orgs.insert(org_id);
        self
    }

    /// Cap the number of entities per organisation in `scope`.
    pub fn with_quota(mut self, scope: QuotaScope, limit: usize) -> Self {
        self.quotas.insert(scope, limit);
        self
    }

    /// Make every write fail with [`StoreError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of mutations applied since construction (or load).
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Subscribe to the store-wide revision counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    pub fn datasources(&self) -> Vec<DataSource> {
        self.datasources.values()
    }

    pub fn correlations(&self) -> Vec<Correlation> {
        self.correlations.values()
    }

    pub fn notifiers(&self) -> Vec<Notifier> {
        self.notifiers.values()
    }

    pub fn plugin_settings(&self) -> Vec<PluginSetting> {
        self.plugin_settings.values()
    }

    pub fn alert_rules(&self) -> Vec<AlertRule> {
        self.alert_rules.values()
    }

    pub fn folders(&self) -> Vec<Folder> {
        self.folders.values()
    }

    pub fn dashboards(&self) -> Vec<Dashboard> {
        self.dashboards.values()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes are disabled".into()));
        }
        Ok(())
    }

    /// Only one default data source per organisation.
    fn clear_other_defaults(&self, org_id: OrgId, keep: &str) {
        let stale = self
            .datasources
            .filter(|ds| ds.org_id == org_id && ds.is_default && ds.name != keep);
        for mut ds in stale {
            ds.is_default = false;
            self.datasources.insert(key(ds.org_id, &ds.name), ds);
        }
    }

    fn remove_correlations(&self, pred: impl Fn(&Correlation) -> bool) -> usize {
        let doomed = self.correlations.filter(pred);
        for c in &doomed {
            self.correlations.remove(&correlation_key(c));
        }
        doomed.len()
    }
}

// ── Data sources ────────────────────────────────────────────────────

#[async_trait]
impl DatasourceStore for MemoryStore {
    async fn datasource_by_name(
        &self,
        org_id: OrgId,
        name: &str,
    ) -> Result<Option<DataSource>, StoreError> {
        Ok(self.datasources.get(&key(org_id, name)))
    }

    async fn datasource_by_uid(
        &self,
        org_id: OrgId,
        uid: &str,
    ) -> Result<Option<DataSource>, StoreError> {
        Ok(self.datasources.find(|ds| ds.org_id == org_id && ds.uid == uid))
    }

    async fn create_datasource(&self, mut datasource: DataSource) -> Result<DataSource, StoreError> {
        self.ensure_writable()?;
        let k = key(datasource.org_id, &datasource.name);
        if self.datasources.contains(&k) {
            return Err(StoreError::Conflict {
                kind: "datasource",
                identifier: datasource.name,
            });
        }
        if datasource.uid.is_empty() {
            datasource.uid = generate_uid();
        }
        if datasource.is_default {
            self.clear_other_defaults(datasource.org_id, &datasource.name);
        }
        self.datasources.insert(k, datasource.clone());
        debug!(name = %datasource.name, org_id = datasource.org_id, "datasource created");
        Ok(datasource)
    }

    async fn update_datasource(&self, mut datasource: DataSource) -> Result<DataSource, StoreError> {
        self.ensure_writable()?;
        let k = key(datasource.org_id, &datasource.name);
        let Some(existing) = self.datasources.get(&k) else {
            return Err(StoreError::NotFound {
                kind: "datasource",
                identifier: datasource.name,
            });
        };
        if datasource.uid.is_empty() {
            datasource.uid = existing.uid;
        }
        if datasource.is_default {
            self.clear_other_defaults(datasource.org_id, &datasource.name);
        }
        self.datasources.insert(k, datasource.clone());
        Ok(datasource)
    }

    async fn delete_datasource(&self, org_id: OrgId, name: &str) -> Result<bool, StoreError> {
        self.ensure_writable()?;
        let Some(removed) = self.datasources.remove(&key(org_id, name)) else {
            return Ok(false);
        };
        let uid = removed.uid.as_str();
        let dropped = self.remove_correlations(|c| {
            c.org_id == org_id && (c.source_uid == uid || c.target_uid == uid)
        });
        if dropped > 0 {
            debug!(name, org_id, correlations = dropped, "removed correlations of deleted datasource");
        }
        Ok(true)
    }

    async fn provisioned_datasources(&self) -> Result<Vec<DataSource>, StoreError> {
        Ok(self.datasources.filter(|ds| ds.provenance.is_provisioned()))
    }
}

// ── Correlations ────────────────────────────────────────────────────

#[async_trait]
impl CorrelationStore for MemoryStore {
    async fn correlations_by_source(
        &self,
        org_id: OrgId,
        source_uid: &str,
    ) -> Result<Vec<Correlation>, StoreError> {
        let mut found = self
            .correlations
            .filter(|c| c.org_id == org_id && c.source_uid == source_uid);
        found.sort_by(|a, b| a.uid.cmp(&b.uid));
        Ok(found)
    }

    async fn create_correlation(
        &self,
        mut correlation: Correlation,
    ) -> Result<Correlation, StoreError> {
        self.ensure_writable()?;
        let org_id = correlation.org_id;
        for end in [&correlation.source_uid, &correlation.target_uid] {
            let exists = self
                .datasources
                .find(|ds| ds.org_id == org_id && ds.uid == *end)
                .is_some();
            if !exists {
                return Err(StoreError::NotFound {
                    kind: "datasource",
                    identifier: end.clone(),
                });
            }
        }
        if correlation.uid.is_empty() {
            correlation.uid = generate_uid();
        }
        self.correlations
            .insert(correlation_key(&correlation), correlation.clone());
        Ok(correlation)
    }

    async fn delete_correlations_by_source(
        &self,
        org_id: OrgId,
        source_uid: &str,
    ) -> Result<usize, StoreError> {
        self.ensure_writable()?;
        Ok(self.remove_correlations(|c| c.org_id == org_id && c.source_uid == source_uid))
    }
}

// ── Notifiers ───────────────────────────────────────────────────────

#[async_trait]
impl NotifierStore for MemoryStore {
    async fn notifier_by_uid(
        &self,
        org_id: OrgId,
        uid: &str,
    ) -> Result<Option<Notifier>, StoreError> {
        Ok(self.notifiers.get(&key(org_id, uid)))
    }

    async fn notifier_by_name(
        &self,
        org_id: OrgId,
        name: &str,
    ) -> Result<Option<Notifier>, StoreError> {
        Ok(self
            .notifiers
            .find(|n| n.org_id == org_id && n.name == name))
    }

    async fn create_notifier(&self, mut notifier: Notifier) -> Result<Notifier, StoreError> {
        self.ensure_writable()?;
        if notifier.uid.is_empty() {
            notifier.uid = generate_uid();
        }
        let k = key(notifier.org_id, &notifier.uid);
        if self.notifiers.contains(&k) {
            return Err(StoreError::Conflict {
                kind: "notifier",
                identifier: notifier.uid,
            });
        }
        self.notifiers.insert(k, notifier.clone());
        Ok(notifier)
    }

    async fn update_notifier(&self, notifier: Notifier) -> Result<Notifier, StoreError> {
        self.ensure_writable()?;
        let k = key(notifier.org_id, &notifier.uid);
        if !self.notifiers.contains(&k) {
            return Err(StoreError::NotFound {
                kind: "notifier",
                identifier: notifier.uid,
            });
        }
        self.notifiers.insert(k, notifier.clone());
        Ok(notifier)
    }

    async fn delete_notifier(&self, org_id: OrgId, uid: &str) -> Result<bool, StoreError> {
        self.ensure_writable()?;
        Ok(self.notifiers.remove(&key(org_id, uid)).is_some())
    }

    async fn provisioned_notifiers(&self) -> Result<Vec<Notifier>, StoreError> {
        Ok(self.notifiers.filter(|n| n.provenance.is_provisioned()))
    }
}

// ── Plugin settings ─────────────────────────────────────────────────

#[async_trait]
impl PluginSettingsStore for MemoryStore {
    async fn plugin_setting(
        &self,
        org_id: OrgId,
        plugin_id: &str,
    ) -> Result<Option<PluginSetting>, StoreError> {
        Ok(self.plugin_settings.get(&key(org_id, plugin_id)))
    }

    async fn create_plugin_setting(&self, setting: PluginSetting) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let k = key(setting.org_id, &setting.plugin_id);
        if self.plugin_settings.contains(&k) {
            return Err(StoreError::Conflict {
                kind: "plugin setting",
                identifier: setting.plugin_id,
            });
        }
        self.plugin_settings.insert(k, setting);
        Ok(())
    }

    async fn update_plugin_setting(&self, setting: PluginSetting) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let k = key(setting.org_id, &setting.plugin_id);
        if !self.plugin_settings.contains(&k) {
            return Err(StoreError::NotFound {
                kind: "plugin setting",
                identifier: setting.plugin_id,
            });
        }
        self.plugin_settings.insert(k, setting);
        Ok(())
    }

    async fn delete_plugin_setting(
        &self,
        org_id: OrgId,
        plugin_id: &str,
    ) -> Result<bool, StoreError> {
        self.ensure_writable()?;
        Ok(self.plugin_settings.remove(&key(org_id, plugin_id)).is_some())
    }

    async fn provisioned_plugin_settings(&self) -> Result<Vec<PluginSetting>, StoreError> {
        Ok(self
            .plugin_settings
            .filter(|s| s.provenance.is_provisioned()))
    }
}

// ── Alert rules ─────────────────────────────────────────────────────

#[async_trait]
impl AlertRuleStore for MemoryStore {
    async fn alert_rule_by_uid(
        &self,
        org_id: OrgId,
        uid: &str,
    ) -> Result<Option<AlertRule>, StoreError> {
        Ok(self.alert_rules.get(&key(org_id, uid)))
    }

    async fn create_alert_rule(&self, rule: AlertRule) -> Result<AlertRule, StoreError> {
        self.ensure_writable()?;
        let k = key(rule.org_id, &rule.uid);
        if self.alert_rules.contains(&k) {
            return Err(StoreError::Conflict {
                kind: "alert rule",
                identifier: rule.uid,
            });
        }
        self.alert_rules.insert(k, rule.clone());
        Ok(rule)
    }

    async fn update_alert_rule(&self, rule: AlertRule) -> Result<AlertRule, StoreError> {
        self.ensure_writable()?;
        let k = key(rule.org_id, &rule.uid);
        if !self.alert_rules.contains(&k) {
            return Err(StoreError::NotFound {
                kind: "alert rule",
                identifier: rule.uid,
            });
        }
        self.alert_rules.insert(k, rule.clone());
        Ok(rule)
    }

    async fn delete_alert_rule(&self, org_id: OrgId, uid: &str) -> Result<bool, StoreError> {
        self.ensure_writable()?;
        Ok(self.alert_rules.remove(&key(org_id, uid)).is_some())
    }

    async fn provisioned_alert_rules(&self) -> Result<Vec<AlertRule>, StoreError> {
        Ok(self.alert_rules.filter(|r| r.provenance.is_provisioned()))
    }

    async fn count_alert_rules(&self, org_id: OrgId) -> Result<usize, StoreError> {
        Ok(self.alert_rules.filter(|r| r.org_id == org_id).len())
    }
}

// ── Dashboards & folders ────────────────────────────────────────────

#[async_trait]
impl DashboardStore for MemoryStore {
    async fn dashboard_by_uid(
        &self,
        org_id: OrgId,
        uid: &str,
    ) -> Result<Option<Dashboard>, StoreError> {
        Ok(self.dashboards.get(&key(org_id, uid)))
    }

    async fn save_dashboard(&self, dashboard: Dashboard) -> Result<Dashboard, StoreError> {
        self.ensure_writable()?;
        self.dashboards
            .insert(key(dashboard.org_id, &dashboard.uid), dashboard.clone());
        Ok(dashboard)
    }

    async fn delete_dashboard(&self, org_id: OrgId, uid: &str) -> Result<bool, StoreError> {
        self.ensure_writable()?;
        Ok(self.dashboards.remove(&key(org_id, uid)).is_some())
    }

    async fn unprovision_dashboard(&self, org_id: OrgId, uid: &str) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let k = key(org_id, uid);
        let Some(mut dashboard) = self.dashboards.get(&k) else {
            return Err(StoreError::NotFound {
                kind: "dashboard",
                identifier: uid.to_owned(),
            });
        };
        dashboard.provenance = Provenance::Manual;
        self.dashboards.insert(k, dashboard);
        Ok(())
    }

    async fn provisioned_dashboards(&self) -> Result<Vec<Dashboard>, StoreError> {
        Ok(self.dashboards.filter(|d| d.provenance.is_provisioned()))
    }

    async fn ensure_folder(
        &self,
        org_id: OrgId,
        title: &str,
        uid: Option<&str>,
    ) -> Result<Folder, StoreError> {
        let existing = match uid {
            Some(uid) => self.folders.get(&key(org_id, uid)),
            None => self
                .folders
                .find(|f| f.org_id == org_id && f.title == title),
        };
        if let Some(folder) = existing {
            return Ok(folder);
        }

        self.ensure_writable()?;
        let folder = Folder {
            uid: uid.map_or_else(generate_uid, str::to_owned),
            org_id,
            title: title.to_owned(),
        };
        self.folders
            .insert(key(org_id, &folder.uid), folder.clone());
        debug!(title, uid = %folder.uid, "folder created");
        Ok(folder)
    }
}

// ── Organisations & quotas ──────────────────────────────────────────

#[async_trait]
impl OrgStore for MemoryStore {
    async fn org_exists(&self, org_id: OrgId) -> Result<bool, StoreError> {
        Ok(self.orgs.contains(&org_id))
    }
}

#[async_trait]
impl QuotaService for MemoryStore {
    async fn quota_reached(&self, scope: QuotaScope, org_id: OrgId) -> Result<bool, StoreError> {
        let Some(&limit) = self.quotas.get(&scope) else {
            return Ok(false);
        };
        let used = match scope {
            QuotaScope::AlertRules => self.alert_rules.filter(|r| r.org_id == org_id).len(),
            QuotaScope::Datasources => self.datasources.filter(|d| d.org_id == org_id).len(),
            QuotaScope::Dashboards => self.dashboards.filter(|d| d.org_id == org_id).len(),
        };
        Ok(used >= limit)
    }
}
