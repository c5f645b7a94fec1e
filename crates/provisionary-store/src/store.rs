// ── Per-kind store traits ──
//
// Every provisioner depends only on these four operation classes:
// create, update, delete-by-identifier, and list-by-provenance, plus
// the lookups it needs to decide between them. Each call is atomic with
// respect to the entity it touches.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{
    AlertRule, Correlation, DataSource, Dashboard, Folder, Notifier, OrgId, PluginSetting,
};

#[async_trait]
pub trait DatasourceStore: Send + Sync {
    async fn datasource_by_name(
        &self,
        org_id: OrgId,
        name: &str,
    ) -> Result<Option<DataSource>, StoreError>;

    async fn datasource_by_uid(
        &self,
        org_id: OrgId,
        uid: &str,
    ) -> Result<Option<DataSource>, StoreError>;

    /// Insert a new data source. An empty `uid` is replaced by a generated one.
    async fn create_datasource(&self, datasource: DataSource) -> Result<DataSource, StoreError>;

    async fn update_datasource(&self, datasource: DataSource) -> Result<DataSource, StoreError>;

    /// Returns `false` when nothing matched.
    ///
    /// Correlations from or to the deleted data source are removed with it.
    async fn delete_datasource(&self, org_id: OrgId, name: &str) -> Result<bool, StoreError>;

    async fn provisioned_datasources(&self) -> Result<Vec<DataSource>, StoreError>;
}

#[async_trait]
pub trait CorrelationStore: Send + Sync {
    async fn correlations_by_source(
        &self,
        org_id: OrgId,
        source_uid: &str,
    ) -> Result<Vec<Correlation>, StoreError>;

    /// Insert a correlation. An empty `uid` is replaced by a generated one.
    ///
    /// Both ends must exist. Provisioning writes to read-only sources, so
    /// no read-only check is made here.
    async fn create_correlation(&self, correlation: Correlation)
    -> Result<Correlation, StoreError>;

    /// Returns the number of correlations removed.
    async fn delete_correlations_by_source(
        &self,
        org_id: OrgId,
        source_uid: &str,
    ) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait NotifierStore: Send + Sync {
    async fn notifier_by_uid(&self, org_id: OrgId, uid: &str)
    -> Result<Option<Notifier>, StoreError>;

    async fn notifier_by_name(
        &self,
        org_id: OrgId,
        name: &str,
    ) -> Result<Option<Notifier>, StoreError>;

    async fn create_notifier(&self, notifier: Notifier) -> Result<Notifier, StoreError>;

    async fn update_notifier(&self, notifier: Notifier) -> Result<Notifier, StoreError>;

    async fn delete_notifier(&self, org_id: OrgId, uid: &str) -> Result<bool, StoreError>;

    async fn provisioned_notifiers(&self) -> Result<Vec<Notifier>, StoreError>;
}

#[async_trait]
pub trait PluginSettingsStore: Send + Sync {
    async fn plugin_setting(
        &self,
        org_id: OrgId,
        plugin_id: &str,
    ) -> Result<Option<PluginSetting>, StoreError>;

    async fn create_plugin_setting(&self, setting: PluginSetting) -> Result<(), StoreError>;

    async fn update_plugin_setting(&self, setting: PluginSetting) -> Result<(), StoreError>;

    async fn delete_plugin_setting(&self, org_id: OrgId, plugin_id: &str)
    -> Result<bool, StoreError>;

    async fn provisioned_plugin_settings(&self) -> Result<Vec<PluginSetting>, StoreError>;
}

#[async_trait]
pub trait AlertRuleStore: Send + Sync {
    async fn alert_rule_by_uid(
        &self,
        org_id: OrgId,
        uid: &str,
    ) -> Result<Option<AlertRule>, StoreError>;

    async fn create_alert_rule(&self, rule: AlertRule) -> Result<AlertRule, StoreError>;

    async fn update_alert_rule(&self, rule: AlertRule) -> Result<AlertRule, StoreError>;

    async fn delete_alert_rule(&self, org_id: OrgId, uid: &str) -> Result<bool, StoreError>;

    async fn provisioned_alert_rules(&self) -> Result<Vec<AlertRule>, StoreError>;

    async fn count_alert_rules(&self, org_id: OrgId) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait DashboardStore: Send + Sync {
    async fn dashboard_by_uid(
        &self,
        org_id: OrgId,
        uid: &str,
    ) -> Result<Option<Dashboard>, StoreError>;

    /// Create or overwrite a dashboard keyed by `(org_id, uid)`.
    async fn save_dashboard(&self, dashboard: Dashboard) -> Result<Dashboard, StoreError>;

    async fn delete_dashboard(&self, org_id: OrgId, uid: &str) -> Result<bool, StoreError>;

    /// Drop provisioning metadata, turning the dashboard into a manual one.
    async fn unprovision_dashboard(&self, org_id: OrgId, uid: &str) -> Result<(), StoreError>;

    async fn provisioned_dashboards(&self) -> Result<Vec<Dashboard>, StoreError>;

    /// Look a folder up by uid (when given) or title, creating it if absent.
    async fn ensure_folder(
        &self,
        org_id: OrgId,
        title: &str,
        uid: Option<&str>,
    ) -> Result<Folder, StoreError>;
}
