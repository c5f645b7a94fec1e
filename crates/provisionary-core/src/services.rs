use std::sync::Arc;

use provisionary_store::{
    AlertRuleStore, CorrelationStore, DashboardStore, DatasourceStore, MemoryStore, NotifierStore,
    OrgStore, PluginRegistry, PluginSettingsStore, QuotaService, SearchIndexer, SecretsService,
};

/// Handles to every external collaborator, shared read-only by all provisioners.
#[derive(Clone)]
pub struct Services {
    pub datasources: Arc<dyn DatasourceStore>,
    pub correlations: Arc<dyn CorrelationStore>,
    pub notifiers: Arc<dyn NotifierStore>,
    pub plugin_settings: Arc<dyn PluginSettingsStore>,
    pub alert_rules: Arc<dyn AlertRuleStore>,
    pub dashboards: Arc<dyn DashboardStore>,
    pub orgs: Arc<dyn OrgStore>,
    pub quota: Arc<dyn QuotaService>,
    pub secrets: Arc<dyn SecretsService>,
    pub plugins: Arc<dyn PluginRegistry>,
    pub search: Arc<dyn SearchIndexer>,
}

impl Services {
    /// Wire every store handle to one [`MemoryStore`].
    pub fn from_memory(
        store: &Arc<MemoryStore>,
        secrets: Arc<dyn SecretsService>,
        plugins: Arc<dyn PluginRegistry>,
        search: Arc<dyn SearchIndexer>,
    ) -> Self {
        Self {
            datasources: store.clone(),
            correlations: store.clone(),
            notifiers: store.clone(),
            plugin_settings: store.clone(),
            alert_rules: store.clone(),
            dashboards: store.clone(),
            orgs: store.clone(),
            quota: store.clone(),
            secrets,
            plugins,
            search,
        }
    }
}
