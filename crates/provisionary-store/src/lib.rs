// provisionary-store: the persistence and service surface the provisioning engine consumes.
//
// The engine never talks to a database directly. Every resource kind is
// reached through a narrow async trait (create / update / delete /
// list-by-provenance), and the supporting services (secrets, quota,
// organisations, search, plugin registry) are injected the same way.
// `memory` ships a transactional in-memory implementation of all of them,
// optionally persisted to a JSON state file.

pub mod error;
pub mod memory;
pub mod model;
pub mod services;
pub mod store;

pub use error::StoreError;
pub use memory::{LocalSecrets, MemoryStore, ReindexCounter, StaticPluginRegistry};
pub use model::{
    AlertRule, Correlation, DEFAULT_ORG_ID, DataSource, Dashboard, Folder, Notifier, OrgId, PluginKind,
    PluginMeta, PluginSetting, Provenance,
};
pub use services::{OrgStore, PluginRegistry, QuotaScope, QuotaService, SearchIndexer, SecretsService};
pub use store::{
    AlertRuleStore, CorrelationStore, DashboardStore, DatasourceStore, NotifierStore,
    PluginSettingsStore,
};
