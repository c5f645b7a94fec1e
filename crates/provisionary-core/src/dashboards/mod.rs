//! Dashboard provisioning.
//!
//! Unlike the other resource kinds, dashboards are served by a long-lived
//! [`DashboardProvisioner`] that keeps watching its providers' directories.
//! The orchestrator never mutates one in place: reconfiguration builds a new
//! instance through a [`DashboardProvisionerFactory`] and swaps it in.

pub mod config;
mod file_reader;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use provisionary_store::DashboardStore;

pub use self::config::{ProviderConfig, read_providers};
use self::file_reader::FileReader;
use crate::error::ReconcileError;
use crate::reconcile::{self, ReconcileSummary};

/// A configured set of dashboard providers.
#[async_trait]
pub trait DashboardProvisioner: Send + Sync {
    /// One pass over every provider.
    async fn provision(&self, cancel: &CancellationToken) -> Result<ReconcileSummary, ReconcileError>;

    /// Delete dashboards owned by providers that are no longer configured.
    async fn clean_up_orphaned_dashboards(&self, cancel: &CancellationToken);

    /// Start watching for changes. Returns immediately; the watch stops
    /// when `cancel` fires.
    fn poll_changes(&self, cancel: CancellationToken);

    /// Whether any provider reads dashboards from files.
    fn has_dashboard_sources(&self) -> bool;

    /// Path of the named provider with symlinks resolved.
    fn resolved_path(&self, provider: &str) -> Option<PathBuf>;

    /// Whether the named provider lets users save changes from the UI.
    fn allow_ui_updates(&self, provider: &str) -> bool;
}

/// Builds dashboard provisioners from a configuration directory.
#[async_trait]
pub trait DashboardProvisionerFactory: Send + Sync {
    async fn build(&self, dir: &Path) -> Result<Arc<dyn DashboardProvisioner>, ReconcileError>;
}

// ── File-backed implementation ──────────────────────────────────────

pub struct FileDashboardProvisioner {
    readers: Vec<Arc<FileReader>>,
    store: Arc<dyn DashboardStore>,
}

impl FileDashboardProvisioner {
    /// Read the provider configuration in `dir`.
    pub fn new(dir: &Path, store: Arc<dyn DashboardStore>) -> Result<Self, ReconcileError> {
        let providers = read_providers(dir)?;
        Ok(Self::from_providers(providers, store))
    }

    pub fn from_providers(providers: Vec<ProviderConfig>, store: Arc<dyn DashboardStore>) -> Self {
        let readers = providers
            .into_iter()
            .map(|cfg| Arc::new(FileReader::new(cfg, Arc::clone(&store))))
            .collect();
        Self { readers, store }
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.readers.iter().map(|r| &r.cfg)
    }

    fn reader(&self, name: &str) -> Option<&FileReader> {
        self.readers
            .iter()
            .find(|r| r.cfg.name == name)
            .map(AsRef::as_ref)
    }
}

#[async_trait]
impl DashboardProvisioner for FileDashboardProvisioner {
    async fn provision(&self, cancel: &CancellationToken) -> Result<ReconcileSummary, ReconcileError> {
        let mut total = ReconcileSummary::default();
        for reader in &self.readers {
            let summary = reader.walk(cancel).await?;
            debug!(provider = %reader.cfg.name, %summary, "provider provisioned");
            total.merge(summary);
        }
        Ok(total)
    }

    async fn clean_up_orphaned_dashboards(&self, cancel: &CancellationToken) {
        let configured: HashSet<&str> = self.readers.iter().map(|r| r.cfg.name.as_str()).collect();
        let dashboards = match self.store.provisioned_dashboards().await {
            Ok(dashboards) => dashboards,
            Err(e) => {
                warn!(error = %e, "failed to list provisioned dashboards");
                return;
            }
        };

        for dashboard in dashboards {
            let Some(provider) = dashboard.provenance.provider() else {
                continue;
            };
            if configured.contains(provider) {
                continue;
            }
            if reconcile::ensure_live(cancel).is_err() {
                return;
            }
            match self.store.delete_dashboard(dashboard.org_id, &dashboard.uid).await {
                Ok(true) => {
                    info!(provider, uid = %dashboard.uid, "deleted dashboard of removed provider");
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(provider, uid = %dashboard.uid, error = %e, "failed to delete orphaned dashboard");
                }
            }
        }
    }

    fn poll_changes(&self, cancel: CancellationToken) {
        for reader in &self.readers {
            if reader.cfg.update_interval.is_zero() {
                continue;
            }
            debug!(provider = %reader.cfg.name, interval = ?reader.cfg.update_interval, "watching dashboard files");
            tokio::spawn(Arc::clone(reader).watch(cancel.clone()));
        }
    }

    fn has_dashboard_sources(&self) -> bool {
        !self.readers.is_empty()
    }

    fn resolved_path(&self, provider: &str) -> Option<PathBuf> {
        self.reader(provider).map(FileReader::resolved_path)
    }

    fn allow_ui_updates(&self, provider: &str) -> bool {
        self.reader(provider).is_some_and(|r| r.cfg.allow_ui_updates)
    }
}

/// Default factory producing [`FileDashboardProvisioner`]s.
pub struct FileDashboardProvisionerFactory {
    store: Arc<dyn DashboardStore>,
}

impl FileDashboardProvisionerFactory {
    pub fn new(store: Arc<dyn DashboardStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DashboardProvisionerFactory for FileDashboardProvisionerFactory {
    async fn build(&self, dir: &Path) -> Result<Arc<dyn DashboardProvisioner>, ReconcileError> {
        let provisioner = FileDashboardProvisioner::new(dir, Arc::clone(&self.store))?;
        Ok(Arc::new(provisioner))
    }
}
