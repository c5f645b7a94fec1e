// ── Provisioning orchestrator ──
//
// Sequences the resource provisioners and owns the swappable dashboard
// provisioner. One mutex guards the epoch slot (installed instance plus
// the in-flight polling token); read-only queries go through an
// `ArcSwapOption` published on every install and never take the lock.

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use provisionary_store::SearchIndexer;

use crate::alerting::AlertRuleProvisioner;
use crate::config::ProvisioningConfig;
use crate::dashboards::{DashboardProvisioner, DashboardProvisionerFactory, FileDashboardProvisionerFactory};
use crate::datasources::DatasourceProvisioner;
use crate::error::{CoreError, ReconcileError, Stage};
use crate::notifiers::NotifierProvisioner;
use crate::plugins::PluginProvisioner;
use crate::reader::{self, CheckReport};
use crate::reconcile::{ReconcileSummary, ResourceProvisioner};
use crate::services::Services;

// ── Epoch slot ──────────────────────────────────────────────────────

struct PollingEpoch {
    id: u64,
    token: CancellationToken,
}

/// Installed dashboard provisioner plus its polling epoch.
///
/// Only touched through the methods below, always under the service lock.
#[derive(Default)]
struct EpochSlot {
    instance: Option<Arc<dyn DashboardProvisioner>>,
    generation: u64,
    polling: Option<PollingEpoch>,
    next_epoch: u64,
}

impl EpochSlot {
    fn instance(&self) -> Option<Arc<dyn DashboardProvisioner>> {
        self.instance.clone()
    }

    /// Cancel the in-flight epoch. Returns `false` when nothing was polling.
    fn cancel_polling(&mut self) -> bool {
        match self.polling.take() {
            Some(epoch) => {
                epoch.token.cancel();
                true
            }
            None => false,
        }
    }

    fn install(&mut self, provisioner: Arc<dyn DashboardProvisioner>) -> u64 {
        self.generation += 1;
        self.instance = Some(provisioner);
        self.generation
    }

    /// Start a new epoch with a fresh token, independent of any parent.
    fn begin_epoch(&mut self) -> (u64, CancellationToken) {
        self.cancel_polling();
        self.next_epoch += 1;
        let token = CancellationToken::new();
        self.polling = Some(PollingEpoch {
            id: self.next_epoch,
            token: token.clone(),
        });
        (self.next_epoch, token)
    }

    /// Forget epoch `id` if it is still the current one.
    ///
    /// `true` means the epoch ended without anyone cancelling it here.
    fn end_epoch_if_current(&mut self, id: u64) -> bool {
        if self.polling.as_ref().is_some_and(|epoch| epoch.id == id) {
            self.polling = None;
            true
        } else {
            false
        }
    }
}

struct Installed {
    provisioner: Arc<dyn DashboardProvisioner>,
    generation: u64,
}

// ── Service ─────────────────────────────────────────────────────────

/// The provisioning orchestrator. Cheaply cloneable.
#[derive(Clone)]
pub struct ProvisioningService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: ProvisioningConfig,
    search: Arc<dyn SearchIndexer>,
    datasources: Arc<dyn ResourceProvisioner>,
    plugins: Arc<dyn ResourceProvisioner>,
    notifiers: Arc<dyn ResourceProvisioner>,
    alert_rules: Arc<dyn ResourceProvisioner>,
    dashboards: Arc<dyn DashboardProvisionerFactory>,
    slot: Mutex<EpochSlot>,
    published: ArcSwapOption<Installed>,
}

/// Builder for [`ProvisioningService`] with replaceable provisioners.
pub struct ServiceBuilder {
    config: ProvisioningConfig,
    services: Services,
    datasources: Option<Arc<dyn ResourceProvisioner>>,
    plugins: Option<Arc<dyn ResourceProvisioner>>,
    notifiers: Option<Arc<dyn ResourceProvisioner>>,
    alert_rules: Option<Arc<dyn ResourceProvisioner>>,
    dashboards: Option<Arc<dyn DashboardProvisionerFactory>>,
}

impl ServiceBuilder {
    pub fn datasources(mut self, provisioner: Arc<dyn ResourceProvisioner>) -> Self {
        self.datasources = Some(provisioner);
        self
    }

    pub fn plugins(mut self, provisioner: Arc<dyn ResourceProvisioner>) -> Self {
        self.plugins = Some(provisioner);
        self
    }

    pub fn notifiers(mut self, provisioner: Arc<dyn ResourceProvisioner>) -> Self {
        self.notifiers = Some(provisioner);
        self
    }

    pub fn alert_rules(mut self, provisioner: Arc<dyn ResourceProvisioner>) -> Self {
        self.alert_rules = Some(provisioner);
        self
    }

    pub fn dashboard_factory(mut self, factory: Arc<dyn DashboardProvisionerFactory>) -> Self {
        self.dashboards = Some(factory);
        self
    }

    pub fn build(self) -> ProvisioningService {
        let Self {
            config,
            services,
            datasources,
            plugins,
            notifiers,
            alert_rules,
            dashboards,
        } = self;
        let policy = config.atomicity;

        let inner = ServiceInner {
            search: Arc::clone(&services.search),
            datasources: datasources
                .unwrap_or_else(|| Arc::new(DatasourceProvisioner::new(&services, policy))),
            plugins: plugins.unwrap_or_else(|| Arc::new(PluginProvisioner::new(&services, policy))),
            notifiers: notifiers
                .unwrap_or_else(|| Arc::new(NotifierProvisioner::new(&services, policy))),
            alert_rules: alert_rules.unwrap_or_else(|| {
                Arc::new(AlertRuleProvisioner::new(&services, config.alerting, policy))
            }),
            dashboards: dashboards.unwrap_or_else(|| {
                Arc::new(FileDashboardProvisionerFactory::new(Arc::clone(
                    &services.dashboards,
                )))
            }),
            config,
            slot: Mutex::new(EpochSlot::default()),
            published: ArcSwapOption::empty(),
        };
        ProvisioningService {
            inner: Arc::new(inner),
        }
    }
}

fn stage_failed(stage: Stage, source: ReconcileError) -> CoreError {
    let err = CoreError::stage(stage, source);
    if err.is_cancelled() {
        debug!(%stage, "provisioning cancelled");
    } else {
        error!(%stage, error = %err, "{}", stage.failure_message());
    }
    err
}

impl ProvisioningService {
    /// Service with the file-backed provisioners.
    pub fn new(config: ProvisioningConfig, services: Services) -> Self {
        Self::builder(config, services).build()
    }

    pub fn builder(config: ProvisioningConfig, services: Services) -> ServiceBuilder {
        ServiceBuilder {
            config,
            services,
            datasources: None,
            plugins: None,
            notifiers: None,
            alert_rules: None,
            dashboards: None,
        }
    }

    pub fn config(&self) -> &ProvisioningConfig {
        &self.inner.config
    }

    // ── Startup sequence ─────────────────────────────────────────────

    /// Data sources, then plugins, then notifiers, then alert rules.
    ///
    /// Stops at the first failing stage; earlier stages stay applied.
    pub async fn run_init_provisioners(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, CoreError> {
        let mut total = self.provision_datasources(cancel).await?;
        total.merge(self.provision_plugins(cancel).await?);
        total.merge(self.provision_notifications(cancel).await?);
        total.merge(self.provision_alert_rules(cancel).await?);
        Ok(total)
    }

    pub async fn provision_datasources(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, CoreError> {
        self.run_stage(Stage::Datasources, self.inner.datasources.as_ref(), cancel)
            .await
    }

    pub async fn provision_plugins(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, CoreError> {
        self.run_stage(Stage::Plugins, self.inner.plugins.as_ref(), cancel)
            .await
    }

    pub async fn provision_notifications(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, CoreError> {
        self.run_stage(Stage::Notifiers, self.inner.notifiers.as_ref(), cancel)
            .await
    }

    pub async fn provision_alert_rules(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, CoreError> {
        self.run_stage(Stage::AlertRules, self.inner.alert_rules.as_ref(), cancel)
            .await
    }

    async fn run_stage(
        &self,
        stage: Stage,
        provisioner: &dyn ResourceProvisioner,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, CoreError> {
        let dir = self.inner.config.kind_path(stage.dir_name());
        match provisioner.provision(&dir, cancel).await {
            Ok(summary) => {
                info!(
                    %stage,
                    created = summary.created,
                    updated = summary.updated,
                    deleted = summary.deleted,
                    unchanged = summary.unchanged,
                    "provisioning complete"
                );
                Ok(summary)
            }
            Err(e) => Err(stage_failed(stage, e)),
        }
    }

    // ── Dashboards ───────────────────────────────────────────────────

    /// Build a provisioner from the current configuration and swap it in.
    ///
    /// On failure the previously installed provisioner stays in place and
    /// `run` resumes polling it.
    pub async fn provision_dashboards(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, CoreError> {
        let dir = self.inner.config.kind_path(Stage::Dashboards.dir_name());
        let provisioner = self
            .inner
            .dashboards
            .build(&dir)
            .await
            .map_err(|e| stage_failed(Stage::DashboardBuild, e))?;

        let mut slot = self.inner.slot.lock().await;
        if slot.cancel_polling() {
            debug!("stopped polling for dashboard changes");
        }

        provisioner.clean_up_orphaned_dashboards(cancel).await;
        let summary = provisioner
            .provision(cancel)
            .await
            .map_err(|e| stage_failed(Stage::Dashboards, e))?;

        let generation = slot.install(Arc::clone(&provisioner));
        self.inner.published.store(Some(Arc::new(Installed {
            provisioner,
            generation,
        })));
        drop(slot);

        info!(generation, %summary, "dashboard provisioner installed");
        Ok(summary)
    }

    /// Provision dashboards, then keep them polled until `cancel` fires.
    ///
    /// Returns the first provisioning error, or [`CoreError::Cancelled`]
    /// once the parent token is cancelled.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), CoreError> {
        self.provision_dashboards(cancel).await?;

        if self
            .inner
            .published
            .load_full()
            .is_some_and(|installed| installed.provisioner.has_dashboard_sources())
        {
            self.inner.search.trigger_reindex();
        }

        loop {
            let Some((epoch_id, epoch)) = self.start_polling().await else {
                cancel.cancelled().await;
                return Err(CoreError::Cancelled);
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    epoch.cancel();
                    debug!("stopped polling for dashboard changes");
                    return Err(CoreError::Cancelled);
                }
                () = epoch.cancelled() => {
                    let self_ended = self.inner.slot.lock().await.end_epoch_if_current(epoch_id);
                    if self_ended {
                        let backoff = self.inner.config.restart_backoff;
                        warn!(?backoff, "dashboard polling ended on its own, restarting");
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => return Err(CoreError::Cancelled),
                            () = tokio::time::sleep(backoff) => {}
                        }
                    } else {
                        debug!(epoch = epoch_id, "restarting dashboard polling");
                    }
                }
            }
        }
    }

    /// Begin a polling epoch on the installed provisioner, under the lock.
    async fn start_polling(&self) -> Option<(u64, CancellationToken)> {
        let mut slot = self.inner.slot.lock().await;
        let provisioner = slot.instance()?;
        let (id, token) = slot.begin_epoch();
        provisioner.poll_changes(token.clone());
        Some((id, token))
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Resolved path of a dashboard provider. May lag behind an install
    /// that is still in progress.
    pub fn dashboard_provisioner_resolved_path(&self, provider: &str) -> Option<PathBuf> {
        self.inner
            .published
            .load_full()
            .and_then(|installed| installed.provisioner.resolved_path(provider))
    }

    pub fn allow_ui_updates_from_config(&self, provider: &str) -> bool {
        self.inner
            .published
            .load_full()
            .is_some_and(|installed| installed.provisioner.allow_ui_updates(provider))
    }

    /// How many dashboard provisioners have been installed so far.
    pub fn installed_generation(&self) -> Option<u64> {
        self.inner
            .published
            .load_full()
            .map(|installed| installed.generation)
    }

    // ── Offline validation ───────────────────────────────────────────

    /// Validate every provisioning directory without writing anything.
    pub async fn check(&self) -> Vec<(Stage, CheckReport)> {
        let inner = &self.inner;
        let mut reports = Vec::new();
        for (stage, provisioner) in [
            (Stage::Datasources, &inner.datasources),
            (Stage::Plugins, &inner.plugins),
            (Stage::Notifiers, &inner.notifiers),
            (Stage::AlertRules, &inner.alert_rules),
        ] {
            let dir = inner.config.kind_path(stage.dir_name());
            reports.push((stage, provisioner.check(&dir).await));
        }

        let dir = inner.config.kind_path(Stage::Dashboards.dir_name());
        let files = reader::yaml_files(&dir);
        let report = match (files, inner.dashboards.build(&dir).await) {
            (Err(e), _) => CheckReport {
                files: Vec::new(),
                errors: vec![e],
            },
            (Ok(files), Ok(_)) => CheckReport {
                files,
                errors: Vec::new(),
            },
            (Ok(files), Err(e)) => CheckReport {
                files,
                errors: match e {
                    ReconcileError::Files { errors, .. } => errors,
                    other => vec![reader::FileError::new(&dir, other.to_string())],
                },
            },
        };
        reports.push((Stage::Dashboards, report));
        reports
    }
}
