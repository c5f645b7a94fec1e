#![allow(clippy::unwrap_used, dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use provisionary_core::{
    AtomicityPolicy, DashboardProvisioner, DashboardProvisionerFactory, FileError,
    ProvisioningConfig, ReconcileError, ReconcileSummary, ResourceProvisioner, Services,
};
use provisionary_store::{
    LocalSecrets, MemoryStore, PluginKind, PluginMeta, ReindexCounter, StaticPluginRegistry,
};

// ── Fixture ─────────────────────────────────────────────────────────

/// A provisioning tree in a temp dir backed by a fresh in-memory store.
pub struct Fixture {
    pub root: tempfile::TempDir,
    pub store: Arc<MemoryStore>,
    pub search: Arc<ReindexCounter>,
    pub services: Services,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    pub fn with_store(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        let search = Arc::new(ReindexCounter::default());
        let registry = StaticPluginRegistry::new([PluginMeta {
            id: "worldping-app".into(),
            name: "Worldping".into(),
            kind: PluginKind::App,
        }]);
        let services = Services::from_memory(
            &store,
            Arc::new(LocalSecrets::new("fixture")),
            Arc::new(registry),
            search.clone(),
        );
        Self {
            root: tempfile::tempdir().unwrap(),
            store,
            search,
            services,
        }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn config(&self, policy: AtomicityPolicy) -> ProvisioningConfig {
        ProvisioningConfig::new(self.path().join("provisioning"))
            .with_atomicity(policy)
            .with_restart_backoff(Duration::from_millis(200))
    }

    /// Write `<provisioning>/<kind>/<name>`, creating directories.
    pub fn write(&self, kind: &str, name: &str, body: &str) -> PathBuf {
        let dir = self.path().join("provisioning").join(kind);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    pub fn remove(&self, kind: &str, name: &str) {
        std::fs::remove_file(self.path().join("provisioning").join(kind).join(name)).unwrap();
    }

    /// Directory for dashboard JSON files, outside the provisioning tree.
    pub fn dashboards_dir(&self, name: &str) -> PathBuf {
        let dir = self.path().join("dashboards").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn write_provider(&self, name: &str, path: &Path, interval_secs: u64) {
        self.write(
            "dashboards",
            &format!("{name}.yaml"),
            &format!(
                "apiVersion: 1\nproviders:\n  - name: {name}\n    folder: Ops\n    updateIntervalSeconds: {interval_secs}\n    options:\n      path: {}\n",
                path.display()
            ),
        );
    }
}

pub const DATASOURCES: &str = "\
apiVersion: 1
datasources:
  - name: Prometheus
    type: prometheus
    url: http://prometheus:9090
    isDefault: true
    secureJsonData:
      httpHeaderValue1: Bearer abc
";

pub const PLUGINS: &str = "\
apiVersion: 1
apps:
  - type: worldping-app
    org_id: 1
    jsonData:
      region: eu
";

pub const WEBHOOK: &str = "\
notifiers:
  - uid: ops-hook
    name: Ops hook
    type: webhook
    settings:
      url: http://hooks.internal/ops
";

pub const ALERTING: &str = "\
apiVersion: 1
groups:
  - name: availability
    folder: Alerts
    interval: 1m
    rules:
      - uid: up
        title: Target down
        condition: A
        data:
          - refId: A
            model:
              expr: up == 0
";

pub fn dashboard_json(title: &str, uid: &str) -> String {
    format!(r#"{{ "title": "{title}", "uid": "{uid}", "panels": [] }}"#)
}

// ── Fake resource provisioner ───────────────────────────────────────

/// Records its invocation into a shared log and optionally fails.
pub struct RecordingProvisioner {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
    fail: bool,
}

impl RecordingProvisioner {
    pub fn new(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            log: Arc::clone(log),
            fail,
        })
    }
}

#[async_trait]
impl ResourceProvisioner for RecordingProvisioner {
    async fn provision(
        &self,
        dir: &Path,
        _cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, ReconcileError> {
        self.log.lock().unwrap().push(self.name);
        if self.fail {
            Err(ReconcileError::files(vec![FileError::new(
                dir.join("broken.yaml"),
                "plugin not installed: 'ghost-app'",
            )]))
        } else {
            Ok(ReconcileSummary::default())
        }
    }
}

// ── Fake dashboard provisioner ──────────────────────────────────────

/// Observations shared by every fake dashboard provisioner of one factory.
#[derive(Default)]
pub struct DashboardCounters {
    pub active_polls: AtomicUsize,
    pub poll_starts: AtomicUsize,
    pub provisioning: AtomicUsize,
    pub max_concurrent_provisions: AtomicUsize,
}

pub struct FakeDashboards {
    label: String,
    counters: Arc<DashboardCounters>,
    self_ending: bool,
    provision_delay: Duration,
}

#[async_trait]
impl DashboardProvisioner for FakeDashboards {
    async fn provision(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, ReconcileError> {
        let now = self.counters.provisioning.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .max_concurrent_provisions
            .fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.provision_delay).await;
        self.counters.provisioning.fetch_sub(1, Ordering::SeqCst);
        Ok(ReconcileSummary::default())
    }

    async fn clean_up_orphaned_dashboards(&self, _cancel: &CancellationToken) {}

    fn poll_changes(&self, cancel: CancellationToken) {
        self.counters.poll_starts.fetch_add(1, Ordering::SeqCst);
        if self.self_ending {
            cancel.cancel();
            return;
        }
        let counters = Arc::clone(&self.counters);
        counters.active_polls.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            cancel.cancelled().await;
            counters.active_polls.fetch_sub(1, Ordering::SeqCst);
        });
    }

    fn has_dashboard_sources(&self) -> bool {
        true
    }

    fn resolved_path(&self, provider: &str) -> Option<PathBuf> {
        Some(PathBuf::from(format!("/{}/{provider}", self.label)))
    }

    fn allow_ui_updates(&self, _provider: &str) -> bool {
        false
    }
}

/// Builds numbered [`FakeDashboards`] (`v1`, `v2`, …).
pub struct FakeFactory {
    pub counters: Arc<DashboardCounters>,
    builds: AtomicUsize,
    pub self_ending: bool,
    pub provision_delay: Duration,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::plain())
    }

    pub fn self_ending() -> Arc<Self> {
        Arc::new(Self {
            self_ending: true,
            ..Self::plain()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            provision_delay: delay,
            ..Self::plain()
        })
    }

    fn plain() -> Self {
        Self {
            counters: Arc::new(DashboardCounters::default()),
            builds: AtomicUsize::new(0),
            self_ending: false,
            provision_delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl DashboardProvisionerFactory for FakeFactory {
    async fn build(&self, _dir: &Path) -> Result<Arc<dyn DashboardProvisioner>, ReconcileError> {
        let n = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(FakeDashboards {
            label: format!("v{n}"),
            counters: Arc::clone(&self.counters),
            self_ending: self.self_ending,
            provision_delay: self.provision_delay,
        }))
    }
}
