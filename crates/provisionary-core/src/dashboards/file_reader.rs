// ── Dashboard file reader ──
//
// One reader per provider. A walk saves every changed `*.json` file below
// the provider path and removes the dashboards whose files are gone.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use provisionary_store::{Dashboard, DashboardStore, OrgId, Provenance};

use super::config::ProviderConfig;
use crate::error::ReconcileError;
use crate::reader::FileError;
use crate::reconcile::{self, ReconcileSummary};

/// Length of uids derived from file paths.
const DERIVED_UID_LEN: usize = 14;

pub(crate) struct FileReader {
    pub(crate) cfg: ProviderConfig,
    store: Arc<dyn DashboardStore>,
}

/// A dashboard file that decoded and is ready to save.
struct DashboardFile {
    path: PathBuf,
    uid: String,
    title: String,
    checksum: String,
    data: serde_json::Value,
}

/// Stable uid for a dashboard file that does not declare one.
pub(crate) fn derive_uid(provider: &str, relative: &Path) -> String {
    let rel = relative.to_string_lossy().replace('\\', "/");
    let mut uid = hex::encode(Sha256::digest(format!("{provider}/{rel}").as_bytes()));
    uid.truncate(DERIVED_UID_LEN);
    uid
}

impl FileReader {
    pub(crate) fn new(cfg: ProviderConfig, store: Arc<dyn DashboardStore>) -> Self {
        Self { cfg, store }
    }

    /// Provider path with symlinks resolved, or as configured when that fails.
    pub(crate) fn resolved_path(&self) -> PathBuf {
        std::fs::canonicalize(&self.cfg.path).unwrap_or_else(|_| self.cfg.path.clone())
    }

    fn dashboard_files(root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(path = %root.display(), error = %e, "skipping unreadable dashboard entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
            })
            .collect();
        files.sort();
        files
    }

    fn load(&self, root: &Path, path: PathBuf) -> Result<DashboardFile, String> {
        let raw = std::fs::read(&path).map_err(|e| format!("cannot read file: {e}"))?;
        let checksum = hex::encode(Sha256::digest(&raw));
        let mut data: serde_json::Value =
            serde_json::from_slice(&raw).map_err(|e| format!("invalid dashboard JSON: {e}"))?;

        let title = data
            .get("title")
            .and_then(serde_json::Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or("dashboard has no title")?
            .to_owned();

        let relative = path.strip_prefix(root).unwrap_or(&path);
        let uid = data
            .get("uid")
            .and_then(serde_json::Value::as_str)
            .filter(|u| !u.is_empty())
            .map_or_else(|| derive_uid(&self.cfg.name, relative), str::to_owned);

        if let Some(object) = data.as_object_mut() {
            object.insert("uid".into(), serde_json::Value::String(uid.clone()));
            object.remove("id");
        }

        Ok(DashboardFile {
            path,
            uid,
            title,
            checksum,
            data,
        })
    }

    async fn folder_for(&self, root: &Path, path: &Path) -> Result<Option<String>, ReconcileError> {
        let org = self.cfg.org_id;
        if self.cfg.folders_from_files_structure {
            let parent = path
                .strip_prefix(root)
                .ok()
                .and_then(Path::parent)
                .filter(|p| !p.as_os_str().is_empty());
            return match parent {
                Some(dir) => {
                    let title = dir.to_string_lossy().replace('\\', "/");
                    Ok(Some(self.store.ensure_folder(org, &title, None).await?.uid))
                }
                None => Ok(None),
            };
        }
        if self.cfg.folder.is_empty() {
            return Ok(None);
        }
        let folder = self
            .store
            .ensure_folder(org, &self.cfg.folder, self.cfg.folder_uid.as_deref())
            .await?;
        Ok(Some(folder.uid))
    }

    /// One pass over the provider path.
    pub(crate) async fn walk(&self, cancel: &CancellationToken) -> Result<ReconcileSummary, ReconcileError> {
        let root = self.resolved_path();
        if !root.is_dir() {
            return Err(ReconcileError::files(vec![FileError::new(
                &self.cfg.path,
                format!(
                    "dashboard provider '{}' path does not exist or is not a directory",
                    self.cfg.name
                ),
            )]));
        }

        let mut summary = ReconcileSummary::default();
        let mut kept: HashSet<(OrgId, String)> = HashSet::new();
        let mut broken: HashSet<PathBuf> = HashSet::new();

        for path in Self::dashboard_files(&root) {
            reconcile::ensure_live(cancel)?;
            let file = match self.load(&root, path.clone()) {
                Ok(file) => file,
                Err(reason) => {
                    warn!(provider = %self.cfg.name, path = %path.display(), %reason, "skipping dashboard file");
                    broken.insert(path);
                    continue;
                }
            };
            if !kept.insert((self.cfg.org_id, file.uid.clone())) {
                warn!(provider = %self.cfg.name, uid = %file.uid, path = %file.path.display(), "dashboard uid is used by more than one file");
                continue;
            }
            self.save(&root, file, &mut summary).await?;
        }

        for orphan in self.store.provisioned_dashboards().await? {
            let Provenance::Provider { provider, path, .. } = &orphan.provenance else {
                continue;
            };
            if provider != &self.cfg.name
                || kept.contains(&(orphan.org_id, orphan.uid.clone()))
                || broken.contains(path)
            {
                continue;
            }
            reconcile::ensure_live(cancel)?;
            if self.cfg.disable_deletion {
                self.store
                    .unprovision_dashboard(orphan.org_id, &orphan.uid)
                    .await?;
                info!(provider = %self.cfg.name, uid = %orphan.uid, "dashboard file removed, keeping dashboard unprovisioned");
                summary.updated += 1;
            } else if self.store.delete_dashboard(orphan.org_id, &orphan.uid).await? {
                info!(provider = %self.cfg.name, uid = %orphan.uid, "deleted dashboard whose file was removed");
                summary.deleted += 1;
            }
        }

        debug!(provider = %self.cfg.name, %summary, "dashboard walk complete");
        Ok(summary)
    }

    async fn save(
        &self,
        root: &Path,
        file: DashboardFile,
        summary: &mut ReconcileSummary,
    ) -> Result<(), ReconcileError> {
        let org = self.cfg.org_id;
        let folder_uid = self.folder_for(root, &file.path).await?;
        let provenance = Provenance::Provider {
            provider: self.cfg.name.clone(),
            path: file.path.clone(),
            checksum: file.checksum,
        };

        let existing = self.store.dashboard_by_uid(org, &file.uid).await?;
        if let Some(existing) = &existing {
            if existing.provenance == provenance && existing.folder_uid == folder_uid {
                summary.unchanged += 1;
                return Ok(());
            }
            if let Some(owner) = existing.provenance.provider() {
                if owner != self.cfg.name {
                    warn!(provider = %self.cfg.name, uid = %file.uid, owner, "dashboard uid already provisioned by another provider");
                    return Ok(());
                }
            }
        }

        self.store
            .save_dashboard(Dashboard {
                uid: file.uid,
                org_id: org,
                title: file.title,
                folder_uid,
                data: file.data,
                provenance,
            })
            .await?;
        if existing.is_some() {
            summary.updated += 1;
        } else {
            summary.created += 1;
        }
        Ok(())
    }

    /// Re-walk every `update_interval` until `cancel` fires.
    pub(crate) async fn watch(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.cfg.update_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.walk(&cancel).await {
                        Ok(summary) if summary.mutations() > 0 => {
                            info!(provider = %self.cfg.name, %summary, "dashboards updated from disk");
                        }
                        Ok(_) | Err(ReconcileError::Cancelled) => {}
                        Err(e) => warn!(provider = %self.cfg.name, error = %e, "dashboard poll failed"),
                    }
                }
            }
        }
        debug!(provider = %self.cfg.name, "stopped watching dashboard files");
    }
}
