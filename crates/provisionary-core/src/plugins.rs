//! App plugin settings from `plugins/*.yaml`.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use provisionary_store::{
    DEFAULT_ORG_ID, OrgId, OrgStore, PluginKind, PluginRegistry, PluginSetting,
    PluginSettingsStore, Provenance, SecretsService,
};

use crate::config::AtomicityPolicy;
use crate::error::ReconcileError;
use crate::reader::{self, CheckReport, ConfigFile, FileError};
use crate::reconcile::{self, Pass, ReconcileSummary, ResourceProvisioner};
use crate::services::Services;

// ── File format ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginsFile {
    #[serde(default, rename = "apiVersion")]
    pub api_version: i64,
    #[serde(default)]
    pub apps: Vec<AppSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSpec {
    /// Plugin id.
    #[serde(rename = "type", default)]
    pub plugin_id: String,
    #[serde(default, alias = "orgId")]
    pub org_id: Option<OrgId>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, rename = "jsonData", alias = "json_data")]
    pub json_data: Option<serde_json::Value>,
    #[serde(default, rename = "secureJsonData", alias = "secure_json_data")]
    pub secure_json_data: BTreeMap<String, String>,
}

impl AppSpec {
    fn org(&self) -> OrgId {
        self.org_id.unwrap_or(DEFAULT_ORG_ID)
    }
}

// ── Provisioner ─────────────────────────────────────────────────────

struct Declared {
    path: PathBuf,
    spec: AppSpec,
}

pub struct PluginProvisioner {
    store: Arc<dyn PluginSettingsStore>,
    orgs: Arc<dyn OrgStore>,
    registry: Arc<dyn PluginRegistry>,
    secrets: Arc<dyn SecretsService>,
    policy: AtomicityPolicy,
}

impl PluginProvisioner {
    pub fn new(services: &Services, policy: AtomicityPolicy) -> Self {
        Self {
            store: Arc::clone(&services.plugin_settings),
            orgs: Arc::clone(&services.orgs),
            registry: Arc::clone(&services.plugins),
            secrets: Arc::clone(&services.secrets),
            policy,
        }
    }

    async fn validate_dir(
        &self,
        dir: &Path,
    ) -> Result<(Vec<Declared>, Vec<FileError>), ReconcileError> {
        let contents = reader::read_yaml_dir::<PluginsFile>(dir);
        let mut errors = contents.errors;
        let mut declared = Vec::new();
        let mut seen: HashSet<(OrgId, String)> = HashSet::new();

        for file in contents.files {
            match self.validate_file(&file, &seen).await? {
                Ok(()) => {
                    for app in file.body.apps {
                        seen.insert((app.org(), app.plugin_id.clone()));
                        declared.push(Declared {
                            path: file.path.clone(),
                            spec: app,
                        });
                    }
                }
                Err(e) => errors.push(e),
            }
        }
        Ok((declared, errors))
    }

    async fn validate_file(
        &self,
        file: &ConfigFile<PluginsFile>,
        seen: &HashSet<(OrgId, String)>,
    ) -> Result<Result<(), FileError>, ReconcileError> {
        let mut local = HashSet::new();
        for app in &file.body.apps {
            let reason = if app.plugin_id.is_empty() {
                Some("app entry has no type (plugin id)".to_string())
            } else {
                match self.registry.plugin(&app.plugin_id) {
                    None => Some(format!("plugin not installed: '{}'", app.plugin_id)),
                    Some(meta) if meta.kind != PluginKind::App => Some(format!(
                        "plugin '{}' is a {} plugin, only app plugins can be provisioned",
                        app.plugin_id, meta.kind
                    )),
                    Some(_) => None,
                }
            };
            if let Some(reason) = reason {
                return Ok(Err(FileError::new(&file.path, reason)));
            }

            let org = app.org();
            if !self.orgs.org_exists(org).await? {
                return Ok(Err(FileError::new(
                    &file.path,
                    format!("app '{}' references organisation {org}, which does not exist", app.plugin_id),
                )));
            }
            let key = (org, app.plugin_id.clone());
            if seen.contains(&key) || !local.insert(key) {
                return Ok(Err(FileError::new(
                    &file.path,
                    format!("app '{}' is declared more than once in org {org}", app.plugin_id),
                )));
            }
        }
        Ok(Ok(()))
    }

    async fn apply_one(&self, declared: &Declared, pass: &mut Pass) -> Result<(), ReconcileError> {
        let app = &declared.spec;
        let existing = self.store.plugin_setting(app.org(), &app.plugin_id).await?;
        let desired = PluginSetting {
            org_id: app.org(),
            plugin_id: app.plugin_id.clone(),
            enabled: !app.disabled,
            pinned: !app.disabled,
            json_data: app
                .json_data
                .clone()
                .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
            secure_json_data: reconcile::reconcile_secrets(
                self.secrets.as_ref(),
                existing.as_ref().map(|s| &s.secure_json_data),
                &app.secure_json_data,
            )?,
            provenance: Provenance::file(&declared.path),
        };

        match existing {
            None => {
                debug!(plugin = %desired.plugin_id, org_id = desired.org_id, "creating app settings");
                self.store.create_plugin_setting(desired).await?;
                pass.summary.created += 1;
            }
            Some(existing) if existing == desired => pass.summary.unchanged += 1,
            Some(_) => {
                debug!(plugin = %desired.plugin_id, org_id = desired.org_id, "updating app settings");
                self.store.update_plugin_setting(desired).await?;
                pass.summary.updated += 1;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceProvisioner for PluginProvisioner {
    async fn provision(
        &self,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, ReconcileError> {
        let (declared, errors) = self.validate_dir(dir).await?;
        let mut pass = Pass::new(self.policy, errors);
        pass.admit()?;

        for item in &declared {
            reconcile::ensure_live(cancel)?;
            self.apply_one(item, &mut pass).await?;
        }

        if pass.may_prune() {
            let keep: HashSet<(OrgId, &str)> = declared
                .iter()
                .map(|d| (d.spec.org(), d.spec.plugin_id.as_str()))
                .collect();
            for orphan in self.store.provisioned_plugin_settings().await? {
                if keep.contains(&(orphan.org_id, orphan.plugin_id.as_str())) {
                    continue;
                }
                reconcile::ensure_live(cancel)?;
                if self
                    .store
                    .delete_plugin_setting(orphan.org_id, &orphan.plugin_id)
                    .await?
                {
                    info!(plugin = %orphan.plugin_id, org_id = orphan.org_id, "removed orphaned app settings");
                    pass.summary.deleted += 1;
                }
            }
        }

        pass.finish()
    }

    async fn check(&self, dir: &Path) -> CheckReport {
        let files = match reader::yaml_files(dir) {
            Ok(files) => files,
            Err(e) => return CheckReport { files: Vec::new(), errors: vec![e] },
        };
        let errors = match self.validate_dir(dir).await {
            Ok((_, errors)) => errors,
            Err(e) => vec![FileError::new(dir, e.to_string())],
        };
        CheckReport { files, errors }
    }
}
