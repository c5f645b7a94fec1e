//! Alert notification channels from `notifiers/*.yaml`.
//!
//! Channels are identified by `(org_id, uid)`; the uid is mandatory so that
//! renaming a channel in a file updates it instead of replacing it.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use provisionary_store::{
    DEFAULT_ORG_ID, Notifier, NotifierStore, OrgId, OrgStore, Provenance, SecretsService,
};

use crate::config::AtomicityPolicy;
use crate::error::ReconcileError;
use crate::reader::{self, CheckReport, ConfigFile, FileError};
use crate::reconcile::{self, Pass, ReconcileSummary, ResourceProvisioner};
use crate::services::Services;

// ── File format ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifiersFile {
    #[serde(default)]
    pub notifiers: Vec<NotifierSpec>,
    #[serde(default, alias = "deleteNotifiers")]
    pub delete_notifiers: Vec<DeleteNotifierSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifierSpec {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, alias = "orgId")]
    pub org_id: Option<OrgId>,
    #[serde(default, alias = "isDefault")]
    pub is_default: bool,
    #[serde(default, alias = "sendReminder")]
    pub send_reminder: bool,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default, alias = "disableResolveMessage")]
    pub disable_resolve_message: bool,
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
    #[serde(default, alias = "secureSettings")]
    pub secure_settings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteNotifierSpec {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "orgId")]
    pub org_id: Option<OrgId>,
}

impl NotifierSpec {
    fn org(&self) -> OrgId {
        self.org_id.unwrap_or(DEFAULT_ORG_ID)
    }

    fn has_setting(&self, key: &str) -> bool {
        let plain = self
            .settings
            .as_ref()
            .and_then(|s| s.get(key))
            .is_some_and(|v| match v {
                serde_json::Value::Null => false,
                serde_json::Value::String(s) => !s.is_empty(),
                _ => true,
            });
        plain || self.secure_settings.get(key).is_some_and(|v| !v.is_empty())
    }
}

/// Settings a known channel type cannot work without. Each inner slice
/// lists alternatives, one of which must be present.
fn required_settings(kind: &str) -> &'static [&'static [&'static str]] {
    match kind {
        "email" => &[&["addresses"]],
        "slack" => &[&["url", "token"]],
        "webhook" | "discord" => &[&["url"]],
        "pagerduty" => &[&["integrationKey"]],
        "telegram" => &[&["bottoken"], &["chatid"]],
        _ => &[],
    }
}

fn validate_spec(spec: &NotifierSpec) -> Result<Option<u64>, String> {
    if spec.name.is_empty() {
        return Err("notifier name is required".into());
    }
    if spec.uid.is_empty() {
        return Err(format!("notifier '{}' has no uid", spec.name));
    }
    if spec.kind.is_empty() {
        return Err(format!("notifier '{}' has no type", spec.name));
    }
    for alternatives in required_settings(&spec.kind) {
        if !alternatives.iter().any(|key| spec.has_setting(key)) {
            return Err(format!(
                "{} notifier '{}' requires setting '{}'",
                spec.kind,
                spec.name,
                alternatives.join("' or '")
            ));
        }
    }
    match (&spec.frequency, spec.send_reminder) {
        (Some(freq), true) if !freq.is_empty() => humantime::parse_duration(freq)
            .map(|d| Some(d.as_secs()))
            .map_err(|e| format!("notifier '{}' has invalid frequency '{freq}': {e}", spec.name)),
        _ => Ok(None),
    }
}

// ── Provisioner ─────────────────────────────────────────────────────

struct Declared {
    path: PathBuf,
    spec: NotifierSpec,
    frequency_secs: Option<u64>,
}

#[derive(Default)]
struct Validated {
    declared: Vec<Declared>,
    deletions: Vec<DeleteNotifierSpec>,
    errors: Vec<FileError>,
}

pub struct NotifierProvisioner {
    store: Arc<dyn NotifierStore>,
    orgs: Arc<dyn OrgStore>,
    secrets: Arc<dyn SecretsService>,
    policy: AtomicityPolicy,
}

impl NotifierProvisioner {
    pub fn new(services: &Services, policy: AtomicityPolicy) -> Self {
        Self {
            store: Arc::clone(&services.notifiers),
            orgs: Arc::clone(&services.orgs),
            secrets: Arc::clone(&services.secrets),
            policy,
        }
    }

    async fn validate_dir(&self, dir: &Path) -> Result<Validated, ReconcileError> {
        let contents = reader::read_yaml_dir::<NotifiersFile>(dir);
        let mut out = Validated {
            errors: contents.errors,
            ..Validated::default()
        };
        let mut seen: HashSet<(OrgId, String)> = HashSet::new();

        for file in contents.files {
            match self.validate_file(&file, &seen).await? {
                Ok(frequencies) => {
                    out.deletions.extend(file.body.delete_notifiers);
                    for (spec, frequency_secs) in file.body.notifiers.into_iter().zip(frequencies) {
                        seen.insert((spec.org(), spec.uid.clone()));
                        out.declared.push(Declared {
                            path: file.path.clone(),
                            spec,
                            frequency_secs,
                        });
                    }
                }
                Err(e) => out.errors.push(e),
            }
        }
        Ok(out)
    }

    /// Accepts the file as a whole, returning each notifier's parsed frequency.
    async fn validate_file(
        &self,
        file: &ConfigFile<NotifiersFile>,
        seen: &HashSet<(OrgId, String)>,
    ) -> Result<Result<Vec<Option<u64>>, FileError>, ReconcileError> {
        let mut local = HashSet::new();
        let mut frequencies = Vec::with_capacity(file.body.notifiers.len());

        for spec in &file.body.notifiers {
            let frequency = match validate_spec(spec) {
                Ok(f) => f,
                Err(reason) => return Ok(Err(FileError::new(&file.path, reason))),
            };
            let org = spec.org();
            if !self.orgs.org_exists(org).await? {
                return Ok(Err(FileError::new(
                    &file.path,
                    format!("notifier '{}' references organisation {org}, which does not exist", spec.name),
                )));
            }
            let key = (org, spec.uid.clone());
            if seen.contains(&key) || !local.insert(key) {
                return Ok(Err(FileError::new(
                    &file.path,
                    format!("notifier uid '{}' is used more than once in org {org}", spec.uid),
                )));
            }
            frequencies.push(frequency);
        }

        if let Some(bad) = file
            .body
            .delete_notifiers
            .iter()
            .find(|d| d.uid.is_empty() && d.name.is_empty())
        {
            let org = bad.org_id.unwrap_or(DEFAULT_ORG_ID);
            return Ok(Err(FileError::new(
                &file.path,
                format!("delete_notifiers entry in org {org} needs a uid or a name"),
            )));
        }
        Ok(Ok(frequencies))
    }

    /// Resolve a deletion entry to the uid it addresses.
    async fn deletion_target(
        &self,
        deletion: &DeleteNotifierSpec,
    ) -> Result<Option<(OrgId, String)>, ReconcileError> {
        let org = deletion.org_id.unwrap_or(DEFAULT_ORG_ID);
        if !deletion.uid.is_empty() {
            return Ok(Some((org, deletion.uid.clone())));
        }
        Ok(self
            .store
            .notifier_by_name(org, &deletion.name)
            .await?
            .map(|n| (org, n.uid)))
    }

    async fn apply_one(&self, declared: &Declared, pass: &mut Pass) -> Result<(), ReconcileError> {
        let spec = &declared.spec;
        let existing = self.store.notifier_by_uid(spec.org(), &spec.uid).await?;
        let desired = Notifier {
            uid: spec.uid.clone(),
            org_id: spec.org(),
            name: spec.name.clone(),
            kind: spec.kind.clone(),
            is_default: spec.is_default,
            send_reminder: spec.send_reminder,
            frequency_secs: declared.frequency_secs,
            disable_resolve_message: spec.disable_resolve_message,
            settings: spec
                .settings
                .clone()
                .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
            secure_settings: reconcile::reconcile_secrets(
                self.secrets.as_ref(),
                existing.as_ref().map(|n| &n.secure_settings),
                &spec.secure_settings,
            )?,
            provenance: Provenance::file(&declared.path),
        };

        match existing {
            None => {
                debug!(uid = %desired.uid, name = %desired.name, "creating alert notification");
                self.store.create_notifier(desired).await?;
                pass.summary.created += 1;
            }
            Some(existing) if existing == desired => pass.summary.unchanged += 1,
            Some(_) => {
                debug!(uid = %desired.uid, name = %desired.name, "updating alert notification");
                self.store.update_notifier(desired).await?;
                pass.summary.updated += 1;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceProvisioner for NotifierProvisioner {
    async fn provision(
        &self,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, ReconcileError> {
        let Validated {
            declared,
            deletions,
            errors,
        } = self.validate_dir(dir).await?;
        let mut pass = Pass::new(self.policy, errors);
        pass.admit()?;

        let declared_keys: HashSet<(OrgId, String)> = declared
            .iter()
            .map(|d| (d.spec.org(), d.spec.uid.clone()))
            .collect();

        for deletion in &deletions {
            reconcile::ensure_live(cancel)?;
            let Some(target) = self.deletion_target(deletion).await? else {
                continue;
            };
            if declared_keys.contains(&target) {
                continue;
            }
            if self.store.delete_notifier(target.0, &target.1).await? {
                info!(uid = %target.1, org_id = target.0, "deleted alert notification");
                pass.summary.deleted += 1;
            }
        }

        for item in &declared {
            reconcile::ensure_live(cancel)?;
            self.apply_one(item, &mut pass).await?;
        }

        if pass.may_prune() {
            for orphan in self.store.provisioned_notifiers().await? {
                if declared_keys.contains(&(orphan.org_id, orphan.uid.clone())) {
                    continue;
                }
                reconcile::ensure_live(cancel)?;
                if self.store.delete_notifier(orphan.org_id, &orphan.uid).await? {
                    info!(uid = %orphan.uid, org_id = orphan.org_id, source = %orphan.provenance, "deleted orphaned alert notification");
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
            Ok(validated) => validated.errors,
            Err(e) => vec![FileError::new(dir, e.to_string())],
        };
        CheckReport { files, errors }
    }
}
