//! Data source provisioning from `datasources/*.yaml`.
//!
//! Data sources are identified by `(orgId, name)`. Keys are accepted in
//! camelCase and, for older files, snake_case. A data source may declare
//! correlations to other data sources by uid; those are replaced as a set
//! whenever they differ from what is stored.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use provisionary_store::{
    Correlation, CorrelationStore, DEFAULT_ORG_ID, DataSource, DatasourceStore, OrgId, OrgStore,
    Provenance, SecretsService,
};

use crate::config::AtomicityPolicy;
use crate::error::ReconcileError;
use crate::reader::{self, CheckReport, ConfigFile, FileError};
use crate::reconcile::{self, Pass, ReconcileSummary, ResourceProvisioner};
use crate::services::Services;

// ── File format ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourcesFile {
    #[serde(default, alias = "api_version")]
    pub api_version: i64,
    #[serde(default)]
    pub datasources: Vec<DatasourceSpec>,
    #[serde(default, alias = "delete_datasources")]
    pub delete_datasources: Vec<DeleteDatasourceSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceSpec {
    #[serde(default, alias = "org_id")]
    pub org_id: Option<OrgId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub access: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub database: String,
    #[serde(default, alias = "basic_auth")]
    pub basic_auth: bool,
    #[serde(default, alias = "basic_auth_user")]
    pub basic_auth_user: String,
    #[serde(default, alias = "with_credentials")]
    pub with_credentials: bool,
    #[serde(default, alias = "is_default")]
    pub is_default: bool,
    #[serde(default, alias = "json_data")]
    pub json_data: Option<serde_json::Value>,
    #[serde(default, alias = "secure_json_data")]
    pub secure_json_data: BTreeMap<String, String>,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub editable: bool,
    #[serde(default)]
    pub correlations: Vec<CorrelationSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorrelationSpec {
    #[serde(default, rename = "targetUID", alias = "targetUid", alias = "target_uid")]
    pub target_uid: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
}

impl CorrelationSpec {
    fn to_entity(&self, org_id: OrgId, source_uid: &str) -> Correlation {
        Correlation {
            uid: String::new(),
            org_id,
            source_uid: source_uid.to_owned(),
            target_uid: self.target_uid.clone(),
            label: self.label.clone(),
            description: self.description.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteDatasourceSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "org_id")]
    pub org_id: Option<OrgId>,
}

impl DatasourceSpec {
    fn org(&self) -> OrgId {
        self.org_id.unwrap_or(DEFAULT_ORG_ID)
    }

    /// Stored shape of this declaration, secure values still in plaintext.
    fn to_entity(&self, path: &Path) -> DataSource {
        DataSource {
            uid: self.uid.clone(),
            org_id: self.org(),
            name: self.name.clone(),
            kind: self.kind.clone(),
            access: if self.access.is_empty() {
                "proxy".into()
            } else {
                self.access.clone()
            },
            url: self.url.clone(),
            user: self.user.clone(),
            database: self.database.clone(),
            basic_auth: self.basic_auth,
            basic_auth_user: self.basic_auth_user.clone(),
            with_credentials: self.with_credentials,
            is_default: self.is_default,
            json_data: self
                .json_data
                .clone()
                .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
            secure_json_data: BTreeMap::new(),
            version: self.version.max(1),
            read_only: !self.editable,
            provenance: Provenance::file(path),
        }
    }
}

// ── Provisioner ─────────────────────────────────────────────────────

type Key = (OrgId, String);

enum Outcome {
    Created,
    Updated,
    Unchanged,
}

/// Whether two correlation sets hold the same links, ignoring uids and order.
fn same_links(existing: &[Correlation], desired: &[Correlation]) -> bool {
    if existing.len() != desired.len() {
        return false;
    }
    let mut unmatched: Vec<&Correlation> = existing.iter().collect();
    desired.iter().all(|want| {
        match unmatched.iter().position(|have| have.same_link(want)) {
            Some(i) => {
                unmatched.swap_remove(i);
                true
            }
            None => false,
        }
    })
}

/// A data source declaration that passed validation.
struct Declared {
    path: PathBuf,
    spec: DatasourceSpec,
}

#[derive(Default)]
struct Validated {
    declared: Vec<Declared>,
    deletions: Vec<(PathBuf, DeleteDatasourceSpec)>,
    errors: Vec<FileError>,
}

pub struct DatasourceProvisioner {
    store: Arc<dyn DatasourceStore>,
    correlations: Arc<dyn CorrelationStore>,
    orgs: Arc<dyn OrgStore>,
    secrets: Arc<dyn SecretsService>,
    policy: AtomicityPolicy,
}

impl DatasourceProvisioner {
    pub fn new(services: &Services, policy: AtomicityPolicy) -> Self {
        Self {
            store: Arc::clone(&services.datasources),
            correlations: Arc::clone(&services.correlations),
            orgs: Arc::clone(&services.orgs),
            secrets: Arc::clone(&services.secrets),
            policy,
        }
    }

    /// Validate every file of `dir`.
    ///
    /// Returns the accepted files' declarations, deletions, and the file
    /// errors. A file is accepted or rejected as a whole.
    async fn validate_dir(&self, dir: &Path) -> Result<Validated, ReconcileError> {
        let contents = reader::read_yaml_dir::<DatasourcesFile>(dir);
        let mut out = Validated {
            errors: contents.errors,
            ..Validated::default()
        };
        let mut seen: HashSet<Key> = HashSet::new();
        let mut defaults: HashMap<OrgId, String> = HashMap::new();

        for file in contents.files {
            match self.validate_file(&file, &seen, &defaults).await? {
                Ok(()) => {
                    for spec in &file.body.datasources {
                        seen.insert((spec.org(), spec.name.clone()));
                        if spec.is_default {
                            defaults.insert(spec.org(), spec.name.clone());
                        }
                    }
                    out.deletions.extend(
                        file.body
                            .delete_datasources
                            .iter()
                            .map(|d| (file.path.clone(), d.clone())),
                    );
                    out.declared
                        .extend(file.body.datasources.into_iter().map(|spec| Declared {
                            path: file.path.clone(),
                            spec,
                        }));
                }
                Err(e) => out.errors.push(e),
            }
        }

        let unresolved = self.unresolved_targets(&out.declared).await?;
        if !unresolved.is_empty() {
            let rejected: HashSet<&Path> = unresolved.iter().map(|e| e.path.as_path()).collect();
            out.declared.retain(|d| !rejected.contains(d.path.as_path()));
            out.deletions.retain(|(path, _)| !rejected.contains(path.as_path()));
            out.errors.extend(unresolved);
        }
        Ok(out)
    }

    /// One error per file whose correlations point at a uid that is
    /// neither declared in this pass nor stored.
    async fn unresolved_targets(
        &self,
        declared: &[Declared],
    ) -> Result<Vec<FileError>, ReconcileError> {
        let declared_uids: HashSet<(OrgId, &str)> = declared
            .iter()
            .filter(|d| !d.spec.uid.is_empty())
            .map(|d| (d.spec.org(), d.spec.uid.as_str()))
            .collect();

        let mut errors: Vec<FileError> = Vec::new();
        for item in declared {
            if errors.iter().any(|e| e.path == item.path) {
                continue;
            }
            let org = item.spec.org();
            for link in &item.spec.correlations {
                if declared_uids.contains(&(org, link.target_uid.as_str())) {
                    continue;
                }
                if self.store.datasource_by_uid(org, &link.target_uid).await?.is_none() {
                    errors.push(FileError::new(
                        &item.path,
                        format!(
                            "correlation of data source '{}' targets uid '{}', which does not exist in org {org}",
                            item.spec.name, link.target_uid
                        ),
                    ));
                    break;
                }
            }
        }
        Ok(errors)
    }

    async fn validate_file(
        &self,
        file: &ConfigFile<DatasourcesFile>,
        seen: &HashSet<Key>,
        defaults: &HashMap<OrgId, String>,
    ) -> Result<Result<(), FileError>, ReconcileError> {
        let reject = |reason: String| Ok(Err(FileError::new(&file.path, reason)));
        let mut local_keys = HashSet::new();
        let mut local_defaults: HashMap<OrgId, &str> = HashMap::new();

        for spec in &file.body.datasources {
            if spec.name.is_empty() {
                return reject("data source name is required".into());
            }
            if spec.kind.is_empty() {
                return reject(format!("data source '{}' has no type", spec.name));
            }
            let org = spec.org();
            if !self.orgs.org_exists(org).await? {
                return reject(format!(
                    "data source '{}' references organisation {org}, which does not exist",
                    spec.name
                ));
            }
            let key = (org, spec.name.clone());
            if seen.contains(&key) || !local_keys.insert(key) {
                return reject(format!(
                    "data source '{}' is declared more than once in org {org}",
                    spec.name
                ));
            }
            if spec.is_default {
                let previous = defaults
                    .get(&org)
                    .map(String::as_str)
                    .or_else(|| local_defaults.get(&org).copied());
                if let Some(previous) = previous {
                    return reject(format!(
                        "only one data source per organisation can be marked as default \
                         (org {org}: '{previous}' and '{}')",
                        spec.name
                    ));
                }
                local_defaults.insert(org, &spec.name);
            }
            if spec.correlations.iter().any(|c| c.target_uid.is_empty()) {
                return reject(format!(
                    "correlation of data source '{}' has no targetUID",
                    spec.name
                ));
            }
        }

        for deletion in &file.body.delete_datasources {
            if deletion.name.is_empty() {
                return reject("deleteDatasources entry has no name".into());
            }
        }
        Ok(Ok(()))
    }

    /// Upsert one data source. Returns what happened and its stored uid.
    async fn apply_one(&self, declared: &Declared) -> Result<(Outcome, String), ReconcileError> {
        let spec = &declared.spec;
        let mut desired = spec.to_entity(&declared.path);
        let existing = self.store.datasource_by_name(desired.org_id, &desired.name).await?;

        desired.secure_json_data = reconcile::reconcile_secrets(
            self.secrets.as_ref(),
            existing.as_ref().map(|e| &e.secure_json_data),
            &spec.secure_json_data,
        )?;

        match existing {
            None => {
                debug!(name = %desired.name, org_id = desired.org_id, "inserting data source from configuration");
                let created = self.store.create_datasource(desired).await?;
                Ok((Outcome::Created, created.uid))
            }
            Some(existing) => {
                if desired.uid.is_empty() {
                    desired.uid.clone_from(&existing.uid);
                }
                if desired == existing {
                    Ok((Outcome::Unchanged, existing.uid))
                } else {
                    debug!(name = %desired.name, org_id = desired.org_id, "updating data source from configuration");
                    let updated = self.store.update_datasource(desired).await?;
                    Ok((Outcome::Updated, updated.uid))
                }
            }
        }
    }

    /// Replace the correlations of `source_uid` when they differ from
    /// `specs`. Returns `true` when anything was written.
    async fn sync_correlations(
        &self,
        org_id: OrgId,
        source_uid: &str,
        specs: &[CorrelationSpec],
    ) -> Result<bool, ReconcileError> {
        let desired: Vec<Correlation> = specs
            .iter()
            .map(|spec| spec.to_entity(org_id, source_uid))
            .collect();
        let existing = self
            .correlations
            .correlations_by_source(org_id, source_uid)
            .await?;
        if same_links(&existing, &desired) {
            return Ok(false);
        }

        let removed = self
            .correlations
            .delete_correlations_by_source(org_id, source_uid)
            .await?;
        let added = desired.len();
        for correlation in desired {
            self.correlations.create_correlation(correlation).await?;
        }
        debug!(source_uid, org_id, removed, added, "replaced data source correlations");
        Ok(true)
    }
}

#[async_trait]
impl ResourceProvisioner for DatasourceProvisioner {
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

        let declared_keys: HashSet<Key> = declared
            .iter()
            .map(|d| (d.spec.org(), d.spec.name.clone()))
            .collect();

        // Explicit deletions first. A name that is also declared stays.
        for (path, deletion) in &deletions {
            reconcile::ensure_live(cancel)?;
            let org = deletion.org_id.unwrap_or(DEFAULT_ORG_ID);
            if declared_keys.contains(&(org, deletion.name.clone())) {
                continue;
            }
            if self.store.delete_datasource(org, &deletion.name).await? {
                info!(name = %deletion.name, org_id = org, path = %path.display(), "deleted data source");
                pass.summary.deleted += 1;
            }
        }

        let mut applied = Vec::with_capacity(declared.len());
        for item in &declared {
            reconcile::ensure_live(cancel)?;
            applied.push(self.apply_one(item).await?);
        }

        // After every upsert, so targets declared further down exist.
        for (item, (outcome, uid)) in declared.iter().zip(applied) {
            reconcile::ensure_live(cancel)?;
            let relinked = self
                .sync_correlations(item.spec.org(), &uid, &item.spec.correlations)
                .await?;
            match outcome {
                Outcome::Created => pass.summary.created += 1,
                Outcome::Updated => pass.summary.updated += 1,
                Outcome::Unchanged if relinked => pass.summary.updated += 1,
                Outcome::Unchanged => pass.summary.unchanged += 1,
            }
        }

        if pass.may_prune() {
            for orphan in self.store.provisioned_datasources().await? {
                if declared_keys.contains(&(orphan.org_id, orphan.name.clone())) {
                    continue;
                }
                reconcile::ensure_live(cancel)?;
                if self.store.delete_datasource(orphan.org_id, &orphan.name).await? {
                    info!(name = %orphan.name, org_id = orphan.org_id, source = %orphan.provenance, "deleted orphaned data source");
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
