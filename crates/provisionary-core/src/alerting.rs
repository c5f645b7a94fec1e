//! Alert rule groups from `alerting/*.yaml`.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use provisionary_store::{
    AlertRule, AlertRuleStore, DEFAULT_ORG_ID, DashboardStore, OrgId, OrgStore, Provenance,
    QuotaScope, QuotaService, StoreError,
};

use crate::config::{AlertingDefaults, AtomicityPolicy};
use crate::error::ReconcileError;
use crate::reader::{self, CheckReport, ConfigFile, FileError};
use crate::reconcile::{self, Pass, ReconcileSummary, ResourceProvisioner};
use crate::services::Services;

const NO_DATA_STATES: &[&str] = &["NoData", "Alerting", "OK"];
const EXEC_ERR_STATES: &[&str] = &["Alerting", "Error", "OK"];

// ── File format ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRulesFile {
    #[serde(default)]
    pub api_version: i64,
    #[serde(default)]
    pub groups: Vec<RuleGroupSpec>,
    #[serde(default)]
    pub delete_rules: Vec<DeleteRuleSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleGroupSpec {
    #[serde(default, alias = "org_id")]
    pub org_id: Option<OrgId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub no_data_state: Option<String>,
    #[serde(default)]
    pub exec_err_state: Option<String>,
    #[serde(default, rename = "for")]
    pub pending: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub is_paused: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRuleSpec {
    #[serde(default, alias = "org_id")]
    pub org_id: Option<OrgId>,
    #[serde(default)]
    pub uid: String,
}

// ── Validation ──────────────────────────────────────────────────────

/// A rule ready to be written, minus its folder uid.
#[derive(Debug, Clone)]
struct PlannedRule {
    org_id: OrgId,
    folder_title: String,
    rule: AlertRule,
}

fn parse_duration(what: &str, raw: &str) -> Result<Duration, String> {
    humantime::parse_duration(raw).map_err(|e| format!("invalid {what} '{raw}': {e}"))
}

fn group_interval(group: &RuleGroupSpec, defaults: AlertingDefaults) -> Result<u64, String> {
    let interval = match group.interval.as_deref() {
        None | Some("") => defaults.default_interval,
        Some(raw) => parse_duration("interval", raw)?,
    };
    let base = defaults.base_interval.as_secs().max(1);
    let secs = interval.as_secs();
    if secs == 0 || secs % base != 0 {
        return Err(format!(
            "rule group '{}' interval {}s must be a positive multiple of {base}s",
            group.name, secs
        ));
    }
    Ok(secs)
}

fn plan_group(
    group: &RuleGroupSpec,
    path: &Path,
    defaults: AlertingDefaults,
) -> Result<Vec<PlannedRule>, String> {
    if group.name.is_empty() {
        return Err("rule group name is required".into());
    }
    if group.folder.is_empty() {
        return Err(format!("rule group '{}' has no folder", group.name));
    }
    let interval_secs = group_interval(group, defaults)?;
    let org_id = group.org_id.unwrap_or(DEFAULT_ORG_ID);

    group
        .rules
        .iter()
        .map(|spec| {
            if spec.uid.is_empty() {
                return Err(format!("rule in group '{}' has no uid", group.name));
            }
            if spec.title.is_empty() {
                return Err(format!("rule '{}' has no title", spec.uid));
            }
            if spec.condition.is_empty() {
                return Err(format!("rule '{}' has no condition", spec.uid));
            }
            let data = match &spec.data {
                Some(serde_json::Value::Array(items)) if !items.is_empty() => {
                    serde_json::Value::Array(items.clone())
                }
                _ => return Err(format!("rule '{}' has no data queries", spec.uid)),
            };
            let no_data_state = spec.no_data_state.clone().unwrap_or_else(|| "NoData".into());
            if !NO_DATA_STATES.contains(&no_data_state.as_str()) {
                return Err(format!(
                    "rule '{}' has unknown noDataState '{no_data_state}'",
                    spec.uid
                ));
            }
            let exec_err_state = spec
                .exec_err_state
                .clone()
                .unwrap_or_else(|| "Alerting".into());
            if !EXEC_ERR_STATES.contains(&exec_err_state.as_str()) {
                return Err(format!(
                    "rule '{}' has unknown execErrState '{exec_err_state}'",
                    spec.uid
                ));
            }
            let for_secs = match spec.pending.as_deref() {
                None | Some("") => 0,
                Some(raw) => parse_duration("for", raw)?.as_secs(),
            };

            Ok(PlannedRule {
                org_id,
                folder_title: group.folder.clone(),
                rule: AlertRule {
                    uid: spec.uid.clone(),
                    org_id,
                    title: spec.title.clone(),
                    folder_uid: String::new(),
                    rule_group: group.name.clone(),
                    interval_secs,
                    condition: spec.condition.clone(),
                    data,
                    no_data_state,
                    exec_err_state,
                    for_secs,
                    annotations: spec.annotations.clone(),
                    labels: spec.labels.clone(),
                    is_paused: spec.is_paused,
                    provenance: Provenance::file(path),
                },
            })
        })
        .collect()
}

// ── Provisioner ─────────────────────────────────────────────────────

#[derive(Default)]
struct Validated {
    planned: Vec<PlannedRule>,
    deletions: Vec<(OrgId, String)>,
    errors: Vec<FileError>,
}

pub struct AlertRuleProvisioner {
    store: Arc<dyn AlertRuleStore>,
    folders: Arc<dyn DashboardStore>,
    orgs: Arc<dyn OrgStore>,
    quota: Arc<dyn QuotaService>,
    defaults: AlertingDefaults,
    policy: AtomicityPolicy,
}

impl AlertRuleProvisioner {
    pub fn new(services: &Services, defaults: AlertingDefaults, policy: AtomicityPolicy) -> Self {
        Self {
            store: Arc::clone(&services.alert_rules),
            folders: Arc::clone(&services.dashboards),
            orgs: Arc::clone(&services.orgs),
            quota: Arc::clone(&services.quota),
            defaults,
            policy,
        }
    }

    async fn validate_dir(&self, dir: &Path) -> Result<Validated, ReconcileError> {
        let contents = reader::read_yaml_dir::<AlertRulesFile>(dir);
        let mut out = Validated {
            errors: contents.errors,
            ..Validated::default()
        };
        let mut seen: HashSet<(OrgId, String)> = HashSet::new();

        for file in contents.files {
            match self.validate_file(&file, &seen).await? {
                Ok(planned) => {
                    seen.extend(planned.iter().map(|p| (p.org_id, p.rule.uid.clone())));
                    out.planned.extend(planned);
                    out.deletions.extend(
                        file.body
                            .delete_rules
                            .iter()
                            .map(|d| (d.org_id.unwrap_or(DEFAULT_ORG_ID), d.uid.clone())),
                    );
                }
                Err(e) => out.errors.push(e),
            }
        }
        Ok(out)
    }

    async fn validate_file(
        &self,
        file: &ConfigFile<AlertRulesFile>,
        seen: &HashSet<(OrgId, String)>,
    ) -> Result<Result<Vec<PlannedRule>, FileError>, ReconcileError> {
        let mut planned = Vec::new();
        let mut local = HashSet::new();

        for group in &file.body.groups {
            let rules = match plan_group(group, &file.path, self.defaults) {
                Ok(rules) => rules,
                Err(reason) => return Ok(Err(FileError::new(&file.path, reason))),
            };
            let org = group.org_id.unwrap_or(DEFAULT_ORG_ID);
            if !self.orgs.org_exists(org).await? {
                return Ok(Err(FileError::new(
                    &file.path,
                    format!("rule group '{}' references organisation {org}, which does not exist", group.name),
                )));
            }
            for p in &rules {
                let key = (p.org_id, p.rule.uid.clone());
                if seen.contains(&key) || !local.insert(key) {
                    return Ok(Err(FileError::new(
                        &file.path,
                        format!("rule uid '{}' is used more than once in org {org}", p.rule.uid),
                    )));
                }
            }
            planned.extend(rules);
        }

        if file.body.delete_rules.iter().any(|d| d.uid.is_empty()) {
            return Ok(Err(FileError::new(&file.path, "deleteRules entry has no uid")));
        }
        Ok(Ok(planned))
    }

    async fn apply_one(&self, planned: &PlannedRule, pass: &mut Pass) -> Result<(), ReconcileError> {
        let folder = self
            .folders
            .ensure_folder(planned.org_id, &planned.folder_title, None)
            .await?;
        let mut desired = planned.rule.clone();
        desired.folder_uid = folder.uid;

        match self.store.alert_rule_by_uid(desired.org_id, &desired.uid).await? {
            None => {
                if self
                    .quota
                    .quota_reached(QuotaScope::AlertRules, desired.org_id)
                    .await?
                {
                    return Err(StoreError::QuotaReached {
                        scope: QuotaScope::AlertRules.to_string(),
                        org_id: desired.org_id,
                    }
                    .into());
                }
                debug!(uid = %desired.uid, group = %desired.rule_group, "creating alert rule");
                self.store.create_alert_rule(desired).await?;
                pass.summary.created += 1;
            }
            Some(existing) if existing == desired => pass.summary.unchanged += 1,
            Some(_) => {
                debug!(uid = %desired.uid, group = %desired.rule_group, "updating alert rule");
                self.store.update_alert_rule(desired).await?;
                pass.summary.updated += 1;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceProvisioner for AlertRuleProvisioner {
    async fn provision(
        &self,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, ReconcileError> {
        let Validated {
            planned,
            deletions,
            errors,
        } = self.validate_dir(dir).await?;
        let mut pass = Pass::new(self.policy, errors);
        pass.admit()?;

        let declared: HashSet<(OrgId, String)> = planned
            .iter()
            .map(|p| (p.org_id, p.rule.uid.clone()))
            .collect();

        for target in &deletions {
            reconcile::ensure_live(cancel)?;
            if declared.contains(target) {
                continue;
            }
            if self.store.delete_alert_rule(target.0, &target.1).await? {
                info!(uid = %target.1, org_id = target.0, "deleted alert rule");
                pass.summary.deleted += 1;
            }
        }

        for item in &planned {
            reconcile::ensure_live(cancel)?;
            self.apply_one(item, &mut pass).await?;
        }

        if pass.may_prune() {
            for orphan in self.store.provisioned_alert_rules().await? {
                if declared.contains(&(orphan.org_id, orphan.uid.clone())) {
                    continue;
                }
                reconcile::ensure_live(cancel)?;
                if self.store.delete_alert_rule(orphan.org_id, &orphan.uid).await? {
                    info!(uid = %orphan.uid, org_id = orphan.org_id, source = %orphan.provenance, "deleted orphaned alert rule");
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use provisionary_store::{LocalSecrets, MemoryStore, ReindexCounter, StaticPluginRegistry};

    use super::*;

    const GROUP: &str = r#"
apiVersion: 1
groups:
  - orgId: 1
    name: cpu
    folder: Infra
    interval: 1m
    rules:
      - uid: cpu-high
        title: CPU high
        condition: B
        for: 5m
        data:
          - refId: A
            model: { expr: "avg(rate(cpu[$__rate_interval]))" }
        labels:
          team: infra
"#;

    fn setup(store: MemoryStore) -> (Arc<MemoryStore>, AlertRuleProvisioner) {
        let store = Arc::new(store);
        let services = Services::from_memory(
            &store,
            Arc::new(LocalSecrets::new("test")),
            Arc::new(StaticPluginRegistry::default()),
            Arc::new(ReindexCounter::default()),
        );
        let prov = AlertRuleProvisioner::new(
            &services,
            AlertingDefaults::default(),
            AtomicityPolicy::AllOrNothing,
        );
        (store, prov)
    }

    #[test]
    fn interval_must_be_multiple_of_base() {
        let defaults = AlertingDefaults::default();
        let mut group = RuleGroupSpec {
            name: "g".into(),
            ..RuleGroupSpec::default()
        };
        assert_eq!(group_interval(&group, defaults), Ok(60));
        group.interval = Some("15s".into());
        assert!(group_interval(&group, defaults).is_err());
        group.interval = Some("0s".into());
        assert!(group_interval(&group, defaults).is_err());
        group.interval = Some("2m".into());
        assert_eq!(group_interval(&group, defaults), Ok(120));
    }

    #[tokio::test]
    async fn creates_rule_in_ensured_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cpu.yaml"), GROUP).unwrap();
        let (store, prov) = setup(MemoryStore::new());
        let cancel = CancellationToken::new();

        let summary = prov.provision(dir.path(), &cancel).await.unwrap();
        assert_eq!(summary.created, 1);

        let rule = &store.alert_rules()[0];
        let folder = &store.folders()[0];
        assert_eq!(folder.title, "Infra");
        assert_eq!(rule.folder_uid, folder.uid);
        assert_eq!(rule.for_secs, 300);
        assert_eq!(rule.no_data_state, "NoData");
        assert_eq!(
            rule.data[0]["model"]["expr"],
            "avg(rate(cpu[$__rate_interval]))"
        );

        let again = prov.provision(dir.path(), &cancel).await.unwrap();
        assert_eq!(again.mutations(), 0);
    }

    #[tokio::test]
    async fn quota_blocks_new_rules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cpu.yaml"), GROUP).unwrap();
        let (store, prov) = setup(MemoryStore::new().with_quota(QuotaScope::AlertRules, 0));

        let err = prov
            .provision(dir.path(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Store(StoreError::QuotaReached { .. })
        ));
        assert!(store.alert_rules().is_empty());
    }

    #[tokio::test]
    async fn rule_without_data_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("bad.yaml"),
            "groups:\n  - name: g\n    folder: F\n    rules:\n      - uid: r\n        title: R\n        condition: A\n",
        )
        .unwrap();
        let (_, prov) = setup(MemoryStore::new());
        let report = prov.check(dir.path()).await;
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].reason.contains("no data queries"));
    }
}
