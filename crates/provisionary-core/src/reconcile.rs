// ── Shared reconciliation machinery ──
//
// The pieces every resource provisioner shares: the trait the orchestrator
// calls, the per-pass bookkeeping that enforces the atomicity policy, and
// secure-value handling.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use provisionary_store::{SecretsService, StoreError};

use crate::config::AtomicityPolicy;
use crate::error::ReconcileError;
use crate::reader::{self, CheckReport, FileError};

/// Store mutations performed by one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl ReconcileSummary {
    /// Number of store writes.
    pub fn mutations(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    pub fn merge(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.unchanged += other.unchanged;
    }
}

impl fmt::Display for ReconcileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deleted, {} unchanged",
            self.created, self.updated, self.deleted, self.unchanged
        )
    }
}

/// Converges one resource kind to the files of one directory.
///
/// Implementations hold no state between calls.
#[async_trait]
pub trait ResourceProvisioner: Send + Sync {
    async fn provision(
        &self,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, ReconcileError>;

    /// Decode and validate `dir` without writing anything.
    async fn check(&self, dir: &Path) -> CheckReport {
        match reader::yaml_files(dir) {
            Ok(files) => CheckReport {
                files,
                errors: Vec::new(),
            },
            Err(e) => CheckReport {
                files: Vec::new(),
                errors: vec![e],
            },
        }
    }
}

// ── Pass bookkeeping ────────────────────────────────────────────────

/// State of one reconciliation pass.
pub(crate) struct Pass {
    policy: AtomicityPolicy,
    errors: Vec<FileError>,
    pub(crate) summary: ReconcileSummary,
}

impl Pass {
    pub(crate) fn new(policy: AtomicityPolicy, errors: Vec<FileError>) -> Self {
        Self {
            policy,
            errors,
            summary: ReconcileSummary::default(),
        }
    }

    pub(crate) fn reject(&mut self, error: FileError) {
        self.errors.push(error);
    }

    /// Gate before the first write. Fails under all-or-nothing when any
    /// file was rejected.
    pub(crate) fn admit(&mut self) -> Result<(), ReconcileError> {
        if self.policy == AtomicityPolicy::AllOrNothing && !self.errors.is_empty() {
            return Err(ReconcileError::files(std::mem::take(&mut self.errors)));
        }
        Ok(())
    }

    /// Orphans may only be pruned when every file was accepted.
    pub(crate) fn may_prune(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn finish(self) -> Result<ReconcileSummary, ReconcileError> {
        if self.errors.is_empty() {
            Ok(self.summary)
        } else {
            Err(ReconcileError::Files {
                errors: self.errors,
                applied: self.summary,
            })
        }
    }
}

pub(crate) fn ensure_live(cancel: &CancellationToken) -> Result<(), ReconcileError> {
    if cancel.is_cancelled() {
        Err(ReconcileError::Cancelled)
    } else {
        Ok(())
    }
}

// ── Secure values ───────────────────────────────────────────────────

pub(crate) fn encrypt_all(
    secrets: &dyn SecretsService,
    plain: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, StoreError> {
    plain
        .iter()
        .map(|(k, v)| Ok((k.clone(), secrets.encrypt(v)?)))
        .collect()
}

/// Whether `stored` ciphertexts decrypt to exactly `declared`.
///
/// Undecryptable values count as different so they get rewritten.
pub(crate) fn secrets_match(
    secrets: &dyn SecretsService,
    stored: &BTreeMap<String, String>,
    declared: &BTreeMap<String, String>,
) -> bool {
    stored.len() == declared.len()
        && declared.iter().all(|(k, plain)| {
            stored
                .get(k)
                .and_then(|ct| secrets.decrypt(ct).ok())
                .is_some_and(|decrypted| &decrypted == plain)
        })
}

/// Ciphertexts to store for `declared`, reusing `existing` when they
/// already decrypt to the declared values.
pub(crate) fn reconcile_secrets(
    secrets: &dyn SecretsService,
    existing: Option<&BTreeMap<String, String>>,
    declared: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, StoreError> {
    match existing {
        Some(stored) if secrets_match(secrets, stored, declared) => Ok(stored.clone()),
        _ => encrypt_all(secrets, declared),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use provisionary_store::LocalSecrets;

    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).into(), (*v).into())).collect()
    }

    #[test]
    fn all_or_nothing_gate_rejects_on_any_error() {
        let mut pass = Pass::new(
            AtomicityPolicy::AllOrNothing,
            vec![FileError::new("/a.yaml", "bad")],
        );
        assert!(matches!(pass.admit(), Err(ReconcileError::Files { .. })));
    }

    #[test]
    fn best_effort_admits_but_reports_at_finish() {
        let mut pass = Pass::new(AtomicityPolicy::BestEffort, Vec::new());
        pass.reject(FileError::new("/a.yaml", "bad"));
        assert!(pass.admit().is_ok());
        assert!(!pass.may_prune());
        pass.summary.created = 2;
        match pass.finish() {
            Err(ReconcileError::Files { errors, applied }) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(applied.created, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn secrets_are_reused_when_unchanged() {
        let secrets = LocalSecrets::new("k");
        let declared = map(&[("password", "hunter2")]);
        let stored = encrypt_all(&secrets, &declared).unwrap();

        assert!(secrets_match(&secrets, &stored, &declared));
        assert!(!secrets_match(&secrets, &stored, &map(&[("password", "other")])));
        assert!(!secrets_match(&secrets, &map(&[("password", "plain")]), &declared));

        let next = reconcile_secrets(&secrets, Some(&stored), &declared).unwrap();
        assert_eq!(next, stored);
    }

    #[test]
    fn summary_counts_mutations() {
        let mut s = ReconcileSummary {
            created: 1,
            unchanged: 4,
            ..ReconcileSummary::default()
        };
        s.merge(ReconcileSummary {
            deleted: 2,
            ..ReconcileSummary::default()
        });
        assert_eq!(s.mutations(), 3);
        assert_eq!(s.to_string(), "1 created, 0 updated, 2 deleted, 4 unchanged");
    }
}
