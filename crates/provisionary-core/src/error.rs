// ── Core error types ──
//
// Two layers: `ReconcileError` is what a single provisioner reports,
// `CoreError` is what the orchestrator hands to callers, tagged with the
// stage that failed. Callers can match on `Stage` or rely on the label
// text alone.

use std::fmt;

use thiserror::Error;

use provisionary_store::StoreError;

use crate::reader::FileError;
use crate::reconcile::ReconcileSummary;

// ── Stage ───────────────────────────────────────────────────────────

/// A top-level provisioning step of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Datasources,
    Plugins,
    Notifiers,
    AlertRules,
    /// Building a new dashboard provisioner from configuration.
    DashboardBuild,
    /// Provisioning dashboards with a freshly built provisioner.
    Dashboards,
}

impl Stage {
    /// Stable label prefixed to every error of this stage.
    pub fn label(self) -> &'static str {
        match self {
            Self::Datasources => "Datasource provisioning error",
            Self::Plugins => "app provisioning error",
            Self::Notifiers => "Alert notification provisioning error",
            Self::AlertRules => "Alert rules provisioning error",
            Self::DashboardBuild => "Failed to create provisioner",
            Self::Dashboards => "Failed to provision dashboards",
        }
    }

    /// Subdirectory of the provisioning path read by this stage.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Datasources => "datasources",
            Self::Plugins => "plugins",
            Self::Notifiers => "notifiers",
            Self::AlertRules => "alerting",
            Self::DashboardBuild | Self::Dashboards => "dashboards",
        }
    }

    pub(crate) fn failure_message(self) -> &'static str {
        match self {
            Self::Datasources => "Failed to provision data sources",
            Self::Plugins => "Failed to provision plugins",
            Self::Notifiers => "Failed to provision alert notifications",
            Self::AlertRules => "Failed to provision alert rules",
            Self::DashboardBuild => "Failed to create dashboard provisioner",
            Self::Dashboards => "Failed to provision dashboards",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())?;
        if *self == Self::DashboardBuild {
            f.write_str(" (build)")?;
        }
        Ok(())
    }
}

// ── ReconcileError ──────────────────────────────────────────────────

/// Failure of one reconciliation pass over one directory.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// One or more configuration files are malformed or invalid.
    ///
    /// `applied` holds what was written anyway under the best-effort policy.
    #[error("{}", describe_files(.errors))]
    Files {
        errors: Vec<FileError>,
        applied: ReconcileSummary,
    },

    /// The backing store rejected or failed an operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The caller's cancellation token fired mid-pass.
    #[error("reconciliation cancelled")]
    Cancelled,
}

impl ReconcileError {
    pub fn files(errors: Vec<FileError>) -> Self {
        Self::Files {
            errors,
            applied: ReconcileSummary::default(),
        }
    }

    /// File errors carried by this error, if any.
    pub fn file_errors(&self) -> &[FileError] {
        match self {
            Self::Files { errors, .. } => errors,
            _ => &[],
        }
    }
}

fn describe_files(errors: &[FileError]) -> String {
    match errors {
        [single] => single.to_string(),
        many => {
            let joined: Vec<String> = many.iter().map(ToString::to_string).collect();
            format!("{} invalid files: {}", many.len(), joined.join("; "))
        }
    }
}

// ── CoreError ───────────────────────────────────────────────────────

/// Error returned by the orchestrator's public operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{label}: {source}", label = .stage.label())]
    Stage {
        stage: Stage,
        #[source]
        source: ReconcileError,
    },

    /// The parent cancellation token ended the operation.
    #[error("provisioning cancelled")]
    Cancelled,
}

impl CoreError {
    pub fn stage(stage: Stage, source: ReconcileError) -> Self {
        match source {
            ReconcileError::Cancelled => Self::Cancelled,
            source => Self::Stage { stage, source },
        }
    }

    /// The failing stage, `None` for cancellation.
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            Self::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_is_prefixed_with_label() {
        let err = CoreError::stage(
            Stage::Datasources,
            ReconcileError::files(vec![FileError::new("/p/ds.yaml", "name is required")]),
        );
        assert_eq!(
            err.to_string(),
            "Datasource provisioning error: /p/ds.yaml: name is required"
        );
        assert_eq!(err.failed_stage(), Some(Stage::Datasources));
    }

    #[test]
    fn cancellation_is_not_wrapped() {
        let err = CoreError::stage(Stage::Plugins, ReconcileError::Cancelled);
        assert!(err.is_cancelled());
        assert_eq!(err.failed_stage(), None);
    }

    #[test]
    fn multiple_file_errors_are_counted() {
        let err = ReconcileError::files(vec![
            FileError::new("/a.yaml", "bad"),
            FileError::new("/b.yaml", "worse"),
        ]);
        assert_eq!(err.to_string(), "2 invalid files: /a.yaml: bad; /b.yaml: worse");
        assert_eq!(err.file_errors().len(), 2);
    }

    #[test]
    fn store_errors_pass_through() {
        let err = CoreError::stage(
            Stage::AlertRules,
            ReconcileError::Store(StoreError::Unavailable("down".into())),
        );
        assert_eq!(
            err.to_string(),
            "Alert rules provisioning error: store unavailable: down"
        );
    }
}
