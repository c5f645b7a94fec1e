//! CLI error types with miette diagnostics.
//!
//! Maps engine, store and configuration errors into user-facing errors
//! with actionable help text and stable exit codes.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use provisionary_config::ConfigError;
use provisionary_core::{CoreError, Stage};
use provisionary_store::StoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const INVALID_FILES: i32 = 3;
    pub const STORE: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const INTERRUPTED: i32 = 130;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────

    #[error("Configuration error")]
    #[diagnostic(
        code(provisionary::config),
        help("Inspect the resolved configuration with: provisionary config show")
    )]
    Config(#[from] ConfigError),

    #[error("{} already exists", path.display())]
    #[diagnostic(
        code(provisionary::conflict),
        help("Pass --force to overwrite it.")
    )]
    AlreadyExists { path: PathBuf },

    // ── Provisioning ─────────────────────────────────────────────────

    #[error("{source}")]
    #[diagnostic(
        code(provisionary::provisioning),
        help("Validate the files without applying them: provisionary check")
    )]
    Provisioning {
        stage: Stage,
        #[source]
        source: CoreError,
    },

    #[error("{count} provisioning file(s) failed validation")]
    #[diagnostic(code(provisionary::check_failed))]
    CheckFailed { count: usize },

    #[error("Interrupted")]
    #[diagnostic(code(provisionary::interrupted))]
    Interrupted,

    // ── Store ────────────────────────────────────────────────────────

    #[error("Store error")]
    #[diagnostic(
        code(provisionary::store),
        help("Check the state file configured as paths.state.")
    )]
    Store(#[from] StoreError),

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    #[diagnostic(code(provisionary::render))]
    Render(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(ConfigError::Validation { .. }) => exit_code::USAGE,
            Self::AlreadyExists { .. } => exit_code::CONFLICT,
            Self::CheckFailed { .. }
            | Self::Provisioning {
                stage: Stage::DashboardBuild,
                ..
            } => exit_code::INVALID_FILES,
            Self::Store(_) => exit_code::STORE,
            Self::Interrupted => exit_code::INTERRUPTED,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err.failed_stage() {
            Some(stage) => Self::Provisioning { stage, source: err },
            None => Self::Interrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use provisionary_core::{FileError, ReconcileError};

    use super::*;

    #[test]
    fn exit_codes_follow_error_kind() {
        let build = CoreError::stage(
            Stage::DashboardBuild,
            ReconcileError::files(vec![FileError::new("dashboards/a.yaml", "name is required")]),
        );
        assert_eq!(CliError::from(build).exit_code(), exit_code::INVALID_FILES);

        let stage = CoreError::stage(Stage::Notifiers, ReconcileError::Cancelled);
        assert_eq!(CliError::from(stage).exit_code(), exit_code::INTERRUPTED);

        let store = CoreError::stage(Stage::Datasources, StoreError::Unavailable("down".into()).into());
        let err = CliError::from(store);
        assert_eq!(err.exit_code(), exit_code::GENERAL);
        assert!(err.to_string().starts_with("Datasource provisioning error: "));

        assert_eq!(CliError::CheckFailed { count: 2 }.exit_code(), exit_code::INVALID_FILES);
    }
}
