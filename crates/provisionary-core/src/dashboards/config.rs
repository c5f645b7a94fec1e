// ── Dashboard provider configuration ──

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use provisionary_store::{DEFAULT_ORG_ID, OrgId};

use crate::error::ReconcileError;
use crate::reader::{self, FileError};

const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardProvidersFile {
    #[serde(default)]
    pub api_version: i64,
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "org_id")]
    pub org_id: Option<OrgId>,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub folder_uid: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub disable_deletion: bool,
    #[serde(default)]
    pub update_interval_seconds: Option<u64>,
    #[serde(default)]
    pub allow_ui_updates: bool,
    #[serde(default)]
    pub options: ProviderOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderOptions {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub folders_from_files_structure: bool,
}

/// A validated dashboard provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub name: String,
    pub org_id: OrgId,
    /// Empty places dashboards in the General folder.
    pub folder: String,
    pub folder_uid: Option<String>,
    pub disable_deletion: bool,
    /// Zero disables polling.
    pub update_interval: Duration,
    pub allow_ui_updates: bool,
    pub path: PathBuf,
    pub folders_from_files_structure: bool,
}

impl ProviderSpec {
    fn validate(self) -> Result<ProviderConfig, String> {
        if self.name.is_empty() {
            return Err("dashboard provider name is required".into());
        }
        if !self.kind.is_empty() && self.kind != "file" {
            return Err(format!(
                "dashboard provider '{}' has unsupported type '{}'",
                self.name, self.kind
            ));
        }
        if self.options.path.is_empty() {
            return Err(format!("dashboard provider '{}' has no options.path", self.name));
        }
        if self.options.folders_from_files_structure
            && (!self.folder.is_empty() || !self.folder_uid.is_empty())
        {
            return Err(format!(
                "dashboard provider '{}': 'folder' and 'folderUid' must be empty with 'foldersFromFilesStructure'",
                self.name
            ));
        }

        Ok(ProviderConfig {
            name: self.name,
            org_id: self.org_id.unwrap_or(DEFAULT_ORG_ID),
            folder: self.folder,
            folder_uid: Some(self.folder_uid).filter(|uid| !uid.is_empty()),
            disable_deletion: self.disable_deletion,
            update_interval: Duration::from_secs(
                self.update_interval_seconds
                    .unwrap_or(DEFAULT_UPDATE_INTERVAL_SECS),
            ),
            allow_ui_updates: self.allow_ui_updates,
            path: PathBuf::from(self.options.path),
            folders_from_files_structure: self.options.folders_from_files_structure,
        })
    }
}

/// Read every provider declared in `dir`.
///
/// Any broken file fails the whole read: a provisioner is never built from
/// a partial provider set.
pub fn read_providers(dir: &Path) -> Result<Vec<ProviderConfig>, ReconcileError> {
    let contents = reader::read_yaml_dir::<DashboardProvidersFile>(dir);
    let mut errors = contents.errors;
    let mut providers = Vec::new();
    let mut names = HashSet::new();

    for file in contents.files {
        for spec in file.body.providers {
            match spec.validate() {
                Ok(cfg) if !names.insert(cfg.name.clone()) => errors.push(FileError::new(
                    &file.path,
                    format!("dashboard provider name '{}' is used more than once", cfg.name),
                )),
                Ok(cfg) => providers.push(cfg),
                Err(reason) => errors.push(FileError::new(&file.path, reason)),
            }
        }
    }

    if errors.is_empty() {
        Ok(providers)
    } else {
        Err(ReconcileError::files(errors))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.yaml"),
            "apiVersion: 1\nproviders:\n  - name: default\n    options:\n      path: /var/dashboards\n",
        )
        .unwrap();

        let providers = read_providers(dir.path()).unwrap();
        assert_eq!(
            providers,
            vec![ProviderConfig {
                name: "default".into(),
                org_id: 1,
                folder: String::new(),
                folder_uid: None,
                disable_deletion: false,
                update_interval: Duration::from_secs(10),
                allow_ui_updates: false,
                path: PathBuf::from("/var/dashboards"),
                folders_from_files_structure: false,
            }]
        );
    }

    #[test]
    fn duplicate_names_and_missing_path_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.yaml"),
            "providers:\n  - name: p\n    options: { path: /a }\n  - name: p\n    options: { path: /b }\n  - name: q\n",
        )
        .unwrap();

        let err = read_providers(dir.path()).unwrap_err();
        let reasons: Vec<_> = err.file_errors().iter().map(|e| e.reason.as_str()).collect();
        assert_eq!(reasons.len(), 2);
        assert!(reasons[0].contains("more than once"));
        assert!(reasons[1].contains("no options.path"));
    }

    #[test]
    fn file_structure_folders_conflict_with_fixed_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.yaml"),
            "providers:\n  - name: p\n    folder: Ops\n    options:\n      path: /a\n      foldersFromFilesStructure: true\n",
        )
        .unwrap();
        assert!(read_providers(dir.path()).is_err());
    }
}
