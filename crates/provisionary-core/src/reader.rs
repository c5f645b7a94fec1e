// ── Provisioning file reader ──
//
// Every resource kind reads its configuration the same way: the `*.yaml`
// and `*.yml` files directly inside one directory, sorted by name, with
// `$VAR` / `${VAR}` references expanded before decoding.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, trace};

/// A configuration problem tied to the file that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {reason}", .path.display())]
pub struct FileError {
    pub path: PathBuf,
    pub reason: String,
}

impl FileError {
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// One decoded provisioning file.
#[derive(Debug, Clone)]
pub struct ConfigFile<T> {
    pub path: PathBuf,
    pub body: T,
}

/// Decoded files of a directory plus the ones that failed to decode.
#[derive(Debug)]
pub struct DirContents<T> {
    pub files: Vec<ConfigFile<T>>,
    pub errors: Vec<FileError>,
}

impl<T> Default for DirContents<T> {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Result of validating a directory without applying it.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    /// Every configuration file that was looked at.
    pub files: Vec<PathBuf>,
    pub errors: Vec<FileError>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Problems reported for `path`.
    pub fn problems_for<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = &'a str> + 'a {
        self.errors
            .iter()
            .filter(move |e| e.path == path)
            .map(|e| e.reason.as_str())
    }
}

// ── Directory listing ───────────────────────────────────────────────

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

/// YAML files directly inside `dir`, sorted. A missing directory is empty.
pub fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>, FileError> {
    if !dir.exists() {
        debug!(path = %dir.display(), "provisioning directory does not exist");
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(dir)
        .map_err(|e| FileError::new(dir, format!("cannot read directory: {e}")))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| FileError::new(dir, format!("cannot read directory: {e}")))?
            .path();
        if path.is_file() && is_yaml(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

// ── Environment expansion ───────────────────────────────────────────

/// Expand `$VAR` and `${VAR}` from the process environment.
///
/// Unknown variables are left untouched.
pub fn expand_env(raw: &str) -> Cow<'_, str> {
    expand_env_with(raw, |name| std::env::var(name).ok())
}

/// Like [`expand_env`], resolving names through `lookup`.
pub fn expand_env_with<F>(raw: &str, lookup: F) -> Cow<'_, str>
where
    F: FnMut(&str) -> Option<String>,
{
    shellexpand::env_with_context_no_errors(raw, lookup)
}

// ── Decoding ────────────────────────────────────────────────────────

/// Decode one YAML document. Files holding only whitespace or comments
/// yield `Ok(None)`.
pub fn decode_yaml<T, F>(path: &Path, raw: &str, lookup: F) -> Result<Option<T>, FileError>
where
    T: DeserializeOwned,
    F: FnMut(&str) -> Option<String>,
{
    let expanded = expand_env_with(raw, lookup);
    let value: serde_yaml::Value = serde_yaml::from_str(&expanded)
        .map_err(|e| FileError::new(path, format!("invalid YAML: {e}")))?;
    if value.is_null() {
        return Ok(None);
    }
    serde_yaml::from_value(value)
        .map(Some)
        .map_err(|e| FileError::new(path, format!("invalid configuration: {e}")))
}

/// Read and decode every YAML file in `dir`.
///
/// Files that cannot be read or decoded are reported in
/// [`DirContents::errors`]; the rest are returned in name order.
pub fn read_yaml_dir<T: DeserializeOwned>(dir: &Path) -> DirContents<T> {
    let mut contents = DirContents::default();
    let paths = match yaml_files(dir) {
        Ok(paths) => paths,
        Err(e) => {
            contents.errors.push(e);
            return contents;
        }
    };

    for path in paths {
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                contents
                    .errors
                    .push(FileError::new(&path, format!("cannot read file: {e}")));
                continue;
            }
        };
        match decode_yaml::<T, _>(&path, &raw, |name| std::env::var(name).ok()) {
            Ok(Some(body)) => contents.files.push(ConfigFile { path, body }),
            Ok(None) => trace!(path = %path.display(), "skipping empty provisioning file"),
            Err(e) => contents.errors.push(e),
        }
    }
    contents
}
