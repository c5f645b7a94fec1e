// ── Local service implementations ──

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::model::{PluginKind, PluginMeta};
use crate::services::{PluginRegistry, SearchIndexer, SecretsService};

const CIPHERTEXT_PREFIX: &str = "enc1:";

// ── Secrets ─────────────────────────────────────────────────────────

/// SHA-256 keystream cipher for secure settings kept in a local state file.
///
/// Deterministic: equal plaintexts produce equal ciphertexts under one key.
pub struct LocalSecrets {
    key: [u8; 32],
}

impl LocalSecrets {
    pub fn new(secret_key: &str) -> Self {
        let mut key = [0u8; 32];
        key.copy_from_slice(&Sha256::digest(secret_key.as_bytes()));
        Self { key }
    }

    fn apply_keystream(&self, data: &mut [u8]) {
        for (block_idx, chunk) in data.chunks_mut(32).enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(self.key);
            hasher.update((block_idx as u64).to_le_bytes());
            let block = hasher.finalize();
            for (byte, k) in chunk.iter_mut().zip(block.iter()) {
                *byte ^= k;
            }
        }
    }
}

impl SecretsService for LocalSecrets {
    fn encrypt(&self, plaintext: &str) -> Result<String, StoreError> {
        let mut bytes = plaintext.as_bytes().to_vec();
        self.apply_keystream(&mut bytes);
        Ok(format!("{CIPHERTEXT_PREFIX}{}", hex::encode(bytes)))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, StoreError> {
        let encoded = ciphertext
            .strip_prefix(CIPHERTEXT_PREFIX)
            .ok_or_else(|| StoreError::Secret("missing ciphertext prefix".into()))?;
        let mut bytes = hex::decode(encoded).map_err(|e| StoreError::Secret(e.to_string()))?;
        self.apply_keystream(&mut bytes);
        String::from_utf8(bytes).map_err(|e| StoreError::Secret(e.to_string()))
    }
}

// ── Search ──────────────────────────────────────────────────────────

/// Counts re-index requests. Stands in for an external search indexer.
#[derive(Debug, Default)]
pub struct ReindexCounter {
    requests: AtomicUsize,
}

impl ReindexCounter {
    pub fn count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl SearchIndexer for ReindexCounter {
    fn trigger_reindex(&self) {
        let n = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(requests = n, "search re-index requested");
    }
}

// ── Plugin registry ─────────────────────────────────────────────────

/// Fixed set of installed plugins.
#[derive(Debug, Default)]
pub struct StaticPluginRegistry {
    plugins: HashMap<String, PluginMeta>,
}

#[derive(Deserialize)]
struct PluginManifest {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: PluginKind,
}

impl StaticPluginRegistry {
    pub fn new(plugins: impl IntoIterator<Item = PluginMeta>) -> Self {
        Self {
            plugins: plugins.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// Discover plugins from `<dir>/<plugin>/plugin.json` manifests.
    ///
    /// A missing directory yields an empty registry; unreadable manifests
    /// are skipped with a warning.
    pub fn scan(dir: &Path) -> Result<Self, StoreError> {
        if !dir.exists() {
            return Ok(Self::default());
        }

        let mut plugins = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let manifest_path = entry?.path().join("plugin.json");
            if !manifest_path.is_file() {
                continue;
            }
            let parsed = std::fs::read_to_string(&manifest_path)
                .map_err(StoreError::from)
                .and_then(|raw| {
                    serde_json::from_str::<PluginManifest>(&raw).map_err(StoreError::from)
                });
            match parsed {
                Ok(m) => plugins.push(PluginMeta {
                    name: if m.name.is_empty() { m.id.clone() } else { m.name },
                    id: m.id,
                    kind: m.kind,
                }),
                Err(e) => {
                    warn!(path = %manifest_path.display(), error = %e, "skipping plugin manifest");
                }
            }
        }
        Ok(Self::new(plugins))
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl PluginRegistry for StaticPluginRegistry {
    fn plugin(&self, id: &str) -> Option<PluginMeta> {
        self.plugins.get(id).cloned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn secrets_round_trip_and_are_deterministic() {
        let secrets = LocalSecrets::new("s3cret");
        let a = secrets.encrypt("password123").unwrap();
        let b = secrets.encrypt("password123").unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with(CIPHERTEXT_PREFIX));
        assert!(!a.contains("password123"));
        assert_eq!(secrets.decrypt(&a).unwrap(), "password123");
    }

    #[test]
    fn decrypt_with_other_key_does_not_yield_plaintext() {
        let a = LocalSecrets::new("one");
        let b = LocalSecrets::new("two");
        let ct = a.encrypt("a fairly long secret value spanning two blocks").unwrap();
        assert_ne!(
            b.decrypt(&ct).ok().as_deref(),
            Some("a fairly long secret value spanning two blocks")
        );
    }

    #[test]
    fn decrypt_rejects_plaintext() {
        let secrets = LocalSecrets::new("k");
        assert!(matches!(
            secrets.decrypt("plain"),
            Err(StoreError::Secret(_))
        ));
    }

    #[test]
    fn scan_reads_manifests_and_skips_broken_ones() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("my-app");
        std::fs::create_dir_all(&app).unwrap();
        std::fs::write(
            app.join("plugin.json"),
            r#"{ "id": "my-app", "name": "My App", "type": "app" }"#,
        )
        .unwrap();
        let broken = dir.path().join("broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join("plugin.json"), "{").unwrap();

        let registry = StaticPluginRegistry::scan(dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
        let meta = registry.plugin("my-app").unwrap();
        assert_eq!(meta.kind, PluginKind::App);
        assert_eq!(meta.name, "My App");
    }

    #[test]
    fn reindex_counter_counts() {
        let counter = ReindexCounter::default();
        counter.trigger_reindex();
        counter.trigger_reindex();
        assert_eq!(counter.count(), 2);
    }
}
