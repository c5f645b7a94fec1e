// ── JSON state file ──
//
// Persists a `MemoryStore` between process runs. Writes go to a sibling
// temporary file first and are renamed into place.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{MemoryStore, key};
use crate::error::StoreError;
use super::correlation_key;
use crate::model::{
    AlertRule, Correlation, DataSource, Dashboard, Folder, Notifier, OrgId, PluginSetting,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    orgs: Vec<OrgId>,
    #[serde(default)]
    datasources: Vec<DataSource>,
    #[serde(default)]
    correlations: Vec<Correlation>,
    #[serde(default)]
    notifiers: Vec<Notifier>,
    #[serde(default)]
    plugin_settings: Vec<PluginSetting>,
    #[serde(default)]
    alert_rules: Vec<AlertRule>,
    #[serde(default)]
    folders: Vec<Folder>,
    #[serde(default)]
    dashboards: Vec<Dashboard>,
}

impl MemoryStore {
    /// Load a store from `path`. A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let store = Self::new();
        if !path.exists() {
            debug!(path = %path.display(), "no state file, starting empty");
            return Ok(store);
        }

        let raw = std::fs::read_to_string(path)?;
        let state: StateFile = serde_json::from_str(&raw)?;

        for org_id in state.orgs {
            store.orgs.insert(org_id);
        }
        for ds in state.datasources {
            store.datasources.insert(key(ds.org_id, &ds.name), ds);
        }
        for c in state.correlations {
            store.correlations.insert(correlation_key(&c), c);
        }
        for n in state.notifiers {
            store.notifiers.insert(key(n.org_id, &n.uid), n);
        }
        for s in state.plugin_settings {
            store.plugin_settings.insert(key(s.org_id, &s.plugin_id), s);
        }
        for r in state.alert_rules {
            store.alert_rules.insert(key(r.org_id, &r.uid), r);
        }
        for f in state.folders {
            store.folders.insert(key(f.org_id, &f.uid), f);
        }
        for d in state.dashboards {
            store.dashboards.insert(key(d.org_id, &d.uid), d);
        }

        // Loading is not a mutation.
        store.revision.send_replace(0);
        Ok(store)
    }

    /// Write the whole store to `path` as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let mut state = StateFile {
            orgs: self.orgs.iter().map(|o| *o).collect(),
            datasources: self.datasources(),
            correlations: self.correlations(),
            notifiers: self.notifiers(),
            plugin_settings: self.plugin_settings(),
            alert_rules: self.alert_rules(),
            folders: self.folders(),
            dashboards: self.dashboards(),
        };

        // Stable ordering keeps diffs of the state file readable.
        state.orgs.sort_unstable();
        state.datasources.sort_by(|a, b| (a.org_id, &a.name).cmp(&(b.org_id, &b.name)));
        state.correlations.sort_by(|a, b| {
            (a.org_id, &a.source_uid, &a.uid).cmp(&(b.org_id, &b.source_uid, &b.uid))
        });
        state.notifiers.sort_by(|a, b| (a.org_id, &a.uid).cmp(&(b.org_id, &b.uid)));
        state
            .plugin_settings
            .sort_by(|a, b| (a.org_id, &a.plugin_id).cmp(&(b.org_id, &b.plugin_id)));
        state.alert_rules.sort_by(|a, b| (a.org_id, &a.uid).cmp(&(b.org_id, &b.uid)));
        state.folders.sort_by(|a, b| (a.org_id, &a.uid).cmp(&(b.org_id, &b.uid)));
        state.dashboards.sort_by(|a, b| (a.org_id, &a.uid).cmp(&(b.org_id, &b.uid)));

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&state)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "state saved");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Provenance;
    use crate::store::{DashboardStore, NotifierStore};

    #[tokio::test]
    async fn save_then_load_preserves_entities_and_resets_revision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("store.json");

        let store = MemoryStore::new().with_org(4);
        store
            .create_notifier(Notifier {
                uid: "n1".into(),
                org_id: 4,
                name: "pager".into(),
                kind: "webhook".into(),
                is_default: false,
                send_reminder: false,
                frequency_secs: None,
                disable_resolve_message: false,
                settings: serde_json::json!({ "url": "http://hook" }),
                secure_settings: std::collections::BTreeMap::new(),
                provenance: Provenance::file("/p/notifiers/a.yaml"),
            })
            .await
            .unwrap();
        store.ensure_folder(4, "Ops", None).await.unwrap();
        store.save(&path).unwrap();

        let loaded = MemoryStore::load(&path).unwrap();
        assert_eq!(loaded.revision(), 0);
        assert_eq!(loaded.notifiers(), store.notifiers());
        assert_eq!(loaded.folders().len(), 1);
        assert!(loaded.orgs.contains(&4));
        assert!(loaded.dashboard_by_uid(4, "missing").await.unwrap().is_none());
    }

    #[test]
    fn missing_file_loads_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::load(&dir.path().join("nope.json")).unwrap();
        assert!(store.datasources().is_empty());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            MemoryStore::load(&path),
            Err(StoreError::Serialization(_))
        ));
    }
}
