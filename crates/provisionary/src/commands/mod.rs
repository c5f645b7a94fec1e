//! Command handlers and the runtime they share.

pub mod apply;
pub mod check;
pub mod config_cmd;
pub mod run;

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use provisionary_config::Config;
use provisionary_core::{ProvisioningService, Services};
use provisionary_store::{LocalSecrets, MemoryStore, ReindexCounter, StaticPluginRegistry};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Resolve the configuration, applying command-line overrides.
pub fn resolve_config(global: &GlobalOpts) -> Result<Config, CliError> {
    let mut cfg = provisionary_config::load(global.config.as_deref())?;
    if let Some(ref path) = global.provisioning_path {
        cfg.paths.provisioning.clone_from(path);
    }
    if let Some(ref state) = global.state {
        cfg.paths.state = Some(state.clone());
    }
    if let Some(ref atomicity) = global.atomicity {
        cfg.provisioning.atomicity.clone_from(atomicity);
    }
    Ok(cfg)
}

/// Cancel `cancel` on the first Ctrl-C.
pub fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            cancel.cancel();
        }
    });
}

/// The store, its services and the provisioning service, wired together.
pub struct Runtime {
    pub store: Arc<MemoryStore>,
    pub service: ProvisioningService,
    state_path: Option<PathBuf>,
}

impl Runtime {
    pub fn bootstrap(global: &GlobalOpts) -> Result<Self, CliError> {
        let cfg = resolve_config(global)?;
        let engine = cfg.to_provisioning_config()?;

        let mut store = match cfg.paths.state {
            Some(ref path) => MemoryStore::load(path)?,
            None => MemoryStore::new(),
        };
        for org_id in &cfg.organisations {
            store = store.with_org(*org_id);
        }
        let store = Arc::new(store);

        let plugins = match cfg.paths.plugins {
            Some(ref dir) => StaticPluginRegistry::scan(dir)?,
            None => StaticPluginRegistry::default(),
        };
        debug!(plugins = plugins.len(), "plugin registry loaded");

        let services = Services::from_memory(
            &store,
            Arc::new(LocalSecrets::new(&cfg.secrets.secret_key)),
            Arc::new(plugins),
            Arc::new(ReindexCounter::default()),
        );

        info!(
            path = %engine.provisioning_path.display(),
            atomicity = %engine.atomicity,
            "provisioning configured"
        );
        Ok(Self {
            store,
            service: ProvisioningService::new(engine, services),
            state_path: cfg.paths.state,
        })
    }

    /// Write the store to the state file, if one is configured.
    pub fn persist(&self) -> Result<(), CliError> {
        if let Some(ref path) = self.state_path {
            self.store.save(path)?;
        }
        Ok(())
    }

    pub fn has_state_file(&self) -> bool {
        self.state_path.is_some()
    }
}
