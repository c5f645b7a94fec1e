//! `provisionary run`: the long-lived provisioning service.
//!
//! Runs the startup provisioners, then hands control to the orchestrator's
//! run loop until Ctrl-C. On unix, SIGHUP re-runs every provisioner and
//! swaps in a freshly configured dashboard provisioner.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use provisionary_core::CoreError;

use super::Runtime;
use crate::cli::GlobalOpts;
use crate::error::CliError;

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let rt = Arc::new(Runtime::bootstrap(global)?);
    let cancel = CancellationToken::new();
    super::cancel_on_ctrl_c(cancel.clone());

    if let Err(e) = rt.service.run_init_provisioners(&cancel).await {
        rt.persist()?;
        return Err(e.into());
    }
    rt.persist()?;

    let saver = rt
        .has_state_file()
        .then(|| tokio::spawn(save_on_change(Arc::clone(&rt), cancel.clone())));
    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(Arc::clone(&rt), cancel.clone()));

    info!("provisioning service started");
    let result = rt.service.run(&cancel).await;

    // Stops the helpers when the loop returned on its own.
    cancel.cancel();
    join_saver(saver).await;
    rt.persist()?;

    match result {
        Ok(()) | Err(CoreError::Cancelled) => {
            info!("provisioning service stopped");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Wait for the state saver. Returns `false` when it panicked.
async fn join_saver(saver: Option<JoinHandle<()>>) -> bool {
    let Some(saver) = saver else {
        return true;
    };
    match saver.await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "state saver task failed");
            false
        }
    }
}

/// Save the state file after every store mutation until cancelled.
async fn save_on_change(rt: Arc<Runtime>, cancel: CancellationToken) {
    let mut revisions = rt.store.subscribe();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            changed = revisions.changed() => {
                if changed.is_err() {
                    return;
                }
                if let Err(e) = rt.persist() {
                    warn!(error = %e, "failed to save state");
                }
            }
        }
    }
}

#[cfg(unix)]
async fn reload_on_hangup(rt: Arc<Runtime>, cancel: CancellationToken) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGHUP, reload disabled");
            return;
        }
    };

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            received = hangups.recv() => {
                if received.is_none() {
                    return;
                }
                info!("SIGHUP received, reloading provisioning");
                // Failures are logged by the orchestrator; the previous
                // dashboard provisioner keeps running.
                if let Err(e) = rt.service.run_init_provisioners(&cancel).await {
                    debug!(error = %e, "reload stopped early");
                    continue;
                }
                if let Err(e) = rt.service.provision_dashboards(&cancel).await {
                    debug!(error = %e, "dashboard reload failed");
                }
            }
        }
    }
}
