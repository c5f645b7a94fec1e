//! `provisionary apply`: one reconciliation pass, then exit.

use serde::Serialize;
use tabled::Tabled;
use tokio_util::sync::CancellationToken;

use provisionary_core::{CoreError, ProvisioningService, ReconcileSummary, Stage};

use super::Runtime;
use crate::cli::{ApplyTarget, GlobalOpts};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct StageResult {
    kind: &'static str,
    created: usize,
    updated: usize,
    deleted: usize,
    unchanged: usize,
}

impl StageResult {
    fn new(stage: Stage, summary: ReconcileSummary) -> Self {
        Self {
            kind: stage.dir_name(),
            created: summary.created,
            updated: summary.updated,
            deleted: summary.deleted,
            unchanged: summary.unchanged,
        }
    }
}

#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Updated")]
    updated: String,
    #[tabled(rename = "Deleted")]
    deleted: String,
    #[tabled(rename = "Unchanged")]
    unchanged: usize,
}

fn stages_for(target: ApplyTarget) -> &'static [Stage] {
    match target {
        ApplyTarget::All => &[
            Stage::Datasources,
            Stage::Plugins,
            Stage::Notifiers,
            Stage::AlertRules,
            Stage::Dashboards,
        ],
        ApplyTarget::Datasources => &[Stage::Datasources],
        ApplyTarget::Plugins => &[Stage::Plugins],
        ApplyTarget::Notifiers => &[Stage::Notifiers],
        ApplyTarget::Alerting => &[Stage::AlertRules],
        ApplyTarget::Dashboards => &[Stage::Dashboards],
    }
}

async fn apply_stage(
    service: &ProvisioningService,
    stage: Stage,
    cancel: &CancellationToken,
) -> Result<ReconcileSummary, CoreError> {
    match stage {
        Stage::Datasources => service.provision_datasources(cancel).await,
        Stage::Plugins => service.provision_plugins(cancel).await,
        Stage::Notifiers => service.provision_notifications(cancel).await,
        Stage::AlertRules => service.provision_alert_rules(cancel).await,
        Stage::DashboardBuild | Stage::Dashboards => service.provision_dashboards(cancel).await,
    }
}

pub async fn handle(target: ApplyTarget, global: &GlobalOpts) -> Result<(), CliError> {
    let rt = Runtime::bootstrap(global)?;
    let cancel = CancellationToken::new();
    super::cancel_on_ctrl_c(cancel.clone());

    let mut results = Vec::new();
    let mut failure = None;
    for stage in stages_for(target) {
        match apply_stage(&rt.service, *stage, &cancel).await {
            Ok(summary) => results.push(StageResult::new(*stage, summary)),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    // Stages that completed stay committed, so their writes are saved
    // even when a later stage failed.
    rt.persist()?;
    if let Some(err) = failure {
        return Err(err.into());
    }

    let color = output::should_color(global.color);
    let rendered = output::render_list(
        global.output,
        &results,
        |r| ResultRow {
            kind: r.kind,
            created: output::count_label(r.created, color),
            updated: output::count_label(r.updated, color),
            deleted: output::count_label(r.deleted, color),
            unchanged: r.unchanged,
        },
        |r| {
            format!(
                "{}\t{}\t{}\t{}\t{}",
                r.kind, r.created, r.updated, r.deleted, r.unchanged
            )
        },
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_follows_startup_order_then_dashboards() {
        assert_eq!(
            stages_for(ApplyTarget::All),
            [
                Stage::Datasources,
                Stage::Plugins,
                Stage::Notifiers,
                Stage::AlertRules,
                Stage::Dashboards
            ]
        );
        assert_eq!(stages_for(ApplyTarget::Alerting), [Stage::AlertRules]);
    }
}
