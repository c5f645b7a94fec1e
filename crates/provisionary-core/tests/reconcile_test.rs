#![allow(clippy::unwrap_used)]

mod common;

use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use provisionary_core::{AtomicityPolicy, CoreError, ProvisioningService, ReconcileError, Stage};
use provisionary_store::{
    DashboardStore, DatasourceStore, Notifier, NotifierStore, Provenance,
};

use common::{ALERTING, DATASOURCES, Fixture, PLUGINS, WEBHOOK, dashboard_json};

fn full_tree(fx: &Fixture) {
    fx.write("datasources", "prometheus.yaml", DATASOURCES);
    fx.write("plugins", "apps.yml", PLUGINS);
    fx.write("notifiers", "hooks.yaml", WEBHOOK);
    fx.write("alerting", "rules.yaml", ALERTING);
    let dashboards = fx.dashboards_dir("main");
    std::fs::write(dashboards.join("overview.json"), dashboard_json("Overview", "overview")).unwrap();
    fx.write_provider("main", &dashboards, 0);
}

fn file_errors(err: &CoreError) -> Vec<String> {
    match err {
        CoreError::Stage { source, .. } => source
            .file_errors()
            .iter()
            .map(|e| e.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect(),
        CoreError::Cancelled => Vec::new(),
    }
}

fn manual_notifier(uid: &str) -> Notifier {
    Notifier {
        uid: uid.into(),
        org_id: 1,
        name: format!("manual {uid}"),
        kind: "email".into(),
        is_default: false,
        send_reminder: false,
        frequency_secs: None,
        disable_resolve_message: false,
        settings: serde_json::json!({ "addresses": "ops@example.com" }),
        secure_settings: BTreeMap::new(),
        provenance: Provenance::Manual,
    }
}

// ── Idempotence ─────────────────────────────────────────────────────

#[tokio::test]
async fn second_pass_performs_no_store_mutation() {
    let fx = Fixture::new();
    full_tree(&fx);
    let service = ProvisioningService::new(fx.config(AtomicityPolicy::AllOrNothing), fx.services.clone());
    let cancel = CancellationToken::new();

    let first = service.run_init_provisioners(&cancel).await.unwrap();
    assert_eq!(first.created, 4);
    let dashboards = service.provision_dashboards(&cancel).await.unwrap();
    assert_eq!(dashboards.created, 1);
    let after_first = fx.store.revision();
    assert!(after_first > 0);

    let second = service.run_init_provisioners(&cancel).await.unwrap();
    assert_eq!(second.mutations(), 0);
    assert_eq!(second.unchanged, 4);
    let dashboards = service.provision_dashboards(&cancel).await.unwrap();
    assert_eq!(dashboards.mutations(), 0);
    assert_eq!(fx.store.revision(), after_first);
}

#[tokio::test]
async fn empty_datasources_directory_writes_nothing() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.path().join("provisioning/datasources")).unwrap();
    let service = ProvisioningService::new(fx.config(AtomicityPolicy::AllOrNothing), fx.services.clone());

    let summary = service
        .provision_datasources(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.mutations(), 0);
    assert_eq!(fx.store.revision(), 0);
}

#[tokio::test]
async fn missing_provisioning_tree_is_not_an_error() {
    let fx = Fixture::new();
    let service = ProvisioningService::new(fx.config(AtomicityPolicy::AllOrNothing), fx.services.clone());
    let cancel = CancellationToken::new();
    service.run_init_provisioners(&cancel).await.unwrap();
    service.provision_dashboards(&cancel).await.unwrap();
    assert_eq!(fx.store.revision(), 0);
}

// ── Orphan safety ───────────────────────────────────────────────────

#[tokio::test]
async fn manual_entities_survive_removal_of_all_files() {
    let fx = Fixture::new();
    full_tree(&fx);
    let service = ProvisioningService::new(fx.config(AtomicityPolicy::AllOrNothing), fx.services.clone());
    let cancel = CancellationToken::new();
    service.run_init_provisioners(&cancel).await.unwrap();
    service.provision_dashboards(&cancel).await.unwrap();

    fx.store.create_notifier(manual_notifier("by-hand")).await.unwrap();
    let mut ds = fx.store.datasource_by_name(1, "Prometheus").await.unwrap().unwrap();
    ds.name = "Hand made".into();
    ds.uid = String::new();
    ds.is_default = false;
    ds.provenance = Provenance::Manual;
    fx.store.create_datasource(ds).await.unwrap();
    let mut dash = fx.store.dashboard_by_uid(1, "overview").await.unwrap().unwrap();
    dash.uid = "hand-dash".into();
    dash.provenance = Provenance::Manual;
    fx.store.save_dashboard(dash).await.unwrap();

    for (kind, name) in [
        ("datasources", "prometheus.yaml"),
        ("plugins", "apps.yml"),
        ("notifiers", "hooks.yaml"),
        ("alerting", "rules.yaml"),
        ("dashboards", "main.yaml"),
    ] {
        fx.remove(kind, name);
    }
    let pruned = service.run_init_provisioners(&cancel).await.unwrap();
    assert_eq!(pruned.deleted, 4);
    service.provision_dashboards(&cancel).await.unwrap();

    let datasources = fx.store.datasources();
    assert_eq!(datasources.len(), 1);
    assert_eq!(datasources[0].name, "Hand made");
    let notifiers = fx.store.notifiers();
    assert_eq!(notifiers.len(), 1);
    assert_eq!(notifiers[0].uid, "by-hand");
    assert!(fx.store.plugin_settings().is_empty());
    assert!(fx.store.alert_rules().is_empty());

    let dashboards = fx.store.dashboards();
    assert_eq!(dashboards.len(), 1);
    assert_eq!(dashboards[0].uid, "hand-dash");
}

// ── Atomicity policies ──────────────────────────────────────────────

const MALFORMED: &str = "notifiers:\n  - uid: broken\n    name: [oops\n";

#[tokio::test]
async fn all_or_nothing_rejects_directory_with_one_bad_file() {
    let fx = Fixture::new();
    fx.write("notifiers", "a-good.yaml", WEBHOOK);
    fx.write("notifiers", "b-bad.yaml", MALFORMED);
    let service = ProvisioningService::new(fx.config(AtomicityPolicy::AllOrNothing), fx.services.clone());

    let err = service
        .provision_notifications(&CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.failed_stage(), Some(Stage::Notifiers));
    assert!(err.to_string().starts_with("Alert notification provisioning error: "));
    assert_eq!(file_errors(&err), ["b-bad.yaml"]);
    assert!(fx.store.notifiers().is_empty());
    assert_eq!(fx.store.revision(), 0);
}

#[tokio::test]
async fn best_effort_applies_good_file_and_keeps_bad_files_entities() {
    let fx = Fixture::new();
    fx.write("notifiers", "a-good.yaml", WEBHOOK);
    fx.write(
        "notifiers",
        "b-bad.yaml",
        "notifiers:\n  - uid: legacy\n    name: Legacy\n    type: email\n    settings:\n      addresses: a@example.com\n",
    );
    let service = ProvisioningService::new(fx.config(AtomicityPolicy::BestEffort), fx.services.clone());
    let cancel = CancellationToken::new();
    service.provision_notifications(&cancel).await.unwrap();

    // Break the second file and change the first.
    fx.write("notifiers", "a-good.yaml", &WEBHOOK.replace("Ops hook", "Ops webhook"));
    fx.write("notifiers", "b-bad.yaml", MALFORMED);

    let err = service.provision_notifications(&cancel).await.unwrap_err();
    assert_eq!(file_errors(&err), ["b-bad.yaml"]);
    match &err {
        CoreError::Stage {
            source: ReconcileError::Files { applied, .. },
            ..
        } => assert_eq!(applied.updated, 1),
        other => panic!("unexpected {other:?}"),
    }

    let hook = fx.store.notifier_by_uid(1, "ops-hook").await.unwrap().unwrap();
    assert_eq!(hook.name, "Ops webhook");
    // Not pruned while its file is broken.
    assert!(fx.store.notifier_by_uid(1, "legacy").await.unwrap().is_some());
}

#[tokio::test]
async fn check_reports_problems_without_writing() {
    let fx = Fixture::new();
    full_tree(&fx);
    fx.write("notifiers", "zz-bad.yaml", MALFORMED);
    fx.write("plugins", "ghost.yaml", "apps:\n  - type: ghost-app\n");
    let service = ProvisioningService::new(fx.config(AtomicityPolicy::AllOrNothing), fx.services.clone());

    let reports = service.check().await;
    let stages: Vec<Stage> = reports.iter().map(|(stage, _)| *stage).collect();
    assert_eq!(
        stages,
        [
            Stage::Datasources,
            Stage::Plugins,
            Stage::Notifiers,
            Stage::AlertRules,
            Stage::Dashboards
        ]
    );
    let failing: Vec<Stage> = reports
        .iter()
        .filter(|(_, report)| !report.is_ok())
        .map(|(stage, _)| *stage)
        .collect();
    assert_eq!(failing, [Stage::Plugins, Stage::Notifiers]);
    assert_eq!(fx.store.revision(), 0);
}
