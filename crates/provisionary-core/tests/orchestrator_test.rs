#![allow(clippy::unwrap_used)]

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use provisionary_core::{AtomicityPolicy, CoreError, ProvisioningService, Stage};
use provisionary_store::DashboardStore;

use common::{
    ALERTING, DATASOURCES, FakeFactory, Fixture, RecordingProvisioner, WEBHOOK, dashboard_json,
};

// ── Startup sequence ────────────────────────────────────────────────

#[tokio::test]
async fn init_stops_at_failing_plugin_stage() {
    let fx = Fixture::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let service = ProvisioningService::builder(fx.config(AtomicityPolicy::AllOrNothing), fx.services.clone())
        .datasources(RecordingProvisioner::new("datasources", &log, false))
        .plugins(RecordingProvisioner::new("plugins", &log, true))
        .notifiers(RecordingProvisioner::new("notifiers", &log, false))
        .alert_rules(RecordingProvisioner::new("alerting", &log, false))
        .build();

    let err = service
        .run_init_provisioners(&CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(*log.lock().unwrap(), ["datasources", "plugins"]);
    assert_eq!(err.failed_stage(), Some(Stage::Plugins));
    let text = err.to_string();
    assert!(text.starts_with("app provisioning error: "), "{text}");
    assert!(text.contains("plugin not installed"));
}

#[tokio::test]
async fn plugin_failure_keeps_committed_datasources() {
    let fx = Fixture::new();
    fx.write("datasources", "prometheus.yaml", DATASOURCES);
    fx.write("plugins", "apps.yaml", "apps:\n  - type: ghost-app\n");
    fx.write("notifiers", "hooks.yaml", WEBHOOK);
    fx.write("alerting", "rules.yaml", ALERTING);
    let service = ProvisioningService::new(fx.config(AtomicityPolicy::AllOrNothing), fx.services.clone());

    let err = service
        .run_init_provisioners(&CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.failed_stage(), Some(Stage::Plugins));
    assert!(err.to_string().contains("ghost-app"));
    let names: Vec<String> = fx.store.datasources().into_iter().map(|ds| ds.name).collect();
    assert_eq!(names, ["Prometheus"]);
    assert!(fx.store.plugin_settings().is_empty());
    assert!(fx.store.notifiers().is_empty());
    assert!(fx.store.alert_rules().is_empty());
}

#[tokio::test]
async fn init_runs_every_stage_in_order() {
    let fx = Fixture::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let service = ProvisioningService::builder(fx.config(AtomicityPolicy::AllOrNothing), fx.services.clone())
        .datasources(RecordingProvisioner::new("datasources", &log, false))
        .plugins(RecordingProvisioner::new("plugins", &log, false))
        .notifiers(RecordingProvisioner::new("notifiers", &log, false))
        .alert_rules(RecordingProvisioner::new("alerting", &log, false))
        .build();

    service
        .run_init_provisioners(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        ["datasources", "plugins", "notifiers", "alerting"]
    );
}

// ── Dashboard reconfiguration ───────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failed_reconfiguration_keeps_polling_previous_provisioner() {
    let fx = Fixture::new();
    let v1_dir = fx.dashboards_dir("v1");
    std::fs::write(v1_dir.join("a.json"), dashboard_json("A", "a")).unwrap();
    fx.write_provider("main", &v1_dir, 5);

    let service = ProvisioningService::new(fx.config(AtomicityPolicy::AllOrNothing), fx.services.clone());
    let cancel = CancellationToken::new();
    let runner = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { service.run(&cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(service.installed_generation(), Some(1));
    let v1_path = service.dashboard_provisioner_resolved_path("main").unwrap();

    // v2 points the provider at a directory that does not exist.
    fx.write_provider("main", &fx.path().join("missing"), 5);
    let err = service
        .provision_dashboards(&CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.failed_stage(), Some(Stage::Dashboards));
    assert!(err.to_string().starts_with("Failed to provision dashboards: "));
    assert_eq!(service.installed_generation(), Some(1));
    assert_eq!(service.dashboard_provisioner_resolved_path("main"), Some(v1_path));

    // The v1 watcher is polling again and picks up a new file.
    std::fs::write(v1_dir.join("b.json"), dashboard_json("B", "b")).unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(fx.store.dashboard_by_uid(1, "b").await.unwrap().is_some());

    cancel.cancel();
    let result = runner.await.unwrap();
    assert!(matches!(result, Err(CoreError::Cancelled)));
}

#[tokio::test]
async fn broken_provider_config_fails_before_touching_the_slot() {
    let fx = Fixture::new();
    let dir = fx.dashboards_dir("v1");
    fx.write_provider("main", &dir, 0);
    let service = ProvisioningService::new(fx.config(AtomicityPolicy::AllOrNothing), fx.services.clone());
    let cancel = CancellationToken::new();
    service.provision_dashboards(&cancel).await.unwrap();

    fx.write("dashboards", "broken.yaml", "providers:\n  - name: nameless-path\n");
    let err = service.provision_dashboards(&cancel).await.unwrap_err();
    assert_eq!(err.failed_stage(), Some(Stage::DashboardBuild));
    assert!(err.to_string().starts_with("Failed to create provisioner: "));
    assert_eq!(service.installed_generation(), Some(1));
}

#[tokio::test]
async fn successful_reconfiguration_swaps_provisioner() {
    let fx = Fixture::new();
    let factory = FakeFactory::new();
    let service = ProvisioningService::builder(fx.config(AtomicityPolicy::AllOrNothing), fx.services.clone())
        .dashboard_factory(factory.clone())
        .build();
    let cancel = CancellationToken::new();

    assert_eq!(service.dashboard_provisioner_resolved_path("p"), None);
    assert!(!service.allow_ui_updates_from_config("p"));

    service.provision_dashboards(&cancel).await.unwrap();
    assert_eq!(
        service.dashboard_provisioner_resolved_path("p").unwrap().to_str(),
        Some("/v1/p")
    );
    service.provision_dashboards(&cancel).await.unwrap();
    assert_eq!(
        service.dashboard_provisioner_resolved_path("p").unwrap().to_str(),
        Some("/v2/p")
    );
    assert_eq!(service.installed_generation(), Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_installs_are_serialised() {
    let fx = Fixture::new();
    let factory = FakeFactory::slow(Duration::from_millis(50));
    let service = ProvisioningService::builder(fx.config(AtomicityPolicy::AllOrNothing), fx.services.clone())
        .dashboard_factory(factory.clone())
        .build();

    let calls: Vec<_> = (0..4)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.provision_dashboards(&CancellationToken::new()).await })
        })
        .collect();
    for call in calls {
        call.await.unwrap().unwrap();
    }

    assert_eq!(
        factory.counters.max_concurrent_provisions.load(Ordering::SeqCst),
        1
    );
    assert_eq!(service.installed_generation(), Some(4));
    let path = service.dashboard_provisioner_resolved_path("p").unwrap();
    assert!(
        ["/v1/p", "/v2/p", "/v3/p", "/v4/p"].contains(&path.to_str().unwrap()),
        "{path:?}"
    );
}

// ── Run loop ────────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_returns_promptly_and_stops_polling() {
    let fx = Fixture::new();
    let factory = FakeFactory::new();
    let service = ProvisioningService::builder(fx.config(AtomicityPolicy::AllOrNothing), fx.services.clone())
        .dashboard_factory(factory.clone())
        .build();
    let cancel = CancellationToken::new();
    let runner = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { service.run(&cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(factory.counters.active_polls.load(Ordering::SeqCst), 1);
    assert_eq!(fx.search.count(), 1);

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(1), runner)
        .await
        .expect("run did not stop")
        .unwrap();
    assert!(matches!(result, Err(CoreError::Cancelled)));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(factory.counters.active_polls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn reconfiguration_restarts_polling_on_new_instance() {
    let fx = Fixture::new();
    let factory = FakeFactory::new();
    let service = ProvisioningService::builder(fx.config(AtomicityPolicy::AllOrNothing), fx.services.clone())
        .dashboard_factory(factory.clone())
        .build();
    let cancel = CancellationToken::new();
    let runner = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { service.run(&cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    service
        .provision_dashboards(&CancellationToken::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // One epoch per installed instance, and only one alive at a time.
    assert_eq!(factory.counters.poll_starts.load(Ordering::SeqCst), 2);
    assert_eq!(factory.counters.active_polls.load(Ordering::SeqCst), 1);

    cancel.cancel();
    assert!(runner.await.unwrap().is_err());
}

#[tokio::test(start_paused = true)]
async fn self_ended_epoch_restarts_after_backoff() {
    let fx = Fixture::new();
    let factory = FakeFactory::self_ending();
    let config = fx
        .config(AtomicityPolicy::AllOrNothing)
        .with_restart_backoff(Duration::from_secs(5));
    let service = ProvisioningService::builder(config, fx.services.clone())
        .dashboard_factory(factory.clone())
        .build();
    let cancel = CancellationToken::new();
    let runner = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { service.run(&cancel).await })
    };

    // Epochs start at 0s, 5s and 10s.
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(factory.counters.poll_starts.load(Ordering::SeqCst), 3);

    // Cancellation interrupts the back-off.
    cancel.cancel();
    let result = runner.await.unwrap();
    assert!(matches!(result, Err(CoreError::Cancelled)));
}

#[tokio::test]
async fn run_returns_initial_dashboard_failure() {
    let fx = Fixture::new();
    fx.write_provider("main", &fx.path().join("does-not-exist"), 10);
    let service = ProvisioningService::new(fx.config(AtomicityPolicy::AllOrNothing), fx.services.clone());

    let err = service.run(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.failed_stage(), Some(Stage::Dashboards));
    assert_eq!(service.installed_generation(), None);
    assert_eq!(fx.search.count(), 0);
}

#[tokio::test]
async fn no_dashboard_sources_skips_reindex() {
    let fx = Fixture::new();
    let service = ProvisioningService::new(fx.config(AtomicityPolicy::AllOrNothing), fx.services.clone());
    let cancel = CancellationToken::new();
    let runner = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { service.run(&cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(service.installed_generation(), Some(1));
    assert_eq!(fx.search.count(), 0);
    cancel.cancel();
    assert!(runner.await.unwrap().is_err());
}
