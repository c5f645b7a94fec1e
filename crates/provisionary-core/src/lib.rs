//! Provisioning reconciliation engine.
//!
//! Takes declarative, file-based configuration for several resource kinds
//! and drives the stored state toward it, repeatedly and without stopping
//! service:
//!
//! - **[`ProvisioningService`]**: the orchestrator. Sequences the resource
//!   provisioners on startup ([`run_init_provisioners()`](ProvisioningService::run_init_provisioners)),
//!   owns the swappable dashboard provisioner, and runs the background
//!   poll loop ([`run()`](ProvisioningService::run)).
//!
//! - **Resource provisioners** ([`datasources`], [`plugins`], [`notifiers`],
//!   [`alerting`]): stateless [`ResourceProvisioner`] implementations that
//!   create, update, and prune entities from one configuration directory.
//!   Orphan removal is scoped by each entity's
//!   [`Provenance`](provisionary_store::Provenance).
//!
//! - **[`dashboards`]**: the stateful [`DashboardProvisioner`] that walks
//!   provider directories and keeps watching them for changes.
//!
//! Storage and supporting services are injected through [`Services`]; the
//! core never reads process configuration itself.

pub mod alerting;
pub mod config;
pub mod dashboards;
pub mod datasources;
pub mod error;
pub mod notifiers;
pub mod orchestrator;
pub mod plugins;
pub mod reader;
pub mod reconcile;
pub mod services;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{AlertingDefaults, AtomicityPolicy, ProvisioningConfig};
pub use dashboards::{
    DashboardProvisioner, DashboardProvisionerFactory, FileDashboardProvisioner,
    FileDashboardProvisionerFactory,
};
pub use error::{CoreError, ReconcileError, Stage};
pub use orchestrator::{ProvisioningService, ServiceBuilder};
pub use reader::{CheckReport, ConfigFile, FileError};
pub use reconcile::{ReconcileSummary, ResourceProvisioner};
pub use services::Services;
