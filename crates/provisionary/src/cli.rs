//! Clap derive structures for the `provisionary` CLI.
//!
//! Defines the command tree and global flags. Also compiled by `build.rs`
//! for man page generation, so it must only depend on clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// provisionary -- converge a live system to provisioning files on disk
#[derive(Debug, Parser)]
#[command(
    name = "provisionary",
    version,
    about = "Declarative, file-driven provisioning",
    long_about = "Reads per-kind provisioning directories (datasources, plugins,\n\
        notifiers, alerting, dashboards) and drives the store toward them.\n\n\
        `run` keeps dashboards polled until interrupted; `apply` performs a\n\
        single pass; `check` validates files without writing anything.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration file (defaults to the platform config path)
    #[arg(long, env = "PROVISIONARY_CONFIG", global = true, hide_env = true)]
    pub config: Option<PathBuf>,

    /// Provisioning base directory (overrides paths.provisioning)
    #[arg(long, short = 'd', global = true)]
    pub provisioning_path: Option<PathBuf>,

    /// Store state file (overrides paths.state)
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,

    /// Treatment of directories with broken files (overrides provisioning.atomicity)
    #[arg(long, global = true)]
    pub atomicity: Option<String>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// YAML
    Yaml,
    /// Plain text, one line per row (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Provision everything, then keep dashboards polled until interrupted
    Run,

    /// Reconcile once and exit
    Apply(ApplyArgs),

    /// Validate provisioning files without writing anything
    Check,

    /// Manage the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// Resource kind to reconcile
    #[arg(default_value = "all")]
    pub target: ApplyTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ApplyTarget {
    /// Every kind, in startup order
    All,
    Datasources,
    Plugins,
    Notifiers,
    #[value(alias = "alert-rules")]
    Alerting,
    Dashboards,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the resolved configuration
    Show,

    /// Print the configuration file path
    Path,

    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
