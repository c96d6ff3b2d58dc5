//! CLI struct definitions for the hovel command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "hovel",
    version = env!("CARGO_PKG_VERSION"),
    about = "Provision, build, run and tear down isolated per-branch container environments."
)]
pub(crate) struct Cli {
    /// Path to the config file. Defaults to ./hovel.toml when present.
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    /// Log filter (trace, debug, info, warn, error). Overrides HOVEL_LOG.
    #[clap(long, global = true)]
    pub log_level: Option<String>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create a branch environment from the app template.
    Create {
        name: String,
        /// Credential checked before provisioning. Falls back to HOVEL_CREDENTIAL.
        #[clap(long)]
        credential: Option<String>,
        /// Build and start containers after provisioning, waiting for the build.
        #[clap(long)]
        auto_start: bool,
        /// Limit the descriptor to these services (repeatable).
        #[clap(long = "service")]
        services: Vec<String>,
    },
    /// List every branch environment.
    List {
        #[clap(long, value_enum, default_value_t = ListFormat::Json)]
        format: ListFormat,
    },
    /// Start containers for a branch.
    Start {
        name: String,
        #[clap(long = "service")]
        services: Vec<String>,
    },
    /// Stop containers for a branch.
    Stop { name: String },
    /// Stop, then start containers for a branch.
    Restart { name: String },
    /// Report the stored record alongside live container state.
    Status { name: String },
    /// Tail container logs.
    Logs {
        name: String,
        #[clap(long, default_value = "50")]
        lines: usize,
    },
    /// Build and start containers, waiting for readiness.
    Build {
        name: String,
        #[clap(long = "service")]
        services: Vec<String>,
    },
    /// Show the latest build task, or the stored status when none ran here.
    BuildStatus { name: String },
    /// Run a command in the branch's primary service container.
    Exec {
        name: String,
        /// Run detached.
        #[clap(long)]
        detach: bool,
        /// Command and arguments, after `--`.
        #[clap(last = true, required = true)]
        command: Vec<String>,
    },
    /// Record terminal session metadata for a branch.
    Terminal {
        name: String,
        #[clap(long)]
        url: Option<String>,
    },
    /// Remove containers, images, files and the git branch.
    Delete { name: String },
    /// Drop finished build tasks older than the given age.
    Reap {
        #[clap(long)]
        max_age_hours: Option<u64>,
    },
    /// Print the effective configuration.
    Config,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ListFormat {
    /// JSON envelope with every record.
    Json,
    /// Aligned table for terminals.
    Text,
}
