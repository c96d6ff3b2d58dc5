//! hovel: isolated per-branch container environments.
//!
//! Each branch gets its own copy of an application template, a rendered compose
//! descriptor, and a dedicated port. State lives on the filesystem, one `.branch`
//! record per branch directory, so the tool can be restarted at any point and
//! pick up where it left off.
//!
//! # Crate Structure
//!
//! - [`core`]: shared primitives (errors, config, the Environment Store, port
//!   allocation, external tool invocation).
//! - [`plugins`]: the container driver, lifecycle orchestration, the background
//!   task tracker and the [`plugins::branch::BranchService`] facade.
//!
//! # Examples
//!
//! ```bash
//! hovel create feature-x --credential "$KEY"
//! hovel build feature-x
//! hovel status feature-x
//! hovel delete feature-x
//! ```

mod cli;
pub mod core;
pub mod plugins;

use clap::Parser;
use cli::{Cli, Command, ListFormat};
use core::config::HovelConfig;
use core::error::HovelError;
use core::{output, time};
use plugins::branch::{BranchService, CreateRequest};
use secrecy::SecretString;
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_ENV: &str = "HOVEL_LOG";
const CREDENTIAL_ENV: &str = "HOVEL_CREDENTIAL";
const TASK_POLL_INTERVAL: Duration = Duration::from_millis(250);

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
    };
    // Ignored when a subscriber is already installed (tests embedding `run`).
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

fn print_json(value: &JsonValue) -> Result<(), HovelError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn emit(cmd: &str, payload: JsonValue) -> Result<(), HovelError> {
    print_json(&time::command_envelope(cmd, "ok", payload))
}

fn services_arg(services: Vec<String>) -> Option<Vec<String>> {
    (!services.is_empty()).then_some(services)
}

pub fn run() -> Result<(), HovelError> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());
    let config = HovelConfig::load(cli.config.as_deref())?;
    let cmd = command_name(&cli.command);
    match dispatch(cli.command, config) {
        Ok(()) => Ok(()),
        Err(e) => {
            let envelope = time::command_envelope(
                cmd,
                "error",
                json!({ "kind": e.kind(), "message": e.summary() }),
            );
            print_json(&envelope)?;
            Err(e)
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Create { .. } => "create",
        Command::List { .. } => "list",
        Command::Start { .. } => "start",
        Command::Stop { .. } => "stop",
        Command::Restart { .. } => "restart",
        Command::Status { .. } => "status",
        Command::Logs { .. } => "logs",
        Command::Build { .. } => "build",
        Command::BuildStatus { .. } => "build-status",
        Command::Exec { .. } => "exec",
        Command::Terminal { .. } => "terminal",
        Command::Delete { .. } => "delete",
        Command::Reap { .. } => "reap",
        Command::Config => "config",
    }
}

fn dispatch(command: Command, config: HovelConfig) -> Result<(), HovelError> {
    let cmd = command_name(&command);
    let default_max_age = config.task_max_age_hours;
    let service = BranchService::from_config(config)?;

    match command {
        Command::Create {
            name,
            credential,
            auto_start,
            services,
        } => {
            let credential = credential
                .or_else(|| std::env::var(CREDENTIAL_ENV).ok())
                .map(SecretString::from);
            let outcome = service.create(CreateRequest {
                name,
                credential,
                auto_start,
                services: services_arg(services),
            })?;
            // The build thread dies with this process, so wait for it here.
            let task = match &outcome.task_id {
                Some(id) => Some(service.wait_for_task(id, TASK_POLL_INTERVAL)?),
                None => None,
            };
            let record = service.store().get(&outcome.name)?;
            emit(
                cmd,
                json!({
                    "message": format!("Branch {} created successfully", outcome.name),
                    "branch": outcome,
                    "task": task,
                    "record": record,
                }),
            )
        }
        Command::List { format } => {
            let records = service.list()?;
            if format == ListFormat::Text {
                print!("{}", output::branch_table(&records));
                return Ok(());
            }
            emit(
                cmd,
                json!({ "count": records.len(), "branches": records }),
            )
        }
        Command::Start { name, services } => {
            let services = services_arg(services);
            let record = service.start(&name, services.as_deref())?;
            emit(cmd, json!({ "branch_name": name, "record": record }))
        }
        Command::Stop { name } => {
            let record = service.stop(&name)?;
            emit(cmd, json!({ "branch_name": name, "record": record }))
        }
        Command::Restart { name } => {
            let outcome = service.restart(&name)?;
            emit(cmd, json!({ "branch_name": name, "restart": outcome }))
        }
        Command::Status { name } => emit(cmd, json!({ "report": service.status(&name)? })),
        Command::Logs { name, lines } => {
            let logs = service.logs(&name, lines)?;
            emit(
                cmd,
                json!({ "branch_name": name, "lines": lines, "logs": logs }),
            )
        }
        Command::Build { name, services } => {
            let services = services_arg(services);
            let task = service.build_blocking(&name, services.as_deref())?;
            let record = service.store().get(&name)?;
            emit(cmd, json!({ "task": task, "record": record }))
        }
        Command::BuildStatus { name } => {
            emit(cmd, json!({ "build": service.build_status(&name)? }))
        }
        Command::Exec {
            name,
            detach,
            command,
        } => {
            let result = service.exec(&name, &command, detach)?;
            emit(cmd, json!({ "branch_name": name, "exec": result }))
        }
        Command::Terminal { name, url } => {
            let outcome = service.attach_terminal_session(&name, url)?;
            emit(cmd, json!({ "branch_name": name, "terminal": outcome }))
        }
        Command::Delete { name } => {
            let outcome = service.delete(&name)?;
            emit(
                cmd,
                json!({
                    "message": format!("Branch {} completely cleaned up and deleted", name),
                    "result": outcome,
                }),
            )
        }
        Command::Reap { max_age_hours } => {
            let removed = service.reap_tasks(max_age_hours.unwrap_or(default_max_age))?;
            emit(cmd, json!({ "removed": removed }))
        }
        Command::Config => emit(cmd, json!({ "config": service.config() })),
    }
}
