//! Container Driver: compose operations against one branch's descriptor.
//!
//! Every call runs the compose tool with its working directory set to the branch
//! directory. Tool failures come back as [`HovelError::ExternalToolFailure`] or as a
//! structured status value; nothing here panics on tool output.

use crate::core::config::HovelConfig;
use crate::core::error::HovelError;
use crate::core::runner::{CommandRunner, ToolInvocation, ToolOutput, run_captured};
use crate::plugins::descriptor;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

static HEADER_COLUMN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\S+(?: \S+)*").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Running,
    Stopped,
    Unknown,
    NotFound,
    Error,
}

/// One row of `compose ps`. Columns absent from the tool's output shape stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainerRow {
    pub name: Option<String>,
    pub image: Option<String>,
    pub command: Option<String>,
    pub service: Option<String>,
    pub created: Option<String>,
    pub status: Option<String>,
    pub ports: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerStatus {
    pub status: ContainerState,
    /// Raw tool output, always kept so ambiguous tables are still inspectable.
    pub details: String,
    pub containers: Vec<ContainerRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ContainerStatus {
    fn without_output(status: ContainerState, message: String) -> Self {
        Self {
            status,
            details: String::new(),
            containers: Vec::new(),
            message: Some(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DestroyReport {
    pub actions_performed: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct ContainerDriver {
    config: Arc<HovelConfig>,
    runner: Arc<dyn CommandRunner>,
}

impl ContainerDriver {
    pub fn new(config: Arc<HovelConfig>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    pub fn branch_dir(&self, name: &str) -> PathBuf {
        self.config.branch_dir(name)
    }

    pub fn descriptor_path(&self, name: &str) -> PathBuf {
        self.branch_dir(name).join(&self.config.descriptor_file)
    }

    pub fn container_name(&self, name: &str) -> String {
        format!("{}{}", self.config.container_prefix, name)
    }

    pub fn image_name(&self, name: &str) -> String {
        format!("{}-app-{}", name, name)
    }

    /// An empty `compose_command` yields an invocation that fails to launch.
    fn compose(&self, name: &str, sub: &[&str]) -> ToolInvocation {
        let (program, base) = match self.config.compose_command.split_first() {
            Some((program, base)) => (program.as_str(), base),
            None => ("", &[][..]),
        };
        let mut args: Vec<String> = base.to_vec();
        args.push("-f".to_string());
        args.push(self.config.descriptor_file.clone());
        args.extend(sub.iter().map(|s| s.to_string()));
        ToolInvocation::new(program, args).in_dir(&self.branch_dir(name))
    }

    fn require_descriptor(&self, name: &str) -> Result<(), HovelError> {
        let path = self.descriptor_path(name);
        if path.is_file() {
            return Ok(());
        }
        Err(HovelError::NotFound(format!(
            "Compose descriptor not found for branch {}: {}",
            name,
            path.display()
        )))
    }

    fn run_checked(&self, name: &str, op: &str, inv: ToolInvocation) -> Result<ToolOutput, HovelError> {
        let output = run_captured(self.runner.as_ref(), &inv);
        if !output.success() {
            tracing::error!(
                branch = name,
                exit_code = ?output.exit_code,
                "Failed to {} for branch {}\nstdout:\n{}\nstderr:\n{}",
                op,
                name,
                output.stdout.trim(),
                output.stderr.trim()
            );
        }
        output.into_result(&inv.display())
    }

    pub fn build(&self, name: &str) -> Result<(), HovelError> {
        self.require_descriptor(name)?;
        self.run_checked(name, "build image", self.compose(name, &["build"]))?;
        tracing::info!(branch = name, "Built image for branch {}", name);
        Ok(())
    }

    /// `up -d`, for every service or only `services`. Already-running containers are left as is.
    pub fn start(&self, name: &str, services: Option<&[String]>) -> Result<(), HovelError> {
        self.require_descriptor(name)?;
        let mut sub = vec!["up", "-d"];
        if let Some(list) = services {
            sub.extend(list.iter().map(String::as_str));
        }
        self.run_checked(name, "start containers", self.compose(name, &sub))?;
        tracing::info!(branch = name, "Started containers for branch {}", name);
        Ok(())
    }

    pub fn stop(&self, name: &str) -> Result<(), HovelError> {
        self.require_descriptor(name)?;
        self.run_checked(name, "stop containers", self.compose(name, &["down"]))?;
        tracing::info!(branch = name, "Stopped containers for branch {}", name);
        Ok(())
    }

    pub fn status(&self, name: &str) -> ContainerStatus {
        if self.require_descriptor(name).is_err() {
            return ContainerStatus::without_output(
                ContainerState::NotFound,
                "Compose descriptor not found".to_string(),
            );
        }
        let output = run_captured(self.runner.as_ref(), &self.compose(name, &["ps"]));
        if !output.success() {
            return ContainerStatus::without_output(
                ContainerState::Error,
                format!("Failed to check status: {}", output.stderr.trim()),
            );
        }
        parse_ps_output(&output.stdout)
    }

    pub fn logs(&self, name: &str, lines: usize) -> Result<String, HovelError> {
        self.require_descriptor(name)?;
        let tail = lines.to_string();
        let output = self.run_checked(name, "read logs", self.compose(name, &["logs", "--tail", tail.as_str()]))?;
        Ok(output.stdout.trim().to_string())
    }

    /// Runs `command` in the primary service's container. Refuses unless the
    /// environment reports `running`.
    pub fn exec(&self, name: &str, command: &[String], detach: bool) -> ExecResult {
        if command.is_empty() {
            return exec_refused("no command given");
        }
        let state = self.status(name);
        if state.status != ContainerState::Running {
            return exec_refused(&format!(
                "container for branch {} is not running (status: {:?})",
                name, state.status
            ));
        }
        let service = self.primary_service(name);
        let mut sub = vec!["exec", "-T"];
        if detach {
            sub.push("-d");
        }
        sub.push(service.as_str());
        sub.extend(command.iter().map(String::as_str));
        let output = run_captured(self.runner.as_ref(), &self.compose(name, &sub));
        ExecResult {
            success: output.success(),
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
        }
    }

    /// The configured primary service when the descriptor defines it, otherwise the
    /// first declared service.
    pub fn primary_service(&self, name: &str) -> String {
        let names = fs::read_to_string(self.descriptor_path(name))
            .map(|text| descriptor::service_names(&text))
            .unwrap_or_default();
        if names.is_empty() || names.iter().any(|s| s == &self.config.primary_service) {
            return self.config.primary_service.clone();
        }
        names[0].clone()
    }

    /// Full teardown. Container and image removal are best effort; removing the
    /// branch directory always runs and is the only step whose failure is an error.
    pub fn destroy(&self, name: &str) -> Result<DestroyReport, HovelError> {
        let mut report = DestroyReport::default();

        if self.require_descriptor(name).is_ok() {
            let inv = self.compose(name, &["down", "--rmi", "all", "--volumes"]);
            let out = run_captured(self.runner.as_ref(), &inv);
            if out.success() {
                report.actions_performed.push("stopped_containers".to_string());
            } else {
                report
                    .warnings
                    .push(format!("compose down failed: {}", out.stderr.trim()));
            }
        }

        let runtime = &self.config.container_runtime;
        let rm = ToolInvocation::new(runtime, ["rm", "-f", self.container_name(name).as_str()]);
        if run_captured(self.runner.as_ref(), &rm).success() {
            report.actions_performed.push("removed_container".to_string());
        }
        let rmi = ToolInvocation::new(runtime, ["rmi", "-f", self.image_name(name).as_str()]);
        if run_captured(self.runner.as_ref(), &rmi).success() {
            report.actions_performed.push("removed_image".to_string());
        }

        let dir = self.branch_dir(name);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(HovelError::IoError)?;
            tracing::info!(branch = name, "Deleted branch directory: {}", dir.display());
        }
        report.actions_performed.push("deleted_branch_files".to_string());
        for w in &report.warnings {
            tracing::warn!(branch = name, "{}", w);
        }
        Ok(report)
    }
}

fn exec_refused(reason: &str) -> ExecResult {
    ExecResult {
        success: false,
        stdout: String::new(),
        stderr: reason.to_string(),
        exit_code: None,
    }
}

/// Parses `compose ps` tables.
///
/// Column boundaries come from the header: labels are separated by two or more
/// spaces. Every value must start on a boundary; any row that breaks that makes
/// the table ambiguous, and the result keeps only the raw text.
pub fn parse_ps_output(stdout: &str) -> ContainerStatus {
    let details = stdout.trim().to_string();
    let mut lines = stdout.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return stopped_with(details, Vec::new());
    };
    let mut columns: Vec<(usize, String)> = HEADER_COLUMN
        .find_iter(header)
        .map(|m| (m.start(), m.as_str().to_ascii_lowercase()))
        .collect();
    if let Some(first) = columns.first_mut() {
        first.0 = 0;
    }
    if !columns.first().is_some_and(|(_, label)| label == "name") {
        return classify_raw(details);
    }

    let mut rows = Vec::new();
    for line in lines {
        if line.trim_start().starts_with("---") {
            continue;
        }
        match slice_row(line, &columns).or_else(|| split_row(line, &columns)) {
            Some(row) => rows.push(row),
            None => return classify_raw(details),
        }
    }
    if rows.is_empty() {
        return stopped_with(details, rows);
    }

    let running = rows.iter().any(|r| row_state(r) == Some(ContainerState::Running));
    let stopped = rows.iter().any(|r| row_state(r) == Some(ContainerState::Stopped));
    let status = if running {
        ContainerState::Running
    } else if stopped {
        ContainerState::Stopped
    } else {
        ContainerState::Unknown
    };
    ContainerStatus {
        status,
        details,
        containers: rows,
        message: None,
    }
}

fn stopped_with(details: String, rows: Vec<ContainerRow>) -> ContainerStatus {
    ContainerStatus {
        status: ContainerState::Stopped,
        details,
        containers: rows,
        message: None,
    }
}

fn classify_raw(details: String) -> ContainerStatus {
    let status = if details.contains("Up") {
        ContainerState::Running
    } else if details.contains("Exit") {
        ContainerState::Stopped
    } else {
        ContainerState::Unknown
    };
    ContainerStatus {
        status,
        details,
        containers: Vec::new(),
        message: Some("column layout not recognized; raw output kept".to_string()),
    }
}

fn set_field(row: &mut ContainerRow, label: &str, value: Option<String>) {
    match label {
        "name" => row.name = value,
        "image" => row.image = value,
        "command" => row.command = value,
        "service" => row.service = value,
        "created" => row.created = value,
        "status" | "state" => row.status = value,
        "ports" => row.ports = value,
        _ => {}
    }
}

/// Centered headers (compose v1) do not mark value offsets. Such rows are accepted
/// only when splitting on wide gaps yields exactly one value per column.
fn split_row(line: &str, columns: &[(usize, String)]) -> Option<ContainerRow> {
    let values: Vec<&str> = HEADER_COLUMN.find_iter(line).map(|m| m.as_str()).collect();
    if values.len() != columns.len() {
        return None;
    }
    let mut row = ContainerRow::default();
    for ((_, label), value) in columns.iter().zip(values) {
        set_field(&mut row, label, Some(value.to_string()));
    }
    Some(row)
}

fn slice_row(line: &str, columns: &[(usize, String)]) -> Option<ContainerRow> {
    let mut row = ContainerRow::default();
    for (i, (start, label)) in columns.iter().enumerate() {
        let end = columns.get(i + 1).map(|(s, _)| *s).unwrap_or(line.len());
        if *start > 0 && line.len() > *start && !line.as_bytes()[*start - 1].is_ascii_whitespace() {
            return None;
        }
        let value = if *start >= line.len() {
            ""
        } else {
            line.get(*start..end.min(line.len()))?.trim()
        };
        if !value.is_empty() && value.contains("  ") {
            return None;
        }
        let value = (!value.is_empty()).then(|| value.to_string());
        set_field(&mut row, label, value);
    }
    row.name.as_ref()?;
    Some(row)
}

fn row_state(row: &ContainerRow) -> Option<ContainerState> {
    let status = row.status.as_deref()?.to_ascii_lowercase();
    if status.starts_with("up") || status.contains("running") {
        Some(ContainerState::Running)
    } else if status.starts_with("exit") || status.contains("exited") {
        Some(ContainerState::Stopped)
    } else {
        None
    }
}
