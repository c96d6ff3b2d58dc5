//! Branch service: the collaborator-facing API over the store, allocator,
//! orchestrator and task tracker.
//!
//! Every operation that names an existing branch checks the Environment Store
//! first and returns [`HovelError::NotFound`] when the record is absent.

use crate::core::config::HovelConfig;
use crate::core::error::HovelError;
use crate::core::ports::PortAllocator;
use crate::core::runner::{CommandRunner, SystemRunner};
use crate::core::store::{
    EnvStatus, EnvironmentRecord, EnvironmentStore, FsEnvironmentStore, TerminalSession,
    validate_branch_name,
};
use crate::core::time;
use crate::plugins::container::{ContainerDriver, ContainerState, ContainerStatus, ExecResult};
use crate::plugins::credential::{CredentialValidator, HttpCredentialValidator};
use crate::plugins::git::GitBookkeeper;
use crate::plugins::lifecycle::{Orchestrator, TeardownReport};
use crate::plugins::tasks::{BuildStatusView, BuildTask, TaskTracker};
use secrecy::SecretString;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub struct CreateRequest {
    pub name: String,
    pub credential: Option<SecretString>,
    pub auto_start: bool,
    pub services: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOutcome {
    pub name: String,
    pub port: u16,
    pub status: EnvStatus,
    pub directory: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub git_branch: Option<String>,
    pub credential_configured: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchStatusReport {
    pub branch_name: String,
    pub port: u16,
    pub record_status: EnvStatus,
    pub container_started: bool,
    pub container: ContainerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_session: Option<TerminalSession>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_task: Option<BuildTask>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestartOutcome {
    pub record: EnvironmentRecord,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub branch_name: String,
    pub status: EnvStatus,
    #[serde(flatten)]
    pub report: TeardownReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct TerminalOutcome {
    pub session: TerminalSession,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub struct BranchService {
    config: Arc<HovelConfig>,
    store: Arc<dyn EnvironmentStore>,
    ports: PortAllocator,
    orchestrator: Orchestrator,
    validator: Arc<dyn CredentialValidator>,
}

impl BranchService {
    /// Fails with `ConfigError` when `config` does not validate.
    pub fn new(
        config: HovelConfig,
        runner: Arc<dyn CommandRunner>,
        validator: Arc<dyn CredentialValidator>,
    ) -> Result<Self, HovelError> {
        config.validate()?;
        let config = Arc::new(config);
        let store: Arc<dyn EnvironmentStore> =
            Arc::new(FsEnvironmentStore::new(config.branches_root.clone()));
        let driver = ContainerDriver::new(config.clone(), runner.clone());
        let git = GitBookkeeper::new(config.git_repo_dir.clone(), runner);
        let orchestrator = Orchestrator::new(
            config.clone(),
            store.clone(),
            driver,
            TaskTracker::new(),
            git,
        );
        Ok(Self {
            ports: PortAllocator::new(config.base_port),
            config,
            store,
            orchestrator,
            validator,
        })
    }

    /// Real processes and the HTTP credential check.
    pub fn from_config(config: HovelConfig) -> Result<Self, HovelError> {
        let validator = Arc::new(HttpCredentialValidator::new(&config.credential));
        Self::new(config, Arc::new(SystemRunner), validator)
    }

    pub fn config(&self) -> &HovelConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn EnvironmentStore {
        self.store.as_ref()
    }

    pub fn tracker(&self) -> &TaskTracker {
        self.orchestrator.tracker()
    }

    fn require(&self, name: &str) -> Result<EnvironmentRecord, HovelError> {
        self.store
            .get(name)?
            .ok_or_else(|| HovelError::NotFound(format!("Branch {} not found", name)))
    }

    pub fn create(&self, request: CreateRequest) -> Result<CreateOutcome, HovelError> {
        let name = request.name.trim().to_string();
        validate_branch_name(&name)?;
        match &request.credential {
            Some(secret) => self.validator.validate(secret).into_result()?,
            None if self.config.credential.require => {
                return Err(HovelError::CredentialRejected(
                    "credential is required".to_string(),
                ));
            }
            None => {}
        }
        if let Some(list) = &request.services {
            if list.iter().any(|s| s.trim().is_empty()) {
                return Err(HovelError::ValidationError(
                    "service names cannot be empty".to_string(),
                ));
            }
        }
        if self.store.exists(&name) {
            return Err(HovelError::Conflict(format!("Branch {} already exists", name)));
        }

        let mut warnings = Vec::new();
        let git = self.orchestrator.git().create_branch(&name);
        let git_created = git.ok && git.warning.is_none();
        warnings.extend(git.into_warning("git.create_branch"));

        let record = self.ports.reserve(self.store.as_ref(), |port| {
            let mut record = self.orchestrator.provision(
                &name,
                port,
                request.credential.as_ref(),
                request.services.as_deref(),
            )?;
            if git_created {
                record = self
                    .store
                    .update(&name, &mut |r| r.git_branch = Some(name.clone()))?;
            }
            Ok(record)
        });
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                if git_created {
                    if let Some(warning) = self.orchestrator.git().delete_branch(&name).warning {
                        tracing::warn!(branch = %name, "git rollback after failed create: {}", warning);
                    }
                }
                return Err(e);
            }
        };
        tracing::info!(branch = %name, port = record.port, "Created branch {} on port {}", name, record.port);

        let task_id = if request.auto_start {
            let task = self.orchestrator.build_and_run(&name, request.services.clone())?;
            Some(task.id)
        } else {
            None
        };

        Ok(CreateOutcome {
            name: record.name.clone(),
            port: record.port,
            status: record.status,
            directory: record.directory.clone(),
            task_id,
            git_branch: record.git_branch.clone(),
            credential_configured: record.credential_configured,
            warnings,
        })
    }

    pub fn list(&self) -> Result<Vec<EnvironmentRecord>, HovelError> {
        Ok(self.store.list_all()?.into_values().collect())
    }

    pub fn start(
        &self,
        name: &str,
        services: Option<&[String]>,
    ) -> Result<EnvironmentRecord, HovelError> {
        self.require(name)?;
        self.orchestrator.driver().start(name, services)?;
        self.store.update(name, &mut |r| {
            r.status = EnvStatus::Running;
            r.container_started = true;
            if let Some(list) = services {
                r.started_services = Some(list.to_vec());
            }
        })
    }

    pub fn stop(&self, name: &str) -> Result<EnvironmentRecord, HovelError> {
        self.require(name)?;
        self.orchestrator.driver().stop(name)?;
        self.store.update(name, &mut |r| {
            r.status = EnvStatus::Stopped;
            r.container_started = false;
        })
    }

    /// Stop then start. A failed stop is reported as a warning; a failed start is an error.
    pub fn restart(&self, name: &str) -> Result<RestartOutcome, HovelError> {
        self.require(name)?;
        let mut warnings = Vec::new();
        if let Err(e) = self.orchestrator.driver().stop(name) {
            tracing::warn!(branch = name, "Failed to stop branch {} before restart: {}", name, e.summary());
            warnings.push(format!("stop before restart failed: {}", e.summary()));
        }
        let record = self.start(name, None)?;
        Ok(RestartOutcome { record, warnings })
    }

    pub fn status(&self, name: &str) -> Result<BranchStatusReport, HovelError> {
        let record = self.require(name)?;
        let container = self.orchestrator.driver().status(name);
        let build_task = self.tracker().latest_task_for(name)?;
        Ok(BranchStatusReport {
            branch_name: record.name,
            port: record.port,
            record_status: record.status,
            container_started: record.container_started,
            container,
            terminal_session: record.terminal_session,
            build_task,
        })
    }

    pub fn logs(&self, name: &str, lines: usize) -> Result<String, HovelError> {
        self.require(name)?;
        self.orchestrator.driver().logs(name, lines)
    }

    /// Schedules a background build for an existing branch.
    pub fn build(&self, name: &str, services: Option<Vec<String>>) -> Result<BuildTask, HovelError> {
        self.orchestrator.build_and_run(name, services)
    }

    pub fn build_blocking(
        &self,
        name: &str,
        services: Option<&[String]>,
    ) -> Result<BuildTask, HovelError> {
        self.orchestrator.build_and_run_blocking(name, services)
    }

    pub fn build_status(&self, name: &str) -> Result<BuildStatusView, HovelError> {
        self.tracker().find_latest_for_branch(name, self.store.as_ref())
    }

    /// Polls the tracker until `task_id` reaches a terminal state.
    pub fn wait_for_task(&self, task_id: &str, poll: Duration) -> Result<BuildTask, HovelError> {
        loop {
            let task = self
                .tracker()
                .get(task_id)?
                .ok_or_else(|| HovelError::NotFound(format!("Task {} not found", task_id)))?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            thread::sleep(poll);
        }
    }

    pub fn exec(
        &self,
        name: &str,
        command: &[String],
        detach: bool,
    ) -> Result<ExecResult, HovelError> {
        self.require(name)?;
        Ok(self.orchestrator.driver().exec(name, command, detach))
    }

    pub fn delete(&self, name: &str) -> Result<DeleteOutcome, HovelError> {
        let report = self.orchestrator.teardown(name)?;
        if let Some(w) = &report.git.warning {
            tracing::warn!(branch = name, "{}", w);
        }
        Ok(DeleteOutcome {
            branch_name: name.to_string(),
            status: EnvStatus::Deleted,
            report,
        })
    }

    pub fn reap_tasks(&self, max_age_hours: u64) -> Result<usize, HovelError> {
        self.tracker().reap(max_age_hours)
    }

    /// Records terminal session metadata on the branch. The session itself is
    /// started elsewhere; a non-running container only produces a warning.
    pub fn attach_terminal_session(
        &self,
        name: &str,
        url: Option<String>,
    ) -> Result<TerminalOutcome, HovelError> {
        let record = self.require(name)?;
        let port = self.config.terminal_port(record.port)?;
        let session = TerminalSession {
            port,
            url: url.unwrap_or_else(|| format!("http://localhost:{}", port)),
            started_at: time::now_rfc3339(),
        };
        let state = self.orchestrator.driver().status(name).status;
        let warning = (state != ContainerState::Running).then(|| {
            format!(
                "container for branch {} is not running; session recorded anyway",
                name
            )
        });
        let stored = session.clone();
        self.store
            .update(name, &mut |r| r.terminal_session = Some(stored.clone()))?;
        tracing::info!(branch = name, port, "Recorded terminal session");
        Ok(TerminalOutcome { session, warning })
    }
}
