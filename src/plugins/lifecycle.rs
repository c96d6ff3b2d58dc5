//! Lifecycle Orchestrator: provision, build-and-run, teardown.
//!
//! Every status write re-fetches the record through [`EnvironmentStore::update`],
//! so a build thread and a foreground command never clobber each other with stale
//! copies.

use crate::core::advisory::Advisory;
use crate::core::config::HovelConfig;
use crate::core::error::HovelError;
use crate::core::store::{EnvStatus, EnvironmentRecord, EnvironmentStore};
use crate::core::time;
use crate::core::tree;
use crate::plugins::container::{ContainerDriver, ContainerState, ContainerStatus, DestroyReport};
use crate::plugins::credential;
use crate::plugins::descriptor;
use crate::plugins::git::GitBookkeeper;
use crate::plugins::tasks::{BuildTask, BuildTaskStatus, TaskHandle, TaskTracker};
use secrecy::SecretString;
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

const PROGRESS_BUILDING: u8 = 10;
const PROGRESS_STARTING: u8 = 50;
const PROGRESS_POLL_CEILING: u8 = 95;

#[derive(Debug, Clone, Serialize)]
pub struct TeardownReport {
    #[serde(flatten)]
    pub destroy: DestroyReport,
    pub git: Advisory,
}

#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<HovelConfig>,
    store: Arc<dyn EnvironmentStore>,
    driver: ContainerDriver,
    tracker: TaskTracker,
    git: GitBookkeeper,
}

impl Orchestrator {
    pub fn new(
        config: Arc<HovelConfig>,
        store: Arc<dyn EnvironmentStore>,
        driver: ContainerDriver,
        tracker: TaskTracker,
        git: GitBookkeeper,
    ) -> Self {
        Self {
            config,
            store,
            driver,
            tracker,
            git,
        }
    }

    pub fn driver(&self) -> &ContainerDriver {
        &self.driver
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn git(&self) -> &GitBookkeeper {
        &self.git
    }

    /// Materializes `<branches_root>/<name>` from the template and persists a
    /// `created` record claiming `port`.
    ///
    /// Ports and the service subset are checked before anything is copied. A
    /// failure after the copy removes the branch directory again, so a directory
    /// never outlives a failed provision without its record.
    pub fn provision(
        &self,
        name: &str,
        port: u16,
        credential: Option<&SecretString>,
        services: Option<&[String]>,
    ) -> Result<EnvironmentRecord, HovelError> {
        let template = &self.config.template_dir;
        if !template.is_dir() {
            tracing::error!("Template directory not found: {}", template.display());
            return Err(HovelError::NotFound(format!(
                "Template directory not found: {}",
                template.display()
            )));
        }
        let terminal_port = self.config.terminal_port(port)?;
        let rendered =
            descriptor::render_for_branch(&self.config, name, port, terminal_port, services)?;

        let dir = self.store.directory_of(name);
        let materialized = self.materialize(
            name,
            port,
            terminal_port,
            &dir,
            rendered.as_deref(),
            credential,
        );
        match materialized {
            Ok(record) => {
                tracing::info!(branch = name, port, "Provisioned branch environment");
                Ok(record)
            }
            Err(e) => {
                if dir.exists() {
                    if let Err(cleanup) = fs::remove_dir_all(&dir) {
                        tracing::warn!(
                            branch = name,
                            "Failed to remove {} after provision error: {}",
                            dir.display(),
                            cleanup
                        );
                    }
                }
                tracing::error!(branch = name, "Provision failed: {}", e);
                Err(e)
            }
        }
    }

    fn materialize(
        &self,
        name: &str,
        port: u16,
        terminal_port: u16,
        dir: &Path,
        rendered: Option<&str>,
        credential: Option<&SecretString>,
    ) -> Result<EnvironmentRecord, HovelError> {
        let template = &self.config.template_dir;
        let files = tree::replace_tree(template, dir)?;
        tracing::info!(
            branch = name,
            files,
            "Duplicated app directory from {} to {}",
            template.display(),
            dir.display()
        );

        descriptor::write_env_file(dir, name, port, terminal_port)?;
        if let Some(rendered) = rendered {
            descriptor::write_descriptor(&self.config, dir, name, rendered)?;
        }
        if let Some(secret) = credential {
            credential::materialize_settings(&self.config.credential, dir, name, secret)?;
        }

        let mut record = EnvironmentRecord::new(name, port, dir.to_path_buf());
        record.credential_configured = credential.is_some();
        self.store.save(name, &record)?;
        Ok(record)
    }

    /// Schedules build, start, and readiness polling on a background thread and
    /// returns the freshly registered task.
    pub fn build_and_run(
        &self,
        name: &str,
        services: Option<Vec<String>>,
    ) -> Result<BuildTask, HovelError> {
        self.require_record(name)?;
        let worker = self.clone();
        let branch = name.to_string();
        let task_id = self.tracker.schedule(name, move |handle| {
            worker.run_build_sequence(&handle, &branch, services.as_deref());
        })?;
        self.task_snapshot(&task_id)
    }

    /// Same sequence as [`Orchestrator::build_and_run`], on the caller's thread.
    pub fn build_and_run_blocking(
        &self,
        name: &str,
        services: Option<&[String]>,
    ) -> Result<BuildTask, HovelError> {
        self.require_record(name)?;
        let task_id = self.tracker.register(name)?;
        self.run_build_sequence(&self.tracker.handle(&task_id), name, services);
        self.task_snapshot(&task_id)
    }

    fn task_snapshot(&self, task_id: &str) -> Result<BuildTask, HovelError> {
        self.tracker
            .get(task_id)?
            .ok_or_else(|| HovelError::NotFound(format!("Task {} not found", task_id)))
    }

    fn require_record(&self, name: &str) -> Result<EnvironmentRecord, HovelError> {
        self.store
            .get(name)?
            .ok_or_else(|| HovelError::NotFound(format!("Branch {} not found", name)))
    }

    /// Drives one task to `completed` or `failed`. Steps already done are not
    /// rolled back on failure.
    pub fn run_build_sequence(&self, handle: &TaskHandle, name: &str, services: Option<&[String]>) {
        match self.execute_build(handle, name, services) {
            Ok(()) => {
                tracing::info!(branch = name, task_id = handle.task_id(), "Build task completed");
            }
            Err(e) => {
                let reason = e.summary();
                tracing::error!(branch = name, task_id = handle.task_id(), "Build task failed: {}", e);
                if let Err(te) = handle.fail(&reason) {
                    tracing::warn!(task_id = handle.task_id(), "Could not mark task failed: {}", te);
                }
                if self.store.exists(name) {
                    let marked = self.store.update(name, &mut |r| {
                        r.status = EnvStatus::BuildFailed;
                        r.container_started = false;
                        r.last_error = Some(reason.clone());
                    });
                    if let Err(se) = marked {
                        tracing::warn!(branch = name, "Could not record build failure: {}", se);
                    }
                }
            }
        }
    }

    fn execute_build(
        &self,
        handle: &TaskHandle,
        name: &str,
        services: Option<&[String]>,
    ) -> Result<(), HovelError> {
        let task_id = handle.task_id().to_string();
        handle.advance(
            BuildTaskStatus::Building,
            PROGRESS_BUILDING,
            "Building container image...",
        )?;
        self.store.update(name, &mut |r| {
            r.status = EnvStatus::Building;
            r.build_task_id = Some(task_id.clone());
            r.last_error = None;
        })?;
        self.driver.build(name)?;

        handle.advance(
            BuildTaskStatus::Starting,
            PROGRESS_STARTING,
            "Starting containers...",
        )?;
        self.store.update(name, &mut |r| r.status = EnvStatus::Starting)?;
        self.driver.start(name, services)?;

        let ready = self.wait_until_running(handle, name)?;

        let record = self.store.update(name, &mut |r| {
            r.status = EnvStatus::Running;
            r.container_started = true;
            r.build_completed_at = Some(time::now_rfc3339());
            if let Some(list) = services {
                r.started_services = Some(list.to_vec());
            }
        })?;
        handle.complete(
            "Branch container started successfully",
            json!({
                "branch_name": name,
                "port": record.port,
                "status": record.status,
                "containers": ready.containers,
            }),
        )?;
        Ok(())
    }

    /// Polls the driver until it reports `running`, up to `readiness_attempts` checks.
    fn wait_until_running(&self, handle: &TaskHandle, name: &str) -> Result<ContainerStatus, HovelError> {
        let attempts = self.config.readiness_attempts.max(1);
        let span = u32::from(PROGRESS_POLL_CEILING - PROGRESS_STARTING);
        for attempt in 1..=attempts {
            let status = self.driver.status(name);
            if status.status == ContainerState::Running {
                return Ok(status);
            }
            let step = PROGRESS_STARTING as u32 + span * attempt / attempts;
            handle.progress(
                u8::try_from(step).unwrap_or(PROGRESS_POLL_CEILING),
                &format!("Waiting for containers ({}/{})", attempt, attempts),
            )?;
            tracing::debug!(branch = name, attempt, state = ?status.status, "container not running yet");
            if attempt < attempts {
                thread::sleep(self.config.readiness_interval());
            }
        }
        Err(HovelError::Timeout(format!(
            "containers for branch {} not running after {} checks",
            name, attempts
        )))
    }

    /// Destroys containers, images and files, then deletes the git branch.
    pub fn teardown(&self, name: &str) -> Result<TeardownReport, HovelError> {
        if !self.store.exists(name) {
            return Err(HovelError::NotFound(format!("Branch {} not found", name)));
        }
        let destroy = self.driver.destroy(name)?;
        let git = self.git.delete_branch(name);
        tracing::info!(branch = name, "Tore down branch environment");
        Ok(TeardownReport { destroy, git })
    }

    pub fn branch_dir(&self, name: &str) -> PathBuf {
        self.store.directory_of(name)
    }
}
