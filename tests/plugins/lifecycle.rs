#[path = "../helpers/mod.rs"]
mod helpers;

use helpers::{Fixture, ScriptedRunner, wait_for};
use hovel::core::config::HovelConfig;
use hovel::core::error::HovelError;
use hovel::core::store::{EnvStatus, EnvironmentStore, FsEnvironmentStore};
use hovel::plugins::container::ContainerDriver;
use hovel::plugins::descriptor;
use hovel::plugins::git::GitBookkeeper;
use hovel::plugins::lifecycle::Orchestrator;
use hovel::plugins::tasks::{BuildTaskStatus, TaskTracker};
use secrecy::SecretString;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

fn orchestrator(config: &HovelConfig, runner: Arc<ScriptedRunner>) -> (Orchestrator, Arc<FsEnvironmentStore>) {
    let config = Arc::new(config.clone());
    let store = Arc::new(FsEnvironmentStore::new(config.branches_root.clone()));
    let driver = ContainerDriver::new(config.clone(), runner.clone());
    let git = GitBookkeeper::new(config.git_repo_dir.clone(), runner);
    let orch = Orchestrator::new(config, store.clone(), driver, TaskTracker::new(), git);
    (orch, store)
}

#[test]
fn provision_materializes_branch_tree() {
    let fx = Fixture::new();
    let (orch, store) = orchestrator(&fx.config, ScriptedRunner::new());
    let secret = SecretString::from("key-abc");

    let record = orch
        .provision("feature-x", 8001, Some(&secret), None)
        .expect("provision");
    let dir = fx.config.branch_dir("feature-x");

    assert!(store.exists("feature-x"));
    assert_eq!(record.status, EnvStatus::Created);
    assert_eq!(record.directory, dir);
    assert!(record.credential_configured);
    assert!(dir.join("src/app.py").is_file());

    let env = fs::read_to_string(dir.join(".env")).unwrap();
    assert!(env.contains("PORT=8001"));
    assert!(env.contains("PORT_TTYD=9001"));

    let compose = fs::read_to_string(dir.join("docker-compose.yaml")).unwrap();
    assert!(descriptor::remaining_placeholders(&compose).is_empty());
    assert!(compose.contains("hovel-app-feature-x"));
    assert!(compose.contains("8001:8000"));

    let settings = fs::read_to_string(dir.join(".gemini/config.json")).unwrap();
    assert!(settings.contains("key-abc"));
}

#[test]
fn provision_wipes_stale_directory() {
    let fx = Fixture::new();
    let (orch, _store) = orchestrator(&fx.config, ScriptedRunner::new());
    let dir = fx.config.branch_dir("b");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("leftover.txt"), "old").unwrap();

    orch.provision("b", 8001, None, None).expect("provision");
    assert!(!dir.join("leftover.txt").exists());
    assert!(!dir.join(".gemini").exists());
}

#[test]
fn provision_without_template_is_not_found() {
    let fx = Fixture::new();
    let mut config = fx.config.clone();
    config.template_dir = fx.root().join("missing-template");
    let (orch, store) = orchestrator(&config, ScriptedRunner::new());

    let err = orch.provision("b", 8001, None, None).unwrap_err();
    assert!(matches!(err, HovelError::NotFound(_)));
    assert!(!store.exists("b"));
}

#[test]
fn provision_with_service_subset_filters_descriptor() {
    let fx = Fixture::new();
    let (orch, _store) = orchestrator(&fx.config, ScriptedRunner::new());
    orch.provision("b", 8001, None, Some(&["app".to_string()]))
        .expect("provision");
    let compose = fs::read_to_string(fx.config.branch_dir("b").join("docker-compose.yaml")).unwrap();
    assert_eq!(descriptor::service_names(&compose), vec!["app".to_string()]);

    let err = orch
        .provision("c", 8002, None, Some(&["nope".to_string()]))
        .unwrap_err();
    assert!(matches!(err, HovelError::ValidationError(_)));
    assert!(!fx.config.branch_dir("c").exists());
}

#[test]
fn failure_after_copy_removes_branch_directory() {
    let fx = Fixture::new();
    let mut config = fx.config.clone();
    // Parent directory never exists, so writing the descriptor fails after the copy.
    config.descriptor_file = "missing-dir/docker-compose.yaml".to_string();
    let (orch, store) = orchestrator(&config, ScriptedRunner::new());

    let err = orch.provision("b", 8001, None, None).unwrap_err();
    assert!(matches!(err, HovelError::IoError(_)));
    assert!(!config.branch_dir("b").exists());
    assert!(!store.exists("b"));
}

#[test]
fn terminal_port_overflow_fails_before_copy() {
    let fx = Fixture::new();
    let (orch, store) = orchestrator(&fx.config, ScriptedRunner::new());

    let err = orch.provision("b", 64601, None, None).unwrap_err();
    assert!(matches!(err, HovelError::ValidationError(_)));
    assert!(!fx.config.branch_dir("b").exists());
    assert!(!store.exists("b"));
}

#[test]
fn blocking_build_walks_every_step() {
    let fx = Fixture::new();
    let runner = ScriptedRunner::new();
    let (orch, store) = orchestrator(&fx.config, runner.clone());
    orch.provision("b", 8001, None, None).unwrap();

    let task = orch.build_and_run_blocking("b", None).expect("build");
    assert_eq!(task.status, BuildTaskStatus::Completed);
    assert_eq!(task.progress, 100);
    assert!(task.started_at.is_some() && task.completed_at.is_some());
    assert_eq!(task.result.as_ref().unwrap()["port"], 8001);

    let record = store.get("b").unwrap().unwrap();
    assert_eq!(record.status, EnvStatus::Running);
    assert!(record.container_started);
    assert!(record.build_completed_at.is_some());
    assert_eq!(record.build_task_id.as_deref(), Some(task.id.as_str()));

    let subs = runner.compose_subcommands();
    assert_eq!(&subs[..3], &["build", "up", "ps"]);
}

#[test]
fn failed_build_marks_task_and_record() {
    let fx = Fixture::new();
    let runner = ScriptedRunner::new();
    runner.fail_on("build");
    let (orch, store) = orchestrator(&fx.config, runner.clone());
    orch.provision("b", 8001, None, None).unwrap();

    let task = orch.build_and_run_blocking("b", None).expect("task returned");
    assert_eq!(task.status, BuildTaskStatus::Failed);
    assert!(task.error.as_deref().unwrap().contains("simulated build failure"));
    assert!(task.result.is_none());

    let record = store.get("b").unwrap().unwrap();
    assert_eq!(record.status, EnvStatus::BuildFailed);
    assert!(!runner.compose_subcommands().contains(&"up".to_string()));
    assert!(record.last_error.is_some());
}

#[test]
fn readiness_poll_times_out() {
    let fx = Fixture::new();
    let runner = ScriptedRunner::new();
    runner.never_ready();
    let (orch, store) = orchestrator(&fx.config, runner.clone());
    orch.provision("b", 8001, None, None).unwrap();

    let task = orch.build_and_run_blocking("b", None).unwrap();
    assert_eq!(task.status, BuildTaskStatus::Failed);
    assert!(task.error.as_deref().unwrap().contains("not running after 5 checks"));
    assert!(task.progress <= 95);
    let polls = runner.compose_subcommands().iter().filter(|s| *s == "ps").count();
    assert_eq!(polls, 5);
    assert_eq!(store.get("b").unwrap().unwrap().status, EnvStatus::BuildFailed);
}

#[test]
fn async_build_returns_before_completion_and_finishes() {
    let fx = Fixture::new();
    let (orch, store) = orchestrator(&fx.config, ScriptedRunner::new());
    orch.provision("b", 8001, None, None).unwrap();

    let task = orch.build_and_run("b", Some(vec!["app".to_string()])).expect("schedule");
    assert!(task.id.starts_with("build_b_"));

    let done = wait_for(Duration::from_secs(5), || {
        orch.tracker()
            .get(&task.id)
            .unwrap()
            .filter(|t| t.status.is_terminal())
    })
    .expect("task finishes in the poll window");
    assert_eq!(done.status, BuildTaskStatus::Completed);

    let record = store.get("b").unwrap().unwrap();
    assert_eq!(record.status, EnvStatus::Running);
    assert_eq!(record.started_services, Some(vec!["app".to_string()]));
}

#[test]
fn build_for_unknown_branch_is_not_found() {
    let fx = Fixture::new();
    let (orch, _store) = orchestrator(&fx.config, ScriptedRunner::new());
    assert!(matches!(orch.build_and_run("ghost", None), Err(HovelError::NotFound(_))));
    assert!(orch.tracker().is_empty());
}

#[test]
fn teardown_removes_record_and_reports_advisory_git() {
    let fx = Fixture::new();
    let (orch, store) = orchestrator(&fx.config, ScriptedRunner::new());
    orch.provision("b", 8001, None, None).unwrap();

    let report = orch.teardown("b").expect("teardown");
    assert!(!store.exists("b"));
    assert!(!fx.config.branch_dir("b").exists());
    assert!(report.git.ok);
    assert!(report.git.warning.is_some());

    assert!(matches!(orch.teardown("b"), Err(HovelError::NotFound(_))));
}
