#[path = "../helpers/mod.rs"]
mod helpers;

use helpers::{COMPOSE_TEMPLATE, Fixture, ScriptedRunner};
use hovel::core::error::HovelError;
use hovel::plugins::container::{ContainerDriver, ContainerState};
use hovel::plugins::descriptor;
use std::fs;
use std::sync::Arc;

fn driver_with_branch(fx: &Fixture, runner: Arc<ScriptedRunner>, name: &str) -> ContainerDriver {
    let dir = fx.config.branch_dir(name);
    fs::create_dir_all(&dir).unwrap();
    let rendered = descriptor::render_descriptor(COMPOSE_TEMPLATE, name, 8001, 9001);
    fs::write(dir.join(&fx.config.descriptor_file), rendered).unwrap();
    ContainerDriver::new(Arc::new(fx.config.clone()), runner)
}

#[test]
fn compose_runs_in_branch_dir_with_descriptor_flag() {
    let fx = Fixture::new();
    let runner = ScriptedRunner::new();
    let driver = driver_with_branch(&fx, runner.clone(), "web");

    driver.build("web").expect("build");
    driver
        .start("web", Some(&["app".to_string()]))
        .expect("start");

    let calls = runner.calls();
    assert_eq!(calls.len(), 2);
    for call in &calls {
        assert_eq!(call.program, "docker-compose");
        assert_eq!(&call.args[..2], &["-f".to_string(), "docker-compose.yaml".to_string()]);
        assert_eq!(call.cwd.as_deref(), Some(fx.config.branch_dir("web").as_path()));
    }
    assert_eq!(calls[1].args[2..], ["up", "-d", "app"]);
}

#[test]
fn missing_descriptor_is_not_found() {
    let fx = Fixture::new();
    let runner = ScriptedRunner::new();
    let driver = ContainerDriver::new(Arc::new(fx.config.clone()), runner.clone());

    assert!(matches!(driver.build("ghost"), Err(HovelError::NotFound(_))));
    assert!(matches!(driver.stop("ghost"), Err(HovelError::NotFound(_))));
    assert_eq!(driver.status("ghost").status, ContainerState::NotFound);
    assert!(runner.calls().is_empty(), "no tool runs without a descriptor");
}

#[test]
fn tool_failure_carries_output() {
    let fx = Fixture::new();
    let runner = ScriptedRunner::new();
    runner.fail_on("build");
    let driver = driver_with_branch(&fx, runner, "web");

    match driver.build("web") {
        Err(HovelError::ExternalToolFailure {
            exit_code, stderr, ..
        }) => {
            assert_eq!(exit_code, Some(1));
            assert!(stderr.contains("simulated build failure"));
        }
        other => panic!("expected tool failure, got {:?}", other),
    }
}

#[test]
fn status_follows_up_and_down() {
    let fx = Fixture::new();
    let runner = ScriptedRunner::new();
    let driver = driver_with_branch(&fx, runner, "web");

    assert_eq!(driver.status("web").status, ContainerState::Stopped);
    driver.start("web", None).unwrap();
    let up = driver.status("web");
    assert_eq!(up.status, ContainerState::Running);
    assert_eq!(up.containers.len(), 1);
    assert_eq!(up.containers[0].name.as_deref(), Some("hovel-app-web"));
    assert_eq!(up.containers[0].service.as_deref(), Some("app"));

    driver.stop("web").unwrap();
    assert_eq!(driver.status("web").status, ContainerState::Stopped);
}

#[test]
fn status_reports_error_when_ps_fails() {
    let fx = Fixture::new();
    let runner = ScriptedRunner::new();
    runner.fail_on("ps");
    let driver = driver_with_branch(&fx, runner, "web");
    let status = driver.status("web");
    assert_eq!(status.status, ContainerState::Error);
    assert!(status.message.unwrap().contains("simulated ps failure"));
}

#[test]
fn exec_fails_closed_unless_running() {
    let fx = Fixture::new();
    let runner = ScriptedRunner::new();
    let driver = driver_with_branch(&fx, runner.clone(), "web");
    let cmd = vec!["ls".to_string(), "-la".to_string()];

    let refused = driver.exec("web", &cmd, false);
    assert!(!refused.success);
    assert!(refused.stderr.contains("not running"));
    assert!(!runner.compose_subcommands().contains(&"exec".to_string()));

    driver.start("web", None).unwrap();
    let ran = driver.exec("web", &cmd, false);
    assert!(ran.success, "{:?}", ran);
    assert_eq!(ran.exit_code, Some(0));
    let exec_call = runner
        .calls()
        .into_iter()
        .find(|c| c.args.get(2).map(String::as_str) == Some("exec"))
        .expect("exec call");
    assert_eq!(exec_call.args[3..], ["-T", "app", "ls", "-la"]);
}

#[test]
fn primary_service_falls_back_to_first_declared() {
    let fx = Fixture::new();
    let mut config = fx.config.clone();
    config.primary_service = "worker".to_string();
    let dir = config.branch_dir("web");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join(&config.descriptor_file),
        "services:\n  web:\n    image: a\n  db:\n    image: b\n",
    )
    .unwrap();
    let driver = ContainerDriver::new(Arc::new(config), ScriptedRunner::new());
    assert_eq!(driver.primary_service("web"), "web");
}

#[test]
fn logs_return_tail_output() {
    let fx = Fixture::new();
    let runner = ScriptedRunner::new();
    let driver = driver_with_branch(&fx, runner.clone(), "web");
    let logs = driver.logs("web", 20).expect("logs");
    assert!(logs.contains("listening on 8000"));
    let call = runner.calls().pop().unwrap();
    assert_eq!(call.args[2..], ["logs", "--tail", "20"]);
}

#[test]
fn destroy_removes_directory_even_when_cleanup_steps_fail() {
    let fx = Fixture::new();
    let runner = ScriptedRunner::new();
    runner.fail_on("down");
    let driver = driver_with_branch(&fx, runner.clone(), "web");

    let report = driver.destroy("web").expect("destroy");
    assert!(!fx.config.branch_dir("web").exists());
    assert_eq!(report.actions_performed, vec!["deleted_branch_files".to_string()]);
    assert_eq!(report.warnings.len(), 1);

    let docker: Vec<Vec<String>> = runner
        .calls()
        .into_iter()
        .filter(|c| c.program == "docker")
        .map(|c| c.args)
        .collect();
    assert_eq!(
        docker,
        vec![
            vec!["rm".to_string(), "-f".to_string(), "hovel-app-web".to_string()],
            vec!["rmi".to_string(), "-f".to_string(), "web-app-web".to_string()],
        ]
    );
}
