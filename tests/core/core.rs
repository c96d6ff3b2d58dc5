use hovel::core::config::{CONFIG_FILE_NAME, CredentialMode, HovelConfig};
use hovel::core::error::HovelError;
use hovel::core::ports::PortAllocator;
use hovel::core::store::{
    EnvStatus, EnvironmentRecord, EnvironmentStore, FsEnvironmentStore, RECORD_FILE_NAME,
};
use hovel::core::time;
use std::collections::BTreeSet;
use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::tempdir;

fn record(store: &FsEnvironmentStore, name: &str, port: u16) -> EnvironmentRecord {
    EnvironmentRecord::new(name, port, store.directory_of(name))
}

#[test]
fn store_save_get_exists_round_trip() {
    let tmp = tempdir().expect("tempdir");
    let store = FsEnvironmentStore::new(tmp.path().join("branches"));

    assert!(!store.exists("feature-x"));
    assert!(store.get("feature-x").expect("get").is_none());

    let rec = record(&store, "feature-x", 8001);
    store.save("feature-x", &rec).expect("save");

    assert!(store.exists("feature-x"));
    assert!(tmp.path().join("branches/feature-x").join(RECORD_FILE_NAME).is_file());
    let loaded = store.get("feature-x").expect("get").expect("present");
    assert_eq!(loaded, rec);

    let leftovers: Vec<_> = fs::read_dir(tmp.path().join("branches/feature-x"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temporary files must be renamed away");
}

#[test]
fn list_all_skips_plain_dirs_and_corrupt_records() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().join("branches");
    let store = FsEnvironmentStore::new(&root);

    store.save("a", &record(&store, "a", 8001)).unwrap();
    store.save("b", &record(&store, "b", 8002)).unwrap();
    fs::create_dir_all(root.join("no-record")).unwrap();
    fs::create_dir_all(root.join("corrupt")).unwrap();
    fs::write(root.join("corrupt").join(RECORD_FILE_NAME), "{not json").unwrap();
    fs::write(root.join("stray-file"), "x").unwrap();

    let all = store.list_all().expect("list");
    assert_eq!(all.keys().cloned().collect::<Vec<_>>(), vec!["a", "b"]);
    assert!(matches!(store.get("corrupt"), Err(HovelError::SerializationError(_))));
}

#[test]
fn list_all_on_missing_root_is_empty() {
    let tmp = tempdir().expect("tempdir");
    let store = FsEnvironmentStore::new(tmp.path().join("never-created"));
    assert!(store.list_all().expect("list").is_empty());
}

#[test]
fn update_refetches_and_reports_missing() {
    let tmp = tempdir().expect("tempdir");
    let store = FsEnvironmentStore::new(tmp.path());
    store.save("x", &record(&store, "x", 8001)).unwrap();

    // Another writer changes the record behind our back.
    let mut newer = store.get("x").unwrap().unwrap();
    newer.build_task_id = Some("build_x_1".to_string());
    store.save("x", &newer).unwrap();

    let updated = store
        .update("x", &mut |r| r.status = EnvStatus::Stopped)
        .expect("update");
    assert_eq!(updated.status, EnvStatus::Stopped);
    assert_eq!(updated.build_task_id.as_deref(), Some("build_x_1"));

    let missing = store.update("gone", &mut |r| r.status = EnvStatus::Running);
    assert!(matches!(missing, Err(HovelError::NotFound(_))));
}

#[test]
fn removing_directory_removes_record() {
    let tmp = tempdir().expect("tempdir");
    let store = FsEnvironmentStore::new(tmp.path());
    store.save("x", &record(&store, "x", 8001)).unwrap();
    fs::remove_dir_all(store.directory_of("x")).unwrap();
    assert!(!store.exists("x"));
    assert!(store.list_all().unwrap().is_empty());
}

#[test]
fn ports_start_above_base_and_fill_gaps() {
    let tmp = tempdir().expect("tempdir");
    let store = FsEnvironmentStore::new(tmp.path());
    let ports = PortAllocator::new(8000);

    assert_eq!(ports.next_port(&store).unwrap(), 8001);
    store.save("a", &record(&store, "a", 8001)).unwrap();
    store.save("c", &record(&store, "c", 8003)).unwrap();
    assert_eq!(ports.next_port(&store).unwrap(), 8002);
}

#[test]
fn concurrent_reservations_never_share_a_port() {
    let tmp = tempdir().expect("tempdir");
    let store = Arc::new(FsEnvironmentStore::new(tmp.path()));
    let ports = Arc::new(PortAllocator::new(8000));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            let ports = ports.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let name = format!("b{}", i);
                ports
                    .reserve(store.as_ref(), |port| {
                        let rec = EnvironmentRecord::new(&name, port, store.directory_of(&name));
                        store.save(&name, &rec)?;
                        Ok(port)
                    })
                    .expect("reserve")
            })
        })
        .collect();

    let assigned: BTreeSet<u16> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(assigned, (8001..=8008).collect::<BTreeSet<u16>>());
}

#[test]
fn poisoned_allocation_lock_is_reported() {
    let tmp = tempdir().expect("tempdir");
    let store = Arc::new(FsEnvironmentStore::new(tmp.path()));
    let ports = Arc::new(PortAllocator::new(8000));

    let (p, s) = (ports.clone(), store.clone());
    let crashed = thread::spawn(move || {
        p.reserve(s.as_ref(), |_port| -> Result<(), HovelError> {
            panic!("writer died while holding the lock")
        })
    })
    .join();
    assert!(crashed.is_err());

    let err = ports.reserve(store.as_ref(), Ok).unwrap_err();
    assert!(matches!(err, HovelError::LockPoisoned(_)));
    assert_eq!(err.kind(), "lock_poisoned");
}

#[test]
fn config_file_values_then_env_overrides() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join(CONFIG_FILE_NAME);
    fs::write(
        &path,
        r#"
branches_root = "/srv/branches"
base_port = 9000
compose_command = ["docker", "compose"]

[credential]
mode = "environment"
"#,
    )
    .unwrap();

    let mut config = HovelConfig::from_file(&path).expect("parse");
    assert_eq!(config.base_port, 9000);
    assert_eq!(config.compose_command, vec!["docker", "compose"]);
    assert_eq!(config.credential.mode, CredentialMode::Environment);
    assert_eq!(config.descriptor_file, "docker-compose.yaml");

    config
        .apply_env_overrides(|key| match key {
            "HOVEL_BASE_PORT" => Some("7000".to_string()),
            "APP_TEMPLATE_PATH" => Some("/tmp/tpl".to_string()),
            _ => None,
        })
        .expect("overrides");
    assert_eq!(config.base_port, 7000);
    assert_eq!(config.template_dir.to_str(), Some("/tmp/tpl"));
    assert_eq!(config.branches_root.to_str(), Some("/srv/branches"));
}

#[test]
fn explicit_missing_config_is_not_found() {
    let tmp = tempdir().expect("tempdir");
    let err = HovelConfig::load(Some(&tmp.path().join("absent.toml"))).unwrap_err();
    assert!(matches!(err, HovelError::NotFound(_)));
}

#[test]
fn invalid_config_values_are_rejected() {
    assert!(matches!(
        HovelConfig::from_toml_str("base_port = \"lots\""),
        Err(HovelError::ConfigError(_))
    ));
    let config = HovelConfig::from_toml_str("compose_command = []").expect("parse");
    assert!(matches!(config.validate(), Err(HovelError::ConfigError(_))));
}

#[test]
fn command_envelope_merges_payload() {
    let envelope = time::command_envelope("list", "ok", serde_json::json!({ "count": 2 }));
    assert_eq!(envelope["cmd"], "list");
    assert_eq!(envelope["status"], "ok");
    assert_eq!(envelope["count"], 2);
    assert!(time::parse_rfc3339(envelope["ts"].as_str().unwrap()).is_some());
}
