//! Environment Store: durable, filesystem-backed branch environment records.
//!
//! Each branch owns `<branches_root>/<name>/`, and its record lives in the `.branch`
//! file inside that directory. There is no index: a branch exists iff that file
//! exists, so removing the directory removes the record and a crash can never
//! leave the two disagreeing.
//!
//! Callers depend on the [`EnvironmentStore`] trait; [`FsEnvironmentStore`] is the
//! filesystem implementation.

use crate::core::error::HovelError;
use crate::core::time;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use ulid::Ulid;

pub const RECORD_FILE_NAME: &str = ".branch";
const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvStatus {
    Created,
    Building,
    Starting,
    Running,
    Stopped,
    BuildFailed,
    /// Reported in responses only. Deletion removes the record instead of storing this.
    Deleted,
}

impl EnvStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvStatus::Created => "created",
            EnvStatus::Building => "building",
            EnvStatus::Starting => "starting",
            EnvStatus::Running => "running",
            EnvStatus::Stopped => "stopped",
            EnvStatus::BuildFailed => "build_failed",
            EnvStatus::Deleted => "deleted",
        }
    }

    /// A build task currently owns the record's status.
    pub fn is_in_flight(self) -> bool {
        matches!(self, EnvStatus::Building | EnvStatus::Starting)
    }
}

impl fmt::Display for EnvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSession {
    pub port: u16,
    pub url: String,
    pub started_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    #[serde(alias = "branch_name")]
    pub name: String,
    pub port: u16,
    #[serde(alias = "app_directory")]
    pub directory: PathBuf,
    pub status: EnvStatus,
    pub created_at: String,
    #[serde(default)]
    pub build_completed_at: Option<String>,
    #[serde(default)]
    pub build_task_id: Option<String>,
    #[serde(default)]
    pub container_started: bool,
    #[serde(default)]
    pub terminal_session: Option<TerminalSession>,
    #[serde(default)]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub credential_configured: bool,
    #[serde(default)]
    pub started_services: Option<Vec<String>>,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Fields written by other tools or newer versions, carried through rewrites.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl EnvironmentRecord {
    pub fn new(name: &str, port: u16, directory: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            port,
            directory,
            status: EnvStatus::Created,
            created_at: time::now_rfc3339(),
            build_completed_at: None,
            build_task_id: None,
            container_started: false,
            terminal_session: None,
            git_branch: None,
            credential_configured: false,
            started_services: None,
            last_error: None,
            extra: Map::new(),
        }
    }
}

static BRANCH_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap());

/// Branch names double as directory names and container name suffixes.
pub fn validate_branch_name(name: &str) -> Result<(), HovelError> {
    if name.trim().is_empty() {
        return Err(HovelError::ValidationError(
            "branch_name cannot be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(HovelError::ValidationError(format!(
            "branch_name longer than {} characters",
            MAX_NAME_LEN
        )));
    }
    if !BRANCH_NAME_PATTERN.is_match(name) || name.contains("..") {
        return Err(HovelError::ValidationError(format!(
            "branch_name '{}' may only contain letters, digits, '.', '_' and '-'",
            name
        )));
    }
    Ok(())
}

pub trait EnvironmentStore: Send + Sync {
    /// Reads the persisted record. A missing record is `Ok(None)`.
    fn get(&self, name: &str) -> Result<Option<EnvironmentRecord>, HovelError>;

    /// Fully overwrites the record for `name`.
    fn save(&self, name: &str, record: &EnvironmentRecord) -> Result<(), HovelError>;

    fn exists(&self, name: &str) -> bool;

    /// Full scan. Corrupt entries are logged and excluded.
    fn list_all(&self) -> Result<BTreeMap<String, EnvironmentRecord>, HovelError>;

    /// Directory that backs `name`, whether or not it exists yet.
    fn directory_of(&self, name: &str) -> PathBuf;

    /// Re-fetches, mutates, and saves in one step so writers never clobber a
    /// newer record with a stale copy they were holding.
    fn update(
        &self,
        name: &str,
        apply: &mut dyn FnMut(&mut EnvironmentRecord),
    ) -> Result<EnvironmentRecord, HovelError> {
        let mut record = self
            .get(name)?
            .ok_or_else(|| HovelError::NotFound(format!("Branch {} not found", name)))?;
        apply(&mut record);
        self.save(name, &record)?;
        Ok(record)
    }
}

#[derive(Debug, Clone)]
pub struct FsEnvironmentStore {
    root: PathBuf,
}

impl FsEnvironmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.root.join(name).join(RECORD_FILE_NAME)
    }

    fn read_record(path: &Path) -> Result<EnvironmentRecord, HovelError> {
        let content = fs::read_to_string(path).map_err(HovelError::IoError)?;
        serde_json::from_str(&content).map_err(HovelError::SerializationError)
    }
}

impl EnvironmentStore for FsEnvironmentStore {
    fn get(&self, name: &str) -> Result<Option<EnvironmentRecord>, HovelError> {
        let path = self.record_path(name);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_record(&path).map(Some)
    }

    fn save(&self, name: &str, record: &EnvironmentRecord) -> Result<(), HovelError> {
        let dir = self.root.join(name);
        fs::create_dir_all(&dir).map_err(HovelError::IoError)?;
        let body = serde_json::to_string_pretty(record)?;
        let tmp = dir.join(format!(
            "{}.{}.tmp",
            RECORD_FILE_NAME,
            Ulid::new().to_string().to_lowercase()
        ));
        fs::write(&tmp, body).map_err(HovelError::IoError)?;
        if let Err(e) = fs::rename(&tmp, dir.join(RECORD_FILE_NAME)) {
            let _ = fs::remove_file(&tmp);
            return Err(HovelError::IoError(e));
        }
        tracing::debug!(branch = name, status = %record.status, "saved branch record");
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.record_path(name).is_file()
    }

    fn list_all(&self) -> Result<BTreeMap<String, EnvironmentRecord>, HovelError> {
        let mut records = BTreeMap::new();
        if !self.root.exists() {
            return Ok(records);
        }
        for entry in fs::read_dir(&self.root).map_err(HovelError::IoError)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Failed to read branches entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let record_path = path.join(RECORD_FILE_NAME);
            if !record_path.is_file() {
                continue;
            }
            let Some(dir_name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            match Self::read_record(&record_path) {
                Ok(record) => {
                    records.insert(dir_name.to_string(), record);
                }
                Err(e) => {
                    tracing::error!(branch = dir_name, "Skipping unreadable branch record: {}", e);
                }
            }
        }
        Ok(records)
    }

    fn directory_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}
