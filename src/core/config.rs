//! Layered configuration: defaults, then `hovel.toml`, then environment overrides.

use crate::core::error::HovelError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "hovel.toml";

/// How a supplied credential reaches the branch's settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialMode {
    /// Secret is written into the rendered settings file.
    Embed,
    /// Settings file references `${env_var}`; the runtime environment supplies the value.
    Environment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Reject `create` requests that carry no credential.
    pub require: bool,
    pub bypass_token: String,
    pub validation_url: String,
    pub timeout_secs: u64,
    /// Source directory copied into each branch when a credential is supplied.
    pub settings_template_dir: PathBuf,
    /// Directory name inside the branch directory.
    pub settings_dir_name: String,
    pub mode: CredentialMode,
    pub env_var: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            require: true,
            bypass_token: "test-api-key-for-config".to_string(),
            validation_url: "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent".to_string(),
            timeout_secs: 10,
            settings_template_dir: PathBuf::from(".gemini"),
            settings_dir_name: ".gemini".to_string(),
            mode: CredentialMode::Embed,
            env_var: "GEMINI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HovelConfig {
    pub branches_root: PathBuf,
    pub template_dir: PathBuf,
    pub descriptor_template: String,
    pub descriptor_file: String,
    pub base_port: u16,
    pub terminal_port_offset: u16,
    pub compose_command: Vec<String>,
    pub container_runtime: String,
    pub container_prefix: String,
    pub primary_service: String,
    pub readiness_attempts: u32,
    pub readiness_interval_ms: u64,
    pub task_max_age_hours: u64,
    pub git_repo_dir: PathBuf,
    pub credential: CredentialConfig,
}

impl Default for HovelConfig {
    fn default() -> Self {
        Self {
            branches_root: PathBuf::from("branches"),
            template_dir: PathBuf::from("/opt/hovel-templates/app-template"),
            descriptor_template: "docker-compose.branch.template.yaml".to_string(),
            descriptor_file: "docker-compose.yaml".to_string(),
            base_port: 8000,
            terminal_port_offset: 1000,
            compose_command: vec!["docker-compose".to_string()],
            container_runtime: "docker".to_string(),
            container_prefix: "hovel-app-".to_string(),
            primary_service: "app".to_string(),
            readiness_attempts: 30,
            readiness_interval_ms: 2_000,
            task_max_age_hours: 24,
            git_repo_dir: PathBuf::from("app"),
            credential: CredentialConfig::default(),
        }
    }
}

impl HovelConfig {
    /// Load `hovel.toml` from `path`, or from the working directory when `path` is `None`.
    /// A missing default file is not an error; an explicitly named missing file is.
    pub fn load(path: Option<&Path>) -> Result<Self, HovelError> {
        let mut config = match path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(HovelError::NotFound(format!(
                        "config file {} does not exist",
                        explicit.display()
                    )));
                }
                Self::from_file(explicit)?
            }
            None => {
                let default_path = PathBuf::from(CONFIG_FILE_NAME);
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, HovelError> {
        let content = fs::read_to_string(path).map_err(HovelError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, HovelError> {
        toml::from_str(content).map_err(|e| HovelError::ConfigError(e.to_string()))
    }

    /// Environment overrides applied on top of file values. The lookup is injected so
    /// tests never have to mutate the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), HovelError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("APP_TEMPLATE_PATH").filter(|v| !v.trim().is_empty()) {
            self.template_dir = PathBuf::from(dir);
        }
        if let Some(root) = lookup("HOVEL_BRANCHES_ROOT").filter(|v| !v.trim().is_empty()) {
            self.branches_root = PathBuf::from(root);
        }
        if let Some(port) = lookup("HOVEL_BASE_PORT").filter(|v| !v.trim().is_empty()) {
            self.base_port = port.trim().parse().map_err(|_| {
                HovelError::ConfigError(format!("HOVEL_BASE_PORT is not a port number: {}", port))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), HovelError> {
        if self.compose_command.is_empty() || self.compose_command[0].trim().is_empty() {
            return Err(HovelError::ConfigError(
                "compose_command must name a program".to_string(),
            ));
        }
        if self.readiness_attempts == 0 {
            return Err(HovelError::ConfigError(
                "readiness_attempts must be at least 1".to_string(),
            ));
        }
        if self.descriptor_file.trim().is_empty() {
            return Err(HovelError::ConfigError(
                "descriptor_file must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn branch_dir(&self, name: &str) -> PathBuf {
        self.branches_root.join(name)
    }

    pub fn descriptor_template_path(&self) -> PathBuf {
        self.template_dir.join(&self.descriptor_template)
    }

    /// `port + terminal_port_offset`. A sum past 65535 is a validation error, never clamped.
    pub fn terminal_port(&self, port: u16) -> Result<u16, HovelError> {
        port.checked_add(self.terminal_port_offset).ok_or_else(|| {
            HovelError::ValidationError(format!(
                "terminal port for {} (offset {}) exceeds 65535",
                port, self.terminal_port_offset
            ))
        })
    }

    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }
}
