//! Credential validation and per-branch settings materialization.
//!
//! The secret stays wrapped in [`SecretString`] from the request boundary until
//! it is written into the branch's settings file or appended to the validation URL.

use crate::core::config::{CredentialConfig, CredentialMode};
use crate::core::error::HovelError;
use crate::core::tree;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SETTINGS_FILE: &str = "config.json";
const SETTINGS_TEMPLATE_FILE: &str = "config.template.json";
const SECRET_PLACEHOLDERS: [&str; 2] = ["YOUR_GEMINI_API_KEY_HERE", "{{ GEMINI_API_KEY }}"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialCheck {
    pub accepted: bool,
    pub reason: String,
}

impl CredentialCheck {
    fn accepted(reason: &str) -> Self {
        Self {
            accepted: true,
            reason: reason.to_string(),
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
        }
    }

    pub fn into_result(self) -> Result<(), HovelError> {
        if self.accepted {
            Ok(())
        } else {
            Err(HovelError::CredentialRejected(self.reason))
        }
    }
}

pub trait CredentialValidator: Send + Sync {
    fn validate(&self, secret: &SecretString) -> CredentialCheck;
}

/// Checks a credential with one generate request against the provider.
pub struct HttpCredentialValidator {
    validation_url: String,
    bypass_token: String,
    timeout: Duration,
}

impl HttpCredentialValidator {
    pub fn new(config: &CredentialConfig) -> Self {
        Self {
            validation_url: config.validation_url.clone(),
            bypass_token: config.bypass_token.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn probe(&self, secret: &SecretString) -> CredentialCheck {
        let client = match reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::error!("Failed to build HTTP client for credential check: {}", e);
                return CredentialCheck::rejected("validation failed - client error");
            }
        };
        let payload = serde_json::json!({
            "contents": [{ "parts": [{ "text": "Hello, this is a test message." }] }]
        });
        let response = client
            .post(&self.validation_url)
            .query(&[("key", secret.expose_secret())])
            .json(&payload)
            .send();
        match response {
            Ok(resp) => check_from_status(resp.status().as_u16()),
            Err(e) => {
                // reqwest errors carry the URL, and with it the key.
                tracing::error!(
                    timeout = e.is_timeout(),
                    connect = e.is_connect(),
                    "Credential validation request failed"
                );
                CredentialCheck::rejected("validation failed - network error")
            }
        }
    }
}

impl CredentialValidator for HttpCredentialValidator {
    fn validate(&self, secret: &SecretString) -> CredentialCheck {
        let raw = secret.expose_secret();
        if raw.trim().is_empty() {
            return CredentialCheck::rejected("credential is required");
        }
        if !self.bypass_token.is_empty() && raw == self.bypass_token {
            return CredentialCheck::accepted("test credential accepted for development");
        }
        self.probe(secret)
    }
}

pub fn check_from_status(status: u16) -> CredentialCheck {
    match status {
        200 => CredentialCheck::accepted("credential is valid"),
        400 => CredentialCheck::rejected("Invalid credential format"),
        403 => CredentialCheck::rejected("Invalid credential or quota exceeded"),
        other => CredentialCheck::rejected(format!("validation failed with status {}", other)),
    }
}

/// Copies the settings template directory into `<dir>/<settings_dir_name>` and
/// renders `config.template.json` into `config.json`.
///
/// Returns the written `config.json` path, or `None` when the template has no
/// `config.template.json`.
pub fn materialize_settings(
    config: &CredentialConfig,
    dir: &Path,
    name: &str,
    secret: &SecretString,
) -> Result<Option<PathBuf>, HovelError> {
    let source = &config.settings_template_dir;
    let target = dir.join(&config.settings_dir_name);
    fs::create_dir_all(&target).map_err(HovelError::IoError)?;
    if source.is_dir() {
        tree::copy_tree(source, &target, &[SETTINGS_FILE])?;
    }

    let template_path = source.join(SETTINGS_TEMPLATE_FILE);
    if !template_path.is_file() {
        tracing::warn!(
            branch = name,
            "Settings template not found: {}",
            template_path.display()
        );
        return Ok(None);
    }
    let template = fs::read_to_string(&template_path).map_err(HovelError::IoError)?;
    let value = match config.mode {
        CredentialMode::Embed => secret.expose_secret().to_string(),
        CredentialMode::Environment => format!("${{{}}}", config.env_var),
    };
    let rendered = SECRET_PLACEHOLDERS
        .iter()
        .fold(template, |acc, token| acc.replace(token, &value));

    let path = target.join(SETTINGS_FILE);
    fs::write(&path, rendered).map_err(HovelError::IoError)?;
    tracing::info!(
        branch = name,
        mode = ?config.mode,
        "Created settings file for branch {}",
        name
    );
    Ok(Some(path))
}
