//! Branch-scoped file generation: the `.env` file and the compose descriptor.
//!
//! Rendering is plain token substitution. Service filtering works on the parsed
//! YAML document and falls back to an indentation-keyed line filter when the
//! rendered text does not parse.

use crate::core::config::HovelConfig;
use crate::core::error::HovelError;
use regex::Regex;
use serde_yaml::Value as YamlValue;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const TOKEN_BRANCH_NAME: &str = "{{BRANCH_NAME}}";
pub const TOKEN_PORT: &str = "{{PORT}}";
pub const TOKEN_PORT_TTYD: &str = "{{PORT_TTYD}}";
pub const ENV_FILE_NAME: &str = ".env";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{[^{}]*\}\}").unwrap());

pub fn render_env_file(name: &str, port: u16, terminal_port: u16) -> String {
    format!(
        "# Environment variables for branch: {name}\n\
         PORT={port}\n\
         PORT_TTYD={terminal_port}\n\
         BRANCH_NAME={name}\n"
    )
}

pub fn render_descriptor(template: &str, name: &str, port: u16, terminal_port: u16) -> String {
    template
        .replace(TOKEN_BRANCH_NAME, name)
        .replace(TOKEN_PORT_TTYD, &terminal_port.to_string())
        .replace(TOKEN_PORT, &port.to_string())
}

/// `{{...}}` tokens still present in `text`.
pub fn remaining_placeholders(text: &str) -> Vec<String> {
    PLACEHOLDER
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Keeps only `services` entries named in `keep`. Unknown names are a validation error.
pub fn filter_services(descriptor: &str, keep: &[String]) -> Result<String, HovelError> {
    match serde_yaml::from_str::<YamlValue>(descriptor) {
        Ok(doc) => filter_services_structured(doc, keep),
        Err(e) => {
            tracing::warn!("descriptor is not parseable YAML ({}), using line filter", e);
            filter_services_by_lines(descriptor, keep)
        }
    }
}

fn filter_services_structured(mut doc: YamlValue, keep: &[String]) -> Result<String, HovelError> {
    let services = doc
        .get_mut("services")
        .and_then(YamlValue::as_mapping_mut)
        .ok_or_else(|| {
            HovelError::ValidationError("descriptor has no services mapping".to_string())
        })?;
    let present: BTreeSet<String> = services
        .keys()
        .filter_map(|k| k.as_str().map(str::to_string))
        .collect();
    check_requested(&present, keep)?;
    services.retain(|key, _| key.as_str().is_some_and(|k| keep.iter().any(|s| s == k)));
    Ok(serde_yaml::to_string(&doc)?)
}

/// Line-oriented fallback. Service keys are the lines under `services:` at the
/// indentation of its first child; a service body runs until the next such key or
/// the next top-level key.
pub fn filter_services_by_lines(descriptor: &str, keep: &[String]) -> Result<String, HovelError> {
    let mut out = Vec::new();
    let mut present = BTreeSet::new();
    let mut in_services = false;
    let mut service_indent: Option<usize> = None;
    let mut keeping = true;

    for line in descriptor.lines() {
        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();
        let structural = !trimmed.is_empty() && !trimmed.starts_with('#');

        if structural && indent == 0 {
            in_services = trimmed.trim_end() == "services:";
            service_indent = None;
            keeping = true;
            out.push(line);
            continue;
        }
        if !in_services {
            out.push(line);
            continue;
        }
        if structural {
            let key_indent = *service_indent.get_or_insert(indent);
            if indent == key_indent {
                let key = trimmed.trim_end().trim_end_matches(':').trim_matches(['"', '\'']);
                present.insert(key.to_string());
                keeping = keep.iter().any(|s| s == key);
            }
        }
        if keeping {
            out.push(line);
        }
    }

    if present.is_empty() {
        return Err(HovelError::ValidationError(
            "descriptor has no services block".to_string(),
        ));
    }
    check_requested(&present, keep)?;
    let mut rendered = out.join("\n");
    if descriptor.ends_with('\n') {
        rendered.push('\n');
    }
    Ok(rendered)
}

fn check_requested(present: &BTreeSet<String>, keep: &[String]) -> Result<(), HovelError> {
    let unknown: Vec<&str> = keep
        .iter()
        .filter(|s| !present.contains(s.as_str()))
        .map(String::as_str)
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    Err(HovelError::ValidationError(format!(
        "unknown service(s) {}; descriptor defines {}",
        unknown.join(", "),
        present.iter().cloned().collect::<Vec<_>>().join(", ")
    )))
}

/// Service names in declaration order.
pub fn service_names(descriptor: &str) -> Vec<String> {
    if let Ok(doc) = serde_yaml::from_str::<YamlValue>(descriptor) {
        if let Some(services) = doc.get("services").and_then(YamlValue::as_mapping) {
            return services
                .keys()
                .filter_map(|k| k.as_str().map(str::to_string))
                .collect();
        }
    }
    let mut names = Vec::new();
    let mut in_services = false;
    let mut service_indent: Option<usize> = None;
    for line in descriptor.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = line.len() - trimmed.len();
        if indent == 0 {
            in_services = trimmed.trim_end() == "services:";
            continue;
        }
        if in_services && indent == *service_indent.get_or_insert(indent) {
            names.push(trimmed.trim_end().trim_end_matches(':').to_string());
        }
    }
    names
}

/// Writes `<dir>/.env`.
pub fn write_env_file(
    dir: &Path,
    name: &str,
    port: u16,
    terminal_port: u16,
) -> Result<PathBuf, HovelError> {
    let path = dir.join(ENV_FILE_NAME);
    let body = render_env_file(name, port, terminal_port);
    fs::write(&path, body).map_err(HovelError::IoError)?;
    tracing::info!(branch = name, "Created environment file: {}", path.display());
    Ok(path)
}

/// Renders the descriptor template for one branch and applies the service subset.
///
/// A missing template is logged and yields `Ok(None)`: the environment is still
/// provisioned and a later build reports the missing descriptor.
pub fn render_for_branch(
    config: &HovelConfig,
    name: &str,
    port: u16,
    terminal_port: u16,
    services: Option<&[String]>,
) -> Result<Option<String>, HovelError> {
    let template_path = config.descriptor_template_path();
    if !template_path.is_file() {
        tracing::warn!(
            branch = name,
            "Descriptor template not found: {}",
            template_path.display()
        );
        return Ok(None);
    }
    let template = fs::read_to_string(&template_path).map_err(HovelError::IoError)?;
    let mut rendered = render_descriptor(&template, name, port, terminal_port);
    if let Some(keep) = services.filter(|s| !s.is_empty()) {
        rendered = filter_services(&rendered, keep)?;
    }
    let leftover = remaining_placeholders(&rendered);
    if !leftover.is_empty() {
        tracing::warn!(branch = name, "descriptor keeps unknown tokens: {}", leftover.join(", "));
    }
    Ok(Some(rendered))
}

/// Writes a rendered descriptor to `<dir>/<descriptor_file>`.
pub fn write_descriptor(
    config: &HovelConfig,
    dir: &Path,
    name: &str,
    rendered: &str,
) -> Result<PathBuf, HovelError> {
    let path = dir.join(&config.descriptor_file);
    fs::write(&path, rendered).map_err(HovelError::IoError)?;
    tracing::info!(branch = name, "Created descriptor from template: {}", path.display());
    Ok(path)
}
