//! Result type for best-effort side operations.
//!
//! Advisory calls (git branch bookkeeping, terminal session metadata) never fail the
//! operation that triggered them. They report what happened so callers can surface
//! a warning instead of silently discarding it.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Advisory {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl Advisory {
    pub fn ok() -> Self {
        Self {
            ok: true,
            warning: None,
        }
    }

    /// Succeeded, but with something worth reporting (e.g. step skipped).
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            ok: true,
            warning: Some(reason.into()),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            warning: Some(reason.into()),
        }
    }

    /// Logs the warning, if any, and hands it back for response payloads.
    pub fn into_warning(self, op: &str) -> Option<String> {
        if let Some(w) = &self.warning {
            tracing::warn!(op, ok = self.ok, "{}", w);
        }
        self.warning
    }
}
