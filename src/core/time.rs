//! Shared timestamp helpers for records, tasks, and command envelopes.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;

/// Returns the current instant as RFC 3339 UTC with a `Z` suffix
/// (e.g. `2026-10-16T09:14:03.512Z`).
pub fn now_rfc3339() -> String {
    format_rfc3339(Utc::now())
}

pub fn format_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a stored timestamp. Returns `None` for anything that is not RFC 3339.
pub fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

pub fn now_unix_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Standard command response envelope shape used across CLI surfaces.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut base = serde_json::json!({
        "ts": now_rfc3339(),
        "cmd": cmd,
        "status": status
    });
    if let (Some(base_obj), Some(extra_obj)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    base
}
