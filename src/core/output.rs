//! Text rendering for CLI surfaces that are read by people rather than scripts.

use crate::core::store::{EnvStatus, EnvironmentRecord};
use colored::Colorize;

/// Collapses whitespace and bounds length for a single table cell.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

fn paint_status(status: EnvStatus, padded: String) -> String {
    match status {
        EnvStatus::Running => padded.green().to_string(),
        EnvStatus::BuildFailed => padded.red().to_string(),
        EnvStatus::Building | EnvStatus::Starting => padded.yellow().to_string(),
        EnvStatus::Stopped => padded.dimmed().to_string(),
        EnvStatus::Created | EnvStatus::Deleted => padded,
    }
}

/// One line per branch: name, port, status, creation time, last error.
pub fn branch_table(records: &[EnvironmentRecord]) -> String {
    if records.is_empty() {
        return "no branches\n".to_string();
    }
    let name_width = records
        .iter()
        .map(|r| r.name.chars().count())
        .max()
        .unwrap_or(0)
        .max(4);
    let mut out = format!(
        "{:<name_width$}  {:<5}  {:<12}  {:<24}  {}\n",
        "NAME", "PORT", "STATUS", "CREATED", "NOTE"
    );
    for r in records {
        let status = paint_status(r.status, format!("{:<12}", r.status.as_str()));
        let note = r
            .last_error
            .as_deref()
            .map(|e| compact_line(e, 60))
            .unwrap_or_default();
        out.push_str(&format!(
            "{:<name_width$}  {:<5}  {}  {:<24}  {}\n",
            r.name, r.port, status, r.created_at, note
        ));
    }
    out
}
