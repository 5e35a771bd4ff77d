use chrono::{DateTime, Utc};
use civic_core::backend::SupabaseBackend;
use civic_core::config::{ClientConfig, SyncSettings};
use civic_core::{Complaint, ComplaintUpdate, ViewSnapshot};
use serde::Serialize;

use crate::error::CliError;

const SHORT_ID_LEN: usize = 13;
const TITLE_WIDTH: usize = 40;

#[derive(Debug, Serialize)]
pub struct ComplaintListItem {
    pub id: String,
    pub title: String,
    pub department: String,
    pub status: String,
    pub priority: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct TimelineItem {
    pub id: i64,
    pub status: Option<String>,
    pub note: String,
    pub updated_by: Option<String>,
    pub created_at: String,
}

pub fn connect(config: &ClientConfig, settings: &SyncSettings) -> Result<SupabaseBackend, CliError> {
    let endpoints = config.resolve()?;
    Ok(SupabaseBackend::new(endpoints, settings)?)
}

pub fn complaint_to_list_item(complaint: &Complaint, now: DateTime<Utc>) -> ComplaintListItem {
    ComplaintListItem {
        id: complaint.id.to_string(),
        title: complaint.title.clone(),
        department: complaint.department.clone(),
        status: complaint.status.as_str().to_string(),
        priority: complaint.priority.clone(),
        created_at: complaint.created_at.to_rfc3339(),
        updated_at: complaint.updated_at.to_rfc3339(),
        relative_time: format_relative_time(complaint.updated_at, now),
    }
}

pub fn update_to_timeline_item(update: &ComplaintUpdate) -> TimelineItem {
    TimelineItem {
        id: update.id,
        status: update.status.map(|status| status.as_str().to_string()),
        note: update.note.clone(),
        updated_by: update.updated_by.clone(),
        created_at: update.created_at.to_rfc3339(),
    }
}

pub fn format_complaint_line(complaint: &Complaint, now: DateTime<Utc>) -> String {
    let short_id = complaint
        .id
        .as_str()
        .chars()
        .take(SHORT_ID_LEN)
        .collect::<String>();
    let title = complaint_preview(complaint, TITLE_WIDTH);
    let status = complaint.status.label();
    let relative_time = format_relative_time(complaint.updated_at, now);

    format!("{short_id:<13}  {status:<12}  {title:<40}  {relative_time}")
}

pub fn format_complaint_lines(complaints: &[Complaint]) -> Vec<String> {
    let now = Utc::now();
    complaints
        .iter()
        .map(|complaint| format_complaint_line(complaint, now))
        .collect()
}

pub fn format_timeline_lines(updates: &[ComplaintUpdate]) -> Vec<String> {
    updates
        .iter()
        .map(|update| {
            let timestamp = update.created_at.format("%Y-%m-%d %H:%M");
            let status = update.status.map_or("Note", |status| status.label());
            let note = update.note.trim();
            if note.is_empty() {
                format!("{timestamp}  {status}")
            } else {
                format!("{timestamp}  {status:<12}  {note}")
            }
        })
        .collect()
}

pub fn complaint_preview(complaint: &Complaint, max_len: usize) -> String {
    let title = complaint.title.trim();
    if title.chars().count() <= max_len {
        return title.to_string();
    }
    let mut preview = complaint.title_preview(max_len.saturating_sub(3));
    preview.push_str("...");
    preview
}

pub fn format_relative_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = (now - timestamp).num_seconds().max(0);
    let minute = 60;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

/// Render the whole live view: header, complaint list (selected marked `>`), timeline.
pub fn format_snapshot_lines(snapshot: &ViewSnapshot, now: DateTime<Utc>) -> Vec<String> {
    let mut lines = vec![format!(
        "[{}] {} complaint(s)",
        snapshot.readiness,
        snapshot.complaints.len()
    )];
    if let Some(error) = &snapshot.last_error {
        lines.push(format!("! {error}"));
    }

    let selected_id = snapshot.selected.as_ref().map(|complaint| &complaint.id);
    for complaint in &snapshot.complaints {
        let marker = if Some(&complaint.id) == selected_id {
            '>'
        } else {
            ' '
        };
        lines.push(format!("{marker} {}", format_complaint_line(complaint, now)));
    }

    if let Some(selected) = &snapshot.selected {
        lines.push(String::new());
        lines.push(format!("Timeline for {}:", selected.id));
        if snapshot.timeline.is_empty() {
            lines.push("  No updates yet.".to_string());
        } else {
            lines.extend(
                format_timeline_lines(&snapshot.timeline)
                    .into_iter()
                    .map(|line| format!("  {line}")),
            );
        }
    }
    lines
}
