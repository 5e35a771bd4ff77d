//! Complaint model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ComplaintStatus;
use crate::error::Error;

/// Opaque backend identifier of a complaint row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComplaintId(String);

impl ComplaintId {
    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComplaintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ComplaintId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_identifier(s, "Complaint ID").map(Self)
    }
}

/// Identity of the citizen who owns a set of complaints
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CitizenId(String);

impl CitizenId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CitizenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CitizenId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_identifier(s, "Citizen ID").map(Self)
    }
}

fn parse_identifier(raw: &str, label: &str) -> Result<String, Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput(format!("{label} must not be empty")));
    }
    Ok(trimmed.to_string())
}

/// A citizen-filed report of suspected budget misuse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Complaint {
    /// Unique identifier
    pub id: ComplaintId,
    /// Owning citizen
    pub citizen_id: CitizenId,
    pub title: String,
    pub department: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Current lifecycle status
    pub status: ComplaintStatus,
    /// Authority the complaint is assigned to, once triaged
    #[serde(default)]
    pub assigned_authority_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Complaint {
    /// Whether `other` is at least as recent as this snapshot of the same row.
    #[must_use]
    pub fn is_superseded_by(&self, other: &Self) -> bool {
        other.updated_at >= self.updated_at
    }

    /// Get the title truncated to `max_len` characters
    #[must_use]
    pub fn title_preview(&self, max_len: usize) -> String {
        self.title.trim().chars().take(max_len).collect()
    }
}
