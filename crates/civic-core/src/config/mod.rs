//! Client configuration.
//!
//! `ClientConfig` carries the public Supabase project coordinates plus the
//! citizen's already-issued access token. `SyncSettings` tunes the live view.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const REST_PATH: &str = "/rest/v1";
const REALTIME_PATH: &str = "/realtime/v1/websocket";

pub const ENV_SUPABASE_URL: &str = "CIVIC_SUPABASE_URL";
pub const ENV_SUPABASE_ANON_KEY: &str = "CIVIC_SUPABASE_ANON_KEY";
pub const ENV_ACCESS_TOKEN: &str = "CIVIC_ACCESS_TOKEN";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Supabase is not configured. Set CIVIC_SUPABASE_URL and CIVIC_SUPABASE_ANON_KEY.")]
    NotConfigured,
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Backend coordinates, all optional until resolved.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default)]
    pub supabase_url: Option<String>,
    #[serde(default)]
    pub supabase_anon_key: Option<String>,
    /// Citizen session token; requests fall back to the anon key without it.
    #[serde(default)]
    pub access_token: Option<String>,
}

impl ClientConfig {
    /// Read configuration from `CIVIC_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            supabase_url: std::env::var(ENV_SUPABASE_URL).ok(),
            supabase_anon_key: std::env::var(ENV_SUPABASE_ANON_KEY).ok(),
            access_token: std::env::var(ENV_ACCESS_TOKEN).ok(),
        }
    }

    /// Values set in `other` win over values in `self`.
    #[must_use]
    pub fn merged_with(self, other: Self) -> Self {
        Self {
            supabase_url: normalize_text_option(other.supabase_url)
                .or_else(|| normalize_text_option(self.supabase_url)),
            supabase_anon_key: normalize_text_option(other.supabase_anon_key)
                .or_else(|| normalize_text_option(self.supabase_anon_key)),
            access_token: normalize_text_option(other.access_token)
                .or_else(|| normalize_text_option(self.access_token)),
        }
    }

    /// Validate and derive the REST and realtime endpoints.
    pub fn resolve(&self) -> Result<SupabaseEndpoints, ConfigError> {
        let url = normalize_text_option(self.supabase_url.clone());
        let anon_key = normalize_text_option(self.supabase_anon_key.clone());

        let (url, anon_key) = match (url, anon_key) {
            (None, None) => return Err(ConfigError::NotConfigured),
            (Some(url), Some(anon_key)) => (url, anon_key),
            (Some(_), None) => {
                return Err(ConfigError::Invalid(
                    "Supabase anon key must be set together with the URL".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(ConfigError::Invalid(
                    "Supabase URL must be set together with the anon key".to_string(),
                ))
            }
        };

        let base = normalize_project_url(&url)?;
        Ok(SupabaseEndpoints {
            rest_url: format!("{base}{REST_PATH}"),
            realtime_url: realtime_url(&base)?,
            anon_key,
            access_token: normalize_text_option(self.access_token.clone()),
        })
    }
}

/// Validated endpoints for one Supabase project.
#[derive(Clone, PartialEq, Eq)]
pub struct SupabaseEndpoints {
    pub rest_url: String,
    pub realtime_url: String,
    pub anon_key: String,
    pub access_token: Option<String>,
}

impl SupabaseEndpoints {
    /// Token used for `Authorization: Bearer` and realtime joins.
    #[must_use]
    pub fn bearer_token(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.anon_key)
    }
}

impl std::fmt::Debug for SupabaseEndpoints {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SupabaseEndpoints")
            .field("rest_url", &self.rest_url)
            .field("realtime_url", &self.realtime_url)
            .field("anon_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Tuning for a live complaint view.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Capacity of the bounded channel between subscriptions and the view task
    pub channel_capacity: usize,
    /// Events held while a load is in flight before the view falls back to a reload
    pub max_pending_events: usize,
    pub resubscribe_backoff_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub join_timeout_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            max_pending_events: 1024,
            resubscribe_backoff_ms: 2_000,
            heartbeat_interval_ms: 30_000,
            join_timeout_ms: 10_000,
        }
    }
}

/// Periods are clamped to at least one millisecond.
impl SyncSettings {
    #[must_use]
    pub const fn resubscribe_backoff(&self) -> Duration {
        period(self.resubscribe_backoff_ms)
    }

    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        period(self.heartbeat_interval_ms)
    }

    #[must_use]
    pub const fn join_timeout(&self) -> Duration {
        period(self.join_timeout_ms)
    }
}

const fn period(millis: u64) -> Duration {
    Duration::from_millis(if millis == 0 { 1 } else { millis })
}

/// Trimmed value, or `None` when missing or blank.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Trim, require http(s), and strip a trailing `/rest/v1` so the project root remains.
pub fn normalize_project_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(
            "Supabase URL must not be empty".to_string(),
        ));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::Invalid(
            "Supabase URL must include http:// or https://".to_string(),
        ));
    }
    Ok(trimmed
        .strip_suffix(REST_PATH)
        .unwrap_or(trimmed)
        .to_string())
}

fn realtime_url(base: &str) -> Result<String, ConfigError> {
    let mut url = Url::parse(base)
        .map_err(|error| ConfigError::Invalid(format!("Supabase URL is malformed: {error}")))?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|()| ConfigError::Invalid("Supabase URL scheme cannot be converted".into()))?;
    let path = format!("{}{REALTIME_PATH}", url.path().trim_end_matches('/'));
    url.set_path(&path);
    Ok(url.to_string())
}
