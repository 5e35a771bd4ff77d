//! PostgREST reads and Realtime subscriptions against a Supabase project.

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::realtime::{FeedTopic, RealtimeClient};
use super::{Backend, BackendError, BackendResult, Subscription};
use crate::config::{SupabaseEndpoints, SyncSettings};
use crate::feed::{Feed, FeedMessage};
use crate::models::{CitizenId, Complaint, ComplaintId, ComplaintUpdate};

const MAX_ERROR_BODY_CHARS: usize = 180;

#[derive(Clone)]
pub struct SupabaseBackend {
    endpoints: SupabaseEndpoints,
    client: Client,
    realtime: RealtimeClient,
}

impl SupabaseBackend {
    pub fn new(endpoints: SupabaseEndpoints, settings: &SyncSettings) -> BackendResult<Self> {
        let realtime = RealtimeClient::new(&endpoints, settings);
        Ok(Self {
            endpoints,
            client: Client::builder().build()?,
            realtime,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.endpoints.anon_key)
            .bearer_auth(self.endpoints.bearer_token())
            .header("Accept", "application/json")
    }

    async fn select_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> BackendResult<Vec<T>> {
        let request = self.authorized(
            self.client
                .get(format!("{}/{table}", self.endpoints.rest_url))
                .query(&[("select", "*")])
                .query(query),
        );

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Api(parse_api_error(status, &body)));
        }

        let body = response.text().await?;
        decode_rows(table, &body)
    }
}

impl Backend for SupabaseBackend {
    async fn fetch_complaints(&self, citizen_id: &CitizenId) -> BackendResult<Vec<Complaint>> {
        let complaints: Vec<Complaint> = self
            .select_rows(
                Feed::Complaints.table(),
                &[
                    ("citizen_id", format!("eq.{citizen_id}")),
                    ("order", "created_at.desc,id.desc".to_string()),
                ],
            )
            .await?;
        tracing::debug!(%citizen_id, count = complaints.len(), "Fetched complaints");
        Ok(complaints)
    }

    async fn fetch_timeline(
        &self,
        complaint_id: &ComplaintId,
    ) -> BackendResult<Vec<ComplaintUpdate>> {
        let updates: Vec<ComplaintUpdate> = self
            .select_rows(
                Feed::ComplaintUpdates.table(),
                &[
                    ("complaint_id", format!("eq.{complaint_id}")),
                    ("order", "created_at.asc,id.asc".to_string()),
                ],
            )
            .await?;
        tracing::debug!(%complaint_id, count = updates.len(), "Fetched timeline");
        Ok(updates)
    }

    async fn subscribe_complaint_changes(
        &self,
        citizen_id: &CitizenId,
        sender: mpsc::Sender<FeedMessage>,
    ) -> BackendResult<Subscription> {
        self.realtime
            .subscribe(FeedTopic::complaints_of(citizen_id), sender)
            .await
    }

    async fn subscribe_update_insertions(
        &self,
        sender: mpsc::Sender<FeedMessage>,
    ) -> BackendResult<Subscription> {
        self.realtime
            .subscribe(FeedTopic::update_insertions(), sender)
            .await
    }
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorResponse {
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
    error: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<PostgrestErrorResponse>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            let detail = payload.details.or(payload.hint);
            return match detail {
                Some(detail) if !detail.trim().is_empty() => {
                    format!("{}: {} ({})", message.trim(), detail.trim(), status.as_u16())
                }
                _ => format!("{} ({})", message.trim(), status.as_u16()),
            };
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", truncate_body(trimmed), status.as_u16())
    }
}

/// Decode a PostgREST row array. Rows that do not fit the model are skipped.
fn decode_rows<T: DeserializeOwned>(table: &str, body: &str) -> BackendResult<Vec<T>> {
    let rows: Vec<serde_json::Value> = serde_json::from_str(body)?;
    Ok(rows
        .into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(decoded) => Some(decoded),
            Err(error) => {
                tracing::warn!(table, %error, "Skipping undecodable row");
                None
            }
        })
        .collect())
}

fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
