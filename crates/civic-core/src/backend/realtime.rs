//! Supabase Realtime (Phoenix channel) transport for row change feeds.
//!
//! Each subscription owns one WebSocket. The join handshake runs inline so a
//! rejected subscription surfaces as an error; afterwards a pump task forwards
//! decoded changes into the view channel and reports `Dropped` when the socket
//! goes away.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{BackendError, BackendResult, Subscription};
use crate::config::{SupabaseEndpoints, SyncSettings};
use crate::feed::{ChangeOp, ComplaintChange, Feed, FeedMessage};
use crate::models::{CitizenId, Complaint, ComplaintId, ComplaintUpdate};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PROTOCOL_VERSION: &str = "1.0.0";
const JOIN_REF: &str = "1";

/// Channel topic plus the `postgres_changes` filter joined on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FeedTopic {
    feed: Feed,
    topic: String,
    event: &'static str,
    filter: Option<String>,
}

impl FeedTopic {
    pub(crate) fn complaints_of(citizen_id: &CitizenId) -> Self {
        Self {
            feed: Feed::Complaints,
            topic: format!("realtime:{}:{citizen_id}", Feed::Complaints),
            event: "*",
            filter: Some(format!("citizen_id=eq.{citizen_id}")),
        }
    }

    /// Row-level security scopes update rows to the session's own complaints.
    pub(crate) fn update_insertions() -> Self {
        Self {
            feed: Feed::ComplaintUpdates,
            topic: format!("realtime:{}", Feed::ComplaintUpdates),
            event: "INSERT",
            filter: None,
        }
    }

    fn join_frame(&self, access_token: &str) -> PhoenixFrame {
        let mut change = json!({
            "event": self.event,
            "schema": "public",
            "table": self.feed.table(),
        });
        if let Some(filter) = &self.filter {
            change["filter"] = Value::String(filter.clone());
        }

        PhoenixFrame {
            topic: self.topic.clone(),
            event: "phx_join".to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [change],
                },
                "access_token": access_token,
            }),
            reference: Some(JOIN_REF.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PhoenixFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

impl PhoenixFrame {
    fn heartbeat(reference: u64) -> Self {
        Self {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    fn encode(&self) -> BackendResult<Message> {
        Ok(Message::Text(serde_json::to_string(self)?.into()))
    }
}

#[derive(Clone)]
pub struct RealtimeClient {
    socket_url: String,
    access_token: String,
    heartbeat_interval: Duration,
    join_timeout: Duration,
}

impl RealtimeClient {
    pub fn new(endpoints: &SupabaseEndpoints, settings: &SyncSettings) -> Self {
        let socket_url = Url::parse_with_params(
            &endpoints.realtime_url,
            &[
                ("apikey", endpoints.anon_key.as_str()),
                ("vsn", PROTOCOL_VERSION),
            ],
        )
        .map_or_else(|_| endpoints.realtime_url.clone(), |url| url.to_string());

        Self {
            socket_url,
            access_token: endpoints.bearer_token().to_string(),
            heartbeat_interval: settings.heartbeat_interval(),
            join_timeout: settings.join_timeout(),
        }
    }

    pub(crate) async fn subscribe(
        &self,
        topic: FeedTopic,
        sender: mpsc::Sender<FeedMessage>,
    ) -> BackendResult<Subscription> {
        let (mut socket, _response) = connect_async(self.socket_url.as_str())
            .await
            .map_err(|error| BackendError::Realtime(format!("connect failed: {error}")))?;

        socket
            .send(topic.join_frame(&self.access_token).encode()?)
            .await
            .map_err(|error| BackendError::Realtime(format!("join failed: {error}")))?;

        tokio::time::timeout(self.join_timeout, await_join_reply(&mut socket, &topic))
            .await
            .map_err(|_| {
                BackendError::Realtime(format!("join of {} timed out", topic.topic))
            })??;

        tracing::info!(feed = %topic.feed, topic = %topic.topic, "Realtime subscription joined");

        let feed = topic.feed;
        let task = tokio::spawn(pump(socket, topic, sender, self.heartbeat_interval));
        Ok(Subscription::spawned(feed, task))
    }
}

async fn await_join_reply(socket: &mut Socket, topic: &FeedTopic) -> BackendResult<()> {
    while let Some(message) = socket.next().await {
        let message =
            message.map_err(|error| BackendError::Realtime(format!("join failed: {error}")))?;
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let frame: PhoenixFrame = serde_json::from_str(text.as_str())?;
        if frame.topic != topic.topic
            || frame.event != "phx_reply"
            || frame.reference.as_deref() != Some(JOIN_REF)
        {
            continue;
        }

        return match frame.payload.get("status").and_then(Value::as_str) {
            Some("ok") => Ok(()),
            _ => Err(BackendError::Realtime(format!(
                "join of {} rejected: {}",
                topic.topic, frame.payload["response"]
            ))),
        };
    }

    Err(BackendError::Realtime(format!(
        "socket closed before {} was joined",
        topic.topic
    )))
}

async fn pump(
    mut socket: Socket,
    topic: FeedTopic,
    sender: mpsc::Sender<FeedMessage>,
    heartbeat_interval: Duration,
) {
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.tick().await;
    let mut next_ref: u64 = 2;

    let reason = loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let frame = match PhoenixFrame::heartbeat(next_ref).encode() {
                    Ok(frame) => frame,
                    Err(error) => break error.to_string(),
                };
                next_ref += 1;
                if let Err(error) = socket.send(frame).await {
                    break format!("heartbeat failed: {error}");
                }
            }
            message = socket.next() => match message {
                None => break "socket closed".to_string(),
                Some(Err(error)) => break error.to_string(),
                Some(Ok(Message::Close(_))) => break "closed by server".to_string(),
                Some(Ok(Message::Text(text))) => match handle_frame(&topic, text.as_str()) {
                    FrameOutcome::Deliver(message) => {
                        if sender.send(message).await.is_err() {
                            tracing::debug!(feed = %topic.feed, "View channel closed; stopping pump");
                            return;
                        }
                    }
                    FrameOutcome::Ignore => {}
                    FrameOutcome::Closed(reason) => break reason,
                },
                Some(Ok(_)) => {}
            }
        }
    };

    tracing::warn!(feed = %topic.feed, %reason, "Realtime subscription dropped");
    let _ = sender.send(FeedMessage::Dropped(topic.feed)).await;
}

#[derive(Debug, PartialEq, Eq)]
enum FrameOutcome {
    Deliver(FeedMessage),
    Ignore,
    Closed(String),
}

fn handle_frame(topic: &FeedTopic, text: &str) -> FrameOutcome {
    let frame: PhoenixFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(error) => {
            tracing::warn!(feed = %topic.feed, %error, "Skipping malformed realtime frame");
            return FrameOutcome::Ignore;
        }
    };
    if frame.topic != topic.topic {
        return FrameOutcome::Ignore;
    }

    match frame.event.as_str() {
        "postgres_changes" => match decode_change(topic.feed, &frame.payload["data"]) {
            Ok(Some(message)) => FrameOutcome::Deliver(message),
            Ok(None) => FrameOutcome::Ignore,
            Err(error) => {
                tracing::warn!(feed = %topic.feed, %error, "Skipping undecodable change");
                FrameOutcome::Ignore
            }
        },
        "phx_error" | "phx_close" => FrameOutcome::Closed(frame.event),
        "system" if frame.payload.get("status").and_then(Value::as_str) == Some("error") => {
            FrameOutcome::Closed(format!("system error: {}", frame.payload["message"]))
        }
        _ => FrameOutcome::Ignore,
    }
}

/// Decode the `data` object of a `postgres_changes` payload.
///
/// Returns `Ok(None)` for operations the feed does not carry, such as updates or
/// deletes of timeline rows.
pub fn decode_change(feed: Feed, data: &Value) -> BackendResult<Option<FeedMessage>> {
    let op: ChangeOp = data
        .get("type")
        .or_else(|| data.get("eventType"))
        .and_then(Value::as_str)
        .ok_or_else(|| BackendError::Decode("change is missing its type".to_string()))?
        .parse()
        .map_err(|error: crate::Error| BackendError::Decode(error.to_string()))?;

    match (feed, op) {
        (Feed::Complaints, ChangeOp::Created) => Ok(Some(FeedMessage::Complaint(
            ComplaintChange::Created(record::<Complaint>(data, "record")?),
        ))),
        (Feed::Complaints, ChangeOp::Modified) => Ok(Some(FeedMessage::Complaint(
            ComplaintChange::Modified(record::<Complaint>(data, "record")?),
        ))),
        (Feed::Complaints, ChangeOp::Deleted) => {
            let id = data
                .get("old_record")
                .and_then(|old| old.get("id"))
                .and_then(Value::as_str)
                .ok_or_else(|| BackendError::Decode("delete is missing old_record.id".into()))?
                .parse::<ComplaintId>()
                .map_err(|error| BackendError::Decode(error.to_string()))?;
            Ok(Some(FeedMessage::Complaint(ComplaintChange::Deleted(id))))
        }
        (Feed::ComplaintUpdates, ChangeOp::Created) => Ok(Some(FeedMessage::UpdateInserted(
            record::<ComplaintUpdate>(data, "record")?,
        ))),
        (Feed::ComplaintUpdates, _) => Ok(None),
    }
}

fn record<T: serde::de::DeserializeOwned>(data: &Value, field: &str) -> BackendResult<T> {
    let value = data
        .get(field)
        .cloned()
        .ok_or_else(|| BackendError::Decode(format!("change is missing {field}")))?;
    Ok(serde_json::from_value(value)?)
}
