//! Realtime change feed over the service's Phoenix-channel WebSocket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use super::{ChangeFeed, RowChange};
use crate::config::ServiceConfig;
use crate::error::{Result, SyncError};
use crate::models::id_string;

/// The service closes sockets that stay silent for longer than this.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Phoenix channel frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

type Routes = Arc<DashMap<String, mpsc::Sender<RowChange>>>;

struct Connection {
    outgoing: mpsc::UnboundedSender<Message>,
    tasks: Vec<JoinHandle<()>>,
}

/// Change feed over the service's realtime WebSocket.
///
/// One socket carries every table subscription. It is opened on the first
/// `subscribe` and never reopened: once it drops, the per-table receivers
/// end and no further changes arrive.
pub struct RealtimeClient {
    endpoint: Url,
    access_token: String,
    capacity: usize,
    routes: Routes,
    next_ref: AtomicU64,
    connection: Mutex<Option<Connection>>,
}

impl RealtimeClient {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            endpoint: realtime_endpoint(config)?,
            access_token: config.anon_key.clone(),
            capacity: config.channel_capacity,
            routes: Arc::new(DashMap::new()),
            next_ref: AtomicU64::new(1),
            connection: Mutex::new(None),
        })
    }

    /// Channel topic carrying changes for `table`
    pub fn topic(table: &str) -> String {
        format!("realtime:{table}-changes")
    }

    fn frame(&self, topic: String, event: &str, payload: Value) -> ChannelMessage {
        let reference = self.next_ref.fetch_add(1, Ordering::Relaxed);
        ChannelMessage {
            topic,
            event: event.to_string(),
            payload,
            reference: Some(reference.to_string()),
        }
    }

    /// Send a frame, opening the socket on first use.
    async fn send(&self, frame: ChannelMessage) -> Result<()> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }

        let text = serde_json::to_string(&frame)?;
        match guard.as_ref() {
            Some(conn) => conn
                .outgoing
                .send(Message::Text(text.into()))
                .map_err(|_| SyncError::Realtime("connection closed".to_string())),
            None => Err(SyncError::Realtime("not connected".to_string())),
        }
    }

    async fn open(&self) -> Result<Connection> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.endpoint.as_str()).await?;
        info!(endpoint = %redacted(&self.endpoint), "realtime connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

        // local -> remote
        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                if ws_tx.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        let heartbeat_tx = outgoing.clone();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticker.tick().await;
            let mut beat: u64 = 0;
            loop {
                ticker.tick().await;
                beat += 1;
                let frame = ChannelMessage {
                    topic: "phoenix".to_string(),
                    event: "heartbeat".to_string(),
                    payload: json!({}),
                    reference: Some(format!("hb-{beat}")),
                };
                let Ok(text) = serde_json::to_string(&frame) else {
                    break;
                };
                if heartbeat_tx.send(Message::Text(text.into())).is_err() {
                    break;
                }
            }
        });

        // remote -> subscribers
        let routes = self.routes.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(Message::Text(text)) => route_frame(&routes, text.as_str()).await,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "realtime socket error");
                        break;
                    }
                }
            }
            warn!("realtime connection closed; change notifications stopped");
            routes.clear();
        });

        Ok(Connection {
            outgoing,
            tasks: vec![writer, heartbeat, reader],
        })
    }
}

#[async_trait]
impl ChangeFeed for RealtimeClient {
    async fn subscribe(&self, table: &str) -> Result<mpsc::Receiver<RowChange>> {
        let topic = Self::topic(table);
        let (tx, rx) = mpsc::channel(self.capacity);
        self.routes.insert(topic.clone(), tx);

        let join = self.frame(topic.clone(), "phx_join", join_payload(table, &self.access_token));
        if let Err(e) = self.send(join).await {
            self.routes.remove(&topic);
            return Err(e);
        }

        debug!(table, %topic, "joined change channel");
        Ok(rx)
    }

    async fn unsubscribe(&self, table: &str) -> Result<()> {
        let topic = Self::topic(table);
        self.routes.remove(&topic);

        if self.connection.lock().await.is_none() {
            return Ok(());
        }
        let leave = self.frame(topic, "phx_leave", json!({}));
        self.send(leave).await
    }

    async fn close(&self) {
        if let Some(conn) = self.connection.lock().await.take() {
            let Connection { outgoing, tasks } = conn;
            // Dropping the sender lets the writer flush and close the socket.
            drop(outgoing);
            for task in tasks.iter().skip(1) {
                task.abort();
            }
        }
        self.routes.clear();
    }
}

fn join_payload(table: &str, access_token: &str) -> Value {
    json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [
                { "event": "*", "schema": "public", "table": table }
            ]
        },
        "access_token": access_token
    })
}

async fn route_frame(routes: &Routes, text: &str) {
    let frame: ChannelMessage = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "ignoring unparseable realtime frame");
            return;
        }
    };

    match frame.event.as_str() {
        "postgres_changes" => {
            let Some(change) = parse_change(&frame.payload) else {
                debug!(topic = %frame.topic, "ignoring change without usable data");
                return;
            };
            // Clone the sender out so no map guard is held across the await.
            let sender = routes.get(&frame.topic).map(|entry| entry.value().clone());
            if let Some(sender) = sender {
                if sender.send(change).await.is_err() {
                    routes.remove(&frame.topic);
                }
            }
        }
        "phx_reply" => {
            let status = frame.payload.get("status").and_then(Value::as_str).unwrap_or("");
            if status != "ok" {
                warn!(topic = %frame.topic, payload = %frame.payload, "channel request rejected");
            }
        }
        "phx_error" | "phx_close" => {
            warn!(topic = %frame.topic, event = %frame.event, "channel closed by server");
            routes.remove(&frame.topic);
        }
        _ => {}
    }
}

/// Extract a row change from a `postgres_changes` payload.
pub fn parse_change(payload: &Value) -> Option<RowChange> {
    let data = payload.get("data")?;
    match data.get("type")?.as_str()? {
        "INSERT" => Some(RowChange::Insert(data.get("record")?.clone())),
        "UPDATE" => Some(RowChange::Update(data.get("record")?.clone())),
        "DELETE" => {
            let id = id_string(data.get("old_record")?.get("id")?)?;
            Some(RowChange::Delete { id })
        }
        _ => None,
    }
}

/// `ws(s)://{host}/realtime/v1/websocket?apikey=...&vsn=1.0.0`
pub fn realtime_endpoint(config: &ServiceConfig) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/realtime/v1/websocket", config.base_url()))
        .map_err(|e| SyncError::Config(format!("invalid url {}: {e}", config.url)))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(SyncError::Config(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| SyncError::Config(format!("cannot use scheme {scheme} for {}", config.url)))?;

    url.query_pairs_mut()
        .append_pair("apikey", &config.anon_key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_from_https() {
        let config = ServiceConfig {
            url: "https://abc.supabase.co".to_string(),
            anon_key: "k".to_string(),
            ..Default::default()
        };
        let url = realtime_endpoint(&config).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=k&vsn=1.0.0"
        );
        assert_eq!(redacted(&url), "wss://abc.supabase.co/realtime/v1/websocket");
    }

    #[test]
    fn test_endpoint_from_http() {
        let url = realtime_endpoint(&ServiceConfig::default()).unwrap();
        assert_eq!(url.scheme(), "ws");
    }

    #[test]
    fn test_parse_insert_and_update() {
        let payload = json!({
            "ids": [1],
            "data": {
                "type": "INSERT",
                "table": "blogs",
                "schema": "public",
                "record": { "id": 5, "title": "Gorillas" },
                "old_record": null
            }
        });
        assert_eq!(
            parse_change(&payload),
            Some(RowChange::Insert(json!({ "id": 5, "title": "Gorillas" })))
        );

        let payload = json!({ "data": { "type": "UPDATE", "record": { "id": "a" } } });
        assert!(matches!(parse_change(&payload), Some(RowChange::Update(_))));
    }

    #[test]
    fn test_parse_delete_uses_old_record_id() {
        let payload = json!({
            "data": { "type": "DELETE", "record": null, "old_record": { "id": 9 } }
        });
        assert_eq!(
            parse_change(&payload),
            Some(RowChange::Delete { id: "9".to_string() })
        );

        let missing = json!({ "data": { "type": "DELETE", "old_record": {} } });
        assert_eq!(parse_change(&missing), None);
    }

    #[test]
    fn test_parse_ignores_unknown_types() {
        let payload = json!({ "data": { "type": "TRUNCATE" } });
        assert_eq!(parse_change(&payload), None);
        assert_eq!(parse_change(&json!({})), None);
    }

    #[test]
    fn test_join_payload_targets_table() {
        let payload = join_payload("live_tickets", "anon");
        assert_eq!(payload["config"]["postgres_changes"][0]["table"], "live_tickets");
        assert_eq!(payload["access_token"], "anon");
        assert_eq!(RealtimeClient::topic("live_tickets"), "realtime:live_tickets-changes");
    }

    #[tokio::test]
    async fn test_route_frame_delivers_to_topic() {
        let routes: Routes = Arc::new(DashMap::new());
        let (tx, mut rx) = mpsc::channel(4);
        routes.insert("realtime:packages-changes".to_string(), tx);

        let frame = json!({
            "topic": "realtime:packages-changes",
            "event": "postgres_changes",
            "payload": { "data": { "type": "DELETE", "old_record": { "id": "p1" } } },
            "ref": null
        });
        route_frame(&routes, &frame.to_string()).await;

        assert_eq!(rx.recv().await, Some(RowChange::Delete { id: "p1".into() }));
    }

    #[tokio::test]
    async fn test_route_frame_drops_closed_channel() {
        let routes: Routes = Arc::new(DashMap::new());
        let (tx, _rx) = mpsc::channel(4);
        routes.insert("realtime:blogs-changes".to_string(), tx);

        let frame = json!({ "topic": "realtime:blogs-changes", "event": "phx_close", "payload": {} });
        route_frame(&routes, &frame.to_string()).await;
        assert!(routes.is_empty());
    }
}
