//! Change notifications over the Supabase Realtime websocket.
//!
//! A single connection is opened on first subscription and carries one
//! Phoenix channel per table. Channels are left once their last
//! [`Subscription`] is dropped, and the connection closes with the last
//! channel. A dropped connection ends every live subscription; the next
//! subscribe opens a new one.
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::backend::{Change, ChangeKind, Subscription, Table};
use crate::error::{Result, ServerError};

const HEARTBEAT: Duration = Duration::from_secs(25);
const CHANNEL_CAPACITY: usize = 16;
const PROTOCOL_VERSION: &str = "1.0.0";
const TOPIC_PREFIX: &str = "realtime:";

const PHX_JOIN: &str = "phx_join";
const PHX_LEAVE: &str = "phx_leave";
const PHX_REPLY: &str = "phx_reply";
const ACCESS_TOKEN: &str = "access_token";
const POSTGRES_CHANGES: &str = "postgres_changes";

/// Phoenix channel message.
#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

#[derive(Debug)]
struct Connection {
    generation: u64,
    commands: mpsc::UnboundedSender<String>,
}

#[derive(Debug)]
struct Channel {
    id: u64,
    sender: broadcast::Sender<Change>,
    subscribers: usize,
    /// Token whose row-level security claims filter the changes.
    access_token: String,
}

#[derive(Debug, Default)]
struct Hub {
    connection: Option<Connection>,
    channels: HashMap<Table, Channel>,
    next_ref: u64,
    next_id: u64,
}

impl Hub {
    fn id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| !connection.commands.is_closed())
    }

    fn push(&mut self, topic: String, event: &str, payload: Value) {
        self.next_ref += 1;
        let frame = Frame {
            topic,
            event: event.to_owned(),
            payload,
            reference: Some(self.next_ref.to_string()),
        };

        if let Some(connection) = &self.connection {
            match serde_json::to_string(&frame) {
                Ok(text) => {
                    let _ = connection.commands.send(text);
                },
                Err(err) => {
                    tracing::error!(error = %err, "cannot encode realtime frame")
                },
            }
        }
    }

    /// Add a subscriber to `table`, joining its channel when needed.
    ///
    /// The channel is authorized with the token of its latest subscriber.
    fn join(
        &mut self,
        table: Table,
        access_token: &str,
    ) -> (broadcast::Receiver<Change>, u64) {
        if let Some(channel) = self.channels.get_mut(&table) {
            channel.subscribers += 1;
            let joined = (channel.sender.subscribe(), channel.id);
            if channel.access_token != access_token {
                channel.access_token = access_token.to_owned();
                self.push(
                    topic(table),
                    ACCESS_TOKEN,
                    json!({ "access_token": access_token }),
                );
                tracing::debug!(table = table.as_str(), "realtime channel token renewed");
            }
            self.record();
            return joined;
        }

        let id = self.id();
        let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
        self.channels.insert(
            table,
            Channel {
                id,
                sender,
                subscribers: 1,
                access_token: access_token.to_owned(),
            },
        );
        self.push(topic(table), PHX_JOIN, join_payload(table, access_token));
        tracing::debug!(table = table.as_str(), "realtime channel joined");
        self.record();

        (receiver, id)
    }

    /// Remove a subscriber. Stale ids from a previous connection are ignored.
    fn release(&mut self, table: Table, id: u64) {
        let Some(channel) = self.channels.get_mut(&table) else {
            return;
        };
        if channel.id != id {
            return;
        }

        channel.subscribers = channel.subscribers.saturating_sub(1);
        if channel.subscribers == 0 {
            self.channels.remove(&table);
            self.push(topic(table), PHX_LEAVE, json!({}));
            tracing::debug!(table = table.as_str(), "realtime channel left");

            if self.channels.is_empty() {
                // Dropping the command sender stops the connection task.
                self.connection = None;
            }
        }
        self.record();
    }

    fn publish(&self, change: Change) {
        if let Some(channel) = self.channels.get(&change.table) {
            let _ = channel.sender.send(change);
        }
    }

    /// Forget the connection of `generation` and end its subscriptions.
    fn disconnect(&mut self, generation: u64) {
        if self
            .connection
            .as_ref()
            .is_some_and(|connection| connection.generation == generation)
        {
            self.connection = None;
            self.channels.clear();
            self.record();
        }
    }

    fn record(&self) {
        let total = self
            .channels
            .values()
            .map(|channel| channel.subscribers)
            .sum::<usize>();
        metrics::gauge!("realtime_subscriptions").set(total as f64);
    }
}

fn topic(table: Table) -> String {
    format!("{TOPIC_PREFIX}{}", table.as_str())
}

fn join_payload(table: Table, access_token: &str) -> Value {
    json!({
        "config": {
            "postgres_changes": [
                { "event": "*", "schema": "public", "table": table.as_str() }
            ]
        },
        "access_token": access_token,
    })
}

/// Extract a row change from a raw frame, if it is one.
fn parse_change(text: &str) -> Option<Change> {
    let frame = serde_json::from_str::<Frame>(text).ok()?;

    match frame.event.as_str() {
        POSTGRES_CHANGES => {
            let table = frame
                .topic
                .strip_prefix(TOPIC_PREFIX)
                .and_then(Table::from_name)?;
            let kind = serde_json::from_value::<ChangeKind>(
                frame.payload.pointer("/data/type")?.clone(),
            )
            .ok()?;
            Some(Change { table, kind })
        },
        PHX_REPLY => {
            if frame.payload["status"] != "ok" {
                tracing::warn!(
                    topic = %frame.topic,
                    response = %frame.payload["response"],
                    "realtime channel refused"
                );
            }
            None
        },
        _ => None,
    }
}

/// Build the websocket endpoint of a project.
fn websocket_url(base: &Url, anon_key: &str) -> Result<Url> {
    let mut url = base.join("realtime/v1/websocket")?;
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|_| ServerError::Internal {
            details: format!("cannot derive websocket url from {base}"),
            source: None,
        })?;
    url.query_pairs_mut()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", PROTOCOL_VERSION);
    Ok(url)
}

/// Realtime client, cheap to clone.
#[derive(Clone, Debug)]
pub struct RealtimeClient {
    url: Url,
    hub: Arc<Mutex<Hub>>,
}

impl RealtimeClient {
    /// Create a new [`RealtimeClient`]. No connection is opened yet.
    pub fn new(base: &Url, anon_key: &str) -> Result<Self> {
        Ok(Self {
            url: websocket_url(base, anon_key)?,
            hub: Arc::default(),
        })
    }

    /// Subscribe to the changes of `table` visible to `access_token`.
    pub fn subscribe(&self, table: Table, access_token: &str) -> Subscription {
        let mut hub = self.hub.lock();

        if !hub.is_connected() {
            hub.connection = None;
            hub.channels.clear();

            let generation = hub.id();
            let (commands, receiver) = mpsc::unbounded_channel();
            hub.connection = Some(Connection {
                generation,
                commands,
            });

            let url = self.url.clone();
            let weak = Arc::downgrade(&self.hub);
            tokio::spawn(async move {
                if let Err(err) = run(url, &weak, receiver).await {
                    tracing::error!(error = %err, "realtime connection failed");
                }
                if let Some(hub) = weak.upgrade() {
                    hub.lock().disconnect(generation);
                }
            });
        }

        let (receiver, id) = hub.join(table, access_token);
        drop(hub);

        let weak = Arc::downgrade(&self.hub);
        Subscription::new(table, receiver, move || {
            if let Some(hub) = weak.upgrade() {
                hub.lock().release(table, id);
            }
        })
    }
}

/// Drive one websocket connection until it closes or is no longer needed.
async fn run(
    url: Url,
    hub: &Weak<Mutex<Hub>>,
    mut commands: mpsc::UnboundedReceiver<String>,
) -> Result<()> {
    let (socket, _) = connect_async(url.as_str()).await?;
    let (mut sink, mut stream) = socket.split();
    tracing::info!(host = url.host_str(), "realtime connection opened");

    let mut heartbeat = tokio::time::interval(HEARTBEAT);
    let mut heartbeat_ref = 0u64;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(text) => sink.send(Message::Text(text)).await?,
                None => break,
            },
            _ = heartbeat.tick() => {
                heartbeat_ref += 1;
                let frame = Frame {
                    topic: "phoenix".into(),
                    event: "heartbeat".into(),
                    payload: json!({}),
                    reference: Some(format!("hb-{heartbeat_ref}")),
                };
                sink.send(Message::Text(serde_json::to_string(&frame)?)).await?;
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(change) = parse_change(&text) {
                        tracing::debug!(table = change.table.as_str(), kind = ?change.kind, "row change received");
                        match hub.upgrade() {
                            Some(hub) => hub.lock().publish(change),
                            None => break,
                        }
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    tracing::warn!("realtime connection closed by server");
                    break;
                },
                Some(Ok(_)) => {},
                Some(Err(err)) => return Err(err.into()),
            },
        }
    }

    let _ = sink.close().await;
    tracing::info!("realtime connection closed");
    Ok(())
}
