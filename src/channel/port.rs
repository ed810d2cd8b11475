//! Duplex message ports
//!
//! A port is one end of a named, ordered, bidirectional JSON message stream
//! between a page context and the background process. Page code obtains ports
//! only through a [`Connector`]; the background receives the other end as a
//! [`Connection`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::platform::TabId;

/// Request ids are unique across all ports so a stray reply can never match
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// One end of a channel
#[derive(Debug)]
pub struct Port {
    name: String,
    tx: mpsc::Sender<Value>,
    rx: mpsc::Receiver<Value>,
}

impl Port {
    /// Create both ends of a channel
    pub fn pair(name: &str, capacity: usize) -> (Port, Port) {
        let (a_tx, b_rx) = mpsc::channel(capacity.max(1));
        let (b_tx, a_rx) = mpsc::channel(capacity.max(1));
        (
            Port {
                name: name.to_string(),
                tx: a_tx,
                rx: a_rx,
            },
            Port {
                name: name.to_string(),
                tx: b_tx,
                rx: b_rx,
            },
        )
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a message to the other end
    pub async fn post(&self, message: Value) -> Result<()> {
        tracing::trace!("[{}] -> {}", self.name, message);
        self.tx
            .send(message)
            .await
            .map_err(|_| Error::ChannelClosed(self.name.clone()))
    }

    /// Receive the next message, or `None` once the other end is gone
    pub async fn recv(&mut self) -> Option<Value> {
        let message = self.rx.recv().await;
        if let Some(ref m) = message {
            tracing::trace!("[{}] <- {}", self.name, m);
        }
        message
    }

    /// Send a request and wait for the reply carrying the same id
    pub async fn request(&mut self, mut message: Value) -> Result<Value> {
        let id = NEXT_REQUEST_ID.fetch_add(1, Ordering::SeqCst);
        match message.as_object_mut() {
            Some(map) => {
                map.insert("id".to_string(), Value::from(id));
            }
            None => {
                return Err(Error::transport(format!(
                    "request on '{}' must be a JSON object",
                    self.name
                )))
            }
        }

        self.post(message).await?;

        loop {
            let reply = self
                .recv()
                .await
                .ok_or_else(|| Error::ChannelClosed(self.name.clone()))?;
            match reply.get("id").and_then(Value::as_u64) {
                Some(reply_id) if reply_id == id => return Ok(reply),
                other => tracing::warn!(
                    "Skipping reply with id {:?} on '{}' (waiting for {})",
                    other,
                    self.name,
                    id
                ),
            }
        }
    }
}

/// A page-initiated connection as seen by the background process
#[derive(Debug)]
pub struct Connection {
    /// Requested channel name
    pub name: String,
    /// Tab the connecting page lives in, if any
    pub tab: Option<TabId>,
    /// Background end of the channel
    pub port: Port,
}

/// Page-side handle for opening channels to the background process
#[derive(Debug, Clone)]
pub struct Connector {
    tx: mpsc::Sender<Connection>,
    tab: Option<TabId>,
    capacity: usize,
}

impl Connector {
    /// Create a connector and the stream of connections it produces
    pub fn channel(capacity: usize) -> (Connector, mpsc::Receiver<Connection>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (
            Connector {
                tx,
                tab: None,
                capacity,
            },
            rx,
        )
    }

    /// The same connector, tagging its connections with `tab`
    pub fn for_tab(&self, tab: TabId) -> Connector {
        Connector {
            tx: self.tx.clone(),
            tab: Some(tab),
            capacity: self.capacity,
        }
    }

    pub fn tab(&self) -> Option<TabId> {
        self.tab
    }

    /// Open a new channel
    pub async fn connect(&self, name: &str) -> Result<Port> {
        let (local, remote) = Port::pair(name, self.capacity);
        self.tx
            .send(Connection {
                name: name.to_string(),
                tab: self.tab,
                port: remote,
            })
            .await
            .map_err(|_| Error::transport(format!("background unavailable for '{}'", name)))?;
        tracing::debug!("Connected channel '{}' (tab={:?})", name, self.tab);
        Ok(local)
    }
}
