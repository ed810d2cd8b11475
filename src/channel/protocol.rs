//! Channel names and message envelopes
//!
//! Every message is a JSON object with a `type` field and an optional numeric
//! `id`. Replies echo the id and carry either `result` or `error`.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::extract::ContentType;
use crate::model::{ActionDescriptor, Host};

/// Logical capabilities served by the background process, one channel each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelName {
    Run,
    Url,
    Dom,
    Notify,
    HttpProxy,
    ContentExtract,
}

impl ChannelName {
    pub const ALL: [ChannelName; 6] = [
        ChannelName::Run,
        ChannelName::Url,
        ChannelName::Dom,
        ChannelName::Notify,
        ChannelName::HttpProxy,
        ChannelName::ContentExtract,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelName::Run => "run",
            ChannelName::Url => "url",
            ChannelName::Dom => "dom",
            ChannelName::Notify => "notify",
            ChannelName::HttpProxy => "http-proxy",
            ChannelName::ContentExtract => "content-extract",
        }
    }

    /// Parse a channel name. The names used by older extension builds
    /// (`action`, `axios`, `mercury`) are still accepted.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "run" | "action" => Some(ChannelName::Run),
            "url" => Some(ChannelName::Url),
            "dom" => Some(ChannelName::Dom),
            "notify" => Some(ChannelName::Notify),
            "http-proxy" | "axios" => Some(ChannelName::HttpProxy),
            "content-extract" | "mercury" => Some(ChannelName::ContentExtract),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An incoming message split into its routing fields and body
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: Option<u64>,
    pub kind: String,
    pub body: Value,
}

impl Envelope {
    /// `None` if the message is not an object with a string `type`
    pub fn parse(message: Value) -> Option<Self> {
        let kind = message.get("type")?.as_str()?.to_string();
        let id = message.get("id").and_then(Value::as_u64);
        Some(Self {
            id,
            kind,
            body: message,
        })
    }

    /// Decode the body into a typed request
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.body)?)
    }

    pub fn reply_ok(&self, result: Value) -> Reply {
        Reply {
            id: self.id,
            kind: self.kind.clone(),
            result: Some(result),
            error: None,
        }
    }

    pub fn reply_err(&self, error: impl Into<String>) -> Reply {
        Reply {
            id: self.id,
            kind: self.kind.clone(),
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Answer to a request-type message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    /// Split into success value or error message
    pub fn into_result(self) -> std::result::Result<Value, String> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A host given inline or by name
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum HostRef {
    Name(String),
    Host(Host),
}

/// `run` channel: `{type: "run", action, host}`
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub action: ActionDescriptor,
    pub host: HostRef,
}

/// `url` channel `set` / `open`
#[derive(Debug, Clone, Deserialize)]
pub struct UrlRequest {
    pub url: String,
}

/// `dom` channel `set`
#[derive(Debug, Clone, Deserialize)]
pub struct DomSetRequest {
    pub html: String,
}

/// `notify` channel `run`
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyRequest {
    pub message: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub error: bool,
}

/// `http-proxy` channel; the HTTP method travels in `type`
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyRequest {
    pub url: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// `content-extract` channel `parse`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseRequest {
    pub url: String,
    pub html: String,
    #[serde(default)]
    pub content_type: ContentType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_names_round_trip() {
        for channel in ChannelName::ALL {
            assert_eq!(ChannelName::parse(channel.as_str()), Some(channel));
        }
        assert_eq!(ChannelName::parse("axios"), Some(ChannelName::HttpProxy));
        assert_eq!(ChannelName::parse("clipboard"), None);
    }

    #[test]
    fn test_envelope_requires_type() {
        assert!(Envelope::parse(json!({"url": "x"})).is_none());
        assert!(Envelope::parse(json!("get")).is_none());
        let envelope = Envelope::parse(json!({"type": "get", "id": 4})).unwrap();
        assert_eq!(envelope.kind, "get");
        assert_eq!(envelope.id, Some(4));
    }

    #[test]
    fn test_reply_echoes_id() {
        let envelope = Envelope::parse(json!({"type": "run", "id": 9})).unwrap();
        let reply = serde_json::to_value(envelope.reply_ok(json!(42))).unwrap();
        assert_eq!(reply, json!({"id": 9, "type": "run", "result": 42}));
        let reply = serde_json::to_value(envelope.reply_err("boom")).unwrap();
        assert_eq!(reply, json!({"id": 9, "type": "run", "error": "boom"}));
    }

    #[test]
    fn test_run_request_accepts_host_name_or_record() {
        let envelope = Envelope::parse(json!({
            "type": "run",
            "action": {"action": "music.mpd.pause", "args": {}},
            "host": "h1"
        }))
        .unwrap();
        let request: RunRequest = envelope.decode().unwrap();
        assert_eq!(request.action.action_name, "music.mpd.pause");
        assert_eq!(request.host, HostRef::Name("h1".into()));

        let envelope = Envelope::parse(json!({
            "type": "run",
            "action": {"actionName": "light.on"},
            "host": {"name": "h1", "address": "10.0.0.5", "port": 8008}
        }))
        .unwrap();
        let request: RunRequest = envelope.decode().unwrap();
        assert!(matches!(request.host, HostRef::Host(ref h) if h.port == 8008));
    }

    #[test]
    fn test_null_result_reads_as_null() {
        let reply: Reply = serde_json::from_value(json!({"type": "run", "result": null})).unwrap();
        assert_eq!(reply.into_result(), Ok(Value::Null));
    }
}
