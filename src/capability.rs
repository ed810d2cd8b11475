//! Capability Assembler
//!
//! The only API user code running in a page ever sees. Every privileged
//! operation goes through a freshly opened channel to the background process:
//! one port, one request, one correlated reply. The object holds no reference
//! to storage, menus, tabs or the HTTP client.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::channel::{ChannelName, Connector, Reply};
use crate::error::{Error, Result};
use crate::html;
use crate::platform::Clipboard;
use crate::proxy::HttpMethod;
use crate::BridgeConfig;

/// Operations a script may call, by the names scripts use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Capability {
    Run,
    GetUrl,
    SetUrl,
    OpenTab,
    GetClipboard,
    SetClipboard,
    GetDom,
    SetDom,
    HtmlToDom,
    Notify,
    Http(HttpMethod),
    Parse,
}

impl Capability {
    pub fn parse(name: &str) -> Option<Self> {
        let capability = match name {
            "run" => Capability::Run,
            "getURL" => Capability::GetUrl,
            "setURL" => Capability::SetUrl,
            "openTab" => Capability::OpenTab,
            "getClipboard" => Capability::GetClipboard,
            "setClipboard" => Capability::SetClipboard,
            "getDOM" => Capability::GetDom,
            "setDOM" => Capability::SetDom,
            "HTML2DOM" => Capability::HtmlToDom,
            "notify" => Capability::Notify,
            "parse" => Capability::Parse,
            other => {
                let method = other.strip_prefix("http.")?;
                // exact lowercase only; `http.GET` is not a capability name
                if method != method.to_ascii_lowercase() {
                    return None;
                }
                Capability::Http(HttpMethod::parse(method)?)
            }
        };
        Some(capability)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Run => "run",
            Capability::GetUrl => "getURL",
            Capability::SetUrl => "setURL",
            Capability::OpenTab => "openTab",
            Capability::GetClipboard => "getClipboard",
            Capability::SetClipboard => "setClipboard",
            Capability::GetDom => "getDOM",
            Capability::SetDom => "setDOM",
            Capability::HtmlToDom => "HTML2DOM",
            Capability::Notify => "notify",
            Capability::Http(method) => return write!(f, "http.{}", method.as_str()),
            Capability::Parse => "parse",
        };
        f.write_str(name)
    }
}

impl TryFrom<String> for Capability {
    type Error = Error;

    fn try_from(name: String) -> Result<Self> {
        Capability::parse(&name)
            .ok_or_else(|| Error::InvalidScript(format!("unknown capability '{}'", name)))
    }
}

impl From<Capability> for String {
    fn from(capability: Capability) -> Self {
        capability.to_string()
    }
}

fn string_arg(capability: Capability, args: &[Value], index: usize) -> Result<String> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(Error::script(format!(
            "{}: argument {} must be a string, got {}",
            capability,
            index + 1,
            other
        ))),
        None => Err(Error::script(format!(
            "{}: missing argument {}",
            capability,
            index + 1
        ))),
    }
}

fn optional_string_arg(args: &[Value], index: usize) -> Option<String> {
    args.get(index).and_then(Value::as_str).map(str::to_string)
}

fn truthy_arg(args: &[Value], index: usize) -> bool {
    args.get(index).and_then(Value::as_bool).unwrap_or(false)
}

/// The capability object handed to one script execution
#[derive(Clone)]
pub struct Capabilities {
    connector: Connector,
    clipboard: Arc<dyn Clipboard>,
    notification_title: String,
    reply_timeout: Option<Duration>,
}

impl Capabilities {
    /// Assemble the object for a page reachable through `connector`
    pub fn assemble(
        connector: Connector,
        clipboard: Arc<dyn Clipboard>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            connector,
            clipboard,
            notification_title: config.notification_title.clone(),
            reply_timeout: config.reply_timeout(),
        }
    }

    /// Send one request on a new port and wait for its reply
    async fn request(&self, channel: ChannelName, message: Value) -> Result<Value> {
        let mut port = self.connector.connect(channel.as_str()).await?;
        let reply = match self.reply_timeout {
            Some(limit) => tokio::time::timeout(limit, port.request(message))
                .await
                .map_err(|_| {
                    Error::Timeout(format!("no reply on '{}' after {:?}", channel, limit))
                })??,
            None => port.request(message).await?,
        };

        let reply: Reply = serde_json::from_value(reply)?;
        reply.into_result().map_err(|message| match channel {
            ChannelName::Run => Error::remote(message),
            _ => Error::transport(format!("{}: {}", channel, message)),
        })
    }

    /// Fire-and-forget message on a new port
    async fn post(&self, channel: ChannelName, message: Value) -> Result<()> {
        let port = self.connector.connect(channel.as_str()).await?;
        port.post(message).await
    }

    // =========================================================================
    // Capability surface
    // =========================================================================

    /// Run an action on a host (a host record or a host name)
    pub async fn run(&self, action: Value, host: Value) -> Result<Value> {
        self.request(
            ChannelName::Run,
            json!({"type": "run", "action": action, "host": host}),
        )
        .await
    }

    pub async fn get_url(&self) -> Result<String> {
        match self.request(ChannelName::Url, json!({"type": "get"})).await? {
            Value::String(url) => Ok(url),
            other => Err(Error::transport(format!("unexpected URL reply: {}", other))),
        }
    }

    pub async fn set_url(&self, url: &str) -> Result<()> {
        self.post(ChannelName::Url, json!({"type": "set", "url": url}))
            .await
    }

    pub async fn open_tab(&self, url: &str) -> Result<()> {
        self.post(ChannelName::Url, json!({"type": "open", "url": url}))
            .await
    }

    pub async fn get_clipboard(&self) -> Result<String> {
        self.clipboard.read_text().await
    }

    pub async fn set_clipboard(&self, text: &str) -> Result<()> {
        self.clipboard.write_text(text).await
    }

    pub async fn get_dom(&self) -> Result<String> {
        match self.request(ChannelName::Dom, json!({"type": "get"})).await? {
            Value::String(html) => Ok(html),
            other => Err(Error::transport(format!("unexpected DOM reply: {}", other))),
        }
    }

    pub async fn set_dom(&self, html: &str) -> Result<()> {
        self.post(ChannelName::Dom, json!({"type": "set", "html": html}))
            .await
    }

    /// Local parse, no channel involved
    pub fn html_to_dom(&self, html: &str, is_root: bool) -> Option<String> {
        html::html_to_dom(html, is_root)
    }

    /// Show a notification; `title` defaults to the configured title
    pub async fn notify(&self, message: &str, title: Option<&str>, is_error: bool) -> Result<()> {
        let title = title.unwrap_or(&self.notification_title);
        self.post(
            ChannelName::Notify,
            json!({"type": "run", "message": message, "title": title, "error": is_error}),
        )
        .await
    }

    /// Proxied HTTP call; resolves with the response envelope
    pub async fn http(&self, method: HttpMethod, url: &str, args: Vec<Value>) -> Result<Value> {
        self.request(
            ChannelName::HttpProxy,
            json!({"type": method.as_str(), "url": url, "args": args}),
        )
        .await
    }

    /// Extract readable content; `options` may carry `contentType`
    pub async fn parse(&self, url: &str, html: &str, options: Value) -> Result<Value> {
        let content_type = options.get("contentType").cloned().unwrap_or(Value::Null);
        let mut message = json!({"type": "parse", "url": url, "html": html});
        if !content_type.is_null() {
            message["contentType"] = content_type;
        }
        self.request(ChannelName::ContentExtract, message).await
    }

    /// Call a capability with positional arguments, as scripts do
    pub async fn call(&self, capability: Capability, args: Vec<Value>) -> Result<Value> {
        tracing::trace!("Capability call {} ({} args)", capability, args.len());
        match capability {
            Capability::Run => {
                let mut args = args.into_iter();
                let action = args.next().unwrap_or(Value::Null);
                let host = args.next().unwrap_or(Value::Null);
                self.run(action, host).await
            }
            Capability::GetUrl => Ok(Value::String(self.get_url().await?)),
            Capability::SetUrl => {
                self.set_url(&string_arg(capability, &args, 0)?).await?;
                Ok(Value::Null)
            }
            Capability::OpenTab => {
                self.open_tab(&string_arg(capability, &args, 0)?).await?;
                Ok(Value::Null)
            }
            Capability::GetClipboard => Ok(Value::String(self.get_clipboard().await?)),
            Capability::SetClipboard => {
                self.set_clipboard(&string_arg(capability, &args, 0)?)
                    .await?;
                Ok(Value::Null)
            }
            Capability::GetDom => Ok(Value::String(self.get_dom().await?)),
            Capability::SetDom => {
                self.set_dom(&string_arg(capability, &args, 0)?).await?;
                Ok(Value::Null)
            }
            Capability::HtmlToDom => {
                let html = string_arg(capability, &args, 0)?;
                Ok(self
                    .html_to_dom(&html, truthy_arg(&args, 1))
                    .map_or(Value::Null, Value::String))
            }
            Capability::Notify => {
                let message = match args.first() {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                let title = optional_string_arg(&args, 1);
                self.notify(&message, title.as_deref(), truthy_arg(&args, 2))
                    .await?;
                Ok(Value::Null)
            }
            Capability::Http(method) => {
                let url = string_arg(capability, &args, 0)?;
                self.http(method, &url, args.into_iter().skip(1).collect())
                    .await
            }
            Capability::Parse => {
                let url = string_arg(capability, &args, 0)?;
                let html = string_arg(capability, &args, 1)?;
                let options = args.get(2).cloned().unwrap_or(Value::Null);
                self.parse(&url, &html, options).await
            }
        }
    }
}
