//! Channel Router
//!
//! Runs in the background process. Accepts page connections, picks a handler
//! from the channel name, and serves each port on its own task. Handlers never
//! let a failure cross the boundary: request-type messages always get a reply,
//! fire-and-forget messages are logged on failure, and unknown channels or
//! message types are logged and ignored.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use super::port::{Connection, Port};
use super::protocol::{
    ChannelName, DomSetRequest, Envelope, HostRef, NotifyRequest, ParseRequest, ProxyRequest,
    Reply, RunRequest, UrlRequest,
};
use crate::error::{Error, Result};
use crate::extract::ContentExtractor;
use crate::invoker::ActionInvoker;
use crate::model::Host;
use crate::page::PageRequest;
use crate::platform::{Notification, Notifier, TabId, Tabs};
use crate::proxy::{HttpMethod, HttpProxy};
use crate::store::ConfigState;
use crate::BridgeConfig;

/// Privileged primitives the router dispatches to
pub struct Services {
    pub config: Arc<BridgeConfig>,
    pub state: Arc<RwLock<ConfigState>>,
    pub invoker: Arc<ActionInvoker>,
    pub proxy: HttpProxy,
    pub extractor: Arc<dyn ContentExtractor>,
    pub tabs: Arc<dyn Tabs>,
    pub notifier: Arc<dyn Notifier>,
}

impl Services {
    /// URL of the page in `tab`, `None` if it cannot be reached
    pub async fn page_url(&self, tab: Option<TabId>) -> Option<String> {
        let tab = tab?;
        match self.tabs.send(tab, PageRequest::GetUrl).await {
            Ok(Value::String(url)) => Some(url),
            Ok(other) => {
                tracing::debug!("Unexpected URL answer from tab {}: {}", tab, other);
                None
            }
            Err(e) => {
                tracing::debug!("Cannot read URL of tab {}: {}", tab, e);
                None
            }
        }
    }

    /// Outer HTML of the last context-menu target in `tab`
    pub async fn target_element(&self, tab: TabId) -> Option<String> {
        match self.tabs.send(tab, PageRequest::GetTargetElement).await {
            Ok(Value::String(html)) => Some(html),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("Cannot read target element of tab {}: {}", tab, e);
                None
            }
        }
    }

    async fn resolve_host(&self, host: HostRef) -> Result<Host> {
        match host {
            HostRef::Host(host) => Ok(host),
            HostRef::Name(name) => self
                .state
                .read()
                .await
                .host(&name)
                .cloned()
                .ok_or_else(|| Error::config(format!("no such host: {}", name))),
        }
    }

    async fn query_page(&self, tab: Option<TabId>, request: PageRequest) -> Result<Value> {
        let tab = tab.ok_or_else(|| Error::transport("message did not come from a tab"))?;
        self.tabs.send(tab, request).await
    }

    async fn on_run(&self, tab: Option<TabId>, envelope: &Envelope) -> Option<Reply> {
        if envelope.kind != "run" {
            tracing::warn!("Unhandled message type '{}' on channel 'run'", envelope.kind);
            return None;
        }

        let request: RunRequest = match envelope.decode() {
            Ok(r) => r,
            Err(e) => return Some(envelope.reply_err(e.reply_message())),
        };
        let host = match self.resolve_host(request.host).await {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!("{}", e);
                return Some(envelope.reply_err(e.reply_message()));
            }
        };

        let page_url = self.page_url(tab).await;
        let reply = match self
            .invoker
            .run(&request.action, &host, page_url.as_deref())
            .await
        {
            Ok(output) => envelope.reply_ok(output),
            Err(e) => envelope.reply_err(e.reply_message()),
        };
        Some(reply)
    }

    async fn on_url(&self, tab: Option<TabId>, envelope: &Envelope) -> Option<Reply> {
        match envelope.kind.as_str() {
            "get" => Some(match self.query_page(tab, PageRequest::GetUrl).await {
                Ok(url) => envelope.reply_ok(url),
                Err(e) => envelope.reply_err(e.reply_message()),
            }),
            "set" | "open" => {
                let request: UrlRequest = match envelope.decode() {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Malformed '{}' on channel 'url': {}", envelope.kind, e);
                        return None;
                    }
                };
                if let Err(e) = url::Url::parse(&request.url) {
                    tracing::warn!("Ignoring invalid URL '{}': {}", request.url, e);
                    return None;
                }

                let result = if envelope.kind == "set" {
                    self.query_page(tab, PageRequest::SetUrl { url: request.url })
                        .await
                        .map(|_| ())
                } else {
                    self.tabs.open(&request.url).await.map(|tab| {
                        tracing::debug!("Opened tab {}", tab);
                    })
                };
                if let Err(e) = result {
                    tracing::warn!("URL '{}' failed: {}", envelope.kind, e);
                }
                None
            }
            other => {
                tracing::warn!("Unhandled message type '{}' on channel 'url'", other);
                None
            }
        }
    }

    async fn on_dom(&self, tab: Option<TabId>, envelope: &Envelope) -> Option<Reply> {
        match envelope.kind.as_str() {
            "get" => Some(match self.query_page(tab, PageRequest::GetDom).await {
                Ok(html) => envelope.reply_ok(html),
                Err(e) => envelope.reply_err(e.reply_message()),
            }),
            "set" => {
                match envelope.decode::<DomSetRequest>() {
                    Ok(request) => {
                        if let Err(e) = self
                            .query_page(tab, PageRequest::SetDom { html: request.html })
                            .await
                        {
                            tracing::warn!("DOM set failed: {}", e);
                        }
                    }
                    Err(e) => tracing::warn!("Malformed 'set' on channel 'dom': {}", e),
                }
                None
            }
            other => {
                tracing::warn!("Unhandled message type '{}' on channel 'dom'", other);
                None
            }
        }
    }

    async fn on_notify(&self, envelope: &Envelope) -> Option<Reply> {
        if envelope.kind != "run" {
            tracing::warn!("Unhandled message type '{}' on channel 'notify'", envelope.kind);
            return None;
        }
        match envelope.decode::<NotifyRequest>() {
            Ok(request) => {
                let title = request
                    .title
                    .unwrap_or_else(|| self.config.notification_title.clone());
                let notification = if request.error {
                    Notification::error(title, request.message)
                } else {
                    Notification::info(title, request.message)
                };
                self.notifier.notify(notification).await;
            }
            Err(e) => tracing::warn!("Malformed 'run' on channel 'notify': {}", e),
        }
        None
    }

    async fn on_proxy(&self, envelope: &Envelope) -> Option<Reply> {
        let Some(method) = HttpMethod::parse(&envelope.kind) else {
            tracing::warn!(
                "Unhandled message type '{}' on channel 'http-proxy'",
                envelope.kind
            );
            return None;
        };
        let request: ProxyRequest = match envelope.decode() {
            Ok(r) => r,
            Err(e) => return Some(envelope.reply_err(e.reply_message())),
        };

        let reply = match self.proxy.request(method, &request.url, &request.args).await {
            Ok(response) => match serde_json::to_value(response) {
                Ok(value) => envelope.reply_ok(value),
                Err(e) => envelope.reply_err(e.to_string()),
            },
            Err(e) => {
                tracing::warn!("Proxied {} {} failed: {}", method, request.url, e);
                envelope.reply_err(e.reply_message())
            }
        };
        Some(reply)
    }

    async fn on_extract(&self, envelope: &Envelope) -> Option<Reply> {
        if envelope.kind != "parse" {
            tracing::warn!(
                "Unhandled message type '{}' on channel 'content-extract'",
                envelope.kind
            );
            return None;
        }
        let request: ParseRequest = match envelope.decode() {
            Ok(r) => r,
            Err(e) => return Some(envelope.reply_err(e.reply_message())),
        };

        let result = self
            .extractor
            .parse(&request.url, &request.html, request.content_type)
            .await
            .and_then(|document| Ok(serde_json::to_value(document)?));
        Some(match result {
            Ok(document) => envelope.reply_ok(document),
            Err(e) => envelope.reply_err(e.reply_message()),
        })
    }

    async fn dispatch(
        &self,
        channel: ChannelName,
        tab: Option<TabId>,
        envelope: &Envelope,
    ) -> Option<Reply> {
        tracing::debug!(
            "Dispatching '{}' on '{}' (tab={:?})",
            envelope.kind,
            channel,
            tab
        );
        match channel {
            ChannelName::Run => self.on_run(tab, envelope).await,
            ChannelName::Url => self.on_url(tab, envelope).await,
            ChannelName::Dom => self.on_dom(tab, envelope).await,
            ChannelName::Notify => self.on_notify(envelope).await,
            ChannelName::HttpProxy => self.on_proxy(envelope).await,
            ChannelName::ContentExtract => self.on_extract(envelope).await,
        }
    }
}

/// Accepts connections and serves one task per port
pub struct Router {
    services: Arc<Services>,
}

impl Router {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Serve connections on a background task until every connector is gone
    pub fn spawn(self, incoming: mpsc::Receiver<Connection>) -> JoinHandle<()> {
        tokio::spawn(self.serve(incoming))
    }

    pub async fn serve(self, mut incoming: mpsc::Receiver<Connection>) {
        while let Some(connection) = incoming.recv().await {
            self.accept(connection);
        }
        tracing::debug!("Channel router stopped");
    }

    /// Bind a handler to one connection
    pub fn accept(&self, connection: Connection) {
        let Some(channel) = ChannelName::parse(&connection.name) else {
            tracing::warn!("Unknown channel '{}', dropping connection", connection.name);
            return;
        };
        let services = Arc::clone(&self.services);
        tokio::spawn(serve_port(services, channel, connection.tab, connection.port));
    }
}

async fn serve_port(
    services: Arc<Services>,
    channel: ChannelName,
    tab: Option<TabId>,
    mut port: Port,
) {
    while let Some(message) = port.recv().await {
        let Some(envelope) = Envelope::parse(message) else {
            tracing::warn!("Message without a type on channel '{}'", channel);
            continue;
        };

        let Some(reply) = services.dispatch(channel, tab, &envelope).await else {
            continue;
        };
        let reply = match serde_json::to_value(&reply) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Cannot encode reply on '{}': {}", channel, e);
                continue;
            }
        };
        if let Err(e) = port.post(reply).await {
            tracing::debug!("Reply on '{}' dropped: {}", channel, e);
            break;
        }
    }
    tracing::trace!("Channel '{}' closed (tab={:?})", channel, tab);
}
