//! Page Bridge
//!
//! The per-page side of the boundary. A [`PageBridge`] owns one page's
//! transient state (URL, serialized document, last context-menu target),
//! answers queries the background forwards to it, and hosts script
//! executions. [`TabRegistry`] keeps one bridge per open tab and is the
//! in-process [`Tabs`] implementation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::capability::Capabilities;
use crate::channel::Connector;
use crate::error::{Error, Result};
use crate::platform::{Clipboard, TabId, Tabs};
use crate::script::{ExecutionOutcome, Invocation, Program};
use crate::BridgeConfig;

const BLANK_DOCUMENT: &str = "<html><head></head><body></body></html>";

/// Query or mutation forwarded from the background to one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PageRequest {
    GetUrl,
    SetUrl { url: String },
    GetDom,
    SetDom { html: String },
    GetTargetElement,
    /// Evaluate a serialized [`Invocation`]
    Execute { expression: String },
}

#[derive(Debug, Default)]
struct PageState {
    url: String,
    html: String,
    /// Outer HTML of the element that last received a context-menu event
    context_target: Option<String>,
}

/// One page's content context
pub struct PageBridge {
    tab: TabId,
    state: Mutex<PageState>,
    connector: Connector,
    clipboard: Arc<dyn Clipboard>,
    config: Arc<BridgeConfig>,
}

impl PageBridge {
    pub fn new(
        tab: TabId,
        url: impl Into<String>,
        html: impl Into<String>,
        connector: &Connector,
        clipboard: Arc<dyn Clipboard>,
        config: Arc<BridgeConfig>,
    ) -> Self {
        Self {
            tab,
            state: Mutex::new(PageState {
                url: url.into(),
                html: html.into(),
                context_target: None,
            }),
            connector: connector.for_tab(tab),
            clipboard,
            config,
        }
    }

    pub fn tab(&self) -> TabId {
        self.tab
    }

    // =========================================================================
    // Page state
    // =========================================================================

    pub async fn url(&self) -> String {
        self.state.lock().await.url.clone()
    }

    pub async fn html(&self) -> String {
        self.state.lock().await.html.clone()
    }

    /// Navigate the page. The document is reset and the context-menu target
    /// no longer exists.
    pub async fn navigate(&self, url: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.url = url.into();
        state.html = BLANK_DOCUMENT.to_string();
        state.context_target = None;
        tracing::debug!("Tab {} navigated to {}", self.tab, state.url);
    }

    /// Replace the whole document
    pub async fn replace_html(&self, html: impl Into<String>) {
        self.state.lock().await.html = html.into();
    }

    /// Record a `contextmenu` event on an element
    pub async fn on_context_menu(&self, element_html: impl Into<String>) {
        self.state.lock().await.context_target = Some(element_html.into());
    }

    /// Last context-menu target, `None` if no event has occurred yet
    pub async fn target_element(&self) -> Option<String> {
        self.state.lock().await.context_target.clone()
    }

    // =========================================================================
    // Background queries
    // =========================================================================

    /// Capability object for code running in this page
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::assemble(self.connector.clone(), self.clipboard.clone(), &self.config)
    }

    /// Answer one forwarded request
    pub async fn handle(&self, request: PageRequest) -> Result<Value> {
        match request {
            PageRequest::GetUrl => Ok(Value::String(self.url().await)),
            PageRequest::SetUrl { url } => {
                self.navigate(url).await;
                Ok(Value::Null)
            }
            PageRequest::GetDom => Ok(Value::String(self.html().await)),
            PageRequest::SetDom { html } => {
                self.replace_html(html).await;
                Ok(Value::Null)
            }
            PageRequest::GetTargetElement => {
                Ok(self.target_element().await.map_or(Value::Null, Value::String))
            }
            PageRequest::Execute { expression } => {
                Ok(serde_json::to_value(self.execute(&expression).await)?)
            }
        }
    }

    /// Evaluate an injected invocation. Any failure, from a malformed
    /// expression to an error raised by the script, is reported as an
    /// [`ExecutionOutcome::Error`].
    pub async fn execute(&self, expression: &str) -> ExecutionOutcome {
        let result = async {
            let invocation = Invocation::from_expression(expression)?;
            let program = Program::compile(&invocation.source)?;
            program.run(&self.capabilities(), invocation.args).await
        }
        .await;

        match result {
            Ok(value) => ExecutionOutcome::Result(value),
            Err(e) => {
                tracing::debug!("Script in tab {} failed: {}", self.tab, e);
                ExecutionOutcome::Error(e.reply_message())
            }
        }
    }
}

/// Open tabs, one [`PageBridge`] each
pub struct TabRegistry {
    pages: RwLock<BTreeMap<TabId, Arc<PageBridge>>>,
    active: RwLock<Option<TabId>>,
    next_id: AtomicU64,
    connector: Connector,
    clipboard: Arc<dyn Clipboard>,
    config: Arc<BridgeConfig>,
}

impl TabRegistry {
    pub fn new(connector: Connector, clipboard: Arc<dyn Clipboard>, config: Arc<BridgeConfig>) -> Self {
        Self {
            pages: RwLock::new(BTreeMap::new()),
            active: RwLock::new(None),
            next_id: AtomicU64::new(1),
            connector,
            clipboard,
            config,
        }
    }

    /// Open a page and make it the active tab
    pub async fn open_page(&self, url: impl Into<String>, html: impl Into<String>) -> TabId {
        let tab = self.next_id.fetch_add(1, Ordering::SeqCst);
        let page = Arc::new(PageBridge::new(
            tab,
            url,
            html,
            &self.connector,
            self.clipboard.clone(),
            self.config.clone(),
        ));
        self.pages.write().await.insert(tab, page);
        *self.active.write().await = Some(tab);
        tab
    }

    pub async fn page(&self, tab: TabId) -> Option<Arc<PageBridge>> {
        self.pages.read().await.get(&tab).cloned()
    }

    /// Make `tab` the active tab. Returns false if it is not open.
    pub async fn activate(&self, tab: TabId) -> bool {
        if !self.pages.read().await.contains_key(&tab) {
            return false;
        }
        *self.active.write().await = Some(tab);
        true
    }

    pub async fn close(&self, tab: TabId) -> bool {
        let removed = self.pages.write().await.remove(&tab).is_some();
        let mut active = self.active.write().await;
        if *active == Some(tab) {
            *active = None;
        }
        removed
    }
}

#[async_trait]
impl Tabs for TabRegistry {
    async fn active_tab(&self) -> Option<TabId> {
        *self.active.read().await
    }

    async fn send(&self, tab: TabId, request: PageRequest) -> Result<Value> {
        // The page may call back into the background while handling this
        let page = self
            .page(tab)
            .await
            .ok_or_else(|| Error::transport(format!("tab {} is not available", tab)))?;
        page.handle(request).await
    }

    async fn open(&self, url: &str) -> Result<TabId> {
        Ok(self.open_page(url, BLANK_DOCUMENT).await)
    }
}
