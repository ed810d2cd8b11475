//! # Platybridge
//!
//! Privileged-boundary RPC for triggering home-automation actions from web pages.
//!
//! Page contexts never touch privileged primitives. They open named channels
//! to one long-lived background process, send a request envelope, and wait
//! for the correlated reply. The background owns the configuration (hosts,
//! actions, scripts, shortcuts), talks to the automation server over HTTP,
//! and keeps the context menu in sync with the configuration.
//!
//! ## Features
//!
//! - **Channel multiplexing** - `run`, `url`, `dom`, `notify`, `http-proxy`, `content-extract`
//! - **Action invocation** - `POST /execute` with `$URL$` substitution and token auth
//! - **Menu synthesis** - Host -> Category -> Action/Script, rebuilt on every change
//! - **Restricted scripts** - JSON programs over an explicit capability allowlist
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use platybridge::channel::Connector;
//! use platybridge::platform::{LogNotifier, MemoryClipboard, MemoryMenus};
//! use platybridge::{Background, BridgeConfig, MemoryStorage, Platform, ReadabilityExtractor, TabRegistry};
//!
//! #[tokio::main]
//! async fn main() -> platybridge::Result<()> {
//!     let config = BridgeConfig::default();
//!     let (connector, incoming) = Connector::channel(config.channel_capacity);
//!
//!     let tabs = Arc::new(TabRegistry::new(
//!         connector,
//!         Arc::new(MemoryClipboard::new()),
//!         Arc::new(config.clone()),
//!     ));
//!     let platform = Platform {
//!         storage: Arc::new(MemoryStorage::new()),
//!         menus: Arc::new(MemoryMenus::new()),
//!         tabs: tabs.clone(),
//!         notifier: Arc::new(LogNotifier),
//!         extractor: Arc::new(ReadabilityExtractor::new()),
//!     };
//!     let background = Background::start(config, platform, incoming).await?;
//!
//!     // A right-click on a generated menu entry
//!     let tab = tabs.open_page("https://example.com", "<html></html>").await;
//!     background.on_menu_click("//h1//media//Pause", Some(tab)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust,no_run
//! use platybridge::BridgeConfig;
//!
//! # fn main() -> platybridge::Result<()> {
//! let config = BridgeConfig {
//!     notification_title: "home".into(),
//!     reply_timeout_ms: Some(5_000),
//!     ..Default::default()
//! };
//!
//! // or from a JSON file; missing fields keep their defaults
//! let config = BridgeConfig::load("bridge.json")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod background;
pub mod capability;
pub mod channel;
pub mod error;
pub mod extract;
pub mod html;
pub mod invoker;
pub mod menu;
pub mod model;
pub mod page;
pub mod platform;
pub mod proxy;
pub mod script;
pub mod store;

// Re-exports
pub use background::{Background, Platform};
pub use capability::{Capabilities, Capability};
pub use error::{Error, Result};
pub use extract::{ContentExtractor, ContentType, ExtractedDocument, ReadabilityExtractor};
pub use invoker::ActionInvoker;
pub use menu::{MenuKey, MenuSynthesizer, MenuTree};
pub use model::{ActionArgs, ActionDescriptor, ArgPair, Commands, Host, ScriptDescriptor};
pub use page::{PageBridge, PageRequest, TabRegistry};
pub use proxy::{HttpMethod, HttpProxy, ProxyResponse};
pub use script::{Program, ScriptRunner};
pub use store::{ConfigState, FileStorage, MemoryStorage, Storage};

/// Configuration for the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Separator joining host, category and item in flat menu ids
    pub menu_separator: String,
    /// Category id used in menu ids for uncategorized items
    pub none_category_id: String,
    /// Menu title of the uncategorized bucket
    pub none_category_title: String,
    /// Title for notifications that do not set one
    pub notification_title: String,
    /// Timeout for outbound HTTP (action execution and proxied calls)
    pub request_timeout_ms: u64,
    /// How long a capability call waits for its reply (None = forever)
    pub reply_timeout_ms: Option<u64>,
    /// Buffer size of every channel
    pub channel_capacity: usize,
    /// User agent for outbound HTTP
    pub user_agent: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            menu_separator: "//".to_string(),
            none_category_id: "[NONE]".to_string(),
            none_category_title: "[No Category]".to_string(),
            notification_title: "platypush".to_string(),
            request_timeout_ms: 30_000,
            reply_timeout_ms: None,
            channel_capacity: 256,
            user_agent: concat!("platybridge/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl BridgeConfig {
    /// Bounded config: every capability call gives up after 30 seconds and
    /// outbound HTTP after 10
    pub fn bounded() -> Self {
        Self {
            request_timeout_ms: 10_000,
            reply_timeout_ms: Some(30_000),
            ..Default::default()
        }
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_ms.map(Duration::from_millis)
    }
}
