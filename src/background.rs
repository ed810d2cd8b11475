//! Background process
//!
//! The single long-lived owner of configuration state. Wires the platform
//! primitives into the channel router, keeps the context menu in sync with
//! storage, and turns menu clicks and keyboard shortcuts into action runs or
//! script executions.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use serde_json::{Map, Value};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::channel::{Connection, Envelope, Router, Services};
use crate::error::{Error, Result};
use crate::extract::ContentExtractor;
use crate::invoker::ActionInvoker;
use crate::menu::{MenuKey, MenuSynthesizer, MenuTree};
use crate::model::{ActionDescriptor, Host, ScriptDescriptor, Target};
use crate::platform::{Menus, Notifier, TabId, Tabs};
use crate::proxy::HttpProxy;
use crate::script::{ScriptRunner, ScriptSource, ScriptTarget};
use crate::store::{self, ConfigState, Storage, StorageChange, COMMANDS_KEY};
use crate::BridgeConfig;

/// Browser primitives the background drives
pub struct Platform {
    pub storage: Arc<dyn Storage>,
    pub menus: Arc<dyn Menus>,
    pub tabs: Arc<dyn Tabs>,
    pub notifier: Arc<dyn Notifier>,
    pub extractor: Arc<dyn ContentExtractor>,
}

/// An action or script resolved out of the state lock
enum Resolved {
    Action(ActionDescriptor),
    Script(ScriptDescriptor),
}

impl From<Target<'_>> for Resolved {
    fn from(target: Target<'_>) -> Self {
        match target {
            Target::Action(action) => Resolved::Action(action.clone()),
            Target::Script(script) => Resolved::Script(script.clone()),
        }
    }
}

/// The background process
pub struct Background {
    storage: Arc<dyn Storage>,
    menus: Arc<dyn Menus>,
    services: Arc<Services>,
    runner: ScriptRunner,
    synthesizer: MenuSynthesizer,
    menu: RwLock<MenuTree>,
    router: JoinHandle<()>,
    watcher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Background {
    /// Load state, build the menu, and start serving `incoming` connections
    pub async fn start(
        config: BridgeConfig,
        platform: Platform,
        incoming: mpsc::Receiver<Connection>,
    ) -> Result<Arc<Self>> {
        let config = Arc::new(config);
        // Subscribed before loading so a write racing the load is replayed
        let changes = platform.storage.subscribe();
        let state = ConfigState::load(platform.storage.as_ref()).await?;
        tracing::info!(
            "Loaded {} hosts, {} actions, {} scripts, {} shortcuts",
            state.hosts.len(),
            state.actions.len(),
            state.scripts.len(),
            state.commands.len()
        );

        let services = Arc::new(Services {
            config: config.clone(),
            state: Arc::new(RwLock::new(state)),
            invoker: Arc::new(ActionInvoker::new(&config, platform.notifier.clone())?),
            proxy: HttpProxy::new(&config)?,
            extractor: platform.extractor,
            tabs: platform.tabs.clone(),
            notifier: platform.notifier.clone(),
        });
        let router = Router::new(services.clone()).spawn(incoming);

        let background = Arc::new(Self {
            storage: platform.storage,
            menus: platform.menus,
            runner: ScriptRunner::new(platform.tabs, platform.notifier),
            synthesizer: MenuSynthesizer::from_config(&config),
            menu: RwLock::new(MenuTree::default()),
            services,
            router,
            watcher: std::sync::Mutex::new(None),
        });

        background.rebuild_menu().await?;
        let watcher = Self::watch_storage(Arc::downgrade(&background), changes);
        if let Ok(mut slot) = background.watcher.lock() {
            *slot = Some(watcher);
        }
        Ok(background)
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Snapshot of the current configuration
    pub async fn state(&self) -> ConfigState {
        self.services.state.read().await.clone()
    }

    /// The menu as last synthesized
    pub async fn menu(&self) -> MenuTree {
        self.menu.read().await.clone()
    }

    // =========================================================================
    // State lifecycle
    // =========================================================================

    /// Reload state from storage without touching the menu
    pub async fn reload(&self) -> Result<()> {
        let state = ConfigState::load(self.storage.as_ref()).await?;
        *self.services.state.write().await = state;
        Ok(())
    }

    /// Reload state from storage and rebuild the menu
    pub async fn refresh(&self) -> Result<()> {
        self.reload().await?;
        self.rebuild_menu().await
    }

    async fn rebuild_menu(&self) -> Result<()> {
        // Held for the whole rebuild so two rebuilds never interleave
        let mut menu = self.menu.write().await;
        let state = self.state().await;
        *menu = self.synthesizer.rebuild(&state, self.menus.as_ref()).await?;
        Ok(())
    }

    fn watch_storage(
        this: Weak<Self>,
        mut changes: broadcast::Receiver<StorageChange>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let key = match changes.recv().await {
                    Ok(change) => Some(change.key),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Missed {} storage changes, refreshing", skipped);
                        None
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(background) = this.upgrade() else {
                    break;
                };
                let result = match key.as_deref() {
                    Some(COMMANDS_KEY) => background.reload().await,
                    _ => background.refresh().await,
                };
                if let Err(e) = result {
                    tracing::warn!("Refresh after storage change failed: {}", e);
                }
            }
            tracing::debug!("Storage watcher stopped");
        })
    }

    // =========================================================================
    // Configuration saves
    // =========================================================================

    pub async fn save_hosts(&self, hosts: &BTreeMap<String, Host>) -> Result<()> {
        store::save_hosts(self.storage.as_ref(), hosts).await?;
        self.refresh().await
    }

    pub async fn save_actions(&self, actions: &BTreeMap<String, ActionDescriptor>) -> Result<()> {
        store::save_actions(self.storage.as_ref(), actions).await?;
        self.refresh().await
    }

    pub async fn save_scripts(&self, scripts: &BTreeMap<String, ScriptDescriptor>) -> Result<()> {
        store::save_scripts(self.storage.as_ref(), scripts).await?;
        self.refresh().await
    }

    /// Bind `shortcut` to an action or script, replacing both the shortcut's
    /// previous target and the target's previous shortcut
    pub async fn bind_command(&self, shortcut: &str, target: &str) -> Result<()> {
        let commands = {
            let state = self.services.state.read().await;
            if state.resolve(target).is_none() {
                return Err(Error::config(format!("no such action or script: {}", target)));
            }
            let mut commands = state.commands.clone();
            commands.bind(shortcut, target);
            commands
        };
        store::save_commands(self.storage.as_ref(), &commands).await?;
        self.services.state.write().await.commands = commands;
        Ok(())
    }

    // =========================================================================
    // User triggers
    // =========================================================================

    /// Handle a click on a generated menu entry.
    ///
    /// Only leaf entries do anything. An id that no longer resolves to a host
    /// and an action or script is logged and skipped.
    pub async fn on_menu_click(&self, menu_id: &str, tab: Option<TabId>) -> Result<Option<Value>> {
        let Some(key) = self.synthesizer.parse_id(menu_id) else {
            tracing::warn!("Unknown menu id '{}'", menu_id);
            return Ok(None);
        };
        let MenuKey::Item { host, item, .. } = key else {
            tracing::debug!("Ignoring click on menu group '{}'", menu_id);
            return Ok(None);
        };

        let (host, target) = {
            let state = self.services.state.read().await;
            (
                state.host(&host).cloned(),
                state.resolve(&item).map(Resolved::from),
            )
        };
        let (Some(host), Some(target)) = (host, target) else {
            tracing::warn!("Menu entry '{}' refers to missing configuration", menu_id);
            return Ok(None);
        };

        let tab = match tab {
            Some(tab) => Some(tab),
            None => self.services.tabs.active_tab().await,
        };
        let element = match tab {
            Some(tab) => self.services.target_element(tab).await,
            None => None,
        };
        self.execute(target, &host, tab, element.map(ScriptTarget::Element))
            .await
    }

    /// Handle a keyboard shortcut: run its target on the target's first host
    pub async fn on_command(&self, shortcut: &str) -> Result<Option<Value>> {
        let resolved = {
            let state = self.services.state.read().await;
            state.commands.target(shortcut).and_then(|name| {
                let target = state.resolve(name)?;
                let host = target.hosts().first().and_then(|h| state.host(h))?.clone();
                Some((Resolved::from(target), host))
            })
        };
        let Some((target, host)) = resolved else {
            tracing::warn!("Shortcut '{}' is not bound to a runnable target", shortcut);
            return Ok(None);
        };

        let tab = self.services.tabs.active_tab().await;
        self.execute(target, &host, tab, None).await
    }

    async fn execute(
        &self,
        target: Resolved,
        host: &Host,
        tab: Option<TabId>,
        element: Option<ScriptTarget>,
    ) -> Result<Option<Value>> {
        match target {
            Resolved::Action(action) => {
                let page_url = self.services.page_url(tab).await;
                let output = self
                    .services
                    .invoker
                    .run(&action, host, page_url.as_deref())
                    .await?;
                Ok(Some(output))
            }
            Resolved::Script(script) => {
                self.runner
                    .run(
                        &ScriptSource::Text(script.source),
                        host,
                        tab,
                        element,
                        Map::new(),
                    )
                    .await
            }
        }
    }

    /// Direct (non-channel) query from a page: `getCommands` or
    /// `getTargetElement`. Unknown queries are logged and get no answer.
    pub async fn on_message(&self, message: Value, tab: Option<TabId>) -> Option<Value> {
        let Some(envelope) = Envelope::parse(message) else {
            tracing::warn!("Direct query without a type");
            return None;
        };
        match envelope.kind.as_str() {
            "getCommands" => {
                let commands = self.services.state.read().await.commands.clone();
                match serde_json::to_value(commands) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::warn!("Cannot encode commands: {}", e);
                        None
                    }
                }
            }
            "getTargetElement" => {
                let element = match tab {
                    Some(tab) => self.services.target_element(tab).await,
                    None => None,
                };
                Some(element.map_or(Value::Null, Value::String))
            }
            other => {
                tracing::warn!("Unhandled direct query '{}'", other);
                None
            }
        }
    }
}

impl Drop for Background {
    fn drop(&mut self) {
        self.router.abort();
        if let Ok(mut slot) = self.watcher.lock() {
            if let Some(watcher) = slot.take() {
                watcher.abort();
            }
        }
    }
}
