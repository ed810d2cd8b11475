//! Browser primitives
//!
//! The chrome the background process drives (menus, tabs, notifications,
//! clipboard) behind async traits, plus in-memory implementations.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::page::PageRequest;

/// Browser tab identifier
pub type TabId = u64;

/// One entry handed to the platform menu API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub title: String,
}

/// Context menu primitive
#[async_trait]
pub trait Menus: Send + Sync {
    async fn remove_all(&self) -> Result<()>;
    async fn create(&self, item: MenuItem) -> Result<()>;
}

/// Tab primitive. `send` delivers a request to the page bridge running in
/// that tab and returns its answer.
#[async_trait]
pub trait Tabs: Send + Sync {
    async fn active_tab(&self) -> Option<TabId>;
    async fn send(&self, tab: TabId, request: PageRequest) -> Result<Value>;
    async fn open(&self, url: &str) -> Result<TabId>;
}

/// A user-visible system notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub is_error: bool,
}

impl Notification {
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            is_error: false,
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            is_error: true,
        }
    }
}

/// Notification primitive
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Clipboard primitive
#[async_trait]
pub trait Clipboard: Send + Sync {
    async fn read_text(&self) -> Result<String>;
    async fn write_text(&self, text: &str) -> Result<()>;
}

/// Menu backend that keeps the current items in memory
#[derive(Debug, Default)]
pub struct MemoryMenus {
    items: Mutex<Vec<MenuItem>>,
}

impl MemoryMenus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items currently registered, in creation order
    pub fn items(&self) -> Vec<MenuItem> {
        self.items.lock().map(|items| items.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Menus for MemoryMenus {
    async fn remove_all(&self) -> Result<()> {
        if let Ok(mut items) = self.items.lock() {
            items.clear();
        }
        Ok(())
    }

    async fn create(&self, item: MenuItem) -> Result<()> {
        if let Ok(mut items) = self.items.lock() {
            items.push(item);
        }
        Ok(())
    }
}

/// Notifier that writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) {
        if notification.is_error {
            tracing::error!("{}: {}", notification.title, notification.message);
        } else {
            tracing::info!("{}: {}", notification.title, notification.message);
        }
    }
}

/// Notifier that records every notification
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, notification: Notification) {
        tracing::debug!("Notification: {:?}", notification);
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification);
        }
    }
}

/// Clipboard held in memory
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    text: Mutex<String>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Mutex::new(text.into()),
        }
    }
}

#[async_trait]
impl Clipboard for MemoryClipboard {
    async fn read_text(&self) -> Result<String> {
        Ok(self.text.lock().map(|t| t.clone()).unwrap_or_default())
    }

    async fn write_text(&self, text: &str) -> Result<()> {
        if let Ok(mut current) = self.text.lock() {
            *current = text.to_string();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_menus_remove_all() {
        let menus = MemoryMenus::new();
        menus
            .create(MenuItem {
                id: "//h1".into(),
                parent_id: None,
                title: "h1".into(),
            })
            .await
            .unwrap();
        assert_eq!(menus.items().len(), 1);
        menus.remove_all().await.unwrap();
        assert!(menus.items().is_empty());
    }

    #[tokio::test]
    async fn test_memory_clipboard() {
        let clipboard = MemoryClipboard::with_text("hello");
        assert_eq!(clipboard.read_text().await.unwrap(), "hello");
        clipboard.write_text("<p>hello</p>").await.unwrap();
        assert_eq!(clipboard.read_text().await.unwrap(), "<p>hello</p>");
    }

    #[test]
    fn test_menu_item_omits_missing_parent() {
        let item = MenuItem {
            id: "//h1".into(),
            parent_id: None,
            title: "h1".into(),
        };
        let json = serde_json::to_string(&item).unwrap();
        assert_eq!(json, r#"{"id":"//h1","title":"h1"}"#);
    }
}
