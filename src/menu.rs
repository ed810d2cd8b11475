//! Menu Synthesizer
//!
//! Derives the Host -> Category -> Action/Script context menu from the
//! current configuration. Nodes are addressed by a structured [`MenuKey`];
//! the flat separator-joined id exists only at the platform menu API.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::model::Target;
use crate::platform::{MenuItem, Menus};
use crate::store::ConfigState;
use crate::BridgeConfig;

/// Position of a node in the menu
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MenuKey {
    Host(String),
    /// `category` is `None` for the bucket of uncategorized items
    Category {
        host: String,
        category: Option<String>,
    },
    Item {
        host: String,
        category: Option<String>,
        item: String,
    },
}

impl MenuKey {
    pub fn host(&self) -> &str {
        match self {
            MenuKey::Host(host) => host,
            MenuKey::Category { host, .. } | MenuKey::Item { host, .. } => host,
        }
    }

    pub fn parent(&self) -> Option<MenuKey> {
        match self {
            MenuKey::Host(_) => None,
            MenuKey::Category { host, .. } => Some(MenuKey::Host(host.clone())),
            MenuKey::Item { host, category, .. } => Some(MenuKey::Category {
                host: host.clone(),
                category: category.clone(),
            }),
        }
    }

    /// Flat id: `<sep><host>[<sep><category>[<sep><item>]]`, with `none_id`
    /// standing in for a missing category
    pub fn to_id(&self, separator: &str, none_id: &str) -> String {
        let category_id = |category: &Option<String>| -> String {
            category.clone().unwrap_or_else(|| none_id.to_string())
        };
        match self {
            MenuKey::Host(host) => format!("{}{}", separator, host),
            MenuKey::Category { host, category } => {
                format!("{0}{1}{0}{2}", separator, host, category_id(category))
            }
            MenuKey::Item {
                host,
                category,
                item,
            } => format!(
                "{0}{1}{0}{2}{0}{3}",
                separator,
                host,
                category_id(category),
                item
            ),
        }
    }

    /// Inverse of [`MenuKey::to_id`]
    pub fn parse(id: &str, separator: &str, none_id: &str) -> Option<MenuKey> {
        if separator.is_empty() {
            return None;
        }
        let parts: Vec<&str> = id.strip_prefix(separator)?.split(separator).collect();
        let category = |part: &str| (part != none_id).then(|| part.to_string());
        match parts.as_slice() {
            [host] => Some(MenuKey::Host(host.to_string())),
            [host, cat] => Some(MenuKey::Category {
                host: host.to_string(),
                category: category(*cat),
            }),
            [host, cat, item] => Some(MenuKey::Item {
                host: host.to_string(),
                category: category(*cat),
                item: item.to_string(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuNode {
    pub key: MenuKey,
    pub parent: Option<MenuKey>,
    pub title: String,
}

/// A synthesized menu, nodes in creation order (parents first)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuTree {
    nodes: Vec<MenuNode>,
}

impl MenuTree {
    pub fn nodes(&self) -> &[MenuNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> impl Iterator<Item = &MenuNode> {
        self.nodes.iter().filter(|n| n.parent.is_none())
    }

    pub fn children<'a>(&'a self, key: &'a MenuKey) -> impl Iterator<Item = &'a MenuNode> + 'a {
        self.nodes
            .iter()
            .filter(move |n| n.parent.as_ref() == Some(key))
    }

    pub fn find(&self, key: &MenuKey) -> Option<&MenuNode> {
        self.nodes.iter().find(|n| &n.key == key)
    }
}

/// Builds menus from configuration
#[derive(Debug, Clone)]
pub struct MenuSynthesizer {
    separator: String,
    none_id: String,
    none_title: String,
}

impl MenuSynthesizer {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            separator: config.menu_separator.clone(),
            none_id: config.none_category_id.clone(),
            none_title: config.none_category_title.clone(),
        }
    }

    pub fn id(&self, key: &MenuKey) -> String {
        key.to_id(&self.separator, &self.none_id)
    }

    pub fn parse_id(&self, id: &str) -> Option<MenuKey> {
        MenuKey::parse(id, &self.separator, &self.none_id)
    }

    /// Categories an entry is listed under, `None` being the uncategorized
    /// bucket. Blank categories and the reserved none id fall into the bucket.
    fn categories_of<'a>(&self, target: &Target<'a>) -> BTreeSet<Option<&'a str>> {
        let mut categories = BTreeSet::new();
        for category in target.categories() {
            if category.trim().is_empty() {
                continue;
            }
            if *category == self.none_id {
                tracing::warn!(
                    "Category '{}' of '{}' is reserved, listing it as uncategorized",
                    category,
                    target.display_name()
                );
                continue;
            }
            categories.insert(Some(category.as_str()));
        }
        if categories.is_empty() {
            categories.insert(None);
        }
        categories
    }

    /// Derive the full tree. Deterministic: hosts, categories and items are
    /// ordered by name, the uncategorized bucket first. An item with several
    /// categories appears under each of them. Every node gets a distinct id.
    pub fn synthesize(&self, state: &ConfigState) -> MenuTree {
        let mut nodes = Vec::new();

        for host in state.hosts.keys() {
            let root = MenuKey::Host(host.clone());
            nodes.push(MenuNode {
                key: root.clone(),
                parent: None,
                title: host.clone(),
            });

            let mut groups: BTreeMap<Option<&str>, Vec<&str>> = BTreeMap::new();
            for target in state.targets_for_host(host) {
                for category in self.categories_of(&target) {
                    groups.entry(category).or_default().push(target.display_name());
                }
            }

            for (category, items) in groups {
                let category_key = MenuKey::Category {
                    host: host.clone(),
                    category: category.map(str::to_string),
                };
                nodes.push(MenuNode {
                    parent: category_key.parent(),
                    key: category_key.clone(),
                    title: category.unwrap_or(self.none_title.as_str()).to_string(),
                });
                for item in items {
                    let key = MenuKey::Item {
                        host: host.clone(),
                        category: category.map(str::to_string),
                        item: item.to_string(),
                    };
                    nodes.push(MenuNode {
                        parent: key.parent(),
                        key,
                        title: item.to_string(),
                    });
                }
            }
        }

        MenuTree { nodes }
    }

    /// Flat items for the platform menu API, parents first
    pub fn to_items(&self, tree: &MenuTree) -> Vec<MenuItem> {
        tree.nodes()
            .iter()
            .map(|node| MenuItem {
                id: self.id(&node.key),
                parent_id: node.parent.as_ref().map(|p| self.id(p)),
                title: node.title.clone(),
            })
            .collect()
    }

    /// Clear the platform menu and recreate it from `state`
    pub async fn rebuild(&self, state: &ConfigState, menus: &dyn Menus) -> Result<MenuTree> {
        let tree = self.synthesize(state);
        menus.remove_all().await?;
        for item in self.to_items(&tree) {
            menus.create(item).await?;
        }
        tracing::info!(
            "Context menu rebuilt: {} hosts, {} entries",
            tree.roots().count(),
            tree.len()
        );
        Ok(tree)
    }
}
