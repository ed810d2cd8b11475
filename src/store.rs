//! Persistent configuration
//!
//! Storage is a flat key-value primitive holding one JSON blob per
//! collection. Collections are always read and written whole; concurrent
//! writers race and the last one wins.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

use crate::error::{Error, Result};
use crate::model::{ActionDescriptor, Commands, Host, ScriptDescriptor, Target};

pub const HOSTS_KEY: &str = "hosts";
pub const ACTIONS_KEY: &str = "actions";
pub const SCRIPTS_KEY: &str = "scripts";
pub const COMMANDS_KEY: &str = "commands";

/// Emitted after a key is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
}

/// Key-value storage primitive
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

/// Storage kept in memory
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
    changes: broadcast::Sender<StorageChange>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            values: Mutex::new(HashMap::new()),
            changes,
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.values.lock().await.insert(key.to_string(), value);
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

/// Storage backed by one JSON object on disk, rewritten on every `set`
pub struct FileStorage {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
    changes: broadcast::Sender<StorageChange>,
}

impl FileStorage {
    /// Open the file, starting empty if it does not exist yet
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match tokio::fs::read_to_string(&path).await {
            Ok(json) if json.trim().is_empty() => BTreeMap::new(),
            Ok(json) => serde_json::from_str(&json)
                .map_err(|e| Error::Storage(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        let (changes, _) = broadcast::channel(64);
        Ok(Self {
            path,
            values: Mutex::new(values),
            changes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        {
            let mut values = self.values.lock().await;
            values.insert(key.to_string(), value);
            let json = serde_json::to_string_pretty(&*values)?;
            tokio::fs::write(&self.path, json).await?;
        }
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

async fn load_blob<T: DeserializeOwned + Default>(storage: &dyn Storage, key: &str) -> Result<T> {
    match storage.get(key).await? {
        None => Ok(T::default()),
        Some(json) if json.trim().is_empty() => Ok(T::default()),
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| Error::Storage(format!("cannot parse '{}': {}", key, e))),
    }
}

async fn save_blob<T: Serialize>(storage: &dyn Storage, key: &str, value: &T) -> Result<()> {
    storage.set(key, serde_json::to_string(value)?).await
}

/// Everything the background process knows about hosts, actions, scripts
/// and shortcuts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigState {
    pub hosts: BTreeMap<String, Host>,
    pub actions: BTreeMap<String, ActionDescriptor>,
    pub scripts: BTreeMap<String, ScriptDescriptor>,
    pub commands: Commands,
}

impl ConfigState {
    /// Load all four collections. Missing keys load as empty collections.
    pub async fn load(storage: &dyn Storage) -> Result<Self> {
        let mut hosts: BTreeMap<String, Host> = load_blob(storage, HOSTS_KEY).await?;
        let mut actions: BTreeMap<String, ActionDescriptor> =
            load_blob(storage, ACTIONS_KEY).await?;
        let mut scripts: BTreeMap<String, ScriptDescriptor> =
            load_blob(storage, SCRIPTS_KEY).await?;
        let commands: BTreeMap<String, String> = load_blob(storage, COMMANDS_KEY).await?;
        let commands: Commands = commands.into_iter().collect();

        // The collection key is authoritative for the record's name
        for (name, host) in hosts.iter_mut() {
            host.name = name.clone();
        }
        for (name, action) in actions.iter_mut() {
            action.display_name = name.clone();
        }
        for (name, script) in scripts.iter_mut() {
            script.display_name = name.clone();
        }

        Ok(Self {
            hosts,
            actions,
            scripts,
            commands,
        })
    }

    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    /// Resolve a display name. Actions take precedence over scripts with the
    /// same name.
    pub fn resolve(&self, name: &str) -> Option<Target<'_>> {
        self.actions
            .get(name)
            .map(Target::Action)
            .or_else(|| self.scripts.get(name).map(Target::Script))
    }

    /// Menu entries bound to `host`, ordered by display name.
    ///
    /// When an action and a script share a name, the script's hosts and
    /// categories place the entry; [`ConfigState::resolve`] still runs the
    /// action when it is clicked.
    pub fn targets_for_host(&self, host: &str) -> Vec<Target<'_>> {
        let mut listed: BTreeMap<&str, Target<'_>> = BTreeMap::new();
        for (name, action) in &self.actions {
            listed.insert(name, Target::Action(action));
        }
        for (name, script) in &self.scripts {
            listed.insert(name, Target::Script(script));
        }
        listed
            .into_values()
            .filter(|target| target.hosts().iter().any(|h| h == host))
            .collect()
    }
}

pub async fn save_hosts(storage: &dyn Storage, hosts: &BTreeMap<String, Host>) -> Result<()> {
    for host in hosts.values() {
        host.validate()?;
    }
    save_blob(storage, HOSTS_KEY, hosts).await
}

pub async fn save_actions(
    storage: &dyn Storage,
    actions: &BTreeMap<String, ActionDescriptor>,
) -> Result<()> {
    save_blob(storage, ACTIONS_KEY, actions).await
}

pub async fn save_scripts(
    storage: &dyn Storage,
    scripts: &BTreeMap<String, ScriptDescriptor>,
) -> Result<()> {
    save_blob(storage, SCRIPTS_KEY, scripts).await
}

pub async fn save_commands(storage: &dyn Storage, commands: &Commands) -> Result<()> {
    save_blob(storage, COMMANDS_KEY, commands).await
}
