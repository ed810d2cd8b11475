//! Configuration records
//!
//! Hosts, action and script descriptors, and keyboard shortcut bindings. These
//! are owned by the background process and persisted as whole collections.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Literal argument value replaced by the invoking page's URL
pub const URL_SENTINEL: &str = "$URL$";

/// One remote automation server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    #[serde(default)]
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub websocket_port: u16,
    #[serde(rename = "useTLS", alias = "ssl", default)]
    pub use_tls: bool,
    #[serde(alias = "token", default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Host {
    /// Create a host named after its address, with the websocket port one above
    /// the HTTP port
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        let address = address.into();
        Self {
            name: address.clone(),
            address,
            port,
            websocket_port: port.saturating_add(1),
            use_tls: false,
            auth_token: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// The token to send, if one is configured and non-empty
    pub fn token(&self) -> Option<&str> {
        self.auth_token.as_deref().filter(|t| !t.is_empty())
    }

    /// `http` or `https` depending on the TLS flag
    pub fn scheme(&self) -> &'static str {
        if self.use_tls {
            "https"
        } else {
            "http"
        }
    }

    /// Action execution endpoint
    pub fn execute_url(&self) -> String {
        format!("{}://{}:{}/execute", self.scheme(), self.address, self.port)
    }

    /// Reject hosts the configuration form would not accept
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("host name is empty"));
        }
        if self.address.is_empty() {
            return Err(Error::config(format!("host '{}' has no address", self.name)));
        }
        if self.port == 0 {
            return Err(Error::config(format!("host '{}' has port 0", self.name)));
        }
        if self.websocket_port == 0 {
            return Err(Error::config(format!(
                "host '{}' has websocket port 0",
                self.name
            )));
        }
        Ok(())
    }
}

/// Check a port typed as text: an integer in 1..=65535
pub fn is_port_valid(port: &str) -> bool {
    matches!(port.trim().parse::<u32>(), Ok(p) if p > 0 && p < 65536)
}

/// One `{name, value}` entry of an ordered argument list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgPair {
    pub name: String,
    #[serde(default)]
    pub value: Option<Value>,
}

impl ArgPair {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    fn is_empty(&self) -> bool {
        match &self.value {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        }
    }
}

/// Action arguments, either an ordered list of pairs or a ready mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionArgs {
    Pairs(Vec<ArgPair>),
    Map(Map<String, Value>),
}

impl Default for ActionArgs {
    fn default() -> Self {
        ActionArgs::Map(Map::new())
    }
}

impl ActionArgs {
    /// Fold into a mapping. Pairs whose value is absent, null or an empty
    /// string are dropped; later pairs win on duplicate names.
    pub fn to_map(&self) -> Map<String, Value> {
        match self {
            ActionArgs::Map(map) => map.clone(),
            ActionArgs::Pairs(pairs) => pairs
                .iter()
                .filter(|pair| !pair.is_empty())
                .filter_map(|pair| {
                    pair.value
                        .as_ref()
                        .map(|value| (pair.name.clone(), value.clone()))
                })
                .collect(),
        }
    }
}

/// A remotely-invokable action bound to one or more hosts
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDescriptor {
    #[serde(default)]
    pub display_name: String,
    #[serde(alias = "name", alias = "action")]
    pub action_name: String,
    #[serde(default)]
    pub args: ActionArgs,
    #[serde(alias = "hostNames", default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl ActionDescriptor {
    pub fn new(display_name: impl Into<String>, action_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            action_name: action_name.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: ActionArgs) -> Self {
        self.args = args;
        self
    }

    pub fn on_host(mut self, host: impl Into<String>) -> Self {
        let host = host.into();
        if !self.hosts.contains(&host) {
            self.hosts.push(host);
        }
        self
    }

    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        let category = category.into();
        if !self.categories.contains(&category) {
            self.categories.push(category);
        }
        self
    }
}

/// User-authored code stored as text
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptDescriptor {
    #[serde(default)]
    pub display_name: String,
    #[serde(alias = "script")]
    pub source: String,
    #[serde(alias = "hostNames", default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl ScriptDescriptor {
    pub fn new(display_name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn on_host(mut self, host: impl Into<String>) -> Self {
        let host = host.into();
        if !self.hosts.contains(&host) {
            self.hosts.push(host);
        }
        self
    }

    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        let category = category.into();
        if !self.categories.contains(&category) {
            self.categories.push(category);
        }
        self
    }
}

/// A resolved action-or-script reference
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Target<'a> {
    Action(&'a ActionDescriptor),
    Script(&'a ScriptDescriptor),
}

impl<'a> Target<'a> {
    pub fn display_name(&self) -> &'a str {
        match self {
            Target::Action(a) => &a.display_name,
            Target::Script(s) => &s.display_name,
        }
    }

    pub fn hosts(&self) -> &'a [String] {
        match self {
            Target::Action(a) => &a.hosts,
            Target::Script(s) => &s.hosts,
        }
    }

    pub fn categories(&self) -> &'a [String] {
        match self {
            Target::Action(a) => &a.categories,
            Target::Script(s) => &s.categories,
        }
    }
}

/// Keyboard shortcut bindings: shortcut id -> target display name.
///
/// A target is bound to at most one shortcut.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Commands(BTreeMap<String, String>);

impl Commands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `shortcut` to `target`, dropping any other shortcut bound to the
    /// same target and any previous target of this shortcut
    pub fn bind(&mut self, shortcut: impl Into<String>, target: impl Into<String>) {
        let shortcut = shortcut.into();
        let target = target.into();
        self.0.retain(|s, t| *t != target || *s == shortcut);
        self.0.insert(shortcut, target);
    }

    /// Remove a binding, returning its target
    pub fn unbind(&mut self, shortcut: &str) -> Option<String> {
        self.0.remove(shortcut)
    }

    pub fn target(&self, shortcut: &str) -> Option<&str> {
        self.0.get(shortcut).map(String::as_str)
    }

    pub fn shortcut_for(&self, target: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(_, t)| t.as_str() == target)
            .map(|(s, _)| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(s, t)| (s.as_str(), t.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Collects through [`Commands::bind`], so a target bound more than once keeps
/// only its last shortcut
impl FromIterator<(String, String)> for Commands {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut commands = Commands::new();
        for (shortcut, target) in iter {
            commands.bind(shortcut, target);
        }
        commands
    }
}
