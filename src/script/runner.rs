//! Script Runner
//!
//! Packs a script and its argument record into one self-contained
//! [`Invocation`], hands it to the target page, and reports failures.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::lang::Program;
use crate::error::{Error, Result};
use crate::model::Host;
use crate::page::PageRequest;
use crate::platform::{Notification, Notifier, TabId, Tabs};

const SCRIPT_ERROR_TITLE: &str = "Script error";

/// A script plus its arguments, serialized as the expression a page evaluates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub source: String,
    pub args: Value,
}

impl Invocation {
    pub fn new(source: impl Into<String>, args: Value) -> Self {
        Self {
            source: source.into(),
            args,
        }
    }

    pub fn expression(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_expression(expression: &str) -> Result<Self> {
        serde_json::from_str(expression)
            .map_err(|e| Error::InvalidScript(format!("malformed invocation: {}", e)))
    }
}

/// What a page reports back after evaluating an invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionOutcome {
    Result(Value),
    Error(String),
}

/// Stored script text or an already compiled program
#[derive(Debug, Clone)]
pub enum ScriptSource {
    Text(String),
    Program(Program),
}

impl ScriptSource {
    fn to_text(&self) -> Result<String> {
        match self {
            ScriptSource::Text(text) => Ok(text.clone()),
            ScriptSource::Program(program) => program.to_source(),
        }
    }
}

impl From<Program> for ScriptSource {
    fn from(program: Program) -> Self {
        ScriptSource::Program(program)
    }
}

/// The element or value a script was invoked on
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptTarget {
    /// Outer HTML of a clicked element
    Element(String),
    Value(Value),
}

impl ScriptTarget {
    fn into_value(self) -> Value {
        match self {
            ScriptTarget::Element(html) => Value::String(html),
            ScriptTarget::Value(value) => value,
        }
    }
}

/// Argument record: `{host, tabId, target, ...extra}`; `extra` wins on
/// conflicting keys.
pub fn build_args(
    host: &Host,
    tab: TabId,
    target: Option<ScriptTarget>,
    extra: Map<String, Value>,
) -> Result<Value> {
    let mut args = Map::new();
    args.insert("host".to_string(), serde_json::to_value(host)?);
    args.insert("tabId".to_string(), Value::from(tab));
    args.insert(
        "target".to_string(),
        target.map_or(Value::Null, ScriptTarget::into_value),
    );
    args.extend(extra);
    Ok(Value::Object(args))
}

/// Runs user scripts in page contexts
pub struct ScriptRunner {
    tabs: Arc<dyn Tabs>,
    notifier: Arc<dyn Notifier>,
}

impl ScriptRunner {
    pub fn new(tabs: Arc<dyn Tabs>, notifier: Arc<dyn Notifier>) -> Self {
        Self { tabs, notifier }
    }

    /// Run `source` in `tab`, or in the active tab when none is given.
    ///
    /// Resolves with `None` without doing anything if no tab can be
    /// resolved. A failing script raises a notification carrying its message
    /// and is returned as [`Error::Script`].
    pub async fn run(
        &self,
        source: &ScriptSource,
        host: &Host,
        tab: Option<TabId>,
        target: Option<ScriptTarget>,
        extra: Map<String, Value>,
    ) -> Result<Option<Value>> {
        let tab = match tab {
            Some(tab) => tab,
            None => match self.tabs.active_tab().await {
                Some(tab) => tab,
                None => {
                    tracing::debug!("No tab to run the script in");
                    return Ok(None);
                }
            },
        };

        match self.execute(source, host, tab, target, extra).await {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!("Script in tab {} failed: {}", tab, e);
                self.notifier
                    .notify(Notification::error(SCRIPT_ERROR_TITLE, e.reply_message()))
                    .await;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        source: &ScriptSource,
        host: &Host,
        tab: TabId,
        target: Option<ScriptTarget>,
        extra: Map<String, Value>,
    ) -> Result<Value> {
        let args = build_args(host, tab, target, extra)?;
        let expression = Invocation::new(source.to_text()?, args).expression()?;

        let reply = self
            .tabs
            .send(tab, PageRequest::Execute { expression })
            .await?;
        match serde_json::from_value(reply)? {
            ExecutionOutcome::Result(value) => Ok(value),
            ExecutionOutcome::Error(message) => Err(Error::Script(message)),
        }
    }
}
