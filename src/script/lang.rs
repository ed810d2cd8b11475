//! Restricted script language
//!
//! User scripts are stored as JSON programs instead of executable text. A
//! program is a list of steps; the only side effects available are calls to
//! allowlisted [`Capability`] names, checked when the program is compiled.
//!
//! ```json
//! {"steps": [
//!   {"op": "call", "fn": "getURL", "bind": "url"},
//!   {"op": "call", "fn": "run", "args": [
//!     {"action": "music.mpd.play", "args": {"resource": "$url"}}, "$args.host"
//!   ]}
//! ]}
//! ```
//!
//! Strings of the form `$name` or `$name.path.to.field` read variables
//! (`args` is always bound to the argument record); a leading `$$` stands for
//! a literal `$`. Objects with a single `$concat`, `$eq`, `$not` or
//! `$default` key are builtins. Everything else is a literal.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capability::{Capabilities, Capability};
use crate::error::{Error, Result};

/// One program instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Step {
    /// Call a capability with evaluated positional arguments
    Call {
        #[serde(rename = "fn")]
        capability: Capability,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bind: Option<String>,
    },
    Let {
        name: String,
        value: Value,
    },
    If {
        cond: Value,
        #[serde(default)]
        then: Vec<Step>,
        #[serde(rename = "else", default, skip_serializing_if = "Vec::is_empty")]
        otherwise: Vec<Step>,
    },
    Return {
        #[serde(default)]
        value: Value,
    },
    /// Raise a script error
    Fail {
        message: Value,
    },
}

/// A compiled script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Names bound from same-named fields of the argument record
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
    pub steps: Vec<Step>,
}

type BlockFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<Value>>> + Send + 'a>>;

impl Program {
    /// Compile script source: a `{"params", "steps"}` object or a bare array
    /// of steps.
    pub fn compile(source: &str) -> Result<Self> {
        let invalid = |e: serde_json::Error| Error::InvalidScript(e.to_string());
        let value: Value = serde_json::from_str(source).map_err(invalid)?;
        match value {
            Value::Array(_) => Ok(Self {
                params: Vec::new(),
                steps: serde_json::from_value(value).map_err(invalid)?,
            }),
            Value::Object(_) => serde_json::from_value(value).map_err(invalid),
            other => Err(Error::InvalidScript(format!(
                "expected a program object or a list of steps, got {}",
                other
            ))),
        }
    }

    /// Serialize back to source text
    pub fn to_source(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Run against a capability object. Resolves with the value of the first
    /// `return` step, or null if the program runs off its end.
    pub async fn run(&self, capabilities: &Capabilities, args: Value) -> Result<Value> {
        let mut scope = Scope::default();
        for param in &self.params {
            let value = args.get(param).cloned().unwrap_or(Value::Null);
            scope.vars.insert(param.clone(), value);
        }
        scope.vars.insert("args".to_string(), args);

        let result = run_block(&self.steps, capabilities, &mut scope).await?;
        Ok(result.unwrap_or(Value::Null))
    }
}

#[derive(Debug, Default)]
struct Scope {
    vars: BTreeMap<String, Value>,
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_path_segment(s: &str) -> bool {
    is_identifier(s) || (!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
}

impl Scope {
    /// Variable reference for `$name.path`, `None` if `text` is not one
    fn reference<'t>(text: &'t str) -> Option<(&'t str, Vec<&'t str>)> {
        let body = text.strip_prefix('$')?;
        let mut parts = body.split('.');
        let name = parts.next()?;
        if !is_identifier(name) {
            return None;
        }
        let path: Vec<&str> = parts.collect();
        if !path.iter().all(|s| is_path_segment(s)) {
            return None;
        }
        Some((name, path))
    }

    fn lookup(&self, name: &str, path: &[&str]) -> Result<Value> {
        let mut value = self
            .vars
            .get(name)
            .ok_or_else(|| Error::script(format!("undefined variable '{}'", name)))?;
        for segment in path {
            let next = match value {
                Value::Object(map) => map.get(*segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(v) => value = v,
                None => return Ok(Value::Null),
            }
        }
        Ok(value.clone())
    }

    fn eval(&self, expr: &Value) -> Result<Value> {
        match expr {
            Value::String(s) => {
                if let Some(escaped) = s.strip_prefix("$$") {
                    return Ok(Value::String(format!("${}", escaped)));
                }
                match Self::reference(s) {
                    Some((name, path)) => self.lookup(name, &path),
                    None => Ok(expr.clone()),
                }
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some((key, operand)) = map.iter().next() {
                        if let Some(value) = self.builtin(key, operand)? {
                            return Ok(value);
                        }
                    }
                }
                let mut out = Map::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.clone(), self.eval(value)?);
                }
                Ok(Value::Object(out))
            }
            _ => Ok(expr.clone()),
        }
    }

    fn operands(&self, name: &str, operand: &Value, count: usize) -> Result<Vec<Value>> {
        match operand {
            Value::Array(items) if items.len() == count => {
                items.iter().map(|item| self.eval(item)).collect()
            }
            _ => Err(Error::script(format!(
                "{} expects a list of {} operands",
                name, count
            ))),
        }
    }

    fn builtin(&self, key: &str, operand: &Value) -> Result<Option<Value>> {
        let value = match key {
            "$concat" => {
                let parts = match self.eval(operand)? {
                    Value::Array(items) => items,
                    single => vec![single],
                };
                Value::String(parts.iter().map(display).collect())
            }
            "$eq" => {
                let ops = self.operands(key, operand, 2)?;
                Value::Bool(ops[0] == ops[1])
            }
            "$not" => Value::Bool(!truthy(&self.eval(operand)?)),
            "$default" => {
                let mut ops = self.operands(key, operand, 2)?.into_iter();
                match (ops.next(), ops.next()) {
                    (Some(Value::Null), Some(fallback)) => fallback,
                    (Some(value), _) => value,
                    _ => Value::Null,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

/// String form used by `$concat`
fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn run_block<'a>(
    steps: &'a [Step],
    capabilities: &'a Capabilities,
    scope: &'a mut Scope,
) -> BlockFuture<'a> {
    Box::pin(async move {
        for step in steps {
            match step {
                Step::Call {
                    capability,
                    args,
                    bind,
                } => {
                    let args = args
                        .iter()
                        .map(|arg| scope.eval(arg))
                        .collect::<Result<Vec<_>>>()?;
                    let result = capabilities.call(*capability, args).await?;
                    if let Some(name) = bind {
                        scope.vars.insert(name.clone(), result);
                    }
                }
                Step::Let { name, value } => {
                    let value = scope.eval(value)?;
                    scope.vars.insert(name.clone(), value);
                }
                Step::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    let branch = if truthy(&scope.eval(cond)?) {
                        then
                    } else {
                        otherwise
                    };
                    if let Some(value) = run_block(branch, capabilities, scope).await? {
                        return Ok(Some(value));
                    }
                }
                Step::Return { value } => return Ok(Some(scope.eval(value)?)),
                Step::Fail { message } => {
                    return Err(Error::script(display(&scope.eval(message)?)));
                }
            }
        }
        Ok(None)
    })
}
