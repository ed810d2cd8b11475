//! Action Invoker
//!
//! Turns an action descriptor and a host into one authenticated
//! `POST /execute` against the automation server. Every failure is announced
//! through the notifier before it is returned to the caller.

use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::model::{ActionArgs, ActionDescriptor, Host, URL_SENTINEL};
use crate::platform::{Notification, Notifier};
use crate::BridgeConfig;

/// Header carrying the host's auth token
pub const TOKEN_HEADER: &str = "X-Token";

const REQUEST_ERROR_TITLE: &str = "Request error";

/// Resolve action arguments into the mapping sent to the server.
///
/// `$URL$` values are replaced with `page_url`; without one they are left as
/// they are and a warning is logged.
pub fn resolve_args(args: &ActionArgs, page_url: Option<&str>) -> Map<String, Value> {
    let mut resolved = args.to_map();
    for (name, value) in resolved.iter_mut() {
        if value.as_str() != Some(URL_SENTINEL) {
            continue;
        }
        match page_url {
            Some(url) => *value = Value::String(url.to_string()),
            None => tracing::warn!(
                "Cannot substitute {} in argument '{}': no page URL available",
                URL_SENTINEL,
                name
            ),
        }
    }
    resolved
}

/// Body of `POST /execute`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecuteRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub action: String,
    pub args: Map<String, Value>,
}

impl ExecuteRequest {
    pub fn new(action: &ActionDescriptor, page_url: Option<&str>) -> Self {
        Self {
            kind: "request",
            action: action.action_name.clone(),
            args: resolve_args(&action.args, page_url),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    response: ResponsePayload,
}

#[derive(Debug, Deserialize)]
struct ResponsePayload {
    #[serde(default)]
    output: Value,
    #[serde(default)]
    errors: Option<Vec<Value>>,
}

impl ResponsePayload {
    fn into_output(self) -> Result<Value> {
        match self.errors.as_deref().and_then(<[Value]>::first) {
            Some(Value::String(message)) => Err(Error::remote(message.clone())),
            Some(other) => Err(Error::remote(other.to_string())),
            None => Ok(self.output),
        }
    }
}

/// Executes actions against automation servers
pub struct ActionInvoker {
    client: Client,
    notifier: Arc<dyn Notifier>,
}

impl ActionInvoker {
    pub fn new(config: &BridgeConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, notifier })
    }

    /// Run `action` on `host`, resolving `$URL$` against `page_url`.
    ///
    /// Resolves with the server's `output`. Network failures, non-2xx statuses
    /// and server-reported errors raise a notification and are returned.
    pub async fn run(
        &self,
        action: &ActionDescriptor,
        host: &Host,
        page_url: Option<&str>,
    ) -> Result<Value> {
        match self.execute(action, host, page_url).await {
            Ok(output) => Ok(output),
            Err(e) => {
                tracing::warn!(
                    "Action '{}' on host '{}' failed: {}",
                    action.action_name,
                    host.name,
                    e
                );
                self.notifier
                    .notify(Notification::error(REQUEST_ERROR_TITLE, e.reply_message()))
                    .await;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        action: &ActionDescriptor,
        host: &Host,
        page_url: Option<&str>,
    ) -> Result<Value> {
        let url = host.execute_url();
        let body = ExecuteRequest::new(action, page_url);

        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = host.token() {
            request = request.header(TOKEN_HEADER, token);
        }

        tracing::debug!("POST {} action={}", url, body.action);
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let envelope: ExecuteResponse = response.json().await?;
        envelope.response.into_output()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArgPair;
    use crate::platform::MemoryNotifier;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn host_for(server: &MockServer) -> Host {
        let address = server.address();
        Host::new(address.ip().to_string(), address.port()).with_name("h1")
    }

    fn invoker() -> (ActionInvoker, Arc<MemoryNotifier>) {
        let notifier = Arc::new(MemoryNotifier::new());
        let invoker = ActionInvoker::new(&BridgeConfig::default(), notifier.clone()).unwrap();
        (invoker, notifier)
    }

    #[test]
    fn test_url_sentinel_substitution() {
        let args = ActionArgs::Map(
            json!({"resource": "$URL$", "volume": 50})
                .as_object()
                .unwrap()
                .clone(),
        );
        let resolved = resolve_args(&args, Some("https://example.com/watch"));
        assert_eq!(resolved["resource"], "https://example.com/watch");
        assert_eq!(resolved["volume"], 50);
    }

    #[test]
    fn test_url_sentinel_kept_without_page() {
        let args = ActionArgs::Pairs(vec![ArgPair::new("resource", "$URL$")]);
        let resolved = resolve_args(&args, None);
        assert_eq!(resolved["resource"], "$URL$");
    }

    #[test]
    fn test_first_error_wins() {
        let payload: ResponsePayload = serde_json::from_value(json!({
            "output": null,
            "errors": ["first", "second"]
        }))
        .unwrap();
        let err = payload.into_output().unwrap_err();
        assert_eq!(err.reply_message(), "first");
    }

    #[test]
    fn test_null_errors_is_success() {
        let payload: ResponsePayload =
            serde_json::from_value(json!({"output": "ok", "errors": null})).unwrap();
        assert_eq!(payload.into_output().unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn test_posts_execute_without_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute"))
            .and(body_json(json!({
                "type": "request",
                "action": "music.pause",
                "args": {}
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"response": {"output": 42, "errors": []}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (invoker, notifier) = invoker();
        let action = ActionDescriptor::new("Pause", "music.pause");
        let output = invoker.run(&action, &host_for(&server), None).await.unwrap();
        assert_eq!(output, json!(42));
        assert!(notifier.sent().is_empty());

        let requests: Vec<Request> = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get(TOKEN_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_sends_token_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute"))
            .and(header(TOKEN_HEADER, "s3cret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"response": {"output": null, "errors": []}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (invoker, _) = invoker();
        let action = ActionDescriptor::new("On", "light.on");
        let host = host_for(&server).with_token("s3cret");
        assert_eq!(invoker.run(&action, &host, None).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_remote_error_notifies_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"response": {"output": null, "errors": ["No such action"]}}),
            ))
            .mount(&server)
            .await;

        let (invoker, notifier) = invoker();
        let action = ActionDescriptor::new("Bad", "music.nope");
        let err = invoker
            .run(&action, &host_for(&server), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteAction(ref m) if m == "No such action"));

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].is_error);
        assert_eq!(sent[0].message, "No such action");
    }

    #[tokio::test]
    async fn test_http_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let (invoker, notifier) = invoker();
        let action = ActionDescriptor::new("On", "light.on");
        let err = invoker
            .run(&action, &host_for(&server), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http { status: 401, .. }));
        assert_eq!(notifier.sent().len(), 1);
    }
}
