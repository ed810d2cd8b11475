//! Outbound HTTP on behalf of a page
//!
//! Page code cannot reach arbitrary origins, so the `http-proxy` channel
//! performs the call in the background process and answers with a normalized
//! response envelope shaped like the one page scripts already expect.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::Result;
use crate::BridgeConfig;

const XSRF_COOKIE_NAME: &str = "XSRF-TOKEN";
const XSRF_HEADER_NAME: &str = "X-XSRF-TOKEN";

/// HTTP methods exposed to page scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 7] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Head,
        HttpMethod::Options,
        HttpMethod::Patch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Post => "post",
            HttpMethod::Put => "put",
            HttpMethod::Delete => "delete",
            HttpMethod::Head => "head",
            HttpMethod::Options => "options",
            HttpMethod::Patch => "patch",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(name))
    }

    /// Methods whose first argument is the request body
    pub fn has_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
            HttpMethod::Patch => reqwest::Method::PATCH,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

/// Per-request options passed by the page
#[derive(Debug, Clone, Default, Deserialize)]
struct RequestOptions {
    #[serde(default)]
    headers: Map<String, Value>,
    #[serde(default)]
    params: Map<String, Value>,
    /// Milliseconds; 0 means the client default
    #[serde(default)]
    timeout: u64,
}

/// Echo of the request that produced a proxied response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequestConfig {
    pub data: Value,
    pub headers: Map<String, Value>,
    pub max_content_length: i64,
    pub method: String,
    pub timeout: u64,
    pub url: String,
    pub xsrf_cookie_name: String,
    pub xsrf_header_name: String,
}

/// Normalized response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResponse {
    pub config: ProxyRequestConfig,
    pub headers: BTreeMap<String, String>,
    pub data: Value,
    pub status: u16,
    pub status_text: String,
}

fn header_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// JSON if the body parses as JSON, text if it is UTF-8, base64 otherwise
fn decode_body(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(text) => serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
        Err(_) => Value::String(base64::engine::general_purpose::STANDARD.encode(bytes)),
    }
}

/// Performs proxied HTTP calls
#[derive(Clone)]
pub struct HttpProxy {
    client: Client,
}

impl HttpProxy {
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    /// Perform `method url` with page-style arguments: `[data, options]` for
    /// methods with a body, `[options]` otherwise.
    ///
    /// Any HTTP status yields an envelope; only transport failures are errors.
    pub async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        args: &[Value],
    ) -> Result<ProxyResponse> {
        let url = Url::parse(url)?;
        let (data, options) = if method.has_body() {
            (args.first().cloned(), args.get(1))
        } else {
            (None, args.first())
        };
        let options: RequestOptions = match options {
            Some(v) if !v.is_null() => serde_json::from_value(v.clone())?,
            _ => RequestOptions::default(),
        };

        let mut builder = self.client.request(method.to_reqwest(), url.clone());
        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), header_text(value));
        }
        if !options.params.is_empty() {
            let query: Vec<(&str, String)> = options
                .params
                .iter()
                .map(|(k, v)| (k.as_str(), header_text(v)))
                .collect();
            builder = builder.query(&query);
        }
        if options.timeout > 0 {
            builder = builder.timeout(Duration::from_millis(options.timeout));
        }
        match &data {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => builder = builder.body(text.clone()),
            Some(json) => builder = builder.json(json),
        }

        tracing::debug!("Proxying {} {}", method, url);
        let response = builder.send().await?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let bytes = response.bytes().await?;

        Ok(ProxyResponse {
            config: ProxyRequestConfig {
                data: data.unwrap_or(Value::Null),
                headers: options.headers,
                max_content_length: -1,
                method: method.as_str().to_string(),
                timeout: options.timeout,
                url: url.to_string(),
                xsrf_cookie_name: XSRF_COOKIE_NAME.to_string(),
                xsrf_header_name: XSRF_HEADER_NAME.to_string(),
            },
            headers,
            data: decode_body(&bytes),
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_method_parse() {
        assert_eq!(HttpMethod::parse("get"), Some(HttpMethod::Get));
        assert_eq!(HttpMethod::parse("PATCH"), Some(HttpMethod::Patch));
        assert_eq!(HttpMethod::parse("trace"), None);
        assert!(HttpMethod::Post.has_body());
        assert!(!HttpMethod::Delete.has_body());
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body(br#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(decode_body(b"plain"), json!("plain"));
        assert_eq!(decode_body(&[0xff, 0xfe]), json!("//4="));
    }

    #[tokio::test]
    async fn test_get_with_params_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/items"))
            .and(query_param("page", "2"))
            .and(header("X-Api-Key", "k1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [1, 2]})))
            .mount(&server)
            .await;

        let proxy = HttpProxy::new(&BridgeConfig::default()).unwrap();
        let url = format!("{}/api/v1/items", server.uri());
        let options = json!({"headers": {"X-Api-Key": "k1"}, "params": {"page": 2}});
        let response = proxy
            .request(HttpMethod::Get, &url, &[options])
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.status_text, "OK");
        assert_eq!(response.data, json!({"items": [1, 2]}));
        assert_eq!(response.config.method, "get");
        assert_eq!(response.config.xsrf_header_name, "X-XSRF-TOKEN");
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .and(body_json(json!({"name": "pi"})))
            .respond_with(ResponseTemplate::new(201).set_body_string("created"))
            .mount(&server)
            .await;

        let proxy = HttpProxy::new(&BridgeConfig::default()).unwrap();
        let url = format!("{}/submit", server.uri());
        let response = proxy
            .request(HttpMethod::Post, &url, &[json!({"name": "pi"})])
            .await
            .unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.data, json!("created"));
        assert_eq!(response.config.data, json!({"name": "pi"}));
    }

    #[tokio::test]
    async fn test_error_status_still_returns_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let proxy = HttpProxy::new(&BridgeConfig::default()).unwrap();
        let response = proxy
            .request(HttpMethod::Delete, &server.uri(), &[])
            .await
            .unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.status_text, "Not Found");
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let proxy = HttpProxy::new(&BridgeConfig::default()).unwrap();
        assert!(proxy.request(HttpMethod::Get, "not a url", &[]).await.is_err());
    }
}
