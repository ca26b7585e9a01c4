use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;

use crate::error::ClientError;
use crate::transport::body;
use crate::transport::{Method, RequestDescriptor, Transport, TransportKind};

/// Direct HTTP against the configured base address.
pub struct LocalTransport {
    client: Client,
    base_url: String,
}

impl LocalTransport {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URLs are used as is; anything else is joined onto the base.
    pub fn resolve_url(&self, url: &str) -> String {
        if Url::parse(url).is_ok() {
            return url.to_string();
        }
        if url.starts_with('/') {
            format!("{}{url}", self.base_url)
        } else {
            format!("{}/{url}", self.base_url)
        }
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

/// Flatten a JSON object into query pairs. Nested values are sent as JSON text.
fn query_pairs(data: &Value) -> Vec<(String, String)> {
    let Some(map) = data.as_object() else {
        return Vec::new();
    };
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let text = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), text)
        })
        .collect()
}

#[async_trait]
impl Transport for LocalTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Local
    }

    async fn send(&self, request: RequestDescriptor) -> Result<Value, ClientError> {
        let url = self.resolve_url(&request.url);

        let mut builder = self
            .client
            .request(reqwest_method(request.method), &url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        builder = if request.method.sends_query() {
            builder.query(&query_pairs(&request.data))
        } else {
            builder.json(&request.data)
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();

        // Inline images make large success bodies normal; no size limit.
        let bytes = response.bytes().await?;

        tracing::debug!(method = %request.method, url = url, status, "local request finished");

        body::classify(status, body::decode_bytes(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transport(base: &str) -> LocalTransport {
        LocalTransport::new(Client::new(), base)
    }

    #[test]
    fn resolve_joins_relative_paths() {
        let t = transport("http://localhost:8000/");
        assert_eq!(
            t.resolve_url("/api/plots/status/t1"),
            "http://localhost:8000/api/plots/status/t1"
        );
        assert_eq!(t.resolve_url("api/ping"), "http://localhost:8000/api/ping");
    }

    #[test]
    fn resolve_keeps_absolute_urls() {
        let t = transport("http://localhost:8000");
        assert_eq!(
            t.resolve_url("https://other.example.com/api/ping"),
            "https://other.example.com/api/ping"
        );
    }

    #[test]
    fn query_pairs_stringify_scalars() {
        let pairs = query_pairs(&json!({"page": 2, "q": "fiber", "skip": null}));
        assert_eq!(
            pairs,
            vec![
                ("page".to_string(), "2".to_string()),
                ("q".to_string(), "fiber".to_string()),
            ]
        );
        assert!(query_pairs(&json!("scalar")).is_empty());
    }
}
