use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::ClientError;
use crate::transport::body;
use crate::transport::{Method, RequestDescriptor, Transport, TransportKind};

/// Header naming the target service behind the managed gateway.
pub const SERVICE_HEADER: &str = "X-WX-SERVICE";

/// An HTTP-shaped call proxied through the container gateway.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ContainerCall {
    /// Cloud environment id.
    pub env: String,
    /// Path only, always beginning with `/`.
    pub path: String,
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub data: Value,
}

/// What the gateway hands back.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContainerReply {
    /// Missing status codes are treated as 200.
    pub status_code: Option<u16>,
    /// May be an object, a JSON-encoded string, or absent.
    pub data: Option<Value>,
}

/// The host's container-invocation capability.
///
/// `Err` means the call itself could not complete (no reply at all); any
/// reply, whatever its status, is `Ok`.
#[async_trait]
pub trait ContainerBridge: Send + Sync {
    async fn call_container(&self, call: ContainerCall) -> Result<ContainerReply, ClientError>;
}

/// Strip `http(s)://host` from a URL, leaving a path that starts with `/`.
pub fn container_path(url: &str) -> String {
    let rest = ["https://", "http://"]
        .iter()
        .find_map(|scheme| {
            url.get(..scheme.len())
                .filter(|p| p.eq_ignore_ascii_case(scheme))
                .map(|_| &url[scheme.len()..])
        })
        .map(|after_scheme| match after_scheme.find('/') {
            Some(idx) => &after_scheme[idx..],
            None => "",
        })
        .unwrap_or(url);

    if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    }
}

/// Requests delivered through the mini-program container gateway.
pub struct ManagedTransport {
    bridge: Arc<dyn ContainerBridge>,
    env_id: String,
    service_name: String,
}

impl ManagedTransport {
    pub fn new(
        bridge: Arc<dyn ContainerBridge>,
        env_id: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            bridge,
            env_id: env_id.into(),
            service_name: service_name.into(),
        }
    }

    pub fn build_call(&self, request: RequestDescriptor) -> ContainerCall {
        let mut headers = request.headers;
        headers.retain(|k, _| !k.eq_ignore_ascii_case(SERVICE_HEADER));
        headers.insert(SERVICE_HEADER.to_string(), self.service_name.clone());

        ContainerCall {
            env: self.env_id.clone(),
            path: container_path(&request.url),
            method: request.method,
            headers,
            data: request.data,
        }
    }
}

#[async_trait]
impl Transport for ManagedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Managed
    }

    async fn send(&self, request: RequestDescriptor) -> Result<Value, ClientError> {
        let call = self.build_call(request);
        let method = call.method;
        let path = call.path.clone();

        let reply = self.bridge.call_container(call).await?;
        // A zero status and an empty body both count as absent.
        let status = reply.status_code.filter(|&code| code != 0).unwrap_or(200);
        let data = match reply.data {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(Value::String(s)) if s.is_empty() => Value::Object(Default::default()),
            Some(v) => body::normalize(v),
        };

        tracing::debug!(method = %method, path = path, status, "container call finished");

        body::classify(status, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_strips_scheme_and_host() {
        assert_eq!(
            container_path("https://api.example.com/api/plots/status/t1"),
            "/api/plots/status/t1"
        );
        assert_eq!(container_path("http://localhost:8000/api/ping"), "/api/ping");
        assert_eq!(container_path("HTTPS://Host.example.com/x?y=1"), "/x?y=1");
    }

    #[test]
    fn path_without_host_component_is_root() {
        assert_eq!(container_path("https://api.example.com"), "/");
    }

    #[test]
    fn relative_paths_gain_leading_slash() {
        assert_eq!(container_path("/api/ping"), "/api/ping");
        assert_eq!(container_path("api/ping"), "/api/ping");
        assert_eq!(container_path(""), "/");
    }
}
