pub mod body;
pub mod container;
pub mod http;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::config::{Config, EnvMode};
use crate::error::ClientError;
use crate::host::Host;
use crate::notify::Notifier;
use crate::store::{KvStore, keys};

use self::container::ManagedTransport;
use self::http::LocalTransport;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }

    /// Methods whose `data` travels in the query string rather than the body.
    pub fn sends_query(&self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request against the remote service. `url` may be absolute or a path.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
    pub url: String,
    pub method: Method,
    pub data: Value,
    pub headers: BTreeMap<String, String>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            data: Value::Object(Default::default()),
            headers: BTreeMap::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>, data: Value) -> Self {
        Self::new(Method::Post, url).with_data(data)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Insert a header, replacing any existing one with the same
    /// case-insensitive name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
    }
}

/// Which concrete transport a [`Requester`] ended up with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Local,
    Managed,
}

/// One way of delivering a request to the remote service.
///
/// Implementations produce exactly one outcome per call and apply the
/// [200, 300) success rule via [`body::classify`].
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn send(&self, request: RequestDescriptor) -> Result<Value, ClientError>;
}

/// Shared HTTP client for the local transport.
pub fn http_client() -> Result<Client, ClientError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(4)
        .build()
        .map_err(ClientError::Request)
}

/// Pick the transport once, from the resolved mode and the host's
/// capabilities. Managed mode without a container bridge falls back to
/// local HTTP.
pub fn select_transport(
    config: &Config,
    host: &Host,
    client: Client,
) -> Arc<dyn Transport> {
    if config.mode == EnvMode::Managed {
        if let Some(bridge) = host.container() {
            tracing::info!(
                env = config.cloud_env_id,
                service = config.cloud_service_name,
                "using managed container transport"
            );
            return Arc::new(ManagedTransport::new(
                bridge,
                config.cloud_env_id.clone(),
                config.cloud_service_name.clone(),
            ));
        }
        tracing::warn!(
            host = ?host.kind(),
            base_url = config.base_url,
            "managed mode requested but container invocation unavailable, falling back to local HTTP"
        );
    } else {
        tracing::info!(base_url = config.base_url, "using local HTTP transport");
    }
    Arc::new(LocalTransport::new(client, config.base_url.clone()))
}

/// The transport resolver every caller goes through: injects the stored
/// credential, delegates to the selected transport and raises a notice on
/// every failure.
#[derive(Clone)]
pub struct Requester {
    transport: Arc<dyn Transport>,
    store: Arc<dyn KvStore>,
    notifier: Arc<dyn Notifier>,
}

impl Requester {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn KvStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            transport,
            store,
            notifier,
        }
    }

    pub fn from_config(
        config: &Config,
        host: &Host,
        store: Arc<dyn KvStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ClientError> {
        let transport = select_transport(config, host, http_client()?);
        Ok(Self::new(transport, store, notifier))
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub async fn send(&self, mut request: RequestDescriptor) -> Result<Value, ClientError> {
        if let Some(token) = self.store.get_non_empty(keys::TOKEN) {
            request.set_header("Authorization", format!("Bearer {token}"));
        }

        let method = request.method;
        let url = request.url.clone();

        match self.transport.send(request).await {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(
                    transport = ?self.transport.kind(),
                    method = %method,
                    url = url,
                    status = ?e.status(),
                    "request failed: {e}"
                );
                self.notifier.notify(&e.user_message());
                Err(e)
            }
        }
    }
}

impl fmt::Debug for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Requester")
            .field("transport", &self.transport.kind())
            .finish_non_exhaustive()
    }
}
