use std::env;
use std::fmt;

use serde::Serialize;

use crate::host::HostKind;
use crate::store::{KvStore, keys};

pub const DEFAULT_LOCAL_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_MANAGED_BASE_URL: &str = "https://your-cloud-host-api.example.com";
pub const DEFAULT_CLOUD_SERVICE_NAME: &str = "lab-physics-backend";

/// Which transport family the process talks through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvMode {
    /// Direct HTTP against `base_url`.
    Local,
    /// Container invocation through the cloud-managed gateway.
    Managed,
}

impl EnvMode {
    /// Parse a mode string. Accepts the historical `dev`/`prod` spellings.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "local" | "dev" | "development" => Some(Self::Local),
            "managed" | "prod" | "production" | "cloud" => Some(Self::Managed),
            _ => None,
        }
    }

    /// Compiled default: managed inside the mini-program container, else local.
    pub fn default_for(host: HostKind) -> Self {
        match host {
            HostKind::MiniProgram => Self::Managed,
            HostKind::Standard => Self::Local,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Managed => "managed",
        }
    }
}

impl fmt::Display for EnvMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values injected at build or deploy time.
#[derive(Clone, Debug, Default)]
pub struct BuildValues {
    pub api_base: Option<String>,
    pub app_env: Option<String>,
    pub cloud_env_id: Option<String>,
    pub cloud_service_name: Option<String>,
}

impl BuildValues {
    /// Values baked into the binary by `LAB_*` variables at compile time.
    pub fn compiled() -> Self {
        Self {
            api_base: option_env!("LAB_API_BASE_URL").map(str::to_string),
            app_env: option_env!("LAB_APP_ENV").map(str::to_string),
            cloud_env_id: option_env!("LAB_CLOUD_ENV_ID").map(str::to_string),
            cloud_service_name: option_env!("LAB_CLOUD_SERVICE_NAME").map(str::to_string),
        }
    }

    /// Compiled values, overridden by same-named process environment
    /// variables (including those loaded from `.env`).
    pub fn from_env() -> Self {
        let compiled = Self::compiled();
        Self {
            api_base: env::var("LAB_API_BASE_URL").ok().or(compiled.api_base),
            app_env: env::var("LAB_APP_ENV").ok().or(compiled.app_env),
            cloud_env_id: env::var("LAB_CLOUD_ENV_ID").ok().or(compiled.cloud_env_id),
            cloud_service_name: env::var("LAB_CLOUD_SERVICE_NAME")
                .ok()
                .or(compiled.cloud_service_name),
        }
    }
}

/// Where each setting is looked up, highest priority first.
pub struct ConfigSources<'a> {
    pub runtime: &'a dyn KvStore,
    pub build: BuildValues,
    pub host: HostKind,
}

/// Immutable configuration snapshot, resolved once per process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Config {
    pub mode: EnvMode,
    pub base_url: String,
    pub cloud_env_id: String,
    pub cloud_service_name: String,
}

impl Config {
    pub fn resolve(sources: &ConfigSources<'_>) -> Self {
        let runtime = sources.runtime;
        let build = &sources.build;

        let mode = [
            ("store", runtime.get_non_empty(keys::APP_ENV)),
            ("build", non_empty(build.app_env.as_deref())),
        ]
        .into_iter()
        .filter_map(|(source, raw)| raw.map(|r| (source, r)))
        .find_map(|(source, raw)| {
            let parsed = EnvMode::parse(&raw);
            if parsed.is_none() {
                tracing::warn!(source, value = raw, "ignoring unrecognized APP_ENV");
            }
            parsed
        })
        .unwrap_or_else(|| EnvMode::default_for(sources.host));

        let default_base = match mode {
            EnvMode::Local => DEFAULT_LOCAL_BASE_URL,
            EnvMode::Managed => DEFAULT_MANAGED_BASE_URL,
        };

        let base_url = layered(runtime, keys::API_BASE, build.api_base.as_deref(), default_base);
        let cloud_env_id = layered(
            runtime,
            keys::CLOUD_ENV_ID,
            build.cloud_env_id.as_deref(),
            "",
        );
        let cloud_service_name = layered(
            runtime,
            keys::CLOUD_SERVICE_NAME,
            build.cloud_service_name.as_deref(),
            DEFAULT_CLOUD_SERVICE_NAME,
        );

        let config = Config {
            mode,
            base_url,
            cloud_env_id,
            cloud_service_name,
        };
        tracing::debug!(
            mode = %config.mode,
            base_url = config.base_url,
            cloud_env_id = config.cloud_env_id,
            cloud_service_name = config.cloud_service_name,
            "configuration resolved"
        );
        config
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Runtime override -> build-time value -> default.
fn layered(runtime: &dyn KvStore, key: &str, build: Option<&str>, default: &str) -> String {
    runtime
        .get_non_empty(key)
        .map(|v| v.trim().to_string())
        .or_else(|| non_empty(build))
        .unwrap_or_else(|| default.to_string())
}
