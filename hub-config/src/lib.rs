//! Environment-driven configuration for the AgentHub binaries.
//!
//! Every variable has a default, so all binaries start with no flags. The
//! `from_env` constructors delegate to `from_lookup` so tests can supply
//! values without mutating process environment.

#![warn(missing_docs, clippy::pedantic)]

use std::env;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

/// Broker gRPC listen address.
pub const GRPC_PORT_ENV: &str = "AGENTHUB_GRPC_PORT";
/// Broker address clients connect to.
pub const BROKER_ADDR_ENV: &str = "AGENTHUB_BROKER_ADDR";
/// Broker health/metrics HTTP port.
pub const BROKER_HEALTH_PORT_ENV: &str = "BROKER_HEALTH_PORT";
/// Cortex health/metrics HTTP port.
pub const CORTEX_HEALTH_PORT_ENV: &str = "CORTEX_HEALTH_PORT";
/// OTLP-style exporter endpoint (recorded and logged; no exporter is wired).
pub const EXPORTER_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
/// Service name reported in telemetry.
pub const SERVICE_NAME_ENV: &str = "AGENTHUB_SERVICE_NAME";
/// Service version reported in telemetry.
pub const SERVICE_VERSION_ENV: &str = "AGENTHUB_SERVICE_VERSION";
/// Agent id the orchestrator registers under.
pub const CORTEX_AGENT_ID_ENV: &str = "CORTEX_AGENT_ID";
/// Model identifier for the remote decision engine.
pub const CORTEX_MODEL_ENV: &str = "CORTEX_MODEL";
/// Base URL override for the remote decision engine.
pub const CORTEX_LLM_BASE_URL_ENV: &str = "CORTEX_LLM_BASE_URL";
/// API key for the remote decision engine.
pub const LLM_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const DEFAULT_GRPC_PORT: u16 = 50051;
const DEFAULT_BROKER_ADDR: &str = "localhost:50051";
const DEFAULT_BROKER_HEALTH_PORT: u16 = 8080;
const DEFAULT_CORTEX_HEALTH_PORT: u16 = 8081;
const DEFAULT_EXPORTER_ENDPOINT: &str = "localhost:4317";
const DEFAULT_CORTEX_AGENT_ID: &str = "cortex";
const DEFAULT_CORTEX_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_LLM_BASE_URL: &str = "https://api.anthropic.com/";
const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(60);

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors produced while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    #[error("invalid value for {var}: {reason}")]
    InvalidValue {
        /// The offending environment variable.
        var: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            var,
            reason: reason.into(),
        }
    }
}

fn env_lookup(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn parse_listen_addr(var: &'static str, raw: &str) -> ConfigResult<SocketAddr> {
    // Accept ":50051", a bare port, or a full socket address.
    let trimmed = raw.trim();
    if let Some(port) = trimmed.strip_prefix(':') {
        let port: u16 = port
            .parse()
            .map_err(|_| ConfigError::invalid(var, format!("bad port in `{raw}`")))?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    if let Ok(port) = trimmed.parse::<u16>() {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    trimmed
        .parse()
        .map_err(|_| ConfigError::invalid(var, format!("`{raw}` is not a socket address")))
}

fn parse_health_addr(var: &'static str, raw: Option<String>, default: u16) -> ConfigResult<SocketAddr> {
    let port = match raw {
        Some(value) => value
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::invalid(var, format!("`{value}` is not a port")))?,
        None => default,
    };
    Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
}

fn normalize_endpoint(raw: &str) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_owned()
    } else {
        format!("http://{raw}")
    }
}

/// Service identity and exporter endpoint reported by telemetry.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    service_name: String,
    service_version: String,
    exporter_endpoint: String,
}

impl TelemetryConfig {
    /// Loads telemetry settings from the process environment.
    #[must_use]
    pub fn from_env(default_service_name: &str) -> Self {
        Self::from_lookup(default_service_name, env_lookup)
    }

    /// Loads telemetry settings through the supplied lookup.
    pub fn from_lookup<F>(default_service_name: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            service_name: lookup(SERVICE_NAME_ENV)
                .unwrap_or_else(|| default_service_name.to_owned()),
            service_version: lookup(SERVICE_VERSION_ENV)
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_owned()),
            exporter_endpoint: lookup(EXPORTER_ENDPOINT_ENV)
                .unwrap_or_else(|| DEFAULT_EXPORTER_ENDPOINT.to_owned()),
        }
    }

    /// Returns the service name.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Returns the service version.
    #[must_use]
    pub fn service_version(&self) -> &str {
        &self.service_version
    }

    /// Returns the exporter endpoint.
    #[must_use]
    pub fn exporter_endpoint(&self) -> &str {
        &self.exporter_endpoint
    }
}

/// Settings for the broker binary.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    listen: SocketAddr,
    health: SocketAddr,
    telemetry: TelemetryConfig,
}

impl BrokerConfig {
    /// Loads broker settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when an address or port fails to parse.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(env_lookup)
    }

    /// Loads broker settings through the supplied lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when an address or port fails to parse.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen = match lookup(GRPC_PORT_ENV) {
            Some(raw) => parse_listen_addr(GRPC_PORT_ENV, &raw)?,
            None => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_GRPC_PORT),
        };
        let health = parse_health_addr(
            BROKER_HEALTH_PORT_ENV,
            lookup(BROKER_HEALTH_PORT_ENV),
            DEFAULT_BROKER_HEALTH_PORT,
        )?;
        Ok(Self {
            listen,
            health,
            telemetry: TelemetryConfig::from_lookup("agenthub-broker", lookup),
        })
    }

    /// Returns the gRPC listen address.
    #[must_use]
    pub const fn listen(&self) -> SocketAddr {
        self.listen
    }

    /// Returns the health endpoint address.
    #[must_use]
    pub const fn health(&self) -> SocketAddr {
        self.health
    }

    /// Returns the telemetry settings.
    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryConfig {
        &self.telemetry
    }
}

/// Settings for anything connecting to the broker.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    endpoint: String,
}

impl ClientConfig {
    /// Loads client settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    /// Loads client settings through the supplied lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = lookup(BROKER_ADDR_ENV).unwrap_or_else(|| DEFAULT_BROKER_ADDR.to_owned());
        Self {
            endpoint: normalize_endpoint(&raw),
        }
    }

    /// Builds a config pointing at an explicit address.
    #[must_use]
    pub fn for_endpoint(addr: impl AsRef<str>) -> Self {
        Self {
            endpoint: normalize_endpoint(addr.as_ref()),
        }
    }

    /// Returns the broker endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Settings for the remote decision engine.
#[derive(Clone)]
pub struct LlmConfig {
    model: String,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl LlmConfig {
    /// Loads LLM settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    /// Loads LLM settings through the supplied lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            model: lookup(CORTEX_MODEL_ENV).unwrap_or_else(|| DEFAULT_CORTEX_MODEL.to_owned()),
            base_url: lookup(CORTEX_LLM_BASE_URL_ENV)
                .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_owned()),
            api_key: lookup(LLM_API_KEY_ENV),
            timeout: DEFAULT_LLM_TIMEOUT,
        }
    }

    /// Returns the model identifier.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the API base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the API key, if configured.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Overrides the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Settings for the Cortex orchestrator binary.
#[derive(Debug, Clone)]
pub struct CortexConfig {
    agent_id: String,
    health: SocketAddr,
    client: ClientConfig,
    llm: LlmConfig,
    telemetry: TelemetryConfig,
}

impl CortexConfig {
    /// Loads orchestrator settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a port fails to parse.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(env_lookup)
    }

    /// Loads orchestrator settings through the supplied lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a port fails to parse.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let health = parse_health_addr(
            CORTEX_HEALTH_PORT_ENV,
            lookup(CORTEX_HEALTH_PORT_ENV),
            DEFAULT_CORTEX_HEALTH_PORT,
        )?;
        Ok(Self {
            agent_id: lookup(CORTEX_AGENT_ID_ENV)
                .unwrap_or_else(|| DEFAULT_CORTEX_AGENT_ID.to_owned()),
            health,
            client: ClientConfig::from_lookup(&lookup),
            llm: LlmConfig::from_lookup(&lookup),
            telemetry: TelemetryConfig::from_lookup("agenthub-cortex", &lookup),
        })
    }

    /// Returns the agent id the orchestrator registers under.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Returns the health endpoint address.
    #[must_use]
    pub const fn health(&self) -> SocketAddr {
        self.health
    }

    /// Returns the broker client settings.
    #[must_use]
    pub const fn client(&self) -> &ClientConfig {
        &self.client
    }

    /// Returns the decision engine settings.
    #[must_use]
    pub const fn llm(&self) -> &LlmConfig {
        &self.llm
    }

    /// Returns the telemetry settings.
    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryConfig {
        &self.telemetry
    }
}
