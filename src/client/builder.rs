use crate::client::core::OllamaClient;
use crate::config::{parse_host, ClientConfig};
use crate::transport::{build_transport, select_kind, Transport, TransportKind};
use crate::{Error, ErrorContext, Result};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating clients with custom configuration.
///
/// Values set here win over `OLLAMA_*` environment variables, which win over
/// built-in defaults.
pub struct OllamaClientBuilder {
    host: Option<String>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
    retry_delay: Option<Duration>,
    transport_kind: Option<TransportKind>,
    transport: Option<Arc<dyn Transport>>,
    curl_path: Option<String>,
    head_poll_limit: Option<u32>,
    read_env: bool,
}

impl OllamaClientBuilder {
    pub fn new() -> Self {
        Self {
            host: None,
            timeout: None,
            max_retries: None,
            retry_delay: None,
            transport_kind: None,
            transport: None,
            curl_path: None,
            head_poll_limit: None,
            read_env: true,
        }
    }

    /// Server address: `host`, `host:port`, or a full `http(s)://` URL.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Bound for one whole attempt, body included.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Extra attempts for buffered calls. Streams are never retried.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Force a strategy instead of the process-wide detected one.
    pub fn transport_kind(mut self, kind: TransportKind) -> Self {
        self.transport_kind = Some(kind);
        self
    }

    /// Inject a transport directly. Takes precedence over `transport_kind`.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn curl_path(mut self, path: impl Into<String>) -> Self {
        self.curl_path = Some(path.into());
        self
    }

    /// Empty head polls tolerated by the process transport.
    pub fn head_poll_limit(mut self, limit: u32) -> Self {
        self.head_poll_limit = Some(limit.max(1));
        self
    }

    /// Ignore `OLLAMA_*` environment variables (tests, embedded use).
    pub fn ignore_env(mut self) -> Self {
        self.read_env = false;
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<OllamaClient> {
        let mut config = if self.read_env {
            ClientConfig::from_env()?
        } else {
            ClientConfig::default()
        };

        if let Some(host) = self.host {
            config.base_url = parse_host(&host).map_err(|e| {
                Error::configuration_with_context(
                    e,
                    ErrorContext::new()
                        .with_field_path("host")
                        .with_details(host.clone())
                        .with_source("client_builder"),
                )
            })?;
        }
        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                return Err(Error::configuration_with_context(
                    "timeout must be greater than zero",
                    ErrorContext::new()
                        .with_field_path("timeout")
                        .with_source("client_builder"),
                ));
            }
            config.timeout = timeout;
        }
        if let Some(n) = self.max_retries {
            config.retry.max_retries = n;
        }
        if let Some(delay) = self.retry_delay {
            config.retry.delay = delay;
        }
        if let Some(path) = self.curl_path {
            config.curl_path = path;
        }
        if let Some(limit) = self.head_poll_limit {
            config.head_poll_limit = limit;
        }
        if self.transport_kind.is_some() {
            config.transport = self.transport_kind;
        }

        let transport = match self.transport {
            Some(t) => t,
            None => build_transport(select_kind(config.transport), &config)?,
        };
        config.transport = Some(transport.kind());

        Ok(OllamaClient::from_parts(config, transport))
    }
}

impl Default for OllamaClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
