//! Client configuration with environment fallbacks.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `OLLAMA_HOST` | `http://127.0.0.1:11434` | server base URL; scheme and port optional |
//! | `OLLAMA_TIMEOUT_SECS` | `300` | bound for one whole attempt |
//! | `OLLAMA_MAX_RETRIES` | `2` | extra attempts for buffered requests |
//! | `OLLAMA_RETRY_DELAY_MS` | `500` | fixed delay between attempts |
//! | `OLLAMA_CURL_PATH` | `curl` | binary used by the process transport |
//! | `OLLAMA_TRANSPORT` | detected | `native` or `process`, see [`crate::transport`] |

use crate::pipeline::RetryPolicy;
use crate::transport::process::DEFAULT_HEAD_POLL_LIMIT;
use crate::transport::TransportKind;
use crate::{Error, ErrorContext, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_HOST: &str = "http://127.0.0.1:11434";
pub const DEFAULT_PORT: u16 = 11434;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Immutable settings shared by every request of one client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Explicit strategy; `None` defers to process-wide detection.
    pub transport: Option<TransportKind>,
    pub curl_path: String,
    /// Empty head polls tolerated by the process transport before assuming 200.
    pub head_poll_limit: u32,
}

impl ClientConfig {
    /// Defaults overridden by `OLLAMA_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = env::var("OLLAMA_HOST") {
            if !host.trim().is_empty() {
                config.base_url = parse_host(&host).map_err(|e| {
                    Error::configuration_with_context(
                        e,
                        ErrorContext::new()
                            .with_field_path("OLLAMA_HOST")
                            .with_details(host.clone())
                            .with_source("client_config"),
                    )
                })?;
            }
        }
        if let Some(secs) = env_parse::<u64>("OLLAMA_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(n) = env_parse::<u32>("OLLAMA_MAX_RETRIES") {
            config.retry.max_retries = n;
        }
        if let Some(ms) = env_parse::<u64>("OLLAMA_RETRY_DELAY_MS") {
            config.retry.delay = Duration::from_millis(ms);
        }
        if let Ok(path) = env::var("OLLAMA_CURL_PATH") {
            if !path.trim().is_empty() {
                config.curl_path = path.trim().to_string();
            }
        }

        Ok(config)
    }

    /// Absolute URL for an API path such as `/api/chat`.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_HOST).expect("default host is a valid URL"),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            transport: None,
            curl_path: "curl".to_string(),
            head_poll_limit: DEFAULT_HEAD_POLL_LIMIT,
        }
    }
}

/// Accepts `host`, `host:port`, or a full URL. Without a scheme, `http` and the
/// default port are assumed.
pub fn parse_host(raw: &str) -> std::result::Result<Url, String> {
    let raw = raw.trim();
    let has_scheme = raw.contains("://");
    let candidate = if has_scheme {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };

    let mut url = Url::parse(&candidate).map_err(|e| format!("invalid host {:?}: {}", raw, e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme {:?}", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err(format!("invalid host {:?}: missing host name", raw));
    }
    if !has_scheme && url.port().is_none() {
        url.set_port(Some(DEFAULT_PORT))
            .map_err(|_| format!("invalid host {:?}: cannot carry a port", raw))?;
    }
    Ok(url)
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}
