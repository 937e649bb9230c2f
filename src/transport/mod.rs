//! 传输层：在原生流式读取与 curl 子进程读取之间选择一种策略。
//!
//! Byte transport strategies.
//!
//! Both strategies implement [`Transport`]: `open` resolves the response head first
//! and then exposes the body as a lazy stream of [`Bytes`] chunks. Nothing here knows
//! about JSON or retries.
//!
//! | Strategy | Type | Source of bytes |
//! |----------|------|-----------------|
//! | native   | [`NativeTransport`]  | `reqwest` incremental body stream |
//! | process  | [`ProcessTransport`] | `curl` subprocess stdout pipe      |

pub mod http;
pub mod process;

pub use http::NativeTransport;
pub use process::ProcessTransport;

use crate::config::ClientConfig;
use crate::{BoxStream, Result};
use bytes::Bytes;
use futures::StreamExt;
use once_cell::sync::OnceCell;
use reqwest::header::HeaderMap;
use reqwest::Method;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Upper bound for a single body chunk handed to the decoder.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// Env var that forces a transport strategy (`native` or `process`).
pub const TRANSPORT_ENV: &str = "OLLAMA_TRANSPORT";

static SELECTED_KIND: OnceCell<TransportKind> = OnceCell::new();

/// Which strategy moves the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// In-process HTTP client with incremental body reads.
    Native,
    /// External `curl` process whose stdout is parsed.
    Process,
}

impl TransportKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Process => "process",
        }
    }

    /// Capability probe. `OLLAMA_TRANSPORT` wins when set to a known value; otherwise
    /// native, since reqwest streams bodies incrementally on every target it builds for.
    pub fn detect() -> Self {
        match std::env::var(TRANSPORT_ENV) {
            Ok(raw) => match raw.parse() {
                Ok(kind) => kind,
                Err(_) => {
                    debug!(value = raw.as_str(), "ignoring unknown {}", TRANSPORT_ENV);
                    Self::Native
                }
            },
            Err(_) => Self::Native,
        }
    }
}

impl FromStr for TransportKind {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "reqwest" => Ok(Self::Native),
            "process" | "curl" => Ok(Self::Process),
            _ => Err(()),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolve the strategy for this process.
///
/// An explicit preference is returned as-is. Without one, detection runs once and the
/// result is reused for the lifetime of the process.
pub fn select_kind(preferred: Option<TransportKind>) -> TransportKind {
    preferred.unwrap_or_else(|| *SELECTED_KIND.get_or_init(TransportKind::detect))
}

/// Build the transport for `kind` from client configuration.
pub fn build_transport(kind: TransportKind, config: &ClientConfig) -> Result<Arc<dyn Transport>> {
    debug!(transport = kind.name(), "building transport");
    Ok(match kind {
        TransportKind::Native => Arc::new(NativeTransport::new(config)?),
        TransportKind::Process => Arc::new(ProcessTransport::new(config)),
    })
}

/// One outgoing HTTP request. Cheap to clone, so every retry attempt gets its own copy.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Status line and headers, resolved before any body chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status: u16, headers: HeaderMap) -> Self {
        Self { status, headers }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    }
}

/// A response whose head is known and whose body is still on the wire.
///
/// Dropping it releases the underlying connection or subprocess.
pub struct TransportResponse {
    pub head: ResponseHead,
    pub body: BoxStream<'static, Bytes>,
}

impl TransportResponse {
    /// Read the whole body into memory.
    pub async fn collect_body(self) -> Result<Bytes> {
        let mut body = self.body;
        let mut buf = bytes::BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Read at most `limit` bytes of the body as lossy UTF-8, ignoring read failures.
    ///
    /// Used for error messages, so a broken body never masks the status.
    pub async fn read_body_prefix(self, limit: usize) -> String {
        let mut body = self.body;
        let mut buf = Vec::new();
        while buf.len() < limit {
            match body.next().await {
                Some(Ok(chunk)) => {
                    let take = chunk.len().min(limit - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                }
                Some(Err(_)) | None => break,
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

/// A byte transport strategy.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Issue `request` and resolve the response head.
    ///
    /// Fails only when no status could be obtained (connect errors, missing binary).
    async fn open(&self, request: TransportRequest) -> Result<TransportResponse>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("`{binary}` not found; the process transport needs it installed")]
    BinaryNotFound { binary: String },

    #[error("failed to spawn `{binary}`: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process transport I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("`{binary}` exited with {}: {stderr}", format_exit(.code))]
    ProcessExit {
        binary: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Transport error: {0}")]
    Other(String),
}

fn format_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}
