use crate::error_code::ErrorKind;
use crate::transport::TransportError;
use thiserror::Error;

/// Longest frame excerpt kept on a decoding error.
const FRAME_EXCERPT_LIMIT: usize = 256;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Setting or field that caused the error (e.g., "OLLAMA_HOST")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "process_transport", "client_builder")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the client.
///
/// Every variant maps to one [`ErrorKind`] through [`Error::kind`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Remote error: HTTP {status} ({kind}): {message}")]
    Remote {
        status: u16,
        kind: ErrorKind,
        message: String,
    },

    #[error("Failed to decode frame {frame:?}: {source}")]
    Decoding {
        #[source]
        source: serde_json::Error,
        frame: String,
    },

    #[error("Failed to encode request body: {0}")]
    Encoding(#[source] serde_json::Error),

    #[error("Invalid response: {message}{}", format_context(.context))]
    InvalidResponse {
        message: String,
        context: ErrorContext,
    },

    #[error("Request cancelled")]
    Cancelled,
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::configuration_with_context(msg, ErrorContext::new())
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn invalid_response_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::InvalidResponse {
            message: msg.into(),
            context,
        }
    }

    /// Wrap a JSON decode failure, keeping a lossy excerpt of the offending frame.
    pub fn decoding(source: serde_json::Error, frame: &[u8]) -> Self {
        let end = frame.len().min(FRAME_EXCERPT_LIMIT);
        Error::Decoding {
            source,
            frame: String::from_utf8_lossy(&frame[..end]).into_owned(),
        }
    }

    /// The classified kind of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration { .. } => ErrorKind::Configuration,
            Error::Transport(_) => ErrorKind::Network,
            Error::Remote { kind, .. } => *kind,
            Error::Decoding { .. } => ErrorKind::Decoding,
            Error::Encoding(_) => ErrorKind::InvalidParameters,
            Error::InvalidResponse { .. } => ErrorKind::InvalidResponse,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the buffered executor may retry after this failure.
    pub fn is_retryable(&self) -> bool {
        self.kind().retryable()
    }

    /// HTTP status, when the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::InvalidResponse { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }
}
