//! 错误分类：定义客户端可见的失败类型及其重试语义。
//!
//! Failure kinds surfaced by the client.
//!
//! Every terminal error maps to exactly one [`ErrorKind`]. The kind alone decides
//! whether the buffered executor may retry; streaming requests never retry.
//!
//! | Kind                | Origin                                   | Retryable |
//! |---------------------|------------------------------------------|-----------|
//! | `invalid_response`  | malformed transport output               | no        |
//! | `decoding`          | a frame failed JSON decode               | no        |
//! | `server_error`      | HTTP 5xx                                 | yes       |
//! | `not_found`         | HTTP 404                                 | no        |
//! | `invalid_parameters`| HTTP 400 or an unencodable request body  | no        |
//! | `unexpected_status` | any other non-2xx                        | no        |
//! | `network`           | no status available (connect, I/O, exit) | yes       |
//! | `cancelled`         | consumer-initiated                       | no        |
//! | `configuration`     | invalid client setup                     | no        |
//!
//! ## Example
//!
//! ```rust
//! use ollama_stream::error_code::ErrorKind;
//!
//! let kind = ErrorKind::from_http_status(503).unwrap();
//! assert_eq!(kind, ErrorKind::ServerError);
//! assert!(kind.retryable());
//! assert!(ErrorKind::from_http_status(204).is_none());
//! ```

use std::fmt;

/// Classified failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The transport produced output that is not a valid HTTP response.
    InvalidResponse,
    /// A frame could not be decoded into the expected shape.
    Decoding,
    /// The server answered with a 5xx status.
    ServerError,
    /// The server answered 404 (unknown model or endpoint).
    NotFound,
    /// The server answered 400, or the request could not be encoded.
    InvalidParameters,
    /// Any other non-2xx status.
    UnexpectedStatus,
    /// Connection-level failure where no HTTP status is available.
    Network,
    /// The consumer cancelled the call.
    Cancelled,
    /// The client was configured with invalid settings.
    Configuration,
}

impl ErrorKind {
    /// Stable snake_case name, used in logs.
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidResponse => "invalid_response",
            Self::Decoding => "decoding",
            Self::ServerError => "server_error",
            Self::NotFound => "not_found",
            Self::InvalidParameters => "invalid_parameters",
            Self::UnexpectedStatus => "unexpected_status",
            Self::Network => "network",
            Self::Cancelled => "cancelled",
            Self::Configuration => "configuration",
        }
    }

    /// Whether a buffered request failing with this kind may be attempted again.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::ServerError | Self::Network)
    }

    /// Maps an HTTP status to its failure kind. Returns `None` for 2xx.
    pub fn from_http_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            400 => Some(Self::InvalidParameters),
            404 => Some(Self::NotFound),
            500..=599 => Some(Self::ServerError),
            _ => Some(Self::UnexpectedStatus),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorKind;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorKind::from_http_status(200), None);
        assert_eq!(ErrorKind::from_http_status(299), None);
        assert_eq!(
            ErrorKind::from_http_status(400),
            Some(ErrorKind::InvalidParameters)
        );
        assert_eq!(ErrorKind::from_http_status(404), Some(ErrorKind::NotFound));
        assert_eq!(ErrorKind::from_http_status(500), Some(ErrorKind::ServerError));
        assert_eq!(ErrorKind::from_http_status(599), Some(ErrorKind::ServerError));
        assert_eq!(
            ErrorKind::from_http_status(401),
            Some(ErrorKind::UnexpectedStatus)
        );
        assert_eq!(
            ErrorKind::from_http_status(302),
            Some(ErrorKind::UnexpectedStatus)
        );
    }

    #[test]
    fn test_only_server_and_network_retry() {
        let retryable: Vec<_> = [
            ErrorKind::InvalidResponse,
            ErrorKind::Decoding,
            ErrorKind::ServerError,
            ErrorKind::NotFound,
            ErrorKind::InvalidParameters,
            ErrorKind::UnexpectedStatus,
            ErrorKind::Network,
            ErrorKind::Cancelled,
            ErrorKind::Configuration,
        ]
        .into_iter()
        .filter(|k| k.retryable())
        .collect();

        assert_eq!(retryable, vec![ErrorKind::ServerError, ErrorKind::Network]);
    }
}
