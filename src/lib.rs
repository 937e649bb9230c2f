//! # ollama-stream
//!
//! 这是 Ollama HTTP API 的流式传输与分帧层，提供原生与 curl 子进程两种读取策略。
//!
//! Streaming transport and framing for the Ollama HTTP API.
//!
//! ## Overview
//!
//! Ollama answers generation, chat and pull requests with newline-delimited JSON. This
//! crate moves those bytes incrementally, splits them into frames, decodes each frame
//! into a typed envelope, and classifies failures the same way on every path.
//!
//! - **Two transports**: an in-process reqwest reader and a `curl` subprocess reader,
//!   chosen once per process (see [`transport`])
//! - **NDJSON framing**: arbitrary chunk splits, blank lines skipped, first malformed
//!   frame is terminal (see [`pipeline::decode`])
//! - **Buffered executor**: fixed-delay, attempt-bounded retry for 5xx and network failures
//! - **Streaming executor**: status checked before the first envelope, never retried
//! - **Cancellation**: drop the stream, or use a [`CancelHandle`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use ollama_stream::{ChatRequest, Message, OllamaClient};
//!
//! #[tokio::main]
//! async fn main() -> ollama_stream::Result<()> {
//!     let client = OllamaClient::builder().host("localhost").build()?;
//!
//!     let request = ChatRequest::new("llama3.2", vec![Message::user("Why is the sky blue?")]);
//!     let mut stream = client.chat_stream(request).await?;
//!     while let Some(frame) = stream.next().await {
//!         print!("{}", frame?.content());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Client, builder, executors, error classification |
//! | [`config`] | Client configuration and environment fallbacks |
//! | [`transport`] | Native and process byte transports, strategy selection |
//! | [`pipeline`] | NDJSON frame decoding and retry policy |
//! | [`types`] | Ollama request/response records |
//! | [`error_code`] | Classified error kinds |

pub mod client;
pub mod config;
pub mod error_code;
pub mod pipeline;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use client::{classify_status, CancelHandle, ControlledStream};
pub use client::{OllamaClient, OllamaClientBuilder};
pub use config::ClientConfig;
pub use error_code::ErrorKind;
pub use pipeline::{FrameDecoder, RetryPolicy};
pub use transport::{Transport, TransportKind, TransportRequest, TransportResponse};
pub use types::{
    ChatRequest, ChatResponse, EmbedRequest, EmbedResponse, GenerateRequest, GenerateResponse,
    Message, MessageRole,
};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
