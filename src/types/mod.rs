//! 类型模块：Ollama HTTP API 的请求与响应记录。
//!
//! # Types Module
//!
//! Plain `serde` records for the Ollama HTTP API. They carry no behaviour beyond
//! constructors; the transport and decoder treat them as opaque `T`.
//!
//! | Module | Endpoints |
//! |--------|-----------|
//! | [`generate`] | `/api/generate` |
//! | [`chat`] | `/api/chat` |
//! | [`embed`] | `/api/embed` |
//! | [`models`] | `/api/tags`, `/api/ps`, `/api/show`, `/api/pull`, `/api/copy`, `/api/delete`, `/api/version` |
//!
//! ## Example
//!
//! ```rust
//! use ollama_stream::types::{ChatRequest, Message};
//!
//! let request = ChatRequest::new("llama3.2", vec![
//!     Message::system("Answer in one word."),
//!     Message::user("Capital of France?"),
//! ]);
//! assert_eq!(request.messages.len(), 2);
//! ```

pub mod chat;
pub mod embed;
pub mod generate;
pub mod models;

pub use chat::{ChatRequest, ChatResponse, Message, MessageRole, ToolCall, ToolCallFunction};
pub use embed::{EmbedInput, EmbedRequest, EmbedResponse};
pub use generate::{GenerateRequest, GenerateResponse, Metrics};
pub use models::{
    CopyRequest, DeleteRequest, ListModelsResponse, ListRunningResponse, ModelDetails,
    ModelSummary, ProgressResponse, PullRequest, RunningModel, ShowRequest, ShowResponse,
    VersionResponse,
};
