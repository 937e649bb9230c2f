//! Ollama client: operation builders over the buffered and streaming executors.
//!
//! The public surface is [`OllamaClient`] plus its builder. Execution details live in
//! submodules under `src/client/`.

pub mod builder;
pub mod core;
pub mod error_classification;
mod execution;
pub mod types;

pub use builder::OllamaClientBuilder;
pub use self::core::OllamaClient;
pub use error_classification::classify_status;
pub use types::{cancellable, CancelHandle, ControlledStream};
