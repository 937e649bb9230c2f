use crate::client::builder::OllamaClientBuilder;
use crate::client::types::{cancellable, CancelHandle, ControlledStream};
use crate::config::ClientConfig;
use crate::transport::{Transport, TransportKind};
use crate::types::{
    ChatRequest, ChatResponse, CopyRequest, DeleteRequest, EmbedRequest, EmbedResponse,
    GenerateRequest, GenerateResponse, ListModelsResponse, ListRunningResponse, ProgressResponse,
    PullRequest, ShowRequest, ShowResponse, VersionResponse,
};
use crate::{BoxStream, Result};
use reqwest::Method;
use std::fmt;
use std::sync::Arc;

/// Client for one Ollama server.
///
/// Cheap to clone; clones share the configuration and the transport. Every call is
/// independent, so clones can be used from many tasks at once.
#[derive(Clone)]
pub struct OllamaClient {
    pub(crate) config: Arc<ClientConfig>,
    pub(crate) transport: Arc<dyn Transport>,
}

impl OllamaClient {
    /// Client configured from `OLLAMA_*` environment variables and defaults.
    pub fn new() -> Result<Self> {
        OllamaClientBuilder::new().build()
    }

    pub fn builder() -> OllamaClientBuilder {
        OllamaClientBuilder::new()
    }

    pub(crate) fn from_parts(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// One-shot completion (`stream: false`).
    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let req = self.json_request(Method::POST, "/api/generate", &request.with_stream(false))?;
        self.call_json(req).await
    }

    /// Streaming completion, one [`GenerateResponse`] per NDJSON line.
    pub async fn generate_stream(
        &self,
        request: GenerateRequest,
    ) -> Result<BoxStream<'static, GenerateResponse>> {
        let req = self.json_request(Method::POST, "/api/generate", &request.with_stream(true))?;
        self.send_stream(req).await
    }

    /// Streaming completion with an external cancel handle.
    pub async fn generate_stream_with_cancel(
        &self,
        request: GenerateRequest,
    ) -> Result<(ControlledStream<GenerateResponse>, CancelHandle)> {
        Ok(cancellable(self.generate_stream(request).await?))
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let req = self.json_request(Method::POST, "/api/chat", &request.with_stream(false))?;
        self.call_json(req).await
    }

    pub async fn chat_stream(
        &self,
        request: ChatRequest,
    ) -> Result<BoxStream<'static, ChatResponse>> {
        let req = self.json_request(Method::POST, "/api/chat", &request.with_stream(true))?;
        self.send_stream(req).await
    }

    /// Streaming chat with an external cancel handle.
    ///
    /// After [`CancelHandle::cancel`] the stream yields one `Error::Cancelled`, then ends.
    pub async fn chat_stream_with_cancel(
        &self,
        request: ChatRequest,
    ) -> Result<(ControlledStream<ChatResponse>, CancelHandle)> {
        Ok(cancellable(self.chat_stream(request).await?))
    }

    pub async fn embed(&self, request: EmbedRequest) -> Result<EmbedResponse> {
        let req = self.json_request(Method::POST, "/api/embed", &request)?;
        self.call_json(req).await
    }

    /// Locally available models (`GET /api/tags`).
    pub async fn list_models(&self) -> Result<ListModelsResponse> {
        self.call_json(self.request(Method::GET, "/api/tags")).await
    }

    /// Models currently loaded in memory (`GET /api/ps`).
    pub async fn list_running(&self) -> Result<ListRunningResponse> {
        self.call_json(self.request(Method::GET, "/api/ps")).await
    }

    pub async fn show_model(&self, request: ShowRequest) -> Result<ShowResponse> {
        let req = self.json_request(Method::POST, "/api/show", &request)?;
        self.call_json(req).await
    }

    /// Download a model, streaming progress frames.
    pub async fn pull_stream(
        &self,
        request: PullRequest,
    ) -> Result<BoxStream<'static, ProgressResponse>> {
        let req = self.json_request(Method::POST, "/api/pull", &request.with_stream(true))?;
        self.send_stream(req).await
    }

    /// Model download with an external cancel handle.
    pub async fn pull_stream_with_cancel(
        &self,
        request: PullRequest,
    ) -> Result<(ControlledStream<ProgressResponse>, CancelHandle)> {
        Ok(cancellable(self.pull_stream(request).await?))
    }

    pub async fn copy_model(&self, request: CopyRequest) -> Result<()> {
        let req = self.json_request(Method::POST, "/api/copy", &request)?;
        self.send_buffered(req).await.map(|_| ())
    }

    pub async fn delete_model(&self, request: DeleteRequest) -> Result<()> {
        let req = self.json_request(Method::DELETE, "/api/delete", &request)?;
        self.send_buffered(req).await.map(|_| ())
    }

    pub async fn version(&self) -> Result<VersionResponse> {
        self.call_json(self.request(Method::GET, "/api/version")).await
    }
}

impl fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OllamaClient")
            .field("base_url", &self.config.base_url.as_str())
            .field("transport", &self.transport.kind())
            .field("retry", &self.config.retry)
            .finish()
    }
}
