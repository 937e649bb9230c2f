use crate::config::ClientConfig;
use crate::transport::{
    ResponseHead, Transport, TransportError, TransportKind, TransportRequest, TransportResponse,
    MAX_CHUNK_SIZE,
};
use crate::{BoxStream, Error, Result};
use bytes::Bytes;
use futures::{stream, Stream, StreamExt, TryStreamExt};
use std::time::Duration;
use tracing::debug;

/// Native strategy: reqwest's incremental body stream, re-chunked to [`MAX_CHUNK_SIZE`].
pub struct NativeTransport {
    client: reqwest::Client,
}

impl NativeTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        // The timeout covers connect plus the whole body, i.e. one full attempt.
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self { client })
    }

    /// Wrap an existing client (tests, custom TLS setups).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for NativeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Native
    }

    async fn open(&self, request: TransportRequest) -> Result<TransportResponse> {
        let mut req = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            req = req.body(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))?;

        let head = ResponseHead::new(resp.status().as_u16(), resp.headers().clone());
        debug!(
            http_status = head.status,
            url = request.url.as_str(),
            "native transport resolved head"
        );

        let body = resp
            .bytes_stream()
            .map_err(|e| Error::Transport(TransportError::Http(e)));

        Ok(TransportResponse {
            head,
            body: rechunk(body, MAX_CHUNK_SIZE),
        })
    }
}

/// Bound every chunk to `max` bytes. Slicing `Bytes` shares the allocation, no copies.
pub(crate) fn rechunk<S>(input: S, max: usize) -> BoxStream<'static, Bytes>
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    Box::pin(input.flat_map(move |item| {
        let parts: Vec<Result<Bytes>> = match item {
            Ok(bytes) => split_chunk(bytes, max).into_iter().map(Ok).collect(),
            Err(e) => vec![Err(e)],
        };
        stream::iter(parts)
    }))
}

fn split_chunk(mut bytes: Bytes, max: usize) -> Vec<Bytes> {
    let max = max.max(1);
    let mut parts = Vec::with_capacity(bytes.len() / max + 1);
    while bytes.len() > max {
        parts.push(bytes.split_to(max));
    }
    if !bytes.is_empty() {
        parts.push(bytes);
    }
    parts
}
