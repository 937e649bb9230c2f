//! 请求执行逻辑：带重试的缓冲请求与不重试的流式请求。
//!
//! Request execution: the buffered executor (bounded retry) and the streaming
//! executor (status check before the first envelope, never retried).

use crate::client::error_classification::{classify_status, ERROR_BODY_LIMIT};
use crate::pipeline::{decode_ndjson, Decision};
use crate::transport::TransportRequest;
use crate::{BoxStream, Error, Result};
use bytes::Bytes;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::core::OllamaClient;

const REQUEST_ID_HEADER: &str = "x-request-id";

impl OllamaClient {
    /// Buffered executor: issue `request`, retrying retryable failures with the
    /// configured fixed delay, and return the full 2xx body.
    ///
    /// `max_retries = N` allows at most `N + 1` transport calls. Each retry is a new
    /// call with a fresh copy of the request.
    pub async fn send_buffered(&self, request: TransportRequest) -> Result<Bytes> {
        let request = with_request_id(request);
        let policy = self.config.retry;
        let mut attempt: u32 = 0;

        loop {
            let start = Instant::now();
            debug!(
                method = request.method.as_str(),
                url = request.url.as_str(),
                transport = self.transport.kind().name(),
                attempt,
                "sending buffered request"
            );

            let err = match self.attempt_buffered(request.clone()).await {
                Ok(body) => return Ok(body),
                Err(e) => e,
            };

            info!(
                http_status = err.status().unwrap_or(0),
                error_kind = err.kind().name(),
                attempt,
                duration_ms = start.elapsed().as_millis() as u64,
                url = request.url.as_str(),
                "ollama request failed"
            );

            match policy.decide(&err, attempt) {
                Decision::Retry { delay } => {
                    warn!(
                        attempt,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying ollama request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Decision::Fail => return Err(err),
            }
        }
    }

    async fn attempt_buffered(&self, request: TransportRequest) -> Result<Bytes> {
        let response = self.transport.open(request).await?;
        if !response.head.is_success() {
            let status = response.head.status;
            let body = response.read_body_prefix(ERROR_BODY_LIMIT).await;
            return Err(classify_status(status, Some(&body)));
        }
        response.collect_body().await
    }

    /// Streaming executor: resolve the head, classify a non-2xx status before any
    /// envelope, then decode the body as NDJSON.
    ///
    /// Never retried. Dropping the returned stream releases the transport.
    pub async fn send_stream<T>(&self, request: TransportRequest) -> Result<BoxStream<'static, T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let request = with_request_id(request);
        let start = Instant::now();
        debug!(
            method = request.method.as_str(),
            url = request.url.as_str(),
            transport = self.transport.kind().name(),
            "opening stream"
        );

        let url = request.url.clone();
        let response = self.transport.open(request).await?;
        if !response.head.is_success() {
            let status = response.head.status;
            let body = response.read_body_prefix(ERROR_BODY_LIMIT).await;
            let err = classify_status(status, Some(&body));
            info!(
                http_status = status,
                error_kind = err.kind().name(),
                duration_ms = start.elapsed().as_millis() as u64,
                url = url.as_str(),
                "ollama stream rejected"
            );
            return Err(err);
        }

        debug!(
            http_status = response.head.status,
            duration_ms = start.elapsed().as_millis() as u64,
            "ollama stream started"
        );
        Ok(decode_ndjson(response.body))
    }

    /// Buffered call whose 2xx body is decoded as `T`. Decode failures are not retried.
    pub(crate) async fn call_json<T>(&self, request: TransportRequest) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let body = self.send_buffered(request).await?;
        serde_json::from_slice(&body).map_err(|e| Error::decoding(e, &body))
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> TransportRequest {
        TransportRequest::new(method, self.config.endpoint(path))
            .header("accept", "application/json")
    }

    pub(crate) fn json_request<B>(&self, method: Method, path: &str, body: &B) -> Result<TransportRequest>
    where
        B: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(body).map_err(Error::Encoding)?;
        Ok(self
            .request(method, path)
            .header("content-type", "application/json")
            .body(payload))
    }
}

/// Tag the request once so every retry attempt shares one correlation id.
fn with_request_id(request: TransportRequest) -> TransportRequest {
    if request
        .headers
        .iter()
        .any(|(name, _)| name.eq_ignore_ascii_case(REQUEST_ID_HEADER))
    {
        return request;
    }
    request.header(REQUEST_ID_HEADER, Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_added_once() {
        let request = with_request_id(TransportRequest::new(Method::GET, "http://h/api/tags"));
        let request = with_request_id(request);
        let ids: Vec<_> = request
            .headers
            .iter()
            .filter(|(n, _)| n == REQUEST_ID_HEADER)
            .collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].1.len(), 36);
    }

    #[test]
    fn test_caller_request_id_is_kept() {
        let request = with_request_id(
            TransportRequest::new(Method::GET, "http://h/api/tags").header("X-Request-Id", "abc"),
        );
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.headers[0].1, "abc");
    }
}
