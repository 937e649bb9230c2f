//! Scripted transport for executor tests.

#![allow(dead_code)]

use bytes::Bytes;
use futures::{stream, StreamExt};
use ollama_stream::transport::{
    ResponseHead, Transport, TransportError, TransportKind, TransportRequest, TransportResponse,
};
use ollama_stream::{BoxStream, Error, OllamaClient, Result};
use reqwest::header::HeaderMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What one `open` call does.
#[derive(Debug, Clone)]
pub enum Step {
    /// Head with `status`, then the chunks, then end of body.
    Respond { status: u16, chunks: Vec<&'static str> },
    /// Like `Respond`, but the body fails with a network error after the chunks.
    Break { status: u16, chunks: Vec<&'static str> },
    /// Head and chunks, then the body never ends.
    Hang { status: u16, chunks: Vec<&'static str> },
    /// No head at all (connection refused).
    Refuse,
}

impl Step {
    pub fn json(status: u16, body: &'static str) -> Self {
        Step::Respond {
            status,
            chunks: vec![body],
        }
    }
}

/// Plays `steps` in order; the last step repeats once the script runs out.
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    attempts: AtomicUsize,
    requests: Mutex<Vec<TransportRequest>>,
    released: Arc<AtomicBool>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
            attempts: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            released: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// True once the most recent body stream has been dropped.
    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        if let Some(step) = steps.pop_front() {
            *last = Some(step.clone());
            step
        } else {
            last.clone().expect("script has at least one step")
        }
    }
}

struct ReleaseGuard(Arc<AtomicBool>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn body(
    chunks: Vec<&'static str>,
    tail: BoxStream<'static, Bytes>,
    guard: ReleaseGuard,
) -> BoxStream<'static, Bytes> {
    let head = stream::iter(
        chunks
            .into_iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect::<Vec<Result<Bytes>>>(),
    );
    Box::pin(head.chain(tail).map(move |item| {
        let _keep = &guard;
        item
    }))
}

pub fn network_error() -> Error {
    Error::Transport(TransportError::Other("connection reset by peer".into()))
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Native
    }

    async fn open(&self, request: TransportRequest) -> Result<TransportResponse> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        self.released.store(false, Ordering::SeqCst);
        let guard = ReleaseGuard(self.released.clone());

        let (status, chunks, tail): (u16, Vec<&'static str>, BoxStream<'static, Bytes>) =
            match self.next_step() {
                Step::Refuse => return Err(network_error()),
                Step::Respond { status, chunks } => (status, chunks, Box::pin(stream::empty())),
                Step::Break { status, chunks } => (
                    status,
                    chunks,
                    Box::pin(stream::once(async { Err(network_error()) })),
                ),
                Step::Hang { status, chunks } => (status, chunks, Box::pin(stream::pending())),
            };

        Ok(TransportResponse {
            head: ResponseHead::new(status, HeaderMap::new()),
            body: body(chunks, tail, guard),
        })
    }
}

/// Route the crate's `tracing` output to the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Client over `transport` with `max_retries` and a 1 ms retry delay.
pub fn client(transport: &Arc<ScriptedTransport>, max_retries: u32) -> OllamaClient {
    init_tracing();
    OllamaClient::builder()
        .ignore_env()
        .max_retries(max_retries)
        .retry_delay(Duration::from_millis(1))
        .transport(transport.clone() as Arc<dyn Transport>)
        .build()
        .expect("client builds")
}
