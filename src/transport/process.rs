//! curl 子进程传输：解析 `--include` 输出中的响应头、正文与状态尾标。
//!
//! Process strategy: drives an external `curl` and parses its stdout.
//!
//! curl is invoked unbuffered with inline headers and a `--write-out` trailer, so its
//! stdout looks like:
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! Content-Type: application/x-ndjson\r\n
//! \r\n
//! {"response":"Hel"}\n
//! {"response":"lo"}\n
//! <RS>__ollama_stream_status__:200
//! ```
//!
//! [`CurlOutputCodec`] turns that byte stream into [`CurlFrame`]s with two states:
//! awaiting the head, then forwarding body bytes until the trailer sentinel. The
//! sentinel starts with an ASCII record separator, which a JSON body can never
//! contain unescaped.
//!
//! A call owns its child process and request-body temp file. Both are released when
//! the body stream ends or is dropped.

use crate::client::error_classification::{classify_status, ERROR_BODY_LIMIT};
use crate::config::ClientConfig;
use crate::transport::{
    ResponseHead, Transport, TransportError, TransportKind, TransportRequest, TransportResponse,
    MAX_CHUNK_SIZE,
};
use crate::{BoxStream, Error, ErrorContext, Result};
use bytes::{Buf, Bytes, BytesMut};
use futures::{stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempPath;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, warn};

/// Marker written by `--write-out` after the body, followed by the status code.
pub(crate) const TRAILER_SENTINEL: &str = "\u{1e}__ollama_stream_status__:";

/// Default number of empty head polls before a synthetic 200 head is assumed.
pub const DEFAULT_HEAD_POLL_LIMIT: u32 = 64;

const HEAD_POLL_INITIAL: Duration = Duration::from_millis(10);
const HEAD_POLL_MAX: Duration = Duration::from_secs(1);
const STDERR_LIMIT: u64 = 4 * 1024;
const HTTP_PREFIX: &[u8] = b"HTTP/";

/// Process strategy: one `curl` child per request.
#[derive(Debug, Clone)]
pub struct ProcessTransport {
    binary: String,
    timeout: Duration,
    head_poll_limit: u32,
    temp_dir: Option<PathBuf>,
}

impl ProcessTransport {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            binary: config.curl_path.clone(),
            timeout: config.timeout,
            head_poll_limit: config.head_poll_limit.max(1),
            temp_dir: None,
        }
    }

    /// Use a different curl executable.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Place request-body files in `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn write_body_file(&self, body: &[u8]) -> io::Result<TempPath> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ollama-body-");
        let mut file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(body)?;
        file.flush()?;
        Ok(file.into_temp_path())
    }

    fn command(&self, request: &TransportRequest, body_file: Option<&TempPath>) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--silent")
            .arg("--show-error")
            .arg("--no-buffer")
            .arg("--include")
            .arg("--request")
            .arg(request.method.as_str())
            .arg("--max-time")
            .arg(format!("{:.3}", self.timeout.as_secs_f64()))
            .arg("--write-out")
            .arg(format!("{}%{{http_code}}", TRAILER_SENTINEL));

        for (name, value) in &request.headers {
            cmd.arg("--header").arg(format!("{}: {}", name, value));
        }
        if let Some(path) = body_file {
            cmd.arg("--data-binary").arg(format!("@{}", path.display()));
        }

        cmd.arg("--url")
            .arg(&request.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl Transport for ProcessTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Process
    }

    async fn open(&self, request: TransportRequest) -> Result<TransportResponse> {
        let body_file = match &request.body {
            Some(body) => Some(
                self.write_body_file(body)
                    .map_err(|e| Error::Transport(TransportError::Io(e)))?,
            ),
            None => None,
        };

        let mut child = self
            .command(&request, body_file.as_ref())
            .spawn()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    TransportError::BinaryNotFound {
                        binary: self.binary.clone(),
                    }
                } else {
                    TransportError::Spawn {
                        binary: self.binary.clone(),
                        source: e,
                    }
                }
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Other("curl stdout was not captured".to_string()))?;
        let stderr = child.stderr.take();

        debug!(
            binary = self.binary.as_str(),
            method = request.method.as_str(),
            url = request.url.as_str(),
            pid = child.id(),
            "spawned process transport"
        );

        let mut session = CurlSession {
            child,
            stderr,
            frames: FramedRead::with_capacity(stdout, CurlOutputCodec::new(), MAX_CHUNK_SIZE),
            body_file,
            binary: self.binary.clone(),
            synthesized_head: false,
            trailer_status: None,
        };

        let head = session.await_head(self.head_poll_limit).await?;
        Ok(TransportResponse {
            head,
            body: session.into_body(),
        })
    }
}

/// Everything one curl invocation owns. Dropping it kills the child (`kill_on_drop`)
/// and deletes the body file (`TempPath`).
struct CurlSession {
    child: Child,
    stderr: Option<ChildStderr>,
    frames: FramedRead<ChildStdout, CurlOutputCodec>,
    body_file: Option<TempPath>,
    binary: String,
    synthesized_head: bool,
    trailer_status: Option<u16>,
}

impl CurlSession {
    async fn await_head(&mut self, poll_limit: u32) -> Result<ResponseHead> {
        let mut delay = HEAD_POLL_INITIAL;
        let mut polls = 0u32;

        loop {
            let next = match tokio::time::timeout(delay, self.frames.next()).await {
                Ok(next) => next,
                Err(_) => {
                    polls += 1;
                    if polls >= poll_limit {
                        warn!(
                            polls,
                            binary = self.binary.as_str(),
                            "no response head from process transport, assuming 200"
                        );
                        self.frames.decoder_mut().expect_late_head();
                        self.synthesized_head = true;
                        return Ok(ResponseHead::new(200, HeaderMap::new()));
                    }
                    delay = (delay * 2).min(HEAD_POLL_MAX);
                    continue;
                }
            };

            return match next {
                Some(Ok(CurlFrame::Head(head))) => Ok(head),
                Some(Ok(CurlFrame::Trailer(status))) => {
                    self.trailer_status = status;
                    Err(self
                        .fail_without_head("output ended before the response head")
                        .await)
                }
                Some(Ok(CurlFrame::Body(_))) => {
                    self.abort().await;
                    Err(process_error("body bytes arrived before the response head"))
                }
                Some(Err(e)) => {
                    self.abort().await;
                    Err(output_error(e))
                }
                None => Err(self
                    .fail_without_head("output ended before the response head")
                    .await),
            };
        }
    }

    fn into_body(self) -> BoxStream<'static, Bytes> {
        Box::pin(stream::unfold(Some(self), |session| async move {
            let mut session = session?;
            loop {
                match session.frames.next().await {
                    Some(Ok(CurlFrame::Body(bytes))) => return Some((Ok(bytes), Some(session))),
                    Some(Ok(CurlFrame::Trailer(status))) => session.trailer_status = status,
                    Some(Ok(CurlFrame::Head(head))) => {
                        // Only reachable after a synthetic head: the real one showed up late.
                        if head.is_success() {
                            debug!(http_status = head.status, "late response head");
                            continue;
                        }
                        let body = session.drain_body(ERROR_BODY_LIMIT).await;
                        session.abort().await;
                        return Some((Err(classify_status(head.status, Some(&body))), None));
                    }
                    Some(Err(e)) => {
                        session.abort().await;
                        return Some((Err(output_error(e)), None));
                    }
                    None => {
                        return match session.finish().await {
                            Ok(()) => None,
                            Err(e) => Some((Err(e), None)),
                        };
                    }
                }
            }
        }))
    }

    async fn drain_body(&mut self, limit: usize) -> String {
        let mut buf = Vec::new();
        while buf.len() < limit {
            match self.frames.next().await {
                Some(Ok(CurlFrame::Body(bytes))) => {
                    let take = bytes.len().min(limit - buf.len());
                    buf.extend_from_slice(&bytes[..take]);
                }
                Some(Ok(CurlFrame::Trailer(status))) => self.trailer_status = status,
                _ => break,
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Normal termination: stdout is closed, so waiting cannot block on a full pipe.
    async fn finish(&mut self) -> Result<()> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| Error::Transport(TransportError::Io(e)))?;
        self.remove_body_file();

        if self.synthesized_head {
            if let Some(code) = self.trailer_status.filter(|c| !(200..300).contains(c)) {
                return Err(classify_status(code, None));
            }
        }

        if !status.success() {
            let stderr = self.read_stderr().await;
            return Err(Error::Transport(TransportError::ProcessExit {
                binary: self.binary.clone(),
                code: status.code(),
                stderr,
            }));
        }

        debug!(trailer_status = ?self.trailer_status, "process transport finished");
        Ok(())
    }

    async fn abort(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "process transport already exited");
        }
        if let Err(e) = self.child.wait().await {
            debug!(error = %e, "failed to reap process transport");
        }
        self.remove_body_file();
    }

    fn remove_body_file(&mut self) {
        if let Some(path) = self.body_file.take() {
            if let Err(e) = path.close() {
                debug!(error = %e, "failed to remove request body file");
            }
        }
    }

    async fn fail_without_head(&mut self, reason: &str) -> Error {
        match self.finish().await {
            Err(e) => e,
            Ok(()) => process_error(reason),
        }
    }

    async fn read_stderr(&mut self) -> String {
        let Some(stderr) = self.stderr.as_mut() else {
            return String::new();
        };
        let mut buf = Vec::new();
        if let Err(e) = stderr.take(STDERR_LIMIT).read_to_end(&mut buf).await {
            debug!(error = %e, "failed to read process transport stderr");
        }
        String::from_utf8_lossy(&buf).trim().to_string()
    }
}

fn process_error(reason: &str) -> Error {
    Error::invalid_response_with_context(
        reason,
        ErrorContext::new().with_source("process_transport"),
    )
}

fn output_error(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::InvalidData {
        process_error(&e.to_string())
    } else {
        Error::Transport(TransportError::Io(e))
    }
}

/// One parsed unit of curl output.
#[derive(Debug, PartialEq)]
pub(crate) enum CurlFrame {
    Head(ResponseHead),
    Body(Bytes),
    Trailer(Option<u16>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    AwaitingHead,
    /// A synthetic head was handed out; a real head may still be at the front.
    LateHead,
    Body,
    Trailer,
    Done,
}

/// Two-state parser for `curl --include --write-out` output.
#[derive(Debug)]
pub(crate) struct CurlOutputCodec {
    state: ParseState,
}

impl CurlOutputCodec {
    pub(crate) fn new() -> Self {
        Self {
            state: ParseState::AwaitingHead,
        }
    }

    pub(crate) fn expect_late_head(&mut self) {
        if self.state == ParseState::AwaitingHead {
            self.state = ParseState::LateHead;
        }
    }

    fn finish_trailer(&mut self, src: &mut BytesMut) -> CurlFrame {
        let status = parse_trailer(src);
        src.clear();
        self.state = ParseState::Done;
        CurlFrame::Trailer(status)
    }
}

impl Decoder for CurlOutputCodec {
    type Item = CurlFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<CurlFrame>> {
        let sentinel = TRAILER_SENTINEL.as_bytes();
        loop {
            match self.state {
                ParseState::AwaitingHead | ParseState::LateHead => {
                    if self.state == ParseState::LateHead {
                        let probe = src.len().min(HTTP_PREFIX.len());
                        if src[..probe] != HTTP_PREFIX[..probe] {
                            self.state = ParseState::Body;
                            continue;
                        }
                        if probe < HTTP_PREFIX.len() {
                            return Ok(None);
                        }
                    }

                    let Some((head_len, sep_len)) = find_head_end(src) else {
                        return Ok(None);
                    };
                    let block = src.split_to(head_len + sep_len);
                    let head = parse_head(&block[..head_len])?;
                    if (100..200).contains(&head.status) {
                        // Interim response (e.g. 100 Continue); the real head follows.
                        continue;
                    }
                    if head.is_success()
                        && (src.starts_with(HTTP_PREFIX) || is_tunnel_reply(&block[..head_len]))
                    {
                        // Proxy CONNECT reply; the origin's head follows.
                        debug!(http_status = head.status, "skipping proxy tunnel head");
                        continue;
                    }
                    self.state = ParseState::Body;
                    return Ok(Some(CurlFrame::Head(head)));
                }
                ParseState::Body => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    if let Some(pos) = find(src, sentinel) {
                        if pos > 0 {
                            let take = pos.min(MAX_CHUNK_SIZE);
                            return Ok(Some(CurlFrame::Body(src.split_to(take).freeze())));
                        }
                        src.advance(sentinel.len());
                        self.state = ParseState::Trailer;
                        continue;
                    }
                    let emit = (src.len() - partial_sentinel_len(src)).min(MAX_CHUNK_SIZE);
                    if emit == 0 {
                        return Ok(None);
                    }
                    return Ok(Some(CurlFrame::Body(src.split_to(emit).freeze())));
                }
                ParseState::Trailer => return Ok(None),
                ParseState::Done => {
                    src.clear();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<CurlFrame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        match self.state {
            ParseState::Trailer => Ok(Some(self.finish_trailer(src))),
            ParseState::Body | ParseState::LateHead => {
                self.state = ParseState::Body;
                if src.is_empty() {
                    Ok(None)
                } else {
                    // A dangling sentinel prefix at EOF was body after all.
                    Ok(Some(CurlFrame::Body(src.split().freeze())))
                }
            }
            ParseState::AwaitingHead => {
                if src.is_empty() {
                    return Ok(None);
                }
                let sentinel = TRAILER_SENTINEL.as_bytes();
                if src.starts_with(sentinel) {
                    // curl failed before any response; only the write-out trailer was printed.
                    src.advance(sentinel.len());
                    return Ok(Some(self.finish_trailer(src)));
                }
                Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "output ended before the response head was complete",
                ))
            }
            ParseState::Done => {
                src.clear();
                Ok(None)
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Returns (head length, separator length) for the first blank line.
fn find_head_end(buf: &[u8]) -> Option<(usize, usize)> {
    match (find(buf, b"\r\n\r\n"), find(buf, b"\n\n")) {
        (Some(crlf), Some(lf)) if lf < crlf => Some((lf, 2)),
        (Some(crlf), _) => Some((crlf, 4)),
        (None, Some(lf)) => Some((lf, 2)),
        (None, None) => None,
    }
}

/// Length of the longest buffer suffix that is a proper prefix of the sentinel.
fn partial_sentinel_len(buf: &[u8]) -> usize {
    let sentinel = TRAILER_SENTINEL.as_bytes();
    (1..sentinel.len())
        .rev()
        .find(|&n| buf.ends_with(&sentinel[..n]))
        .unwrap_or(0)
}

fn parse_head(block: &[u8]) -> io::Result<ResponseHead> {
    let text = String::from_utf8_lossy(block);
    let mut lines = text.split('\n').map(|l| l.trim_end_matches('\r'));
    let status_line = lines.next().unwrap_or_default();
    let status = parse_status_line(status_line).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("malformed status line: {:?}", status_line),
        )
    })?;

    let mut headers = HeaderMap::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        match (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!(line, "skipping unparsable header line"),
        }
    }

    Ok(ResponseHead::new(status, headers))
}

fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

fn is_tunnel_reply(block: &[u8]) -> bool {
    let text = String::from_utf8_lossy(block);
    let status_line = text.lines().next().unwrap_or_default();
    status_line
        .splitn(3, ' ')
        .nth(2)
        .map(|reason| reason.trim().eq_ignore_ascii_case("connection established"))
        .unwrap_or(false)
}

/// `000` means curl never got a status.
fn parse_trailer(src: &[u8]) -> Option<u16> {
    std::str::from_utf8(src)
        .ok()?
        .trim()
        .parse()
        .ok()
        .filter(|status| *status != 0)
}
