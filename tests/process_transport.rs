//! Process transport driving a real `curl`. Tests that need curl skip when it is absent.

mod support;

use futures::StreamExt;
use mockito::Server;
use ollama_stream::config::ClientConfig;
use ollama_stream::transport::ProcessTransport;
use ollama_stream::types::{CopyRequest, GenerateRequest};
use ollama_stream::{ChatRequest, ErrorKind, Message, OllamaClient, Transport, TransportKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn curl_available() -> bool {
    let found = std::process::Command::new("curl")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !found {
        eprintln!("curl not found, skipping");
    }
    found
}

fn client_for(url: &str, max_retries: u32) -> OllamaClient {
    support::init_tracing();
    OllamaClient::builder()
        .ignore_env()
        .host(url)
        .transport_kind(TransportKind::Process)
        .max_retries(max_retries)
        .retry_delay(Duration::from_millis(1))
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_chat_stream_through_curl() {
    if !curl_available() {
        return;
    }
    let mut server = Server::new_async().await;
    let body = concat!(
        "{\"model\":\"llama3.2\",\"message\":{\"role\":\"assistant\",\"content\":\"Bon\"},\"done\":false}\n",
        "{\"model\":\"llama3.2\",\"message\":{\"role\":\"assistant\",\"content\":\"jour\"},\"done\":false}\n",
        "{\"model\":\"llama3.2\",\"done\":true,\"done_reason\":\"stop\"}\n",
    );
    let mock = server
        .mock("POST", "/api/chat")
        .match_header("content-type", "application/json")
        .match_body(mockito::Matcher::PartialJson(
            serde_json::json!({"stream": true}),
        ))
        .with_status(200)
        .with_header("content-type", "application/x-ndjson")
        .with_body(body)
        .create_async()
        .await;

    let client = client_for(&server.url(), 0);
    assert_eq!(client.transport_kind(), TransportKind::Process);

    let request = ChatRequest::new("llama3.2", vec![Message::user("Say hello in French")]);
    let frames: Vec<_> = client
        .chat_stream(request)
        .await
        .unwrap()
        .map(|f| f.unwrap())
        .collect()
        .await;

    let text: String = frames.iter().map(|f| f.content()).collect();
    assert_eq!(text, "Bonjour");
    assert_eq!(frames.last().unwrap().done_reason.as_deref(), Some("stop"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_not_found_through_curl() {
    if !curl_available() {
        return;
    }
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/generate")
        .with_status(404)
        .with_body(r#"{"error":"model 'ghost' not found, try pulling it first"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server.url(), 3);
    let err = client
        .generate_stream(GenerateRequest::new("ghost", "hi"))
        .await
        .err()
        .unwrap();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains("try pulling it first"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_buffered_retry_through_curl() {
    if !curl_available() {
        return;
    }
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/version")
        .with_status(503)
        .expect(2)
        .create_async()
        .await;

    let client = client_for(&server.url(), 1);
    let err = client.version().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServerError);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_empty_body_through_curl() {
    if !curl_available() {
        return;
    }
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/copy")
        .with_status(200)
        .create_async()
        .await;

    let client = client_for(&server.url(), 0);
    client
        .copy_model(CopyRequest {
            source: "a".into(),
            destination: "b".into(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_connection_refused_through_curl() {
    if !curl_available() {
        return;
    }
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let client = client_for(&format!("http://127.0.0.1:{}", port), 0);
    let err = client.version().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
}

#[tokio::test]
async fn test_missing_binary_is_network_error() {
    let client = OllamaClient::builder()
        .ignore_env()
        .transport_kind(TransportKind::Process)
        .curl_path("/nonexistent/bin/curl-does-not-exist")
        .max_retries(0)
        .build()
        .unwrap();

    let err = client.version().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(err.to_string().contains("curl-does-not-exist"));
}

/// Reads one request, headers plus `Content-Length` bytes of body.
async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return;
            }
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Server that holds every response head back for 300 ms. Returns its base URL and
/// a connection counter.
async fn slow_head_server(
    status_line: &'static str,
    body: &'static str,
) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                read_request(&mut socket).await;
                tokio::time::sleep(Duration::from_millis(300)).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/x-ndjson\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
                let mut rest = Vec::new();
                let _ = socket.read_to_end(&mut rest).await;
            });
        }
    });
    (url, connections)
}

fn slow_head_client(url: &str, max_retries: u32) -> OllamaClient {
    support::init_tracing();
    OllamaClient::builder()
        .ignore_env()
        .host(url)
        .transport_kind(TransportKind::Process)
        .head_poll_limit(2)
        .max_retries(max_retries)
        .retry_delay(Duration::from_millis(1))
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_late_success_head_streams_frames() {
    if !curl_available() {
        return;
    }
    let (url, connections) = slow_head_server(
        "200 OK",
        "{\"model\":\"m\",\"response\":\"a\",\"done\":false}\n{\"model\":\"m\",\"response\":\"b\",\"done\":true}\n",
    )
    .await;

    let client = slow_head_client(&url, 0);
    let items: Vec<_> = client
        .generate_stream(GenerateRequest::new("m", "hi"))
        .await
        .unwrap()
        .collect()
        .await;

    let words: Vec<String> = items.into_iter().map(|i| i.unwrap().response).collect();
    assert_eq!(words, vec!["a", "b"]);
    assert_eq!(connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_late_not_found_head_ends_stream_with_error() {
    if !curl_available() {
        return;
    }
    let (url, _connections) =
        slow_head_server("404 Not Found", r#"{"error":"model 'ghost' not found"}"#).await;

    let client = slow_head_client(&url, 3);
    // The head was synthesized, so the call itself succeeds.
    let stream = client
        .generate_stream(GenerateRequest::new("ghost", "hi"))
        .await
        .unwrap();
    let items: Vec<_> = stream.collect().await;

    assert_eq!(items.len(), 1, "items: {:?}", items);
    let err = items.into_iter().next().unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn test_late_server_error_head_is_retried_when_buffered() {
    if !curl_available() {
        return;
    }
    let (url, connections) =
        slow_head_server("503 Service Unavailable", r#"{"error":"loading model"}"#).await;

    let client = slow_head_client(&url, 1);
    let err = client.version().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServerError);
    assert_eq!(connections.load(Ordering::SeqCst), 2);
}

/// Live curl processes whose command line mentions `needle`, or `None` without `/proc`.
fn curl_processes(needle: &str) -> Option<usize> {
    let entries = std::fs::read_dir("/proc").ok()?;
    std::fs::read("/proc/self/cmdline").ok()?;
    let count = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|e| std::fs::read(e.path().join("cmdline")).ok())
        .filter(|cmdline| {
            let args: Vec<String> = cmdline
                .split(|b| *b == 0)
                .map(|a| String::from_utf8_lossy(a).into_owned())
                .collect();
            args.first().map_or(false, |bin| bin.ends_with("curl"))
                && args.iter().any(|a| a.contains(needle))
        })
        .count();
    Some(count)
}

#[tokio::test]
async fn test_cancel_kills_curl_and_removes_body_file() {
    if !curl_available() {
        return;
    }

    // Endless NDJSON producer; reports when the client side goes away.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (gone_tx, gone_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = vec![0u8; 8192];
        let _ = socket.read(&mut request).await;
        let head = "HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\nConnection: close\r\n\r\n";
        if socket.write_all(head.as_bytes()).await.is_err() {
            let _ = gone_tx.send(());
            return;
        }
        loop {
            let line = b"{\"model\":\"m\",\"response\":\"tick\",\"done\":false}\n";
            if socket.write_all(line).await.is_err() || socket.flush().await.is_err() {
                let _ = gone_tx.send(());
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    let temp_dir = tempfile::tempdir().unwrap();
    let transport = ProcessTransport::new(&ClientConfig::default()).with_temp_dir(temp_dir.path());
    let client = OllamaClient::builder()
        .ignore_env()
        .host(format!("http://{}", addr))
        .transport(Arc::new(transport) as Arc<dyn Transport>)
        .build()
        .unwrap();

    let mut stream = client
        .generate_stream(GenerateRequest::new("m", "count forever"))
        .await
        .unwrap();
    for _ in 0..2 {
        assert_eq!(stream.next().await.unwrap().unwrap().response, "tick");
    }
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    let needle = addr.to_string();
    let before = curl_processes(&needle);
    if let Some(before) = before {
        assert_eq!(before, 1);
    }

    drop(stream);

    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    if before.is_some() {
        // A killed child may linger as a zombie until reaped; its cmdline is empty.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while curl_processes(&needle) != Some(0) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "curl still running after drop"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
    tokio::time::timeout(Duration::from_secs(5), gone_rx)
        .await
        .expect("server noticed the client went away")
        .unwrap();
}
