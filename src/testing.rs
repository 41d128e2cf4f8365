//! Testing utilities
//!
//! - `ScriptedModel` replays canned model responses and records every request,
//!   so extraction and analysis can be tested without API calls.
//! - `StubHttpServer` is a minimal tokio HTTP/1.1 responder used to stand in
//!   for the LLM endpoint and the NDVI image service.

use crate::error::{GreenIndexError, Result};
use crate::llm::{CompletionRequest, LanguageModel};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A language model that returns scripted responses in order.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<std::result::Result<String, String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    json_output: bool,
}

impl ScriptedModel {
    pub fn new<S: Into<String>>(responses: Vec<S>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            requests: Mutex::new(Vec::new()),
            json_output: false,
        }
    }

    /// A model whose next call fails with an `Llm` error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(vec![Err(message.into())])),
            requests: Mutex::new(Vec::new()),
            json_output: false,
        }
    }

    /// Report support for JSON-object responses.
    pub fn with_json_output(mut self) -> Self {
        self.json_output = true;
        self
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(response.into()));
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(GreenIndexError::Llm(message)),
            None => Err(GreenIndexError::Llm("no scripted response left".to_string())),
        }
    }

    fn supports_json_output(&self) -> bool {
        self.json_output
    }
}

/// A request as seen by `StubHttpServer`.
#[derive(Debug, Clone)]
pub struct StubRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// (status, content type, body)
pub type StubResponse = (u16, &'static str, Vec<u8>);

/// Local HTTP server answering every request with `handler`.
pub struct StubHttpServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl StubHttpServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&StubRequest) -> StubResponse + Send + Sync + 'static,
    {
        Self::start_delayed(Duration::ZERO, handler).await
    }

    /// Like `start`, but every response is held back for `delay`.
    pub async fn start_delayed<F>(delay: Duration, handler: F) -> Self
    where
        F: Fn(&StubRequest) -> StubResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub server");
        let addr = listener.local_addr().expect("stub server address");
        let hits = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(handler);

        let task_hits = Arc::clone(&hits);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let handler = Arc::clone(&handler);
                let hits = Arc::clone(&task_hits);
                tokio::spawn(async move {
                    if let Some(request) = read_request(&stream).await {
                        hits.fetch_add(1, Ordering::SeqCst);
                        let response = handler(&request);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        let _ = write_response(stream, response).await;
                    }
                });
            }
        });

        Self { addr, hits, handle }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of requests served.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for StubHttpServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read_request(stream: &TcpStream) -> Option<StubRequest> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        stream.readable().await.ok()?;
        match stream.try_read(&mut chunk) {
            Ok(0) => return None,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(_) => return None,
        }
        if let Some(pos) = find_subsequence(&buffer, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buffer.len() < header_end + content_length {
        stream.readable().await.ok()?;
        match stream.try_read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(_) => return None,
        }
    }

    let body_end = buffer.len().min(header_end + content_length);
    let body = String::from_utf8_lossy(&buffer[header_end..body_end]).to_string();

    Some(StubRequest { method, path, body })
}

async fn write_response(mut stream: TcpStream, response: StubResponse) -> std::io::Result<()> {
    let (status, content_type, body) = response;
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    };
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason,
        content_type,
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&body).await?;
    stream.flush().await?;
    stream.shutdown().await
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
