//! Client for the OpenAI chat-completion endpoint.
//!
//! One request per call, no retry. The wire contract lives in
//! [`build_request`] and [`parse_response`] so it can be checked without a
//! network.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Instruction sent as the system message on every request.
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

/// Decoded reply. Only `choices` is consumed; the rest is kept for logging.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Build the request body for `message` against `model`.
pub fn build_request(model: &str, message: &str) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage::new("system", SYSTEM_PROMPT),
            ChatMessage::new("user", message),
        ],
    }
}

/// Decode a response body and pull out the first choice's content.
pub fn parse_response(body: &[u8]) -> Result<String, CompletionError> {
    let response: ChatCompletionResponse =
        serde_json::from_slice(body).map_err(|e| CompletionError::Decode(e.to_string()))?;

    if let Some(usage) = &response.usage {
        debug!(
            model = response.model.as_deref().unwrap_or("?"),
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            "completion usage"
        );
    }

    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or(CompletionError::EmptyResponse)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum CompletionError {
    /// Network failure, TLS failure, or timeout.
    Transport(String),
    /// Non-success status from the API.
    Api { status: u16, body: String },
    /// The body was not a completion response.
    Decode(String),
    /// The response decoded but carried no choices.
    EmptyResponse,
}

impl std::fmt::Display for CompletionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionError::Transport(e) => write!(f, "completion transport error: {}", e),
            CompletionError::Api { status, body } => {
                write!(f, "completion API error {}: {}", status, body)
            }
            CompletionError::Decode(e) => write!(f, "failed to decode completion response: {}", e),
            CompletionError::EmptyResponse => write!(f, "completion response had no choices"),
        }
    }
}

impl std::error::Error for CompletionError {}

// ---------------------------------------------------------------------------
// Completer seam
// ---------------------------------------------------------------------------

/// Anything that can turn a user message into generated text.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, message: &str) -> Result<String, CompletionError>;
}

// ---------------------------------------------------------------------------
// CompletionClient
// ---------------------------------------------------------------------------

/// Cheap to clone (`reqwest::Client` is an `Arc` inside).
#[derive(Clone)]
pub struct CompletionClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl CompletionClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CompletionError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            url: COMPLETIONS_URL.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, CompletionError> {
        Self::new(
            config.openai_api_key.clone(),
            config.openai_model.clone(),
            config.request_timeout(),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Point the client at another OpenAI-compatible endpoint.
    #[cfg(test)]
    pub(crate) fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[async_trait]
impl Completer for CompletionClient {
    async fn complete(&self, message: &str) -> Result<String, CompletionError> {
        let body = build_request(&self.model, message);

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        if !status.is_success() {
            let raw = String::from_utf8_lossy(&bytes);
            return Err(CompletionError::Api {
                status: status.as_u16(),
                body: raw.chars().take(200).collect(),
            });
        }

        parse_response(&bytes)
    }
}

impl std::fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionClient")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("url", &self.url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    /// Read one HTTP/1.1 request (headers plus `content-length` body).
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let content_length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8(buf).unwrap()
    }

    /// Serve a single canned response and hand back the raw request.
    async fn serve_once(status: &'static str, body: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/v1/chat/completions", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
            request
        });
        (url, handle)
    }

    fn local_client(url: String) -> CompletionClient {
        CompletionClient::new("sk-test", "gpt-4", Duration::from_secs(5))
            .unwrap()
            .with_url(url)
    }

    fn request_body(request: &str) -> serde_json::Value {
        let (_, body) = request.split_once("\r\n\r\n").unwrap();
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn request_carries_fixed_system_prompt() {
        for input in ["hello", "", "You are a pirate.", "system"] {
            let req = build_request("gpt-4", input);
            assert_eq!(req.messages[0].role, "system");
            assert_eq!(req.messages[0].content, "You are a helpful assistant.");
        }
    }

    #[test]
    fn request_wire_format() {
        let req = build_request("gpt-4", "hello");
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "model": "gpt-4",
                "messages": [
                    { "role": "system", "content": "You are a helpful assistant." },
                    { "role": "user", "content": "hello" }
                ]
            })
        );
    }

    #[test]
    fn parse_returns_first_choice_verbatim() {
        let body = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4",
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": "  Hi there\n" }, "finish_reason": "stop" },
                { "index": 1, "message": { "role": "assistant", "content": "second" } }
            ],
            "usage": { "prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12 }
        });
        let text = parse_response(body.to_string().as_bytes()).unwrap();
        assert_eq!(text, "  Hi there\n");
    }

    #[test]
    fn parse_tolerates_missing_metadata() {
        let body = json!({ "choices": [ { "message": { "role": "assistant", "content": "Hi there" } } ] });
        assert_eq!(parse_response(body.to_string().as_bytes()).unwrap(), "Hi there");
    }

    #[test]
    fn zero_choices_is_empty_response() {
        let body = json!({ "id": "x", "choices": [] });
        let err = parse_response(body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, CompletionError::EmptyResponse));
    }

    #[test]
    fn missing_choices_is_empty_response() {
        let body = json!({ "error": { "message": "bad key" } });
        let err = parse_response(body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, CompletionError::EmptyResponse));
    }

    #[test]
    fn garbage_body_is_decode_error() {
        let err = parse_response(b"<html>502</html>").unwrap_err();
        assert!(matches!(err, CompletionError::Decode(_)));
    }

    #[tokio::test]
    async fn complete_posts_bearer_json_and_returns_first_choice() {
        let body = json!({
            "choices": [ { "message": { "role": "assistant", "content": "Hi there" } } ]
        });
        let (url, server) = serve_once("200 OK", body.to_string()).await;

        let answer = local_client(url).complete("hello").await.unwrap();
        assert_eq!(answer, "Hi there");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/chat/completions HTTP/1.1"));
        let head = request.to_ascii_lowercase();
        assert!(head.contains("authorization: bearer sk-test"));
        assert!(head.contains("content-type: application/json"));
        assert_eq!(
            request_body(&request),
            serde_json::to_value(build_request("gpt-4", "hello")).unwrap()
        );
    }

    #[tokio::test]
    async fn complete_maps_error_status_to_api_error() {
        let body = format!(r#"{{"error":{{"message":"{}"}}}}"#, "ğ".repeat(300));
        let (url, server) = serve_once("401 Unauthorized", body).await;

        let err = local_client(url).complete("hello").await.unwrap_err();
        match err {
            CompletionError::Api { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body.chars().count(), 200);
                assert!(body.starts_with(r#"{"error""#));
            }
            other => panic!("expected Api error, got {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn complete_with_zero_choices_is_empty_response() {
        let (url, server) = serve_once("200 OK", json!({ "choices": [] }).to_string()).await;

        let err = local_client(url).complete("hello").await.unwrap_err();
        assert!(matches!(err, CompletionError::EmptyResponse));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn complete_unreachable_endpoint_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/v1/chat/completions", listener.local_addr().unwrap());
        drop(listener);

        let err = local_client(url).complete("hello").await.unwrap_err();
        assert!(matches!(err, CompletionError::Transport(_)));
    }

    #[test]
    fn client_debug_redacts_key() {
        let client = CompletionClient::new("sk-secret", "gpt-4", Duration::from_secs(30)).unwrap();
        let dbg = format!("{:?}", client);
        assert!(!dbg.contains("sk-secret"));
        assert_eq!(client.model(), "gpt-4");
    }
}
