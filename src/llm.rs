use crate::error::{GreenIndexError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// One single-message completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: Option<f32>,
    /// Ask the provider for a JSON-object response when it supports one.
    pub json_output: bool,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            temperature: None,
            json_output: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_json_output(mut self) -> Self {
        self.json_output = true;
        self
    }
}

/// A hosted text-generation service.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Whether `json_output` requests are honoured by the provider.
    fn supports_json_output(&self) -> bool {
        false
    }
}

/// OpenAI-compatible chat-completions client (Groq, OpenAI, local gateways).
#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    json_mode: bool,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GreenIndexError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            json_mode: true,
            http,
        })
    }

    /// Disable `response_format` for gateways that reject it.
    pub fn without_json_mode(mut self) -> Self {
        self.json_mode = false;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": [
                {"role": "user", "content": request.prompt}
            ],
        });

        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if request.json_output && self.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        body
    }
}

/// Pull `choices[0].message.content` out of a chat-completions response.
fn message_content(response_json: &serde_json::Value) -> Result<String> {
    response_json["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| GreenIndexError::Llm("No content in LLM response".to_string()))
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = self.request_body(request);
        debug!("Calling {} with model {}", self.base_url, request.model);

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| GreenIndexError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GreenIndexError::Llm(format!(
                "LLM API returned {}: {}",
                status, text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GreenIndexError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        message_content(&response_json)
    }

    fn supports_json_output(&self) -> bool {
        self.json_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubHttpServer;

    fn client(base_url: &str) -> LlmClient {
        LlmClient::new(
            "test-key".to_string(),
            base_url.to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_request_body_shape() {
        let client = client("https://api.groq.com/openai/v1/");
        assert_eq!(client.base_url(), "https://api.groq.com/openai/v1");

        let request = CompletionRequest::new("llama3-70b-8192", "hello")
            .with_temperature(0.5)
            .with_json_output();
        let body = client.request_body(&request);
        assert_eq!(body["model"], "llama3-70b-8192");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello");
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["response_format"]["type"], "json_object");

        let plain = client.without_json_mode().request_body(&request);
        assert!(plain.get("response_format").is_none());
    }

    #[test]
    fn test_message_content_missing() {
        let value = serde_json::json!({"choices": []});
        assert!(matches!(message_content(&value), Err(GreenIndexError::Llm(_))));
    }

    #[tokio::test]
    async fn test_complete_against_stub() {
        let server = StubHttpServer::start(|request| {
            assert!(request.path.ends_with("/chat/completions"));
            assert!(request.body.contains("\"model\":\"m\""));
            (
                200,
                "application/json",
                br#"{"choices":[{"message":{"role":"assistant","content":"  hi  "}}]}"#.to_vec(),
            )
        })
        .await;

        let answer = client(&server.base_url())
            .complete(&CompletionRequest::new("m", "ping"))
            .await
            .unwrap();
        assert_eq!(answer, "  hi  ");
    }

    #[tokio::test]
    async fn test_timeout_is_llm_error() {
        let server = StubHttpServer::start_delayed(Duration::from_secs(2), |_| {
            (200, "application/json", br#"{"choices":[{"message":{"content":"late"}}]}"#.to_vec())
        })
        .await;

        let client = LlmClient::new(
            "test-key".to_string(),
            server.base_url(),
            Duration::from_millis(100),
        )
        .unwrap();
        let result = client.complete(&CompletionRequest::new("m", "ping")).await;
        assert!(matches!(result, Err(GreenIndexError::Llm(_))));
    }

    #[tokio::test]
    async fn test_complete_propagates_error_status() {
        let server = StubHttpServer::start(|_| (500, "text/plain", b"boom".to_vec())).await;

        let result = client(&server.base_url())
            .complete(&CompletionRequest::new("m", "ping"))
            .await;
        match result {
            Err(GreenIndexError::Llm(message)) => assert!(message.contains("500")),
            other => panic!("expected Llm error, got {:?}", other),
        }
    }
}
