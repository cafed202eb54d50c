use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::{AiError, ChatBackend, ChatRequest, ChatResponse};

/// Chat-completions over HTTP. Works against OpenAI and the compatible
/// endpoints served by ollama, vllm and llama.cpp.
pub struct OpenAiBackend {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl OpenAiBackend {
    const TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, AiError> {
        let client = Client::builder().timeout(Self::TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AiError> {
        debug!(
            endpoint = %self.endpoint,
            messages = request.messages.len(),
            "sending chat request"
        );

        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AiError::Api { status, body });
        }

        Ok(response.json::<ChatResponse>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChatMessage, LLM, TextMessageRole, create_tool, json};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion(message: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1,
            "model": "gpt-5",
            "choices": [{"index": 0, "message": message, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        }))
    }

    #[tokio::test]
    async fn posts_transcript_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-5",
                "tool_choice": "auto",
                "tools": [{"type": "function", "function": {"name": "get_db_schema"}}]
            })))
            .respond_with(completion(json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_9",
                    "type": "function",
                    "function": {"name": "get_db_schema", "arguments": "{}"}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend =
            OpenAiBackend::new(&format!("{}/v1/", server.uri()), Some("sk-test".into())).unwrap();
        assert_eq!(backend.endpoint(), format!("{}/v1/chat/completions", server.uri()));

        let mut llm = LLM::with_backend("gpt-5", backend);
        llm.add_tool(create_tool("get_db_schema", "schema", Default::default()));
        let reply = llm.send_prompt("which tables exist?").await.unwrap();

        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].id, "call_9");
        assert_eq!(reply.tool_calls[0].name, "get_db_schema");
        assert_eq!(llm.history()[1].role, TextMessageRole::Assistant);
    }

    #[tokio::test]
    async fn local_servers_need_no_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(completion(json!({"role": "assistant", "content": "hello"})))
            .expect(1)
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(&server.uri(), None).unwrap();
        let request = ChatRequest {
            model: "qwen3:8b".into(),
            messages: vec![ChatMessage::user("hi")],
            tools: None,
            tool_choice: None,
        };
        let response = backend.chat(&request).await.unwrap();

        assert_eq!(response.choices[0].message, ChatMessage::assistant("hello"));
        let received = &server.received_requests().await.unwrap()[0];
        assert!(received.headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn api_errors_keep_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(&server.uri(), Some("wrong".into())).unwrap();
        let mut llm = LLM::with_backend("gpt-5", backend);

        match llm.send_prompt("hi").await {
            Err(AiError::Api { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid api key");
            }
            other => panic!("expected an api error, got {other:?}"),
        }
    }

    #[test]
    fn debug_output_hides_the_key() {
        let backend = OpenAiBackend::new("https://api.openai.com/v1", Some("sk-secret".into())).unwrap();
        let debug = format!("{backend:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
