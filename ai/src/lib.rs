pub mod openai;

use std::fmt::Display;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use openai::OpenAiBackend;
// Re-export types that consumers will need to create and use tools
pub use serde_json::{Value, json};
pub use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("request to the model failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("model returned no choices")]
    EmptyResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextMessageRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolType {
    #[default]
    #[serde(rename = "function")]
    Function,
}

/// A tool the model may call, in the chat-completions `tools` format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tp: ToolType,
    pub function: Function,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<HashMap<String, Value>>,
}

/// A tool call as it appears inside an assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallMessage {
    pub id: String,
    #[serde(rename = "type", default)]
    pub tp: ToolType,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON text, exactly as the model produced it
    #[serde(default)]
    pub arguments: String,
}

/// Information about a tool call from the model
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCallInfo {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl From<&ToolCallMessage> for ToolCallInfo {
    fn from(call: &ToolCallMessage) -> Self {
        Self {
            id: call.id.clone(),
            name: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: TextMessageRole,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: TextMessageRole, content: impl Display) -> Self {
        Self {
            role,
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Display) -> Self {
        Self::text(TextMessageRole::System, content)
    }

    pub fn user(content: impl Display) -> Self {
        Self::text(TextMessageRole::User, content)
    }

    pub fn assistant(content: impl Display) -> Self {
        Self::text(TextMessageRole::Assistant, content)
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Display) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::text(TextMessageRole::Tool, content)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Something that answers chat-completions requests
#[async_trait]
pub trait ChatBackend: std::fmt::Debug + Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AiError>;
}

/// What the model said on one completion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallInfo>,
}

/// A conversation with a model: the transcript plus the tools it may call
#[derive(Debug)]
pub struct LLM {
    backend: Box<dyn ChatBackend>,
    model: String,
    history: Vec<ChatMessage>,
    tools: Vec<Tool>,
}

impl LLM {
    pub fn new(conf: &config::AIConfig, api_key: Option<String>) -> Result<Self, AiError> {
        let backend = OpenAiBackend::new(&conf.url, api_key)?;
        Ok(Self::with_backend(conf.model.clone(), backend))
    }

    pub fn with_backend(model: impl Into<String>, backend: impl ChatBackend + 'static) -> Self {
        LLM {
            backend: Box::new(backend),
            model: model.into(),
            history: vec![],
            tools: vec![],
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn add_tool(&mut self, tool: Tool) {
        self.tools.push(tool);
    }

    /// Set all tools for the LLM, replacing any existing tools
    pub fn set_tools(&mut self, tools: Vec<Tool>) {
        self.tools = tools;
    }

    /// Get the tools that are configured for this LLM
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    /// Set the system message, replacing a previous one
    pub fn set_system_prompt(&mut self, prompt: impl Display) {
        let message = ChatMessage::system(prompt);
        match self.history.first_mut() {
            Some(first) if first.role == TextMessageRole::System => *first = message,
            _ => self.history.insert(0, message),
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Append a user message and ask the model for the next reply
    pub async fn send_prompt(&mut self, prompt: impl Display) -> Result<Reply, AiError> {
        self.history.push(ChatMessage::user(prompt));
        self.complete().await
    }

    /// Add a tool result to the conversation history. Call [`LLM::complete`]
    /// once every tool call of the last reply has its result.
    pub fn add_tool_result(&mut self, tool_call_id: impl Into<String>, result: impl Display) {
        self.history.push(ChatMessage::tool(tool_call_id, result));
    }

    /// Send the transcript as it stands and record the assistant reply
    pub async fn complete(&mut self) -> Result<Reply, AiError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: self.history.clone(),
            tools: (!self.tools.is_empty()).then(|| self.tools.clone()),
            tool_choice: (!self.tools.is_empty()).then(|| "auto".to_string()),
        };

        let response = self.backend.chat(&request).await?;
        let message = response
            .choices
            .into_iter()
            .next()
            .ok_or(AiError::EmptyResponse)?
            .message;

        let reply = Reply {
            content: message.content.clone().filter(|content| !content.is_empty()),
            tool_calls: message
                .tool_calls
                .iter()
                .flatten()
                .map(ToolCallInfo::from)
                .collect(),
        };
        debug!(
            tool_calls = reply.tool_calls.len(),
            has_content = reply.content.is_some(),
            "model replied"
        );

        self.history.push(message);
        Ok(reply)
    }
}

/// Helper function to create a tool with the given name, description, and parameters
///
/// # Example
/// ```rust
/// use ai::{create_tool, json, HashMap, Value};
///
/// let parameters: HashMap<String, Value> = serde_json::from_value(json!({
///     "type": "object",
///     "properties": {
///         "sql": {
///             "type": "string",
///             "description": "The SQL query to execute",
///         },
///     },
///     "required": ["sql"],
/// })).unwrap();
///
/// let tool = create_tool(
///     "query_db",
///     "Execute a read-only SQL query against the database",
///     parameters,
/// );
/// assert_eq!(tool.function.name, "query_db");
/// ```
pub fn create_tool(
    name: impl Into<String>,
    description: impl Into<String>,
    parameters: HashMap<String, Value>,
) -> Tool {
    Tool {
        tp: ToolType::Function,
        function: Function {
            name: name.into(),
            description: Some(description.into()),
            parameters: Some(parameters),
        },
    }
}
