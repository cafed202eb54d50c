use ai::{AiError, LLM, ToolCallInfo};
use db::Database;
use tracing::{debug, info};

use crate::dispatcher::{ToolDispatcher, ToolResult};
use crate::tools;

pub const SYSTEM_PROMPT: &str = "You are a healthcare data assistant working over a SQLite database \
of synthetic patient records. Answer questions by calling the tools you are given: call \
get_db_schema before writing SQL, use query_db for read-only SELECT queries and \
get_patient_data to fetch one category of records for a single patient. Never guess table names, \
column names or medical codes; look them up. If a tool returns an error, read its kind and \
message and correct the call. Keep answers short and cite the numbers you retrieved.";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Ai(#[from] AiError),
    #[error("the model kept calling tools after {0} rounds, giving up on this question")]
    ToolRoundsExceeded(usize),
}

/// Progress reported while a question is being answered
#[derive(Debug, Clone, Copy)]
pub enum SessionEvent<'a> {
    ToolCall(&'a ToolCallInfo),
    ToolResult(&'a ToolResult),
}

#[derive(Debug)]
pub struct ChatSession<D> {
    llm: LLM,
    dispatcher: ToolDispatcher<D>,
    max_tool_rounds: usize,
}

impl<D: Database> ChatSession<D> {
    /// Registers every tool with `llm` and installs the system prompt.
    pub fn new(mut llm: LLM, database: D, max_tool_rounds: usize) -> Self {
        llm.set_tools(tools::definitions());
        llm.set_system_prompt(SYSTEM_PROMPT);
        Self {
            llm,
            dispatcher: ToolDispatcher::new(database),
            max_tool_rounds: max_tool_rounds.max(1),
        }
    }

    pub fn llm(&self) -> &LLM {
        &self.llm
    }

    pub fn into_dispatcher(self) -> ToolDispatcher<D> {
        self.dispatcher
    }

    /// Sends `prompt` and keeps answering tool calls until the model replies
    /// with plain text. Every tool call gets a `tool` message before the model
    /// is asked again, so the transcript stays valid even when this fails.
    pub async fn ask<F>(&mut self, prompt: &str, mut on_event: F) -> Result<String, SessionError>
    where
        F: FnMut(SessionEvent<'_>),
    {
        let mut reply = self.llm.send_prompt(prompt).await?;
        let mut rounds = 0;

        while !reply.tool_calls.is_empty() {
            debug!(round = rounds + 1, calls = reply.tool_calls.len(), "answering tool calls");

            for call in &reply.tool_calls {
                on_event(SessionEvent::ToolCall(call));
                let result = self.dispatcher.dispatch(call).await;
                on_event(SessionEvent::ToolResult(&result));
                self.llm
                    .add_tool_result(result.tool_call_id.clone(), result.to_content());
            }

            rounds += 1;
            if rounds >= self.max_tool_rounds {
                info!(rounds, "tool round limit reached");
                return Err(SessionError::ToolRoundsExceeded(rounds));
            }

            reply = self.llm.complete().await?;
        }

        Ok(reply.content.unwrap_or_default())
    }
}
