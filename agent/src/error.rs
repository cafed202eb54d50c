use db::DbError;

/// Everything a tool call can fail with. Each variant ends up in the tool
/// result the model reads, never as a fault in the conversation loop.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("data store unreachable: {0}")]
    Connectivity(String),
    #[error("SQL error: {0}")]
    Syntax(String),
    #[error("{0}")]
    Validation(String),
    #[error("invalid arguments for {tool}: {message}")]
    Argument { tool: &'static str, message: String },
    #[error("unrecognized tool '{0}'")]
    Dispatch(String),
}

impl ToolError {
    pub(crate) fn argument(tool: &'static str, message: impl Into<String>) -> Self {
        ToolError::Argument {
            tool,
            message: message.into(),
        }
    }

    /// Stable identifier for the error class, part of the tool result payload
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Connectivity(_) => "connectivity_error",
            ToolError::Syntax(_) => "syntax_error",
            ToolError::Validation(_) => "validation_error",
            ToolError::Argument { .. } => "argument_error",
            ToolError::Dispatch(_) => "dispatch_error",
        }
    }
}

impl From<DbError> for ToolError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Connectivity(message) => ToolError::Connectivity(message),
            DbError::Syntax(message) => ToolError::Syntax(message),
            DbError::Validation(message) => ToolError::Validation(message),
        }
    }
}
