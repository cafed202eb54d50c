//! Tool calling over the patient database.
//!
//! [`ToolDispatcher`] turns a model-issued [`ai::ToolCallInfo`] into a
//! [`ToolResult`], and [`ChatSession`] drives the conversation until the model
//! stops calling tools.

pub mod dispatcher;
pub mod error;
pub mod session;
pub mod tools;

pub use dispatcher::{ToolDispatcher, ToolName, ToolOutput, ToolResult};
pub use error::ToolError;
pub use session::{ChatSession, SessionError, SessionEvent};
