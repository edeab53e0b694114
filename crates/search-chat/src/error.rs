//! Error taxonomy for the agent

use std::time::Duration;

use llm_core::LlmError;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Missing credentials or a wiring bug. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Tool '{tool}' failed: {message}")]
    ToolDispatch { tool: String, message: String },

    #[error("Model invocation failed: {0}")]
    ModelInvocation(#[from] LlmError),

    #[error("Tool round limit of {0} reached")]
    LoopIterationExceeded(usize),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, AgentError>;
