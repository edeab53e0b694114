//! Boundary between the agent loop and the language model

use async_trait::async_trait;
use llm_core::{ChatClient, ChatMessage, LlmError, ToolDefinition};

/// Anything that can answer a conversation with one assistant message
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Returns exactly one assistant message. Non-empty `tool_calls` means
    /// the model wants tools run before it answers.
    async fn invoke(
        &self,
        history: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage, LlmError>;
}

#[async_trait]
impl ModelInvoker for ChatClient {
    async fn invoke(
        &self,
        history: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage, LlmError> {
        self.chat(history, tools).await
    }
}
