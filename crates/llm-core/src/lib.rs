//! llm-core: Shared library for chat model access
//!
//! Provides:
//! - Conversation message types (roles, tool calls, tool definitions)
//! - OpenAI-compatible chat completions client (with streaming support)
//! - Model configuration
//! - Retry/backoff policy

pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod retry;

pub use client::ChatClient;
pub use config::{ModelConfig, SecretString};
pub use error::{LlmError, Result};
pub use message::{ChatMessage, FunctionCall, FunctionDefinition, Role, ToolCall, ToolDefinition};
pub use retry::RetryConfig;
