//! Agent state management

use std::fmt;
use std::time::Duration;

use llm_core::{RetryConfig, ToolCall};

use crate::config::Settings;

/// Configuration for the agent loop
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model -> tools round trips allowed per user turn
    pub max_tool_rounds: usize,
    /// Timeout for one model call
    pub model_timeout: Duration,
    /// Retries for failed model calls
    pub model_retry: RetryConfig,
    /// Dispatch the calls of one assistant message concurrently
    pub parallel_tool_calls: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 10,
            model_timeout: Duration::from_secs(60),
            model_retry: RetryConfig::default(),
            parallel_tool_calls: false,
        }
    }
}

impl AgentConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_tool_rounds: settings.agent.max_tool_rounds,
            model_timeout: settings.model.timeout(),
            model_retry: settings.model.retry(),
            parallel_tool_calls: settings.agent.parallel_tool_calls,
        }
    }

    pub fn with_max_tool_rounds(mut self, max: usize) -> Self {
        self.max_tool_rounds = max;
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn with_model_retry(mut self, retry: RetryConfig) -> Self {
        self.model_retry = retry;
        self
    }

    pub fn with_parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.parallel_tool_calls = parallel;
        self
    }
}

/// Where the loop is within one user turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    AwaitingModel,
    AwaitingTools,
    Done,
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopPhase::AwaitingModel => "AWAITING_MODEL",
            LoopPhase::AwaitingTools => "AWAITING_TOOLS",
            LoopPhase::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Why a turn reached `Done`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The model answered without requesting tools
    Answered,
    /// `max_tool_rounds` was exhausted
    RoundLimit,
    /// Model calls kept failing after retries
    ModelFailed,
    /// Cancelled by the user
    Interrupted,
}

/// Result of one user turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Final answer shown to the user (synthesized on failure)
    pub answer: String,
    pub finish_reason: FinishReason,
    /// Tool rounds dispatched
    pub rounds: usize,
    /// Model calls made, retries included
    pub model_calls: usize,
}

impl TurnOutcome {
    pub fn is_answered(&self) -> bool {
        self.finish_reason == FinishReason::Answered
    }
}

/// Progress reported while a turn runs
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    PhaseChanged(LoopPhase),
    ModelRequest {
        round: usize,
        attempt: u32,
        messages: usize,
    },
    ModelRetry {
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// Content sent alongside tool calls
    InterimContent(String),
    ToolStarted(ToolCall),
    ToolFinished {
        call_id: String,
        tool: String,
        success: bool,
        content: String,
    },
    RoundLimit {
        limit: usize,
        skipped: usize,
    },
    Interrupted(LoopPhase),
}

/// Receives events from the agent loop
pub trait TurnObserver: Send + Sync {
    fn on_event(&self, event: &TurnEvent);
}

/// Observer that ignores everything
#[cfg(test)]
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

#[cfg(test)]
impl TurnObserver for NoopObserver {
    fn on_event(&self, _event: &TurnEvent) {}
}

impl<F> TurnObserver for F
where
    F: Fn(&TurnEvent) + Send + Sync,
{
    fn on_event(&self, event: &TurnEvent) {
        self(event)
    }
}
