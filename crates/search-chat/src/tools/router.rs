//! Tool routing and dispatch

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use llm_core::{ChatMessage, RetryConfig, ToolCall};
use tracing::{debug, info, instrument, warn};

use super::registry::ToolRegistry;
use super::{ToolContext, ToolResult};
use crate::error::AgentError;

/// Outcome of routing one tool call
#[derive(Debug, Clone, PartialEq)]
pub enum RouteResult {
    /// Tool ran; the result itself may still report failure
    Success(ToolResult),
    /// Tool name is not registered
    NotFound(String),
    /// Arguments could not be used
    Malformed(String),
    /// Tool raised an error
    Error(String),
    /// Tool exceeded its timeout
    TimedOut(Duration),
}

impl RouteResult {
    pub fn is_success(&self) -> bool {
        matches!(self, RouteResult::Success(r) if r.success)
    }

    /// Content for the tool message answering the call
    pub fn to_content(&self) -> String {
        match self {
            RouteResult::Success(result) => result.to_content(),
            RouteResult::NotFound(name) => {
                format!("Error: tool '{}' is not available. Please fix your mistakes.", name)
            }
            RouteResult::Malformed(reason) => format!("Error: malformed tool call: {}", reason),
            RouteResult::Error(e) => format!("Error: {}", e),
            RouteResult::TimedOut(limit) => format!("Error: tool timed out after {:?}", limit),
        }
    }

    /// Tool message answering `call`
    pub fn into_message(self, call: &ToolCall) -> ChatMessage {
        ChatMessage::tool_result(call.id.clone(), self.to_content())
    }
}

/// Router for dispatching tool calls with timeout and retry
pub struct ToolRouter {
    registry: Arc<ToolRegistry>,
    ctx: ToolContext,
    retry: RetryConfig,
}

impl ToolRouter {
    /// Create a new router; tools are not retried by default
    pub fn new(registry: Arc<ToolRegistry>, ctx: ToolContext) -> Self {
        Self {
            registry,
            ctx,
            retry: RetryConfig::none(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Route a single tool call. Never fails: every outcome is a result.
    #[instrument(skip(self, tool_call), fields(tool = %tool_call.name(), id = %tool_call.id))]
    pub async fn route(&self, tool_call: &ToolCall) -> RouteResult {
        if !self.registry.contains(tool_call.name()) {
            warn!(tool = %tool_call.name(), "Tool not found");
            return RouteResult::NotFound(tool_call.name().to_string());
        }

        let mut attempt = 0;
        loop {
            info!(tool = %tool_call.name(), attempt, "Executing tool");
            let outcome = tokio::time::timeout(
                self.ctx.timeout,
                self.registry.dispatch(tool_call, &self.ctx),
            )
            .await;

            let failure = match outcome {
                Ok(Ok(result)) => {
                    if result.success {
                        info!(tool = %tool_call.name(), output_len = result.output.len(), "Tool executed successfully");
                    } else {
                        warn!(tool = %tool_call.name(), error = ?result.error, "Tool reported failure");
                    }
                    return RouteResult::Success(result);
                }
                Ok(Err(AgentError::MalformedResponse(reason))) => {
                    warn!(tool = %tool_call.name(), %reason, "Malformed tool call");
                    return RouteResult::Malformed(reason);
                }
                Ok(Err(e)) => {
                    warn!(tool = %tool_call.name(), error = %e, "Tool execution error");
                    RouteResult::Error(e.to_string())
                }
                Err(_) => {
                    warn!(tool = %tool_call.name(), timeout = ?self.ctx.timeout, "Tool timed out");
                    RouteResult::TimedOut(self.ctx.timeout)
                }
            };

            if attempt >= self.retry.max_retries {
                return failure;
            }
            let delay = self.retry.delay_for(attempt);
            debug!(?delay, attempt, "Retrying tool");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Route calls concurrently, yielding `(index, result)` pairs as each
    /// call finishes
    pub fn route_all<'a>(
        &'a self,
        tool_calls: &'a [ToolCall],
    ) -> FuturesUnordered<impl Future<Output = (usize, RouteResult)> + 'a> {
        tool_calls
            .iter()
            .enumerate()
            .map(|(index, call)| async move { (index, self.route(call).await) })
            .collect()
    }

    /// Get a reference to the registry
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

impl std::fmt::Debug for ToolRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRouter")
            .field("registry", &self.registry)
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ParameterSchema, Tool};
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails until it has been called `succeed_after` times
    struct FlakyTool {
        calls: Arc<AtomicUsize>,
        succeed_after: usize,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &str {
            "flaky"
        }

        fn description(&self) -> &str {
            "Fails a few times"
        }

        fn parameters_schema(&self) -> ParameterSchema {
            ParameterSchema::new()
        }

        async fn execute(&self, _args: &Value, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < self.succeed_after {
                anyhow::bail!("network error");
            }
            Ok(ToolResult::success(format!("ok after {}", n)))
        }
    }

    /// Sleeps for the number of milliseconds given in `ms`
    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Sleeps"
        }

        fn parameters_schema(&self) -> ParameterSchema {
            ParameterSchema::new()
        }

        async fn execute(&self, args: &Value, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
            let ms = args.get("ms").and_then(|v| v.as_u64()).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ToolResult::success(format!("slept {}", ms)))
        }
    }

    fn router(succeed_after: usize, calls: Arc<AtomicUsize>) -> ToolRouter {
        let mut registry = ToolRegistry::new();
        registry.register(FlakyTool { calls, succeed_after }).unwrap();
        registry.register(SlowTool).unwrap();
        ToolRouter::new(
            Arc::new(registry),
            ToolContext::default().with_timeout(Duration::from_millis(200)),
        )
    }

    #[tokio::test]
    async fn test_router_not_found() {
        let router = router(1, Arc::default());
        let call = ToolCall::new("t1", "nonexistent", json!({}));

        let result = router.route(&call).await;
        assert!(matches!(result, RouteResult::NotFound(_)));

        let msg = result.into_message(&call);
        assert_eq!(msg.tool_call_id.as_deref(), Some("t1"));
        assert!(msg.content.starts_with("Error:"));
    }

    #[tokio::test]
    async fn test_router_error_without_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = router(2, Arc::clone(&calls));

        let result = router.route(&ToolCall::new("t1", "flaky", json!({}))).await;
        assert!(matches!(result, RouteResult::Error(ref e) if e.contains("network error")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_router_retries_with_backoff() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = router(3, Arc::clone(&calls)).with_retry(
            RetryConfig::default()
                .with_max_retries(2)
                .with_base_delay(Duration::from_millis(1)),
        );

        let result = router.route(&ToolCall::new("t1", "flaky", json!({}))).await;
        assert!(result.is_success());
        assert_eq!(result.to_content(), "ok after 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_router_timeout() {
        let router = router(1, Arc::default());
        let result = router.route(&ToolCall::new("t1", "slow", json!({"ms": 2000}))).await;
        assert_eq!(result, RouteResult::TimedOut(Duration::from_millis(200)));
        assert_eq!(result.to_content(), "Error: tool timed out after 200ms");
    }

    #[tokio::test]
    async fn test_route_all_yields_in_completion_order() {
        let router = router(1, Arc::default());
        let calls = vec![
            ToolCall::new("a", "slow", json!({"ms": 100})),
            ToolCall::new("b", "slow", json!({"ms": 1})),
            ToolCall::new("c", "nonexistent", json!({})),
        ];

        let results: Vec<(usize, RouteResult)> = router.route_all(&calls).collect().await;
        let order: Vec<usize> = results.iter().map(|(i, _)| *i).collect();
        assert_eq!(order.len(), 3);
        assert_eq!(order.last(), Some(&0));

        let (_, slowest) = &results[2];
        assert_eq!(slowest.to_content(), "slept 100");
        assert!(results.iter().any(|(i, r)| *i == 2 && matches!(r, RouteResult::NotFound(_))));
    }
}
