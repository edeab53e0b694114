//! Agent loop implementation

use std::collections::HashSet;

use futures::StreamExt;
use llm_core::{ChatMessage, Role, ToolCall, ToolDefinition};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::invoker::ModelInvoker;
use super::state::{AgentConfig, FinishReason, LoopPhase, TurnEvent, TurnObserver, TurnOutcome};
use super::store::MessageStore;
use crate::error::{AgentError, Result};
use crate::tools::router::RouteResult;
use crate::tools::ToolRouter;

/// Content recorded when a turn is cancelled
pub const INTERRUPTED_MARKER: &str = "[interrupted]";

const SKIPPED_CONTENT: &str = "Error: tool call skipped because the tool round limit was reached";

/// The agent loop orchestrator
pub struct AgentLoop<M> {
    model: M,
    router: ToolRouter,
    config: AgentConfig,
}

impl<M: ModelInvoker> AgentLoop<M> {
    /// Create a new agent loop
    pub fn new(model: M, router: ToolRouter, config: AgentConfig) -> Self {
        Self {
            model,
            router,
            config,
        }
    }

    /// Append a user message and run the turn it starts
    pub async fn submit(
        &self,
        store: &mut MessageStore,
        input: impl Into<String>,
        observer: &dyn TurnObserver,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        store.append(vec![ChatMessage::user(input)])?;
        self.run_turn(store, observer, cancel).await
    }

    /// Run one user turn to `Done`.
    ///
    /// Model, tool and round-limit failures end the turn with an answer
    /// appended to `store`; an `Err` means the history itself was rejected.
    #[instrument(skip_all, fields(turn = store.turns(), history = store.len()))]
    pub async fn run_turn(
        &self,
        store: &mut MessageStore,
        observer: &dyn TurnObserver,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        if let Some(call) = store.pending_tool_calls().first() {
            return Err(AgentError::InvalidMessage(format!(
                "history has an unanswered tool call '{}'",
                call.id
            )));
        }

        let tools = self.router.registry().list();
        let mut rounds = 0;
        let mut model_calls = 0;
        info!(max_tool_rounds = self.config.max_tool_rounds, tools = tools.len(), "Starting turn");

        let finish = |answer: String,
                      finish_reason: FinishReason,
                      rounds: usize,
                      model_calls: usize|
         -> Result<TurnOutcome> {
            observer.on_event(&TurnEvent::PhaseChanged(LoopPhase::Done));
            info!(?finish_reason, rounds, model_calls, "Turn finished");
            Ok(TurnOutcome {
                answer,
                finish_reason,
                rounds,
                model_calls,
            })
        };

        loop {
            observer.on_event(&TurnEvent::PhaseChanged(LoopPhase::AwaitingModel));
            let invoked = self
                .invoke_model(store.messages(), &tools, rounds, &mut model_calls, observer, cancel)
                .await;
            let reply = match invoked {
                Ok(reply) => normalize_call_ids(reply, rounds),
                Err(AgentError::Interrupted) => {
                    warn!(phase = %LoopPhase::AwaitingModel, "Turn interrupted");
                    store.append(vec![ChatMessage::system(INTERRUPTED_MARKER)])?;
                    observer.on_event(&TurnEvent::Interrupted(LoopPhase::AwaitingModel));
                    return finish(INTERRUPTED_MARKER.to_string(), FinishReason::Interrupted, rounds, model_calls);
                }
                Err(e) => {
                    warn!(error = %e, "Model failed, ending turn");
                    let answer = format!(
                        "Sorry, I couldn't get a response from the language model ({}). Please try again.",
                        e
                    );
                    store.append(vec![ChatMessage::assistant(answer.clone())])?;
                    return finish(answer, FinishReason::ModelFailed, rounds, model_calls);
                }
            };

            if !reply.has_tool_calls() {
                let answer = reply.content.clone();
                store.append(vec![reply])?;
                return finish(answer, FinishReason::Answered, rounds, model_calls);
            }

            if !reply.content.trim().is_empty() {
                observer.on_event(&TurnEvent::InterimContent(reply.content.clone()));
            }
            let calls = reply.tool_calls.clone();
            store.append(vec![reply])?;

            if rounds >= self.config.max_tool_rounds {
                let limit = AgentError::LoopIterationExceeded(self.config.max_tool_rounds);
                warn!(error = %limit, skipped = calls.len(), "Skipping tool calls");
                store.append(
                    calls
                        .iter()
                        .map(|call| ChatMessage::tool_result(call.id.clone(), SKIPPED_CONTENT))
                        .collect(),
                )?;
                observer.on_event(&TurnEvent::RoundLimit {
                    limit: self.config.max_tool_rounds,
                    skipped: calls.len(),
                });
                let answer = format!(
                    "Sorry, I couldn't finish answering: {}. Try asking a more specific question.",
                    limit
                );
                store.append(vec![ChatMessage::assistant(answer.clone())])?;
                return finish(answer, FinishReason::RoundLimit, rounds, model_calls);
            }

            rounds += 1;
            observer.on_event(&TurnEvent::PhaseChanged(LoopPhase::AwaitingTools));
            debug!(round = rounds, calls = calls.len(), "Dispatching tool calls");

            let completed = if self.config.parallel_tool_calls {
                self.dispatch_parallel(&calls, store, observer, cancel).await?
            } else {
                self.dispatch_sequential(&calls, store, observer, cancel).await?
            };
            if !completed {
                warn!(phase = %LoopPhase::AwaitingTools, "Turn interrupted");
                observer.on_event(&TurnEvent::Interrupted(LoopPhase::AwaitingTools));
                return finish(INTERRUPTED_MARKER.to_string(), FinishReason::Interrupted, rounds, model_calls);
            }
        }
    }

    /// Call the model with timeout and retry
    async fn invoke_model(
        &self,
        history: &[ChatMessage],
        tools: &[ToolDefinition],
        round: usize,
        model_calls: &mut usize,
        observer: &dyn TurnObserver,
        cancel: &CancellationToken,
    ) -> Result<ChatMessage> {
        let retry = &self.config.model_retry;
        let mut attempt = 0;

        loop {
            *model_calls += 1;
            observer.on_event(&TurnEvent::ModelRequest {
                round,
                attempt,
                messages: history.len(),
            });

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Interrupted),
                r = tokio::time::timeout(self.config.model_timeout, self.model.invoke(history, tools)) => r,
            };

            let error = match outcome {
                Ok(Ok(reply)) if reply.role == Role::Assistant => return Ok(reply),
                Ok(Ok(reply)) => {
                    return Err(AgentError::MalformedResponse(format!(
                        "model replied with a {} message",
                        reply.role
                    )))
                }
                Ok(Err(e)) => AgentError::ModelInvocation(e),
                Err(_) => AgentError::Timeout(self.config.model_timeout),
            };

            let retryable = match &error {
                AgentError::ModelInvocation(e) => e.is_retryable(),
                AgentError::Timeout(_) => true,
                _ => false,
            };
            if !retryable || attempt >= retry.max_retries {
                return Err(error);
            }

            let delay = retry.delay_for(attempt);
            warn!(error = %error, attempt, ?delay, "Model call failed, retrying");
            observer.on_event(&TurnEvent::ModelRetry {
                attempt,
                delay,
                error: error.to_string(),
            });
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Interrupted),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Run calls one at a time, appending each answer as it arrives.
    /// Returns false if cancelled.
    async fn dispatch_sequential(
        &self,
        calls: &[ToolCall],
        store: &mut MessageStore,
        observer: &dyn TurnObserver,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        for (index, call) in calls.iter().enumerate() {
            observer.on_event(&TurnEvent::ToolStarted(call.clone()));
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = self.router.route(call) => Some(r),
            };

            match result {
                Some(result) => self.record(call, result, store, observer)?,
                None => {
                    answer_interrupted(&calls[index..], store)?;
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Run calls concurrently, appending answers in call order
    async fn dispatch_parallel(
        &self,
        calls: &[ToolCall],
        store: &mut MessageStore,
        observer: &dyn TurnObserver,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        for call in calls {
            observer.on_event(&TurnEvent::ToolStarted(call.clone()));
        }

        let mut results: Vec<Option<RouteResult>> = calls.iter().map(|_| None).collect();
        let mut running = self.router.route_all(calls);
        let mut interrupted = false;
        while !running.is_empty() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    interrupted = true;
                    break;
                }
                Some((index, result)) = running.next() => {
                    results[index] = Some(result);
                }
                else => break,
            }
        }
        drop(running);

        // Finished calls keep their results; the rest get the marker
        for (call, result) in calls.iter().zip(results) {
            match result {
                Some(result) => self.record(call, result, store, observer)?,
                None => answer_interrupted(std::slice::from_ref(call), store)?,
            }
        }
        Ok(!interrupted)
    }

    fn record(
        &self,
        call: &ToolCall,
        result: RouteResult,
        store: &mut MessageStore,
        observer: &dyn TurnObserver,
    ) -> Result<()> {
        let success = result.is_success();
        let message = result.into_message(call);
        observer.on_event(&TurnEvent::ToolFinished {
            call_id: call.id.clone(),
            tool: call.name().to_string(),
            success,
            content: message.content.clone(),
        });
        store.append(vec![message])?;
        Ok(())
    }
}

fn answer_interrupted(calls: &[ToolCall], store: &mut MessageStore) -> Result<()> {
    store.append(
        calls
            .iter()
            .map(|call| ChatMessage::tool_result(call.id.clone(), INTERRUPTED_MARKER))
            .collect(),
    )?;
    Ok(())
}

/// Give every tool call a non-empty id unique within its message
fn normalize_call_ids(mut reply: ChatMessage, round: usize) -> ChatMessage {
    let mut seen = HashSet::new();
    for (index, call) in reply.tool_calls.iter_mut().enumerate() {
        if call.id.trim().is_empty() || seen.contains(&call.id) {
            let id = format!("call_{}_{}", round, index);
            debug!(original = %call.id, %id, "Reassigning tool call id");
            call.id = id;
        }
        seen.insert(call.id.clone());
    }
    reply
}
