//! Append-only conversation history

use llm_core::{ChatMessage, Role, ToolCall};
use std::collections::HashSet;
use tracing::debug;

use crate::error::{AgentError, Result};

/// Ordered messages of one conversation plus a user turn counter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    messages: Vec<ChatMessage>,
    turns: usize,
}

impl ConversationState {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of user messages appended since the last reset
    pub fn turns(&self) -> usize {
        self.turns
    }
}

/// Owns the history of a single conversation.
///
/// Messages are only ever appended. Every batch is validated against the
/// tool calls still awaiting an answer before any of it is committed.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    state: ConversationState,
    preamble: Option<ChatMessage>,
    /// Tool calls without an answering tool message, oldest first
    pending: Vec<ToolCall>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the preamble used by the next `reset`
    pub fn set_preamble(&mut self, content: Option<String>) {
        self.preamble = content.map(ChatMessage::system);
    }

    /// Append `messages` in order. The batch is rejected as a whole if any
    /// message is invalid.
    pub fn append(&mut self, messages: Vec<ChatMessage>) -> Result<&ConversationState> {
        let mut pending = self.pending.clone();
        for message in &messages {
            validate(message, &mut pending)?;
        }

        let users = messages.iter().filter(|m| m.role == Role::User).count();
        debug!(appended = messages.len(), pending = pending.len(), "Appending messages");

        self.state.messages.extend(messages);
        self.state.turns += users;
        self.pending = pending;
        Ok(&self.state)
    }

    /// Return to the preamble-only state
    pub fn reset(&mut self) -> &ConversationState {
        self.state = ConversationState {
            messages: self.preamble.iter().cloned().collect(),
            turns: 0,
        };
        self.pending.clear();
        &self.state
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.state.messages()
    }

    pub fn turns(&self) -> usize {
        self.state.turns()
    }

    /// Tool calls in history that no tool message has answered yet
    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.state.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.state.messages.last()
    }
}

fn validate(message: &ChatMessage, pending: &mut Vec<ToolCall>) -> Result<()> {
    if message.role != Role::Assistant && !message.tool_calls.is_empty() {
        return Err(AgentError::InvalidMessage(format!(
            "{} message carries tool calls",
            message.role
        )));
    }

    match message.role {
        Role::Assistant => {
            let mut ids = HashSet::new();
            for call in &message.tool_calls {
                if call.id.is_empty() || !ids.insert(call.id.as_str()) {
                    return Err(AgentError::InvalidMessage(format!(
                        "tool call id '{}' is empty or repeated",
                        call.id
                    )));
                }
            }
            pending.extend(message.tool_calls.iter().cloned());
        }
        Role::Tool => {
            let id = message.tool_call_id.as_deref().ok_or_else(|| {
                AgentError::InvalidMessage("tool message without tool_call_id".to_string())
            })?;
            let index = pending.iter().position(|c| c.id == id).ok_or_else(|| {
                AgentError::InvalidMessage(format!(
                    "tool message answers unknown or already answered call '{}'",
                    id
                ))
            })?;
            pending.remove(index);
        }
        Role::System | Role::User => {}
    }

    if message.role != Role::Tool && message.tool_call_id.is_some() {
        return Err(AgentError::InvalidMessage(format!(
            "{} message carries a tool_call_id",
            message.role
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search_call(id: &str) -> ToolCall {
        ToolCall::new(id, "tavily_search", json!({"query": "Paris weather"}))
    }

    #[test]
    fn test_length_is_sum_of_batches_and_prefix_is_unchanged() {
        let batches = vec![
            vec![ChatMessage::user("What's the weather in Paris?")],
            vec![ChatMessage::assistant_with_tools("", vec![search_call("t1"), search_call("t2")])],
            vec![
                ChatMessage::tool_result("t2", "22°C sunny"),
                ChatMessage::tool_result("t1", "light wind"),
            ],
            vec![],
            vec![ChatMessage::assistant("It's 22°C and sunny in Paris.")],
        ];

        let mut store = MessageStore::new();
        let mut expected_len = 0;
        for batch in batches {
            let before = store.messages().to_vec();
            expected_len += batch.len();
            let state = store.append(batch).unwrap();
            assert_eq!(state.messages().len(), expected_len);
            assert_eq!(&state.messages()[..before.len()], before.as_slice());
        }
        assert_eq!(store.turns(), 1);
        assert!(store.pending_tool_calls().is_empty());
    }

    #[test]
    fn test_invalid_batch_is_rejected_atomically() {
        let mut store = MessageStore::new();
        store.append(vec![ChatMessage::user("hi")]).unwrap();

        let err = store
            .append(vec![
                ChatMessage::assistant_with_tools("", vec![search_call("t1")]),
                ChatMessage::tool_result("t1", "ok"),
                ChatMessage::tool_result("t1", "answered twice"),
            ])
            .unwrap_err();

        assert!(matches!(err, AgentError::InvalidMessage(_)));
        assert_eq!(store.len(), 1);
        assert!(store.pending_tool_calls().is_empty());
    }

    #[test]
    fn test_rejects_unknown_tool_call_id() {
        let mut store = MessageStore::new();
        assert!(store.append(vec![ChatMessage::tool_result("ghost", "?")]).is_err());

        let mut orphan = ChatMessage::tool_result("x", "?");
        orphan.tool_call_id = None;
        assert!(store.append(vec![orphan]).is_err());
    }

    #[test]
    fn test_only_assistant_may_call_tools() {
        let mut user = ChatMessage::user("hi");
        user.tool_calls.push(search_call("t1"));
        assert!(MessageStore::new().append(vec![user]).is_err());

        let duplicate = ChatMessage::assistant_with_tools("", vec![search_call("t1"), search_call("t1")]);
        assert!(MessageStore::new().append(vec![duplicate]).is_err());
    }

    #[test]
    fn test_pending_tool_calls() {
        let mut store = MessageStore::new();
        store
            .append(vec![ChatMessage::assistant_with_tools("", vec![search_call("a"), search_call("b")])])
            .unwrap();
        store.append(vec![ChatMessage::tool_result("a", "done")]).unwrap();

        let pending: Vec<&str> = store.pending_tool_calls().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(pending, vec!["b"]);
    }

    #[test]
    fn test_reused_ids_across_rounds() {
        let mut store = MessageStore::new();
        for _ in 0..2 {
            store
                .append(vec![
                    ChatMessage::assistant_with_tools("", vec![search_call("call_0")]),
                    ChatMessage::tool_result("call_0", "result"),
                ])
                .unwrap();
        }
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut store = MessageStore::new();
        store.set_preamble(Some("You are a helpful assistant.".to_string()));
        store.reset();
        store.append(vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")]).unwrap();

        let once = store.reset().clone();
        let twice = store.reset().clone();
        assert_eq!(once, twice);
        assert_eq!(once.messages().len(), 1);
        assert_eq!(once.messages()[0].role, Role::System);
        assert_eq!(once.turns(), 0);

        let mut empty = MessageStore::new();
        empty.append(vec![ChatMessage::user("hi")]).unwrap();
        assert!(empty.reset().messages().is_empty());
        assert!(empty.reset().messages().is_empty());
    }

    #[test]
    fn test_set_preamble_applies_on_reset() {
        let mut store = MessageStore::new();
        store.set_preamble(Some("now is 12:00".to_string()));
        assert!(store.is_empty());

        store.reset();
        assert_eq!(store.last().map(|m| m.content.as_str()), Some("now is 12:00"));
    }
}
