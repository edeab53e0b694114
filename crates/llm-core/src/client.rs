//! OpenAI-compatible chat completions client

use std::collections::BTreeMap;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use crate::config::ModelConfig;
use crate::error::{LlmError, Result};
use crate::message::{ChatMessage, Role, ToolCall, ToolDefinition};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    temperature: f32,
    top_p: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: Role,
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

impl<'a> From<&'a ChatMessage> for RequestMessage<'a> {
    fn from(msg: &'a ChatMessage) -> Self {
        Self {
            role: msg.role,
            content: &msg.content,
            tool_calls: msg
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    call_type: "function".to_string(),
                    function: WireFunction {
                        name: call.function.name.clone(),
                        arguments: call.arguments_text(),
                    },
                })
                .collect(),
            tool_call_id: msg.tool_call_id.as_deref(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunction,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Debug, Deserialize)]
struct DeltaToolCall {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<DeltaFunction>,
}

#[derive(Debug, Deserialize)]
struct DeltaFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Tool call assembled from streamed fragments
#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates streamed deltas into one assistant message
#[derive(Debug, Default)]
struct StreamAccumulator {
    content: String,
    tool_calls: BTreeMap<usize, PartialToolCall>,
}

impl StreamAccumulator {
    fn push(&mut self, chunk: StreamChunk) {
        for choice in chunk.choices {
            let Some(delta) = choice.delta else { continue };
            if let Some(text) = delta.content {
                self.content.push_str(&text);
            }
            for fragment in delta.tool_calls.unwrap_or_default() {
                let partial = self.tool_calls.entry(fragment.index).or_default();
                if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
                    partial.id = id;
                }
                if let Some(function) = fragment.function {
                    if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                        if partial.name.is_empty() {
                            partial.name = name;
                        }
                    }
                    if let Some(args) = function.arguments {
                        partial.arguments.push_str(&args);
                    }
                }
            }
        }
    }

    fn finish(self) -> ChatMessage {
        let tool_calls = self
            .tool_calls
            .into_values()
            .map(|p| tool_call_from_parts(p.id, p.name, &p.arguments))
            .collect();
        ChatMessage::assistant_with_tools(self.content, tool_calls)
    }
}

fn tool_call_from_parts(id: String, name: String, arguments: &str) -> ToolCall {
    let id = if id.is_empty() {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    } else {
        id
    };
    ToolCall::new(id, name, ToolCall::parse_arguments(arguments))
}

/// Chat completions client
#[derive(Debug, Clone)]
pub struct ChatClient {
    config: ModelConfig,
    client: reqwest::Client,
}

impl ChatClient {
    /// Create a new client using the configured timeout
    pub fn new(config: ModelConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LlmError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Send the conversation and return the assistant's reply
    #[instrument(skip(self, messages, tools), fields(model = %self.config.name, messages = messages.len()))]
    pub async fn chat(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Result<ChatMessage> {
        let request = ChatRequest {
            model: &self.config.name,
            messages: messages.iter().map(RequestMessage::from).collect(),
            tools: if tools.is_empty() { None } else { Some(tools) },
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            stream: self.config.streaming,
        };

        debug!(streaming = self.config.streaming, tools = tools.len(), "Sending chat request");
        let response = self
            .client
            .post(self.config.completions_url())
            .bearer_auth(self.config.api_key.expose())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Chat request failed");
            return Err(LlmError::from_status(status, body));
        }

        let message = if self.config.streaming {
            collect_stream(response).await?
        } else {
            let body: ChatResponse = response.json().await?;
            let choice = body
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| LlmError::Parse("No choices in response".to_string()))?;
            let tool_calls = choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|c| tool_call_from_parts(c.id, c.function.name, &c.function.arguments))
                .collect();
            ChatMessage::assistant_with_tools(choice.message.content.unwrap_or_default(), tool_calls)
        };

        debug!(
            content_len = message.content.len(),
            tool_calls = message.tool_calls.len(),
            "Received assistant message"
        );
        Ok(message)
    }
}

async fn collect_stream(response: reqwest::Response) -> Result<ChatMessage> {
    let mut acc = StreamAccumulator::default();
    let mut received = false;
    let events = sse_chunks(response.bytes_stream());
    futures::pin_mut!(events);

    while let Some(chunk) = events.next().await {
        let chunk = chunk?;
        received |= !chunk.choices.is_empty();
        acc.push(chunk);
    }

    if !received {
        return Err(LlmError::Parse("Empty stream: no choices received".to_string()));
    }
    Ok(acc.finish())
}

/// Longest excerpt of a non-event body kept for the error message
const STRAY_EXCERPT: usize = 200;

enum SseLine {
    Chunk(StreamChunk),
    Done,
    /// Text outside the event-stream framing
    Stray(String),
    Skip,
}

fn parse_sse_line(raw: &[u8]) -> Result<SseLine> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        let framing = line.is_empty()
            || line.starts_with(':')
            || ["event:", "id:", "retry:"].iter().any(|f| line.starts_with(f));
        return Ok(if framing { SseLine::Skip } else { SseLine::Stray(line.to_string()) });
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }
    trace!(data, "SSE chunk");
    serde_json::from_str(data)
        .map(SseLine::Chunk)
        .map_err(|e| LlmError::Parse(format!("Bad stream chunk: {}", e)))
}

/// Decode `data:` lines of a server-sent-event body
fn sse_chunks<S>(body: S) -> impl Stream<Item = Result<StreamChunk>>
where
    S: Stream<Item = reqwest::Result<Bytes>>,
{
    async_stream::try_stream! {
        futures::pin_mut!(body);
        let mut buffer: Vec<u8> = Vec::new();
        let mut stray = String::new();
        let mut yielded = false;
        let mut done = false;
        let mut ended = false;

        while !done {
            let line: Vec<u8> = match buffer.iter().position(|b| *b == b'\n') {
                Some(pos) => buffer.drain(..=pos).collect(),
                None if ended => {
                    if buffer.is_empty() {
                        break;
                    }
                    std::mem::take(&mut buffer)
                }
                None => {
                    match body.next().await {
                        Some(bytes) => buffer.extend_from_slice(&bytes?),
                        None => ended = true,
                    }
                    continue;
                }
            };

            match parse_sse_line(&line)? {
                SseLine::Chunk(chunk) => {
                    yielded = true;
                    yield chunk;
                }
                SseLine::Done => done = true,
                SseLine::Stray(text) => {
                    if stray.len() < STRAY_EXCERPT {
                        if !stray.is_empty() {
                            stray.push(' ');
                        }
                        stray.extend(text.chars().take(STRAY_EXCERPT));
                    }
                }
                SseLine::Skip => {}
            }
        }

        if !yielded && !stray.is_empty() {
            Err::<(), _>(LlmError::Parse(format!("Response is not an event stream: {}", stray)))?;
        }
        if !done {
            debug!("Stream ended without [DONE] marker");
        }
    }
}
