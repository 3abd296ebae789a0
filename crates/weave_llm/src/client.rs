//! A streaming chat client for the local Ollama-compatible LLM endpoint.

use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::LlmError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A single message in a chat transcript, in the shape the endpoint expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// A function-calling tool definition, advertised to the model on every request.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolFunction {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// The single tool Weave's agent prompt is allowed to call: it asks the server to update the
/// pending generation settings and optionally kick off an image generation.
pub fn update_generation_tool() -> ToolDefinition {
    ToolDefinition {
        kind: "function",
        function: ToolFunction {
            name: "update_generation",
            description: "Update the pending image generation prompt and parameters, optionally triggering generation.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "prompt": {"type": "string"},
                    "steps": {"type": "integer"},
                    "cfg": {"type": "number"},
                    "seed": {"type": "integer"},
                    "generate_image": {"type": "boolean"},
                },
                "required": [],
            }),
        },
    }
}

/// A decoded call to `update_generation`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

/// The outcome of a (possibly streamed) chat turn.
#[derive(Debug, Clone)]
pub struct ChatResult {
    /// The assistant's natural-language reply, with any tool-call JSON stripped.
    pub response: String,
    /// Whether the model invoked a tool this turn.
    pub has_tool_call: bool,
    /// The decoded tool call, if any.
    pub tool_call: Option<ToolCall>,
    /// The endpoint's final metadata chunk (timings, token counts), if it sent one.
    pub metadata: Value,
    /// The raw, unparsed concatenation of every streamed chunk, kept for logging/debugging.
    pub raw_response: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: &'a [ToolDefinition],
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    seed: i64,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(flatten)]
    metadata: Value,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<RawToolCall>,
}

#[derive(Debug, Deserialize)]
struct RawToolCall {
    function: RawToolFunctionCall,
}

#[derive(Debug, Deserialize)]
struct RawToolFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// A thin client over the local chat endpoint's streaming NDJSON API.
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
}

impl LlmClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        LlmClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Streams a chat completion, accumulating content and surfacing the first tool call
    /// encountered. `on_token` is invoked with each chunk of freshly streamed content; returning
    /// `Err` from it (the caller's SSE write failed) aborts the stream immediately. Returns early
    /// with [`LlmError::Cancelled`] if `cancel` fires mid-stream.
    pub async fn chat(
        &self,
        model: &str,
        seed: i64,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        mut on_token: impl FnMut(&str) -> Result<(), LlmError>,
        cancel: &CancellationToken,
    ) -> Result<ChatResult, LlmError> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model,
            messages,
            stream: true,
            options: ChatOptions { seed },
            tools,
        };

        let response = tokio::time::timeout(
            DEFAULT_TIMEOUT,
            self.http.post(&url).json(&request).send(),
        )
        .await
        .map_err(|_| LlmError::Timeout(DEFAULT_TIMEOUT))?
        .map_err(|source| LlmError::Unreachable {
            url: url.clone(),
            source,
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::NotAvailable { status, body });
        }

        let mut response_text = String::new();
        let mut raw_response = String::new();
        let mut tool_call = None;
        let mut metadata = Value::Null;
        let mut buffer = String::new();

        let mut byte_stream = response.bytes_stream();
        loop {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                next = byte_stream.next() => next,
            };

            let Some(chunk) = chunk else { break };
            let bytes = chunk.map_err(|e| LlmError::MalformedJson(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline_pos) = buffer.find('\n') {
                let line = buffer[..newline_pos].trim().to_owned();
                buffer.drain(..=newline_pos);
                if line.is_empty() {
                    continue;
                }
                raw_response.push_str(&line);
                raw_response.push('\n');

                let parsed: ChatChunk = match serde_json::from_str(&line) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(error = %e, line, "skipping malformed chat chunk");
                        continue;
                    }
                };

                if let Some(message) = parsed.message {
                    if !message.content.is_empty() {
                        on_token(&message.content)?;
                    }
                    response_text.push_str(&message.content);
                    if let Some(first_call) = message.tool_calls.into_iter().next() {
                        if tool_call.is_none() {
                            tool_call = Some(ToolCall {
                                name: first_call.function.name,
                                arguments: first_call.function.arguments,
                            });
                        }
                    }
                }
                if parsed.done {
                    metadata = parsed.metadata;
                }
            }
        }

        debug!(model, chars = response_text.len(), "chat completion finished");

        Ok(ChatResult {
            response: response_text,
            has_tool_call: tool_call.is_some(),
            tool_call,
            metadata,
            raw_response,
        })
    }

    /// Checks whether the endpoint is reachable at all, used for the `/ready` probe.
    pub async fn is_reachable(&self) -> bool {
        match self.http.get(format!("{}/api/tags", self.base_url.trim_end_matches('/'))).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "llm endpoint reachability check failed");
                false
            }
        }
    }
}
