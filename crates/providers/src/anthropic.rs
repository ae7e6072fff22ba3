//! Anthropic Messages API adapter.
//!
//! - `x-api-key` header authentication
//! - System prompt as a top-level field
//! - Tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via SSE, decoded by [`SseDecoder`]

use async_trait::async_trait;
use futures::StreamExt;
use salesdesk_core::error::ProviderError;
use salesdesk_core::message::{Message, MessageToolCall, Role};
use salesdesk_core::provider::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

pub struct AnthropicProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(ProviderError::NotConfigured("missing Anthropic API key".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key,
            client,
        })
    }

    /// Point at a proxy or a test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Anthropic carries the system prompt outside the message list.
    fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let (system, rest): (Vec<&Message>, Vec<&Message>) =
            messages.iter().partition(|m| m.role == Role::System);

        let system = if system.is_empty() {
            None
        } else {
            Some(
                system
                    .iter()
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n"),
            )
        };

        (system, rest)
    }

    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .filter_map(|msg| match msg.role {
                Role::User => Some(AnthropicMessage {
                    role: "user",
                    content: AnthropicContent::Text(msg.content.clone()),
                }),
                Role::Assistant if msg.tool_calls.is_empty() => Some(AnthropicMessage {
                    role: "assistant",
                    content: AnthropicContent::Text(msg.content.clone()),
                }),
                Role::Assistant => {
                    let mut blocks = Vec::with_capacity(msg.tool_calls.len() + 1);
                    if !msg.content.is_empty() {
                        blocks.push(ContentBlock::Text {
                            text: msg.content.clone(),
                        });
                    }
                    blocks.extend(msg.tool_calls.iter().map(|tc| ContentBlock::ToolUse {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        input: serde_json::from_str(&tc.arguments)
                            .unwrap_or_else(|_| serde_json::json!({})),
                    }));
                    Some(AnthropicMessage {
                        role: "assistant",
                        content: AnthropicContent::Blocks(blocks),
                    })
                }
                Role::Tool => Some(AnthropicMessage {
                    role: "user",
                    content: AnthropicContent::Blocks(vec![ContentBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.content.clone(),
                    }]),
                }),
                Role::System => None,
            })
            .collect()
    }

    fn build_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let (system, messages) = Self::extract_system(&request.messages);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&messages),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
        });

        if stream {
            body["stream"] = serde_json::json!(true);
        }
        if let Some(system) = system {
            body["system"] = serde_json::json!(system);
        }
        if !request.tools.is_empty() {
            let tools: Vec<AnthropicTool> = request
                .tools
                .iter()
                .map(|t| AnthropicTool {
                    name: &t.name,
                    description: &t.description,
                    input_schema: &t.parameters,
                })
                .collect();
            body["tools"] = serde_json::json!(tools);
        }

        body
    }

    async fn send(
        &self,
        body: &serde_json::Value,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body);
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        match response.status().as_u16() {
            200 => Ok(response),
            429 => Err(ProviderError::RateLimited {
                retry_after_secs: response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
            }),
            401 | 403 => Err(ProviderError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            )),
            status => {
                let message = response.text().await.unwrap_or_default();
                warn!(status, body = %message, "Anthropic API error");
                Err(ProviderError::ApiError {
                    status_code: status,
                    message,
                })
            }
        }
    }

    fn to_provider_response(resp: AnthropicResponse) -> ProviderResponse {
        let mut content = String::new();
        let mut tool_calls = Vec::new();

        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text } => content.push_str(&text),
                ResponseContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(MessageToolCall {
                        id,
                        name,
                        arguments: input.to_string(),
                    })
                }
                ResponseContentBlock::Other => {}
            }
        }

        let mut message = Message::assistant(content);
        message.id = resp.id;
        message.tool_calls = tool_calls;

        ProviderResponse {
            message,
            usage: Some(Usage {
                prompt_tokens: resp.usage.input_tokens,
                completion_tokens: resp.usage.output_tokens,
                total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
            }),
            model: resp.model,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let body = Self::build_body(&request, false);
        debug!(provider = "anthropic", model = %request.model, "Sending completion request");

        let response = self.send(&body, false).await?;
        let api_resp: AnthropicResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse Anthropic response: {e}"),
            })?;

        Ok(Self::to_provider_response(api_resp))
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let body = Self::build_body(&request, true);
        debug!(provider = "anthropic", model = %request.model, tools = request.tools.len(), "Sending streaming request");

        let response = self.send(&body, true).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            while let Some(next) = bytes.next().await {
                let chunk = match next {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for item in decoder.push(&chunk) {
                    let stop = item.is_err() || item.as_ref().is_ok_and(|c| c.done);
                    if tx.send(item).await.is_err() || stop {
                        return;
                    }
                }
            }

            for item in decoder.end_of_body() {
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}

#[derive(Default)]
struct PendingTool {
    id: String,
    name: String,
    arguments: String,
}

/// Incremental decoder for the Messages API event stream.
///
/// Bytes are buffered until a full line is available so multi-byte UTF-8
/// sequences split across network chunks decode correctly. Text deltas are
/// yielded immediately; tool calls are assembled and delivered on the final
/// `done` chunk.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    pending: Option<PendingTool>,
    tool_calls: Vec<MessageToolCall>,
    usage: Option<Usage>,
}

impl SseDecoder {
    /// Feed raw bytes; returns the chunks that became complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<StreamChunk, ProviderError>> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if let Some(data) = line.strip_prefix("data:") {
                if let Some(item) = self.on_data(data.trim()) {
                    let done = item.as_ref().map(|c| c.done).unwrap_or(true);
                    out.push(item);
                    if done {
                        break;
                    }
                }
            }
            // `event:` lines repeat the `type` field of the data line; comments
            // and blank separators carry nothing.
        }

        out
    }

    /// The body closed. A last line with no trailing newline still counts;
    /// a body that never reached `message_stop` is an interrupted stream.
    pub fn end_of_body(&mut self) -> Vec<Result<StreamChunk, ProviderError>> {
        let mut out = self.push(b"\n");
        let completed = out.iter().any(|c| c.as_ref().map(|c| c.done).unwrap_or(true));
        if !completed {
            out.push(Err(ProviderError::StreamInterrupted(
                "stream ended before message_stop".into(),
            )));
        }
        out
    }

    /// Close out the stream, flushing any half-assembled tool call.
    pub fn finish(&mut self) -> StreamChunk {
        self.close_tool();
        StreamChunk {
            content: None,
            tool_calls: std::mem::take(&mut self.tool_calls),
            done: true,
            usage: self.usage.take(),
        }
    }

    fn close_tool(&mut self) {
        if let Some(tool) = self.pending.take() {
            self.tool_calls.push(MessageToolCall {
                id: tool.id,
                name: tool.name,
                arguments: if tool.arguments.is_empty() {
                    "{}".into()
                } else {
                    tool.arguments
                },
            });
        }
    }

    fn on_data(&mut self, data: &str) -> Option<Result<StreamChunk, ProviderError>> {
        if data.is_empty() {
            return None;
        }
        let event: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, data = %data, "Ignoring unparseable SSE data");
                return None;
            }
        };

        match event["type"].as_str().unwrap_or_default() {
            "message_start" => {
                let input = event["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
                self.usage = Some(Usage {
                    prompt_tokens: input,
                    completion_tokens: 0,
                    total_tokens: input,
                });
                None
            }
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    self.close_tool();
                    self.pending = Some(PendingTool {
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        arguments: String::new(),
                    });
                }
                None
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or_default() {
                    "text_delta" => delta["text"]
                        .as_str()
                        .filter(|t| !t.is_empty())
                        .map(|t| Ok(StreamChunk::text(t))),
                    "input_json_delta" => {
                        if let (Some(tool), Some(partial)) =
                            (self.pending.as_mut(), delta["partial_json"].as_str())
                        {
                            tool.arguments.push_str(partial);
                        }
                        None
                    }
                    _ => None,
                }
            }
            "content_block_stop" => {
                self.close_tool();
                None
            }
            "message_delta" => {
                if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                    let usage = self.usage.get_or_insert(Usage {
                        prompt_tokens: 0,
                        completion_tokens: 0,
                        total_tokens: 0,
                    });
                    usage.completion_tokens = out as u32;
                    usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;
                }
                None
            }
            "message_stop" => Some(Ok(self.finish())),
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string();
                Some(Err(ProviderError::StreamInterrupted(message)))
            }
            _ => None,
        }
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: AnthropicContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
