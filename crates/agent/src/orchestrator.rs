//! The bounded model/tool step loop.
//!
//! One exchange is a single user turn run against the model for at most
//! `max_steps` round trips. Each step streams text, and if the model asks
//! for tools they are dispatched to the exchange's registry and their
//! results fed into the next step. The loop is spawned on its own task and
//! stops as soon as the event receiver is dropped or the wall-clock budget
//! runs out.

use salesdesk_config::AppConfig;
use salesdesk_core::message::{Message, MessageToolCall};
use salesdesk_core::provider::{Provider, ProviderRequest, Usage};
use salesdesk_core::tool::{ToolCall, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::stream_event::{ExchangeEvent, ExchangeStatus};

/// The two model-facing inputs of an exchange.
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    pub system_prompt: String,
    pub user_turn: String,
}

/// Drives exchanges against one provider.
#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_steps: usize,
    timeout: Duration,
    event_buffer: usize,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            max_steps: 8,
            timeout: Duration::from_secs(120),
            event_buffer: 1,
        }
    }

    pub fn from_config(provider: Arc<dyn Provider>, config: &AppConfig) -> Self {
        Self::new(provider, config.model.clone())
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
            .with_max_steps(config.orchestrator.max_steps)
            .with_timeout(config.orchestrator.exchange_timeout())
            .with_event_buffer(config.orchestrator.frame_buffer)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Events buffered ahead of the consumer. Kept small so a slow reader
    /// throttles the model rather than piling up text in memory.
    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer.max(1);
        self
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Wall-clock budget for one exchange.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Start an exchange. The returned receiver yields deltas and tool
    /// activity, then exactly one `Done` or `Error` event, then closes.
    ///
    /// Dropping the receiver cancels the exchange: no further model or tool
    /// steps are issued.
    pub fn run_exchange(
        &self,
        request: ExchangeRequest,
        tools: ToolRegistry,
    ) -> mpsc::Receiver<ExchangeEvent> {
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let run = ExchangeRun {
            provider: Arc::clone(&self.provider),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            max_steps: self.max_steps,
            tools,
        };
        let budget = self.timeout;

        tokio::spawn(async move {
            tokio::select! {
                _ = tx.closed() => {
                    info!("Exchange receiver dropped, cancelling");
                }
                outcome = tokio::time::timeout(budget, run.drive(request, &tx)) => {
                    if outcome.is_err() {
                        warn!(timeout_secs = budget.as_secs(), "Exchange timed out");
                        let _ = tx
                            .send(ExchangeEvent::Error {
                                message: "exchange timed out".into(),
                            })
                            .await;
                    }
                }
            }
        });

        rx
    }
}

/// Everything one spawned exchange needs, moved into its task.
struct ExchangeRun {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_steps: usize,
    tools: ToolRegistry,
}

/// Receiver went away; stop quietly.
struct Disconnected;

impl ExchangeRun {
    async fn drive(self, request: ExchangeRequest, tx: &mpsc::Sender<ExchangeEvent>) {
        if let Err(Disconnected) = self.steps(request, tx).await {
            debug!("Exchange consumer disconnected mid-step");
        }
    }

    async fn steps(
        &self,
        request: ExchangeRequest,
        tx: &mpsc::Sender<ExchangeEvent>,
    ) -> Result<(), Disconnected> {
        let tool_defs = self.tools.definitions();
        let mut messages = vec![
            Message::system(request.system_prompt),
            Message::user(request.user_turn),
        ];
        let mut total_tool_calls = 0usize;
        let mut last_usage: Option<Usage> = None;

        for step in 1..=self.max_steps {
            let provider_request = ProviderRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: tool_defs.clone(),
                stream: true,
            };

            let mut stream_rx = match self.provider.stream(provider_request).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!(step, error = %e, "Model call failed");
                    return emit(
                        tx,
                        ExchangeEvent::Error {
                            message: format!("Provider error: {e}"),
                        },
                    )
                    .await;
                }
            };

            let mut step_text = String::new();
            let mut requested: Vec<MessageToolCall> = Vec::new();

            while let Some(chunk) = stream_rx.recv().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(step, error = %e, "Model stream failed");
                        return emit(
                            tx,
                            ExchangeEvent::Error {
                                message: format!("Stream error: {e}"),
                            },
                        )
                        .await;
                    }
                };

                if let Some(text) = chunk.content
                    && !text.is_empty()
                {
                    step_text.push_str(&text);
                    emit(tx, ExchangeEvent::Delta { content: text }).await?;
                }

                for tc in chunk.tool_calls {
                    if let Some(existing) = requested.iter_mut().find(|t| t.id == tc.id) {
                        existing.arguments.push_str(&tc.arguments);
                    } else {
                        requested.push(tc);
                    }
                }

                if chunk.usage.is_some() {
                    last_usage = chunk.usage;
                }
                if chunk.done {
                    break;
                }
            }

            if requested.is_empty() {
                debug!(step, tool_calls = total_tool_calls, "Exchange completed");
                return emit(
                    tx,
                    ExchangeEvent::Done {
                        status: ExchangeStatus::Completed,
                        steps: step,
                        tool_calls_made: total_tool_calls,
                        usage: last_usage,
                    },
                )
                .await;
            }

            let mut assistant = Message::assistant(step_text);
            assistant.tool_calls = requested.clone();
            messages.push(assistant);

            for tc in &requested {
                total_tool_calls += 1;
                let arguments: serde_json::Value =
                    serde_json::from_str(&tc.arguments).unwrap_or_default();

                emit(
                    tx,
                    ExchangeEvent::ToolCall {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        input: arguments.clone(),
                    },
                )
                .await?;

                let call = ToolCall {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    arguments,
                };
                let (output, success) = match self.tools.execute(&call).await {
                    Ok(result) => (result.output, result.success),
                    Err(e) => {
                        warn!(step, tool = %tc.name, error = %e, "Tool call failed");
                        (format!("Error: {e}"), false)
                    }
                };
                debug!(step, tool = %tc.name, success, "Tool call finished");

                messages.push(Message::tool_result(&tc.id, output));
                emit(
                    tx,
                    ExchangeEvent::ToolResult {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        success,
                    },
                )
                .await?;
            }
        }

        warn!(
            max_steps = self.max_steps,
            tool_calls = total_tool_calls,
            "Step cap reached, ending exchange with partial text"
        );
        emit(
            tx,
            ExchangeEvent::Done {
                status: ExchangeStatus::StepCapReached,
                steps: self.max_steps,
                tool_calls_made: total_tool_calls,
                usage: last_usage,
            },
        )
        .await
    }
}

async fn emit(tx: &mpsc::Sender<ExchangeEvent>, event: ExchangeEvent) -> Result<(), Disconnected> {
    tx.send(event).await.map_err(|_| Disconnected)
}
