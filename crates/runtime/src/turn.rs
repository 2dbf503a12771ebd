//! The agent turn loop: assemble context, call the responder, route
//! tool calls, detect handoffs, apply guardrails, loop until a final
//! answer or the turn budget runs out.
//!
//! One turn = one LLM round trip. The loop is single-threaded and
//! cooperative: cancellation is observed before the LLM call, after
//! it, and before each tool execution.

use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use casc_domain::cancel::CancelToken;
use casc_domain::error::{Error, ExecutionPhase, GuardrailViolation, Result};
use casc_domain::event::{ErrorInfo, EventContext, EventSink, NoopSink, TelemetryEvent};
use casc_domain::message::{Content, Message, Role};
use casc_domain::request::ResponsesRequest;
use casc_domain::response::{ModelResponse, Usage};
use casc_domain::stream::ResponseEvent;
use casc_domain::tool::ToolCall;
use casc_domain::trace::Session;
use casc_responder::Responder;

use crate::agent::{handoff_context, Agent, AgentId, AgentPool, ContextTransfer};
use crate::guardrails::run_guardrails;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run surface
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything one run needs, passed explicitly rather than looked up
/// from globals.
#[derive(Clone)]
pub struct RunContext {
    pub session: Session,
    pub responder: Arc<Responder>,
    pub sink: Arc<dyn EventSink>,
    pub cancel: CancelToken,
}

impl RunContext {
    pub fn new(responder: Arc<Responder>, session: Session) -> Self {
        Self {
            session,
            responder,
            sink: Arc::new(NoopSink),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

/// Terminal result of an agent run.
#[derive(Debug, Clone)]
pub struct AgentResult {
    /// Agent that produced the final answer (the handoff target when a
    /// handoff occurred).
    pub agent: String,
    pub status: RunStatus,
    pub output_text: String,
    /// Structured output, when the agent requested one.
    pub parsed: Option<Value>,
    pub turns_completed: u32,
    pub usage: Usage,
    pub last_response_id: Option<String>,
}

/// Events emitted on the streaming surface of a run.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Forwarded verbatim from the responder stream, wire order.
    TextDelta { delta: String },
    ToolCallStarted {
        call_id: String,
        name: String,
        arguments: String,
    },
    ToolCallFinished {
        call_id: String,
        name: String,
        output: String,
        is_error: bool,
    },
    Handoff { from: String, to: String },
    Completed { result: AgentResult },
    Failed {
        phase: ExecutionPhase,
        message: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drives agents from a shared pool.
#[derive(Clone)]
pub struct AgentRuntime {
    pool: Arc<AgentPool>,
}

impl AgentRuntime {
    pub fn new(pool: AgentPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &AgentPool {
        &self.pool
    }

    /// Run an agent to completion and await the final result.
    pub async fn run(&self, id: AgentId, input: &str, ctx: &RunContext) -> Result<AgentResult> {
        self.run_inner(id, input, ctx, None).await
    }

    /// Run an agent, streaming [`AgentEvent`]s as they happen. Text
    /// deltas are forwarded unmodified from the responder; tool events
    /// only occur between turns.
    pub fn run_streaming(
        &self,
        id: AgentId,
        input: impl Into<String>,
        ctx: RunContext,
    ) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel::<AgentEvent>(64);
        let runtime = self.clone();
        let input = input.into();
        tokio::spawn(async move {
            match runtime.run_inner(id, &input, &ctx, Some(&tx)).await {
                Ok(result) => {
                    let _ = tx.send(AgentEvent::Completed { result }).await;
                }
                Err(err) => {
                    let phase = match &err {
                        Error::AgentExecution { phase, .. } => *phase,
                        _ => ExecutionPhase::LlmCall,
                    };
                    let _ = tx
                        .send(AgentEvent::Failed {
                            phase,
                            message: err.to_string(),
                        })
                        .await;
                }
            }
        });
        rx
    }

    // ── The loop ──────────────────────────────────────────────────

    async fn run_inner(
        &self,
        id: AgentId,
        input: &str,
        ctx: &RunContext,
        events: Option<&mpsc::Sender<AgentEvent>>,
    ) -> Result<AgentResult> {
        let mut current = id;
        let mut messages: Vec<Message> = vec![Message::user(input)];

        // A successful handoff ends the current agent's loop and starts
        // the target's with its own turn budget, so handoffs iterate
        // here instead of recursing.
        'agents: loop {
            let agent = self.pool.get(current).ok_or_else(|| Error::Configuration(
                format!("agent id {} is not in the pool", current.0),
            ))?;
            let mut turns: u32 = 0;
            let mut usage = Usage::default();
            let mut last_response_id: Option<String> = None;

            loop {
                if ctx.cancel.is_cancelled() {
                    return Ok(cancelled(agent, turns, usage, last_response_id));
                }

                // Input guardrails see the latest textual message.
                if let Some(text) = latest_text(&messages) {
                    run_guardrails(&agent.input_guardrails, GuardrailViolation::Input, text)
                        .map_err(|e| {
                            self.fail(ctx, agent, ExecutionPhase::InputGuardrail, turns, e)
                        })?;
                }

                let request = build_request(agent, &messages)
                    .map_err(|e| self.fail(ctx, agent, ExecutionPhase::LlmCall, turns, e))?;

                let response = match self.call_model(&request, ctx, events).await {
                    Ok(Some(response)) => response,
                    Ok(None) => {
                        return Ok(cancelled(agent, turns, usage, last_response_id));
                    }
                    Err(e) => {
                        return Err(self.fail(ctx, agent, ExecutionPhase::LlmCall, turns, e));
                    }
                };

                turns += 1;
                usage.accumulate(&response.usage);
                last_response_id = Some(response.id.clone());

                if turns > agent.max_turns {
                    let message = format!(
                        "exceeded max turns ({}); last response {}",
                        agent.max_turns,
                        last_response_id.as_deref().unwrap_or("<none>"),
                    );
                    return Err(self.fail(
                        ctx,
                        agent,
                        ExecutionPhase::MaxTurnsExceeded,
                        turns,
                        Error::AgentExecution {
                            phase: ExecutionPhase::MaxTurnsExceeded,
                            turns_completed: turns,
                            message,
                        },
                    ));
                }

                if ctx.cancel.is_cancelled() {
                    return Ok(cancelled(agent, turns, usage, last_response_id));
                }

                let calls = response.tool_calls();
                if !calls.is_empty() {
                    // Handoff wins over ordinary tool calls.
                    if let Some((call, handoff)) = calls
                        .iter()
                        .find_map(|c| agent.find_handoff(&c.name).map(|h| (c, h)))
                    {
                        let target = self.pool.get(handoff.target).ok_or_else(|| {
                            self.fail(
                                ctx,
                                agent,
                                ExecutionPhase::Handoff,
                                turns,
                                Error::Configuration(format!(
                                    "handoff tool '{}' points at a missing agent",
                                    call.name
                                )),
                            )
                        })?;
                        tracing::debug!(
                            from = %agent.name,
                            to = %target.name,
                            tool = %call.name,
                            "agent handoff"
                        );
                        if let Some(tx) = events {
                            let _ = tx
                                .send(AgentEvent::Handoff {
                                    from: agent.name.clone(),
                                    to: target.name.clone(),
                                })
                                .await;
                        }
                        messages = transfer_messages(&messages, handoff.transfer, call);
                        current = handoff.target;
                        continue 'agents;
                    }

                    messages.push(assistant_call_message(&response, &calls));
                    self.execute_calls(agent, &calls, &mut messages, ctx, events, turns)
                        .await?;
                    if ctx.cancel.is_cancelled() {
                        return Ok(cancelled(agent, turns, usage, last_response_id));
                    }
                    continue;
                }

                // Final answer: output guardrails, then return. The
                // structured value was parsed by the responder.
                let text = response.output_text();
                run_guardrails(&agent.output_guardrails, GuardrailViolation::Output, &text)
                    .map_err(|e| {
                        self.fail(ctx, agent, ExecutionPhase::OutputGuardrail, turns, e)
                    })?;

                let parsed = response
                    .first_assistant_message()
                    .and_then(|m| m.parsed.clone());

                return Ok(AgentResult {
                    agent: agent.name.clone(),
                    status: RunStatus::Completed,
                    output_text: text,
                    parsed,
                    turns_completed: turns,
                    usage,
                    last_response_id,
                });
            }
        }
    }

    /// One LLM round trip. In streaming mode deltas are forwarded and
    /// the final assembled response is returned; `Ok(None)` means the
    /// stream was cancelled before completion.
    async fn call_model(
        &self,
        request: &ResponsesRequest,
        ctx: &RunContext,
        events: Option<&mpsc::Sender<AgentEvent>>,
    ) -> Result<Option<ModelResponse>> {
        let Some(tx) = events else {
            return ctx
                .responder
                .respond(request, &ctx.session)
                .await
                .map(Some);
        };

        let mut stream = ctx
            .responder
            .respond_stream(request, &ctx.session, ctx.cancel.clone())
            .await?;

        let mut completed = None;
        while let Some(event) = stream.next().await {
            match event? {
                ResponseEvent::TextDelta { delta } => {
                    let _ = tx.send(AgentEvent::TextDelta { delta }).await;
                }
                ResponseEvent::ToolCall { .. } => {
                    // Tool calls are routed from the final response so
                    // stream consumers only see deltas for the talking
                    // portions.
                }
                ResponseEvent::Completed { response } => {
                    completed = Some(response);
                }
            }
        }
        Ok(completed)
    }

    /// Execute the turn's tool calls and append call + output messages.
    /// Sequential by default; parallel (order-preserving) when the
    /// agent opted in.
    async fn execute_calls(
        &self,
        agent: &Agent,
        calls: &[ToolCall],
        messages: &mut Vec<Message>,
        ctx: &RunContext,
        events: Option<&mpsc::Sender<AgentEvent>>,
        turns: u32,
    ) -> Result<()> {
        if agent.parallel_tool_calls && calls.len() > 1 {
            if let Some(tx) = events {
                for call in calls {
                    let _ = tx
                        .send(AgentEvent::ToolCallStarted {
                            call_id: call.call_id.clone(),
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        })
                        .await;
                }
            }
            let outputs = join_all(calls.iter().map(|c| agent.registry.execute(c))).await;
            for (call, outcome) in calls.iter().zip(outputs) {
                let output = outcome
                    .map_err(|e| self.fail(ctx, agent, ExecutionPhase::ToolExecution, turns, e))?;
                if let Some(tx) = events {
                    let _ = tx
                        .send(AgentEvent::ToolCallFinished {
                            call_id: call.call_id.clone(),
                            name: call.name.clone(),
                            output: output.output.clone(),
                            is_error: output.is_error,
                        })
                        .await;
                }
                messages.push(Message::tool_output(&call.call_id, &output.output));
            }
            return Ok(());
        }

        for call in calls {
            if ctx.cancel.is_cancelled() {
                // Completed tools keep their side effects; the caller
                // sees the cancelled status from the main loop.
                return Ok(());
            }
            if let Some(tx) = events {
                let _ = tx
                    .send(AgentEvent::ToolCallStarted {
                        call_id: call.call_id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    })
                    .await;
            }
            let output = agent
                .registry
                .execute(call)
                .await
                .map_err(|e| self.fail(ctx, agent, ExecutionPhase::ToolExecution, turns, e))?;
            if let Some(tx) = events {
                let _ = tx
                    .send(AgentEvent::ToolCallFinished {
                        call_id: call.call_id.clone(),
                        name: call.name.clone(),
                        output: output.output.clone(),
                        is_error: output.is_error,
                    })
                    .await;
            }
            messages.push(Message::tool_output(&call.call_id, &output.output));
        }
        Ok(())
    }

    /// Wrap a failure with the agent phase and emit `AgentFailed`.
    /// Failures that already carry agent context (e.g. a parsing
    /// failure from the responder) keep their phase.
    fn fail(
        &self,
        ctx: &RunContext,
        agent: &Agent,
        default_phase: ExecutionPhase,
        turns: u32,
        source: Error,
    ) -> Error {
        let (phase, message) = match &source {
            Error::AgentExecution { phase, message, .. } => (*phase, message.clone()),
            other => (default_phase, other.to_string()),
        };

        let span = ctx.session.trace.child();
        ctx.sink.emit(TelemetryEvent::AgentFailed {
            context: EventContext::new(&ctx.session.session_id, &span).finish(),
            agent: agent.name.clone(),
            phase,
            turns_completed: turns,
            error: ErrorInfo::from_error(&source),
        });

        Error::AgentExecution {
            phase,
            turns_completed: turns,
            message,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn cancelled(
    agent: &Agent,
    turns: u32,
    usage: Usage,
    last_response_id: Option<String>,
) -> AgentResult {
    AgentResult {
        agent: agent.name.clone(),
        status: RunStatus::Cancelled,
        output_text: String::new(),
        parsed: None,
        turns_completed: turns,
        usage,
        last_response_id,
    }
}

fn latest_text(messages: &[Message]) -> Option<&str> {
    let text = messages.last()?.text()?;
    (!text.is_empty()).then_some(text)
}

fn build_request(agent: &Agent, messages: &[Message]) -> Result<ResponsesRequest> {
    let mut builder = ResponsesRequest::builder(&agent.model)
        .instructions(agent.effective_instructions())
        .input(messages.to_vec())
        .tools(agent.tool_specs());
    if let Some(temperature) = agent.temperature {
        builder = builder.temperature(temperature);
    }
    if let Some(top_p) = agent.top_p {
        builder = builder.top_p(top_p);
    }
    if let Some(max) = agent.max_output_tokens {
        builder = builder.max_output_tokens(max);
    }
    if let Some(ref schema) = agent.output_schema {
        builder = builder.output_schema(schema.clone());
    }
    builder.build()
}

/// The assistant message that carried this turn's tool calls, kept in
/// the history so the model can correlate call ids with outputs.
fn assistant_call_message(response: &ModelResponse, calls: &[ToolCall]) -> Message {
    let mut content: Vec<Content> = Vec::new();
    let text = response.output_text();
    if !text.is_empty() {
        content.push(Content::text(text));
    }
    for call in calls {
        content.push(Content::ToolCall {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        });
    }
    Message {
        role: Role::Assistant,
        content,
        id: Some(response.id.clone()),
        parsed: None,
    }
}

/// Build the message history the handoff target starts from, per the
/// handoff's declared transfer contract. Non-empty handoff arguments
/// are appended as an extra user message.
fn transfer_messages(
    messages: &[Message],
    transfer: ContextTransfer,
    call: &ToolCall,
) -> Vec<Message> {
    let mut transferred = match transfer {
        ContextTransfer::FullConversation => messages.to_vec(),
        ContextTransfer::LastUserMessage => messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User && m.text().is_some())
            .cloned()
            .map(|m| vec![m])
            .unwrap_or_default(),
    };
    if let Some(context) = handoff_context(&call.arguments) {
        transferred.push(Message::user(format!("Handoff context: {context}")));
    }
    transferred
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
