//! Agent Executor (C6): drives the ReAct loop or the simple loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::events::{StepEvent, StepEventSender, StepStatus};
use crate::agent::trace::{AgentResult, AgentState, ExecutionTraceEntry, ReasoningStep};
use crate::collaborators::Collaborators;
use crate::config::AppConfig;
use crate::dispatcher::StreamDispatcher;
use crate::error::{AppError, AppResult};
use crate::message::{ChatResponse, Content, ContentPart, FinishReason, ImageUrl, Message, ToolDefinition};
use crate::quota::QuotaGate;
use crate::tool_registry::{SideChannel, ToolRegistry, ToolsConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct AgentRequest {
    pub prompt: String,
    pub user_id: String,
    pub model_name: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub enable_memory: bool,
    #[serde(default)]
    pub enable_reflection: bool,
    #[serde(default = "default_true")]
    pub enable_react_mode: bool,
    #[serde(default)]
    pub enable_mcp: bool,
    #[serde(default)]
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub reflection_threshold: Option<u32>,
    #[serde(default)]
    pub tools_config: Option<ToolsConfigRequest>,
    #[serde(default)]
    pub system_prompt_override: Option<String>,
    #[serde(default)]
    pub context: HashMap<String, String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub audio: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsConfigRequest {
    #[serde(default)]
    pub search: bool,
    #[serde(default)]
    pub advanced: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentErrorResponse {
    pub success: bool,
    pub error: String,
}

pub struct AgentExecutor {
    dispatcher: Arc<StreamDispatcher>,
    tool_registry: Arc<ToolRegistry>,
    quota: Arc<dyn QuotaGate>,
    collaborators: Arc<dyn Collaborators>,
    config: Arc<AppConfig>,
    quota_limit_per_day: u32,
}

struct RunState {
    messages: Vec<Message>,
    trace: Vec<ExecutionTraceEntry>,
    reasoning_steps: Vec<ReasoningStep>,
    tools_used: Vec<String>,
    steps_taken: u32,
    side_channel: SideChannel,
}

impl AgentExecutor {
    pub fn new(
        dispatcher: Arc<StreamDispatcher>,
        tool_registry: Arc<ToolRegistry>,
        quota: Arc<dyn QuotaGate>,
        collaborators: Arc<dyn Collaborators>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self { dispatcher, tool_registry, quota, collaborators, config, quota_limit_per_day: 1000 }
    }

    pub async fn run(&self, request: AgentRequest) -> AgentResult {
        self.run_with_events(request, None).await
    }

    pub async fn run_streaming(&self, request: AgentRequest, sender: StepEventSender) -> AgentResult {
        self.run_with_events(request, Some(sender)).await
    }

    async fn run_with_events(&self, request: AgentRequest, events: Option<StepEventSender>) -> AgentResult {
        let started = Instant::now();
        let interaction_id = uuid::Uuid::new_v4().to_string();
        let max_steps = request.max_steps.unwrap_or(self.config.default_max_steps);
        let reflection_threshold = request.reflection_threshold.unwrap_or(self.config.default_reflection_threshold);

        let mut state = RunState {
            messages: self.build_initial_messages(&request).await,
            trace: vec![ExecutionTraceEntry::new(AgentState::Idle, "init")],
            reasoning_steps: Vec::new(),
            tools_used: Vec::new(),
            steps_taken: 0,
            side_channel: SideChannel::new(),
        };
        emit(&events, StepEvent::new(0, StepStatus::Thinking, "starting"));

        let tools_config = ToolsConfig {
            search: request.tools_config.as_ref().map(|t| t.search).unwrap_or(false),
            advanced: request.tools_config.as_ref().map(|t| t.advanced).unwrap_or(false),
            mcp: request.enable_mcp,
            image_generation: true,
        };
        let tool_definitions = self.tool_registry.tool_definitions(&tools_config).await;

        let outcome = if request.enable_react_mode {
            self.run_react(&request, &mut state, &tool_definitions, max_steps, reflection_threshold, &events).await
        } else {
            self.run_simple(&request, &mut state, &tool_definitions, &events).await
        };

        if request.enable_memory {
            let collaborators = self.collaborators.clone();
            let user_id = request.user_id.clone();
            let prompt = request.prompt.clone();
            tokio::spawn(async move {
                collaborators.update_memory(&user_id, &prompt).await;
            });
        }

        let execution_time_sec = started.elapsed().as_secs_f64();
        let result = match outcome {
            Ok(response_text) => {
                state.trace.push(ExecutionTraceEntry::new(AgentState::Responding, "final"));
                emit(&events, StepEvent::new(state.steps_taken, StepStatus::Done, "done"));
                AgentResult {
                    success: true,
                    interaction_id: interaction_id.clone(),
                    response: response_text,
                    execution_trace: state.trace,
                    reasoning_steps: state.reasoning_steps,
                    tools_used: state.tools_used,
                    steps_taken: state.steps_taken,
                    execution_time_sec,
                    generated_image: state.side_channel.take_image(),
                }
            }
            Err(e) => {
                state.trace.push(ExecutionTraceEntry::new(AgentState::Error, e.to_string()));
                emit(&events, StepEvent::new(state.steps_taken, StepStatus::Error, e.to_string()));
                AgentResult {
                    success: false,
                    interaction_id: interaction_id.clone(),
                    response: String::new(),
                    execution_trace: state.trace,
                    reasoning_steps: state.reasoning_steps,
                    tools_used: state.tools_used,
                    steps_taken: state.steps_taken,
                    execution_time_sec,
                    generated_image: None,
                }
            }
        };

        let collaborators = self.collaborators.clone();
        let user_id = request.user_id.clone();
        let model = request.model_name.clone();
        let prompt = request.prompt.clone();
        let reply = result.response.clone();
        let log_interaction_id = interaction_id.clone();
        tokio::spawn(async move {
            collaborators.persist_chat_log(&user_id, &model, &prompt, &reply, &log_interaction_id).await;
        });

        result
    }

    async fn build_initial_messages(&self, request: &AgentRequest) -> Vec<Message> {
        let system_prompt = request.system_prompt_override.clone().unwrap_or_else(|| self.select_prompt(request));
        let mut messages = vec![Message::system(system_prompt)];

        if request.enable_memory {
            let memory = self.collaborators.get_memory(&request.user_id).await;
            if !memory.is_empty() {
                messages.push(Message::system(format!("Known context about this user: {}", memory)));
            }
        }
        for (key, value) in &request.context {
            messages.push(Message::system(format!("{}: {}", key, value)));
        }

        let mut parts = vec![ContentPart::Text { text: request.prompt.clone() }];
        if let Some(image) = &request.image {
            parts.push(ContentPart::ImageUrl { image_url: ImageUrl { url: image.clone() } });
        }
        if let Some(audio) = &request.audio {
            parts.push(ContentPart::Audio { url: audio.clone() });
        }
        let user_content = if parts.len() == 1 {
            Content::as_text(request.prompt.clone())
        } else {
            Content::Parts(parts)
        };
        messages.push(Message { role: crate::message::Role::User, content: user_content, tool_calls: Vec::new(), tool_call_id: None, name: None });
        messages
    }

    /// Mode-selection matrix: four configured templates chosen by
    /// `(enable_react_mode, enable_mcp)`.
    fn select_prompt(&self, request: &AgentRequest) -> String {
        match (request.enable_react_mode, request.enable_mcp) {
            (true, true) => self.config.prompts.react_mcp.clone(),
            (true, false) => self.config.prompts.react_planning.clone(),
            (false, true) => self.config.prompts.simple_mcp.clone(),
            (false, false) => self.config.prompts.simple.clone(),
        }
    }

    /// ReAct loop: planning, then a bounded execution loop with optional periodic reflection,
    /// then a summary path if the step budget is exhausted. Spec.md §4.6.1.
    async fn run_react(
        &self,
        request: &AgentRequest,
        state: &mut RunState,
        tools: &[ToolDefinition],
        max_steps: u32,
        reflection_threshold: u32,
        events: &Option<StepEventSender>,
    ) -> AppResult<String> {
        state.trace.push(ExecutionTraceEntry::new(AgentState::Planning, "plan"));
        emit(events, StepEvent::new(0, StepStatus::Planning, "planning"));
        state.messages.push(Message::user(self.config.prompts.react_planning.clone()));
        let planning_response = self.call_with_retry(request, &state.messages, None, events, 0).await?;
        let plan_text = planning_response.message.content.flatten_to_text();
        state.messages.push(Message::assistant(plan_text.clone()));
        state.reasoning_steps.push(ReasoningStep::thought(plan_text.clone()));

        state.trace.push(ExecutionTraceEntry::new(AgentState::Executing, "start"));

        loop {
            if state.steps_taken >= max_steps {
                break;
            }
            state.steps_taken += 1;
            emit(
                events,
                StepEvent::new(state.steps_taken, StepStatus::Executing, "executing").with_plan(plan_text.clone()),
            );

            let response = self.call_with_retry(request, &state.messages, Some(tools), events, state.steps_taken).await?;

            if response.finish_reason == Some(FinishReason::ToolCalls) && !response.message.tool_calls.is_empty() {
                state.messages.push(response.message.clone());
                state.trace.push(ExecutionTraceEntry::new(AgentState::Observing, "tool_round"));

                let results = self.tool_registry.dispatch(&response.message.tool_calls, &state.side_channel).await;
                for (call, result) in response.message.tool_calls.iter().zip(results.iter()) {
                    state.tools_used.push(call.name.clone());
                    state.reasoning_steps.push(ReasoningStep::action(
                        format!("called {}", call.name),
                        call.name.clone(),
                        call.arguments_value(),
                        serde_json::from_str(&result.content).unwrap_or(Value::Null),
                    ));
                    state.messages.push(Message::tool_result(result));
                }

                if request.enable_reflection && reflection_threshold > 0 && state.steps_taken % reflection_threshold == 0 {
                    state.trace.push(ExecutionTraceEntry::new(AgentState::Reflecting, "reflect"));
                    emit(events, StepEvent::new(state.steps_taken, StepStatus::Thinking, "reflecting"));
                    state.messages.push(Message::user(self.config.prompts.reflection.clone()));
                    let reflection = self.call_with_retry(request, &state.messages, None, events, state.steps_taken).await?;
                    let reflection_text = reflection.message.content.flatten_to_text();
                    state.messages.push(Message::assistant(reflection_text.clone()));
                    state.reasoning_steps.push(ReasoningStep::reflection(reflection_text));
                    state.trace.push(ExecutionTraceEntry::new(AgentState::Executing, "resume"));
                }
                continue;
            }

            let terminal_text = self.promote_terminal_text(response.message.content.flatten_to_text(), state);
            return Ok(terminal_text);
        }

        state.trace.push(ExecutionTraceEntry::new(AgentState::Responding, "summary"));
        state.messages.push(Message::user(self.config.prompts.summary.clone()));
        let summary = self.call_with_retry(request, &state.messages, None, events, state.steps_taken).await?;
        Ok(summary.message.content.flatten_to_text())
    }

    /// Simple loop: at most one round of tool calls. Spec.md §4.6.2.
    async fn run_simple(
        &self,
        request: &AgentRequest,
        state: &mut RunState,
        tools: &[ToolDefinition],
        events: &Option<StepEventSender>,
    ) -> AppResult<String> {
        state.trace.push(ExecutionTraceEntry::new(AgentState::Executing, "start"));
        emit(events, StepEvent::new(0, StepStatus::Executing, "executing"));

        let response = self.call_with_retry(request, &state.messages, Some(tools), events, 0).await?;

        if response.finish_reason == Some(FinishReason::ToolCalls) && !response.message.tool_calls.is_empty() {
            state.steps_taken = 1;
            state.messages.push(response.message.clone());
            state.trace.push(ExecutionTraceEntry::new(AgentState::Observing, "tool_round"));

            let results = self.tool_registry.dispatch(&response.message.tool_calls, &state.side_channel).await;
            for (call, result) in response.message.tool_calls.iter().zip(results.iter()) {
                state.tools_used.push(call.name.clone());
                state.reasoning_steps.push(ReasoningStep::action(
                    format!("called {}", call.name),
                    call.name.clone(),
                    call.arguments_value(),
                    serde_json::from_str(&result.content).unwrap_or(Value::Null),
                ));
                state.messages.push(Message::tool_result(result));
            }

            let followup = self.call_with_retry(request, &state.messages, None, events, state.steps_taken).await?;
            return Ok(self.promote_terminal_text(followup.message.content.flatten_to_text(), state));
        }

        Ok(self.promote_terminal_text(response.message.content.flatten_to_text(), state))
    }

    /// Terminal fallback: promote a trailing `thought` into the terminal content when the
    /// model's own content came back empty.
    fn promote_terminal_text(&self, content: String, state: &RunState) -> String {
        if !content.is_empty() {
            return content;
        }
        state
            .reasoning_steps
            .iter()
            .rev()
            .find(|s| matches!(s.kind, crate::agent::trace::ReasoningStepType::Thought))
            .map(|s| s.content.clone())
            .unwrap_or_default()
    }

    /// Wraps one dispatcher call with the quota gate and the rate-limit retry policy: check quota,
    /// call, retry up to the configured limit on a 429-flavored error with a 60s backoff,
    /// emitting an `error`-status step event per retry.
    async fn call_with_retry(
        &self,
        request: &AgentRequest,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        events: &Option<StepEventSender>,
        step: u32,
    ) -> AppResult<ChatResponse> {
        self.quota.check(&request.user_id, &request.model_name, self.quota_limit_per_day).await?;

        let mut attempt = 0;
        loop {
            match self.dispatcher.complete(messages, &request.model_name, tools).await {
                Ok(response) => {
                    self.quota.record_success(&request.user_id, &request.model_name).await;
                    return Ok(response);
                }
                Err(e) if e.is_rate_limited() && attempt < self.config.max_rate_limit_retries => {
                    attempt += 1;
                    let retry_in = self.config.rate_limit_backoff_secs;
                    emit(
                        events,
                        StepEvent::new(step, StepStatus::Error, "rate limited, retrying")
                            .with_details(serde_json::json!({ "retry_in": retry_in, "attempt": attempt })),
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(retry_in)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn emit(events: &Option<StepEventSender>, event: StepEvent) {
    if let Some(sender) = events {
        let _ = sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NoopCollaborators;
    use crate::config::AppConfig;
    use crate::providers::ProviderRegistry;
    use crate::quota::InMemoryQuotaGate;

    fn test_config() -> AppConfig {
        std::env::set_var("OLLAMA_ENDPOINT", "http://localhost:11434");
        let config = AppConfig::from_env().unwrap();
        std::env::remove_var("OLLAMA_ENDPOINT");
        config
    }

    fn executor() -> AgentExecutor {
        let config = Arc::new(test_config());
        let registry = Arc::new(ProviderRegistry::from_config(&config));
        let dispatcher = Arc::new(StreamDispatcher::new(registry));
        let tool_registry = Arc::new(ToolRegistry::new(Vec::new(), None));
        let quota = Arc::new(InMemoryQuotaGate::new());
        let collaborators = Arc::new(NoopCollaborators::default());
        AgentExecutor::new(dispatcher, tool_registry, quota, collaborators, config)
    }

    #[test]
    fn prompt_selection_matrix_covers_all_four_modes() {
        let executor = executor();
        let mut request = AgentRequest {
            prompt: "hi".into(),
            user_id: "u".into(),
            model_name: "ollama/llama3".into(),
            session_id: None,
            enable_memory: false,
            enable_reflection: false,
            enable_react_mode: true,
            enable_mcp: false,
            max_steps: None,
            reflection_threshold: None,
            tools_config: None,
            system_prompt_override: None,
            context: HashMap::new(),
            image: None,
            audio: None,
        };
        assert_eq!(executor.select_prompt(&request), executor.config.prompts.react_planning);
        request.enable_mcp = true;
        assert_eq!(executor.select_prompt(&request), executor.config.prompts.react_mcp);
        request.enable_react_mode = false;
        assert_eq!(executor.select_prompt(&request), executor.config.prompts.simple_mcp);
        request.enable_mcp = false;
        assert_eq!(executor.select_prompt(&request), executor.config.prompts.simple);
    }

    #[test]
    fn promote_terminal_text_falls_back_to_last_thought_when_content_empty() {
        let executor = executor();
        let mut state = RunState {
            messages: Vec::new(),
            trace: Vec::new(),
            reasoning_steps: vec![ReasoningStep::thought("the plan worked out")],
            tools_used: Vec::new(),
            steps_taken: 0,
            side_channel: SideChannel::new(),
        };
        assert_eq!(executor.promote_terminal_text(String::new(), &state), "the plan worked out");
        state.reasoning_steps.clear();
        assert_eq!(executor.promote_terminal_text(String::new(), &state), "");
    }
}
