//! Execution trace and reasoning step data model, owned by the Agent Executor for the lifetime
//! of one request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Planning,
    Executing,
    Observing,
    Reflecting,
    Responding,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTraceEntry {
    pub timestamp: i64,
    pub state: AgentState,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ExecutionTraceEntry {
    pub fn new(state: AgentState, action: impl Into<String>) -> Self {
        Self { timestamp: chrono::Utc::now().timestamp(), state, action: action.into(), payload: None }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningStepType {
    Thought,
    Action,
    Observation,
    Reflection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    #[serde(rename = "type")]
    pub kind: ReasoningStepType,
    pub content: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ReasoningStep {
    pub fn thought(content: impl Into<String>) -> Self {
        Self { kind: ReasoningStepType::Thought, content: content.into(), timestamp: chrono::Utc::now().timestamp(), tool: None, args: None, result: None }
    }

    pub fn action(content: impl Into<String>, tool: impl Into<String>, args: Value, result: Value) -> Self {
        Self {
            kind: ReasoningStepType::Action,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp(),
            tool: Some(tool.into()),
            args: Some(args),
            result: Some(result),
        }
    }

    pub fn reflection(content: impl Into<String>) -> Self {
        Self { kind: ReasoningStepType::Reflection, content: content.into(), timestamp: chrono::Utc::now().timestamp(), tool: None, args: None, result: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    pub interaction_id: String,
    pub response: String,
    pub execution_trace: Vec<ExecutionTraceEntry>,
    pub reasoning_steps: Vec<ReasoningStep>,
    pub tools_used: Vec<String>,
    pub steps_taken: u32,
    pub execution_time_sec: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_image: Option<String>,
}
