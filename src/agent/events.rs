//! Step-event emission for the streaming agent variant. Events are serialized and totally ordered
//! within one request — the executor invokes the callback from a single logical task, so no
//! interleaving can occur.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Thinking,
    Planning,
    Executing,
    Error,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEvent {
    pub step: u32,
    pub status: StepStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub timestamp: i64,
}

impl StepEvent {
    pub fn new(step: u32, status: StepStatus, message: impl Into<String>) -> Self {
        Self { step, status, message: message.into(), plan: None, details: None, timestamp: chrono::Utc::now().timestamp() }
    }

    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Some(plan.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A sink the executor pushes ordered [`StepEvent`]s into. An `mpsc` sender backs the SSE
/// streaming HTTP handler; a no-op sink backs the non-streaming `/agent` endpoint.
pub type StepEventSender = tokio::sync::mpsc::UnboundedSender<StepEvent>;
