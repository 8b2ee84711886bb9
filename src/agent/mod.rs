//! The reasoning-action-reflection agent loop: state machine (`executor`), per-step event
//! stream (`events`), and the trace/result types returned to callers (`trace`).

pub mod events;
pub mod executor;
pub mod trace;

pub use events::{StepEvent, StepEventSender, StepStatus};
pub use executor::{AgentErrorResponse, AgentExecutor, AgentRequest, ToolsConfigRequest};
pub use trace::{AgentResult, AgentState, ExecutionTraceEntry, ReasoningStep, ReasoningStepType};
