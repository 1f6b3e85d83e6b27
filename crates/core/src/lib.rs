//! # Switchboard Core
//!
//! Domain types, traits, and error definitions for the switchboard agent runner.
//! This crate holds **no scheduling logic**. It defines the item model and the
//! collaborator contracts (model, tool, guardrail) the runner drives.
//!
//! ## Design Philosophy
//!
//! Every collaborator is a trait here. Implementations are supplied by the
//! embedding application (or by test doubles), so the runner can be exercised
//! without any network access.

pub mod agent;
pub mod context;
pub mod conversation;
pub mod error;
pub mod event;
pub mod guardrail;
pub mod item;
pub mod model;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{Agent, FinalOutput, Handoff, OutputType, ToolUseBehavior};
pub use context::RunContext;
pub use conversation::ConversationMemory;
pub use error::{Error, GuardrailError, ModelError, Result, ToolError};
pub use event::{EventBus, LifecycleEvent};
pub use guardrail::{GuardrailOutput, GuardrailResult, InputGuardrail, OutputGuardrail};
pub use item::{
    AgentInputItem, ApprovalDecision, ApprovalKind, ApprovalRequest, HandoffCall, HandoffResult,
    ToolCall, ToolResult,
};
pub use model::{
    HandoffDefinition, Model, ModelEventReceiver, ModelRequest, ModelResponse, ModelSettings,
    ModelStreamEvent, ToolDefinition, Usage,
};
pub use tool::Tool;
