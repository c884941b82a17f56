//! Agent runtime for the airline customer-service conversation.
//!
//! One customer message is one round:
//! 1. **Gating** (`guardrails`) - the active agent's guardrails classify the message
//! 2. **Invoking** (`llm`) - the agent capability runs with its declared tools (`tools`)
//! 3. **Classifying** (`classify`) - output items become events and public messages
//! 4. **Transitioning** - the last handoff moves the active agent through the handoff machine
//! 5. **Committing** - a round record is appended and the session is saved
//!
//! `runtime::ConversationRuntime` drives the round; `conversation::KeywordAgent` is
//! the deterministic offline backend used when no model is wired in.
//!
//! # Failure policy
//!
//! Guardrail rejections and internal errors both answer with an ordinary assistant
//! message and still commit a round. Only persistence failures reach the caller.

pub mod classify;
pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod runtime;
pub mod tools;

pub use conversation::KeywordAgent;
pub use guardrails::{GuardrailCheck, GuardrailEvaluator, GuardrailLedger};
pub use llm::{AgentCapability, AgentError, AgentRequest, AgentRun, OutputItem, RunConfig};
pub use runtime::{ConversationRuntime, Feedback, RuntimeSettings, TurnRequest, TurnResponse};
pub use tools::{Tool, ToolError, ToolRegistry};
