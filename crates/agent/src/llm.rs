use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use airloop_core::domain::context::SharedContext;
use airloop_core::domain::transcript::TranscriptItem;
use airloop_core::registry::AgentSpec;

use crate::tools::{ToolError, ToolScope};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub model: String,
    pub max_turns: u32,
    pub trace_id: String,
    pub session_id: String,
}

/// One item of agent output, in the order the agent produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message { agent: String, content: String },
    ToolCall { agent: String, call_id: String, name: String, arguments: Value },
    ToolOutput { agent: String, call_id: String, output: String },
    Handoff { source: String, target: String },
}

impl OutputItem {
    pub fn to_transcript_item(&self) -> TranscriptItem {
        match self {
            Self::Message { agent, content } => TranscriptItem::assistant(agent, content),
            Self::ToolCall { agent, call_id, name, arguments } => TranscriptItem::ToolCall {
                agent: agent.clone(),
                call_id: call_id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            },
            Self::ToolOutput { agent, call_id, output } => TranscriptItem::ToolOutput {
                agent: agent.clone(),
                call_id: call_id.clone(),
                output: output.clone(),
            },
            Self::Handoff { source, target } => {
                TranscriptItem::Handoff { source: source.clone(), target: target.clone() }
            }
        }
    }
}

/// Everything one agent invocation may read. The context is a copy: changes only
/// take effect through the returned [`AgentRun`].
#[derive(Clone)]
pub struct AgentRequest {
    pub agent: AgentSpec,
    pub transcript: Vec<TranscriptItem>,
    pub context: SharedContext,
    pub run_config: RunConfig,
    pub tools: ToolScope,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AgentRun {
    pub items: Vec<OutputItem>,
    /// Input transcript extended with the bookkeeping of this run.
    pub transcript: Vec<TranscriptItem>,
    pub context: SharedContext,
}

impl AgentRun {
    /// Builds the canonical transcript by appending `items` to the request transcript.
    pub fn from_items(
        transcript: Vec<TranscriptItem>,
        items: Vec<OutputItem>,
        context: SharedContext,
    ) -> Self {
        let mut transcript = transcript;
        transcript.extend(items.iter().map(OutputItem::to_transcript_item));
        Self { items, transcript, context }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent backend failed: {0}")]
    Backend(String),
    #[error("tool call failed: {0}")]
    Tool(#[from] ToolError),
    #[error("agent exceeded {0} turns")]
    MaxTurnsExceeded(u32),
}

/// The conversational backend that runs one agent over the transcript.
#[async_trait]
pub trait AgentCapability: Send + Sync {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentRun, AgentError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use airloop_core::domain::context::SharedContext;
    use airloop_core::domain::transcript::TranscriptItem;

    use super::{AgentRun, OutputItem};

    #[test]
    fn run_transcript_appends_items_in_emission_order() {
        let items = vec![
            OutputItem::ToolCall {
                agent: "FAQ Agent".to_string(),
                call_id: "call-1".to_string(),
                name: "faq_lookup_tool".to_string(),
                arguments: json!({"question": "wifi"}),
            },
            OutputItem::ToolOutput {
                agent: "FAQ Agent".to_string(),
                call_id: "call-1".to_string(),
                output: "join Airline-Wifi".to_string(),
            },
            OutputItem::Message {
                agent: "FAQ Agent".to_string(),
                content: "Join Airline-Wifi.".to_string(),
            },
        ];

        let run = AgentRun::from_items(
            vec![TranscriptItem::user("wifi?")],
            items,
            SharedContext::default(),
        );

        assert_eq!(run.transcript.len(), 4);
        assert!(matches!(run.transcript[1], TranscriptItem::ToolCall { .. }));
        assert_eq!(run.transcript[3], TranscriptItem::assistant("FAQ Agent", "Join Airline-Wifi."));
    }
}
