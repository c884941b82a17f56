use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Typed unit of agent output, kept in emission order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub agent: String,
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Message { content: String },
    ToolCall { name: String, arguments: Value },
    ToolOutput { output: String },
    Handoff { source: String, target: String },
}

impl Event {
    pub fn new(agent: impl Into<String>, kind: EventKind) -> Self {
        Self { id: Uuid::new_v4().simple().to_string(), agent: agent.into(), kind, timestamp: Utc::now() }
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            EventKind::Message { .. } => "message",
            EventKind::ToolCall { .. } => "tool_call",
            EventKind::ToolOutput { .. } => "tool_output",
            EventKind::Handoff { .. } => "handoff",
        }
    }

    pub fn handoff_target(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Handoff { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// Reply surfaced to the caller, tagged with the emitting agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicMessage {
    pub content: String,
    pub agent: String,
}

#[cfg(test)]
mod tests {
    use super::{Event, EventKind};

    #[test]
    fn event_serializes_with_flattened_type_tag() {
        let event = Event::new(
            "Triage Agent",
            EventKind::Handoff {
                source: "Triage Agent".to_string(),
                target: "Cancellation Agent".to_string(),
            },
        );

        let value = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(value["type"], "handoff");
        assert_eq!(value["agent"], "Triage Agent");
        assert_eq!(value["target"], "Cancellation Agent");
        assert_eq!(event.type_name(), "handoff");
        assert_eq!(event.handoff_target(), Some("Cancellation Agent"));
    }
}
