use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry of the replay log handed to the next agent invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptItem {
    Message {
        role: Role,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
    },
    ToolCall {
        agent: String,
        call_id: String,
        name: String,
        arguments: Value,
    },
    ToolOutput {
        agent: String,
        call_id: String,
        output: String,
    },
    Handoff {
        source: String,
        target: String,
    },
}

impl TranscriptItem {
    pub fn user(content: impl Into<String>) -> Self {
        Self::Message { role: Role::User, content: content.into(), agent: None }
    }

    pub fn assistant(agent: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Message { role: Role::Assistant, content: content.into(), agent: Some(agent.into()) }
    }
}

/// Text of the most recent user message.
///
/// Falls back to a JSON rendering of the whole transcript when no user message exists.
pub fn latest_user_text(transcript: &[TranscriptItem]) -> String {
    let latest = transcript.iter().rev().find_map(|item| match item {
        TranscriptItem::Message { role: Role::User, content, .. } => Some(content.clone()),
        _ => None,
    });

    match latest {
        Some(text) => text,
        None => serde_json::to_string(transcript).unwrap_or_else(|_| format!("{transcript:?}")),
    }
}
