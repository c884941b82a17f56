use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::context::SharedContext;
use crate::domain::event::{Event, PublicMessage};
use crate::domain::guardrail::GuardrailCheckResult;
use crate::domain::transcript::TranscriptItem;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RoundOutcome {
    Completed,
    GuardrailRejected,
    InternalError { message: String },
}

/// Immutable record of one committed round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: u64,
    pub agent: String,
    pub trace_id: String,
    pub input_items: Vec<TranscriptItem>,
    pub events: Vec<Event>,
    pub messages: Vec<PublicMessage>,
    pub guardrails: Vec<GuardrailCheckResult>,
    pub outcome: RoundOutcome,
    #[serde(default)]
    pub anomalies: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Durable state of one customer conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: Option<String>,
    pub title: Option<String>,
    pub active_agent: String,
    pub round_counter: u64,
    pub transcript: Vec<TranscriptItem>,
    pub context: SharedContext,
    pub rounds: BTreeMap<u64, RoundRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, active_agent: impl Into<String>, context: SharedContext) -> Self {
        let now = Utc::now();
        let user_id = context.user_id.map(|id| id.to_string());
        Self {
            id,
            user_id,
            title: None,
            active_agent: active_agent.into(),
            round_counter: 0,
            transcript: Vec::new(),
            context,
            rounds: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Appends a finished round and advances the round counter.
    pub fn commit_round(&mut self, record: RoundRecord) -> Result<(), DomainError> {
        if self.rounds.contains_key(&record.round) {
            return Err(DomainError::RoundAlreadyCommitted { round: record.round });
        }
        if record.round != self.round_counter {
            return Err(DomainError::RoundOutOfOrder {
                expected: self.round_counter,
                actual: record.round,
            });
        }

        self.rounds.insert(record.round, record);
        self.round_counter += 1;
        if self.user_id.is_none() {
            self.user_id = self.context.user_id.map(|id| id.to_string());
        }
        if self.title.is_none() {
            self.title = self.context.confirmation_number.as_ref().map(|c| format!("Booking {c}"));
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn display_title(&self) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        if let Some(confirmation) = &self.context.confirmation_number {
            return format!("Booking {confirmation}");
        }
        let prefix: String = self.id.0.chars().take(8).collect();
        format!("Session {prefix}")
    }

    pub fn latest_round(&self) -> Option<&RoundRecord> {
        self.rounds.values().next_back()
    }

    pub fn is_consistent(&self) -> bool {
        self.round_counter == self.rounds.len() as u64
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            title: self.display_title(),
            user_id: self.user_id.clone(),
            active_agent: self.active_agent.clone(),
            round_counter: self.round_counter,
            updated_at: self.updated_at,
        }
    }
}

/// Listing row for operator views, most recently updated first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub title: String,
    pub user_id: Option<String>,
    pub active_agent: String,
    pub round_counter: u64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{RoundOutcome, RoundRecord, Session, SessionId};
    use crate::domain::context::SharedContext;
    use crate::errors::DomainError;

    fn record(round: u64) -> RoundRecord {
        RoundRecord {
            round,
            agent: "Triage Agent".to_string(),
            trace_id: format!("trace-{round}"),
            input_items: Vec::new(),
            events: Vec::new(),
            messages: Vec::new(),
            guardrails: Vec::new(),
            outcome: RoundOutcome::Completed,
            anomalies: Vec::new(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn commit_round_advances_counter_in_order() {
        let mut session =
            Session::new(SessionId("s-1".to_string()), "Triage Agent", SharedContext::default());

        session.commit_round(record(0)).expect("round 0");
        session.commit_round(record(1)).expect("round 1");

        assert_eq!(session.round_counter, 2);
        assert!(session.is_consistent());
        assert_eq!(session.latest_round().map(|r| r.trace_id.as_str()), Some("trace-1"));
    }

    #[test]
    fn committing_the_same_round_twice_is_rejected() {
        let mut session =
            Session::new(SessionId("s-2".to_string()), "Triage Agent", SharedContext::default());
        session.commit_round(record(0)).expect("round 0");

        let error = session.commit_round(record(0)).expect_err("duplicate round");
        assert_eq!(error, DomainError::RoundAlreadyCommitted { round: 0 });
        assert_eq!(session.rounds[&0].trace_id, "trace-0");
        assert!(session.is_consistent());
    }

    #[test]
    fn out_of_order_round_is_rejected() {
        let mut session =
            Session::new(SessionId("s-3".to_string()), "Triage Agent", SharedContext::default());

        let error = session.commit_round(record(2)).expect_err("gap");
        assert_eq!(error, DomainError::RoundOutOfOrder { expected: 0, actual: 2 });
        assert_eq!(session.round_counter, 0);
    }

    #[test]
    fn title_is_derived_from_confirmation_or_id_prefix() {
        let mut session = Session::new(
            SessionId("abcdef0123456789".to_string()),
            "Triage Agent",
            SharedContext::default(),
        );
        assert_eq!(session.display_title(), "Session abcdef01");

        session.context.confirmation_number = Some("QX12AB".to_string());
        session.commit_round(record(0)).expect("round 0");
        assert_eq!(session.title.as_deref(), Some("Booking QX12AB"));
        assert_eq!(session.display_title(), "Booking QX12AB");
    }
}
