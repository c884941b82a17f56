use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;

use airloop_core::domain::context::SharedContext;
use airloop_core::domain::session::{RoundRecord, Session, SessionId, SessionSummary};
use airloop_core::domain::transcript::TranscriptItem;

use super::{RepositoryError, SessionRepository};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn encode<T: serde::Serialize>(what: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Decode(format!("encode {what}: {e}")))
}

fn decode<T: serde::de::DeserializeOwned>(what: &str, raw: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(raw).map_err(|e| RepositoryError::Decode(format!("{what}: {e}")))
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let user_id: Option<String> =
        row.try_get("user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let title: Option<String> =
        row.try_get("title").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let active_agent: String =
        row.try_get("active_agent").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let round_counter: i64 =
        row.try_get("round_counter").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let transcript_json: String =
        row.try_get("transcript_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let context_json: String =
        row.try_get("context_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let round_counter = u64::try_from(round_counter)
        .map_err(|_| RepositoryError::Decode(format!("negative round_counter for `{id}`")))?;

    Ok(Session {
        id: SessionId(id),
        user_id,
        title,
        active_agent,
        round_counter,
        transcript: decode::<Vec<TranscriptItem>>("transcript_json", &transcript_json)?,
        context: decode::<SharedContext>("context_json", &context_json)?,
        rounds: BTreeMap::new(),
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn find(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, user_id, title, active_agent, round_counter, transcript_json,
                    context_json, created_at, updated_at
             FROM sessions WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut session = row_to_session(&row)?;

        let rounds = sqlx::query(
            "SELECT round, record_json FROM session_rounds WHERE session_id = ? ORDER BY round",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        for row in rounds {
            let raw: String =
                row.try_get("record_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
            let record: RoundRecord = decode("record_json", &raw)?;
            session.rounds.insert(record.round, record);
        }

        Ok(Some(session))
    }

    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        let transcript_json = encode("transcript", &session.transcript)?;
        let context_json = encode("context", &session.context)?;
        let round_counter = i64::try_from(session.round_counter)
            .map_err(|_| RepositoryError::Conflict("round counter overflow".to_string()))?;

        let mut tx = self.pool.begin().await?;

        let stored: Option<i64> =
            sqlx::query_scalar("SELECT round_counter FROM sessions WHERE id = ?")
                .bind(session.id.as_str())
                .fetch_optional(&mut *tx)
                .await?;
        let stored = stored.unwrap_or(0);
        if stored > round_counter {
            return Err(RepositoryError::Conflict(format!(
                "session `{}` is at round {stored}, refusing to write round counter {round_counter}",
                session.id
            )));
        }

        sqlx::query(
            "INSERT INTO sessions (id, user_id, title, active_agent, round_counter,
                                   transcript_json, context_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 user_id = excluded.user_id,
                 title = excluded.title,
                 active_agent = excluded.active_agent,
                 round_counter = excluded.round_counter,
                 transcript_json = excluded.transcript_json,
                 context_json = excluded.context_json,
                 updated_at = excluded.updated_at",
        )
        .bind(session.id.as_str())
        .bind(&session.user_id)
        .bind(&session.title)
        .bind(&session.active_agent)
        .bind(round_counter)
        .bind(&transcript_json)
        .bind(&context_json)
        .bind(timestamp(session.created_at))
        .bind(timestamp(session.updated_at))
        .execute(&mut *tx)
        .await?;

        let first_new = u64::try_from(stored).unwrap_or(0);
        for record in session.rounds.range(first_new..).map(|(_, record)| record) {
            let record_json = encode("round record", record)?;
            sqlx::query(
                "INSERT INTO session_rounds (session_id, round, trace_id, record_json, created_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(session_id, round) DO NOTHING",
            )
            .bind(session.id.as_str())
            .bind(record.round as i64)
            .bind(&record.trace_id)
            .bind(&record_json)
            .bind(timestamp(record.completed_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list(&self, limit: u32) -> Result<Vec<SessionSummary>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, user_id, title, active_agent, round_counter, transcript_json,
                    context_json, created_at, updated_at
             FROM sessions
             ORDER BY updated_at DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| row_to_session(row).map(|session| session.summary())).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use airloop_core::domain::context::SharedContext;
    use airloop_core::domain::event::{Event, EventKind, PublicMessage};
    use airloop_core::domain::guardrail::GuardrailCheckResult;
    use airloop_core::domain::session::{RoundOutcome, RoundRecord, Session, SessionId};
    use airloop_core::domain::transcript::TranscriptItem;

    use super::SqlSessionRepository;
    use crate::repositories::{RepositoryError, SessionRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn record(round: u64, trace_id: &str) -> RoundRecord {
        RoundRecord {
            round,
            agent: "Triage Agent".to_string(),
            trace_id: trace_id.to_string(),
            input_items: vec![TranscriptItem::user("I want to change my seat")],
            events: vec![Event::new(
                "Triage Agent",
                EventKind::Message { content: "Transferring you.".to_string() },
            )],
            messages: vec![PublicMessage {
                content: "Transferring you.".to_string(),
                agent: "Triage Agent".to_string(),
            }],
            guardrails: vec![GuardrailCheckResult::new(
                "Relevance Guardrail",
                "I want to change my seat",
                true,
                "airline topic",
            )],
            outcome: RoundOutcome::Completed,
            anomalies: Vec::new(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    fn session(id: &str) -> Session {
        Session::new(SessionId(id.to_string()), "Triage Agent", SharedContext::bootstrap(None))
    }

    #[tokio::test]
    async fn save_and_find_round_trips_session_with_rounds() {
        let repo = SqlSessionRepository::new(setup().await);
        let mut session = session("sess-1");
        session.transcript.push(TranscriptItem::user("I want to change my seat"));
        session.commit_round(record(0, "trace-0")).expect("commit");

        repo.save(&session).await.expect("save");
        let found = repo.find(&session.id).await.expect("find").expect("session exists");

        assert_eq!(found.round_counter, 1);
        assert_eq!(found.transcript, session.transcript);
        assert_eq!(found.context, session.context);
        assert_eq!(found.rounds[&0].trace_id, "trace-0");
        assert_eq!(found.rounds[&0].guardrails.len(), 1);
        assert!(found.is_consistent());
    }

    #[tokio::test]
    async fn missing_session_is_none() {
        let repo = SqlSessionRepository::new(setup().await);
        let found = repo.find(&SessionId("unknown".to_string())).await.expect("find");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn stored_rounds_are_never_rewritten() {
        let repo = SqlSessionRepository::new(setup().await);
        let mut session = session("sess-2");
        session.commit_round(record(0, "trace-original")).expect("commit");
        repo.save(&session).await.expect("first save");

        let mut tampered = session.clone();
        if let Some(round) = tampered.rounds.get_mut(&0) {
            round.trace_id = "trace-rewritten".to_string();
        }
        tampered.commit_round(record(1, "trace-1")).expect("commit round 1");
        repo.save(&tampered).await.expect("second save");

        let found = repo.find(&session.id).await.expect("find").expect("exists");
        assert_eq!(found.rounds[&0].trace_id, "trace-original");
        assert_eq!(found.rounds[&1].trace_id, "trace-1");
        assert_eq!(found.round_counter, 2);
    }

    #[tokio::test]
    async fn stale_save_is_a_conflict() {
        let repo = SqlSessionRepository::new(setup().await);
        let stale = session("sess-3");
        let mut fresh = stale.clone();
        fresh.commit_round(record(0, "trace-0")).expect("commit");
        repo.save(&fresh).await.expect("save fresh");

        let error = repo.save(&stale).await.expect_err("stale write");
        assert!(matches!(error, RepositoryError::Conflict(_)));

        let found = repo.find(&fresh.id).await.expect("find").expect("exists");
        assert_eq!(found.round_counter, 1);
    }

    #[tokio::test]
    async fn list_orders_by_recency_and_honours_limit() {
        let repo = SqlSessionRepository::new(setup().await);
        let now = Utc::now();
        for (index, id) in ["old", "middle", "new"].iter().enumerate() {
            let mut session = session(id);
            session.updated_at = now + Duration::seconds(index as i64);
            repo.save(&session).await.expect("save");
        }

        let listed = repo.list(2).await.expect("list");
        let ids: Vec<&str> = listed.iter().map(|summary| summary.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "middle"]);
        assert_eq!(listed[0].title, "Session new");
    }
}
