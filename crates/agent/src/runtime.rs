use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use airloop_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use airloop_core::config::{AgentsConfig, AppConfig};
use airloop_core::domain::context::{BootstrapContext, SharedContext};
use airloop_core::domain::event::{Event, PublicMessage};
use airloop_core::domain::guardrail::GuardrailCheckResult;
use airloop_core::domain::session::{RoundOutcome, RoundRecord, Session, SessionId, SessionSummary};
use airloop_core::domain::transcript::TranscriptItem;
use airloop_core::errors::{ApplicationError, DomainError};
use airloop_core::handoff::HandoffMachine;
use airloop_core::registry::{AgentRole, AgentSummary, Registry};
use airloop_db::repositories::{BookingRepository, SessionRepository};

use crate::classify::classify;
use crate::conversation::KeywordAgent;
use crate::guardrails::{GuardrailEvaluator, GuardrailGate, GuardrailLedger};
use crate::llm::{AgentCapability, AgentRequest, AgentRun, RunConfig};
use crate::tools::{ToolRegistry, ToolScope};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub model: String,
    pub max_turns: u32,
    pub invoke_timeout: Duration,
    pub refusal_message: String,
    pub failure_message: String,
    /// Roles shown in the agent panel of every response; `None` shows every spoke.
    pub visible_roles: Option<Vec<AgentRole>>,
}

impl RuntimeSettings {
    pub fn from_config(config: &AgentsConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_turns: config.max_turns,
            invoke_timeout: Duration::from_secs(config.invoke_timeout_secs),
            refusal_message: config.refusal_message.clone(),
            failure_message: config.failure_message.clone(),
            visible_roles: None,
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default().agents)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub bootstrap: Option<BootstrapContext>,
}

impl TurnRequest {
    pub fn new(session_id: Option<String>, message: impl Into<String>) -> Self {
        Self { session_id, message: message.into(), bootstrap: None }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnResponse {
    pub session_id: SessionId,
    pub active_agent: String,
    pub round: u64,
    pub outcome: RoundOutcome,
    pub messages: Vec<PublicMessage>,
    pub events: Vec<Event>,
    pub context: SharedContext,
    pub guardrails: Vec<GuardrailCheckResult>,
    pub trace_id: String,
    pub agents: Vec<AgentSummary>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub trace_id: String,
    pub score: u8,
    #[serde(default)]
    pub comment: Option<String>,
}

/// One async lock per session id, dropped once no round holds it.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    pub fn lock_for(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = locks.get(session_id).and_then(Weak::upgrade) {
            return existing;
        }

        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        locks.insert(session_id.to_string(), Arc::downgrade(&lock));
        lock
    }

    pub fn live(&self) -> usize {
        let locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.values().filter(|lock| lock.strong_count() > 0).count()
    }
}

/// Committed sessions whose save failed, kept until a later round of the same
/// session stores them.
#[derive(Default)]
struct UnsavedSessions {
    sessions: Mutex<HashMap<String, Session>>,
}

impl UnsavedSessions {
    fn keep(&self, session: Session) {
        let mut sessions = match self.sessions.lock() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.insert(session.id.0.clone(), session);
    }

    fn take(&self, session_id: &str) -> Option<Session> {
        let mut sessions = match self.sessions.lock() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.remove(session_id)
    }

    fn len(&self) -> usize {
        match self.sessions.lock() {
            Ok(sessions) => sessions.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// Round-scoped facts shared by every terminal outcome.
struct RoundDraft {
    round: u64,
    agent: String,
    trace_id: String,
    input_items: Vec<TranscriptItem>,
    started_at: DateTime<Utc>,
    audit: AuditContext,
}

impl RoundDraft {
    fn into_record(
        self,
        events: Vec<Event>,
        messages: Vec<PublicMessage>,
        guardrails: Vec<GuardrailCheckResult>,
        outcome: RoundOutcome,
        anomalies: Vec<String>,
    ) -> (RoundRecord, AuditContext) {
        let record = RoundRecord {
            round: self.round,
            agent: self.agent,
            trace_id: self.trace_id,
            input_items: self.input_items,
            events,
            messages,
            guardrails,
            outcome,
            anomalies,
            started_at: self.started_at,
            completed_at: Utc::now(),
        };
        (record, self.audit)
    }
}

struct RuntimeInner {
    registry: Registry,
    machine: HandoffMachine,
    capability: Arc<dyn AgentCapability>,
    guardrails: GuardrailEvaluator,
    tools: Arc<ToolRegistry>,
    sessions: Arc<dyn SessionRepository>,
    audit: Arc<dyn AuditSink>,
    settings: RuntimeSettings,
    locks: SessionLocks,
    unsaved: UnsavedSessions,
}

/// Runs conversation rounds: gate, invoke, classify, transition, commit.
#[derive(Clone)]
pub struct ConversationRuntime {
    inner: Arc<RuntimeInner>,
}

impl ConversationRuntime {
    /// Fails when an agent declares a guardrail or tool nothing implements.
    pub fn new(
        registry: Registry,
        capability: Arc<dyn AgentCapability>,
        guardrails: GuardrailEvaluator,
        tools: ToolRegistry,
        sessions: Arc<dyn SessionRepository>,
        audit: Arc<dyn AuditSink>,
        settings: RuntimeSettings,
    ) -> Result<Self, ApplicationError> {
        registry.validate()?;
        let machine = HandoffMachine::from_registry(&registry)
            .map_err(|error| ApplicationError::Configuration(error.to_string()))?;

        for guardrail in registry.declared_guardrails() {
            if !guardrails.contains(&guardrail) {
                return Err(ApplicationError::Configuration(format!(
                    "guardrail `{guardrail}` is declared by an agent but no check is registered"
                )));
            }
        }
        for tool in registry.declared_tools() {
            if !tools.contains(&tool) {
                return Err(ApplicationError::Configuration(format!(
                    "tool `{tool}` is declared by an agent but not registered"
                )));
            }
        }

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                registry,
                machine,
                capability,
                guardrails,
                tools: Arc::new(tools),
                sessions,
                audit,
                settings,
                locks: SessionLocks::default(),
                unsaved: UnsavedSessions::default(),
            }),
        })
    }

    /// The airline deployment: default registry, keyword agent and guardrails,
    /// airline tools over `bookings`.
    pub fn airline_default(
        config: &AppConfig,
        bookings: Arc<dyn BookingRepository>,
        sessions: Arc<dyn SessionRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, ApplicationError> {
        let registry = Registry::airline_default()?;
        Self::new(
            registry.clone(),
            Arc::new(KeywordAgent::new(registry)),
            GuardrailEvaluator::airline_default(Duration::from_secs(
                config.agents.guardrail_timeout_secs,
            )),
            ToolRegistry::airline_default(bookings),
            sessions,
            audit,
            RuntimeSettings::from_config(&config.agents),
        )
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn agents(&self) -> Vec<AgentSummary> {
        self.inner.registry.list(self.inner.settings.visible_roles.as_deref())
    }

    pub async fn session(&self, id: &str) -> Result<Option<Session>, ApplicationError> {
        Ok(self.inner.sessions.find(&SessionId(id.to_string())).await?)
    }

    /// Number of sessions holding a committed round that is not stored yet.
    pub fn unsaved_sessions(&self) -> usize {
        self.inner.unsaved.len()
    }

    pub async fn list_sessions(&self, limit: u32) -> Result<Vec<SessionSummary>, ApplicationError> {
        Ok(self.inner.sessions.list(limit).await?)
    }

    /// Processes one customer message and commits exactly one round for it.
    ///
    /// The round runs on its own task, so dropping the returned future does not
    /// abandon a half-finished round.
    pub async fn process_turn(&self, request: TurnRequest) -> Result<TurnResponse, ApplicationError> {
        if request.message.trim().is_empty() {
            return Err(DomainError::InvariantViolation("message must not be empty".to_string())
                .into());
        }

        let runtime = self.clone();
        tokio::spawn(async move { runtime.run_round(request).await })
            .await
            .map_err(|error| ApplicationError::Integration(format!("round task failed: {error}")))?
    }

    pub fn submit_feedback(&self, feedback: Feedback) -> Result<(), ApplicationError> {
        if !(1..=5).contains(&feedback.score) {
            return Err(DomainError::InvariantViolation(format!(
                "feedback score must be between 1 and 5, got {}",
                feedback.score
            ))
            .into());
        }
        if feedback.trace_id.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "feedback must reference the trace id of a round".to_string(),
            )
            .into());
        }

        let context = AuditContext::new(None, None, feedback.trace_id.clone(), "customer");
        let mut event = AuditEvent::from_context(
            &context,
            "feedback.submitted",
            AuditCategory::Feedback,
            AuditOutcome::Success,
        )
        .with_metadata("score", feedback.score.to_string());
        if let Some(comment) = &feedback.comment {
            event = event.with_metadata("comment", comment.clone());
        }
        self.inner.audit.emit(event);

        info!(
            event_name = "feedback.submitted",
            correlation_id = %feedback.trace_id,
            score = feedback.score,
            "feedback recorded"
        );
        Ok(())
    }

    async fn run_round(&self, request: TurnRequest) -> Result<TurnResponse, ApplicationError> {
        let inner = &self.inner;
        let requested = request
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let lock_key = requested.clone().unwrap_or_else(|| SessionId::generate().0);
        let _owner = inner.locks.lock_for(&lock_key).lock_owned().await;

        let existing = match &requested {
            Some(id) => match self.store_unsaved(id).await? {
                Some(session) => Some(session),
                None => inner.sessions.find(&SessionId(id.clone())).await?,
            },
            None => None,
        };
        let mut session = match existing {
            Some(mut session) => {
                if let Some(bootstrap) = &request.bootstrap {
                    session.context.fill_from(bootstrap);
                }
                session
            }
            None => {
                let id = match requested {
                    Some(_) => SessionId::generate(),
                    None => SessionId(lock_key.clone()),
                };
                let hub = inner.registry.hub()?;
                info!(
                    event_name = "session.created",
                    correlation_id = "session",
                    session_id = %id,
                    agent = %hub.name,
                    "starting new session"
                );
                Session::new(id, hub.name.clone(), SharedContext::bootstrap(request.bootstrap.as_ref()))
            }
        };

        let agent = inner.registry.by_name(&session.active_agent)?.clone();
        let trace_id = Uuid::new_v4().simple().to_string();
        let round = session.round_counter;
        let audit = AuditContext::new(
            Some(session.id.0.clone()),
            Some(round),
            trace_id.clone(),
            agent.name.clone(),
        );
        inner.audit.emit(
            AuditEvent::from_context(&audit, "round.started", AuditCategory::Round, AuditOutcome::Success)
                .with_metadata("agent", agent.name.clone()),
        );
        info!(
            event_name = "round.started",
            correlation_id = %trace_id,
            session_id = %session.id,
            round,
            agent = %agent.name,
            "round started"
        );

        session.transcript.push(TranscriptItem::user(request.message.clone()));
        let draft = RoundDraft {
            round,
            agent: agent.name.clone(),
            trace_id: trace_id.clone(),
            input_items: session.transcript.clone(),
            started_at: Utc::now(),
            audit: audit.clone(),
        };

        let mut ledger = GuardrailLedger::default();
        let gate = inner
            .guardrails
            .evaluate(&agent.guardrails, &session.transcript, &session.context, &mut ledger)
            .await;
        for result in ledger.results() {
            let outcome = if result.passed { AuditOutcome::Success } else { AuditOutcome::Rejected };
            inner.audit.emit(
                AuditEvent::from_context(&audit, "guardrail.checked", AuditCategory::Guardrail, outcome)
                    .with_metadata("guardrail", result.name.clone())
                    .with_metadata("reasoning", result.reasoning.clone()),
            );
        }

        if let GuardrailGate::Rejected { failed } = gate {
            warn!(
                event_name = "round.guardrail_rejected",
                correlation_id = %trace_id,
                session_id = %session.id,
                round,
                guardrails = ?failed,
                "guardrail tripped, replying with refusal"
            );
            let refusal = PublicMessage {
                content: inner.settings.refusal_message.clone(),
                agent: agent.name.clone(),
            };
            session.transcript.push(TranscriptItem::assistant(&agent.name, &refusal.content));
            let (record, audit) = draft.into_record(
                Vec::new(),
                vec![refusal],
                ledger.drain(),
                RoundOutcome::GuardrailRejected,
                Vec::new(),
            );
            return self.finish(session, record, &audit).await;
        }

        let run_request = AgentRequest {
            tools: ToolScope::new(inner.tools.clone(), &agent),
            agent: agent.clone(),
            transcript: session.transcript.clone(),
            context: session.context.clone(),
            run_config: RunConfig {
                model: inner.settings.model.clone(),
                max_turns: inner.settings.max_turns,
                trace_id: trace_id.clone(),
                session_id: session.id.0.clone(),
            },
        };
        let run = match self.invoke(run_request).await {
            Ok(run) => run,
            Err(message) => {
                return self.fail_round(session, draft, ledger.drain(), message).await;
            }
        };

        let classification = classify(&run.items);
        for (tool_agent, tool) in classification.tool_calls() {
            inner.audit.emit(
                AuditEvent::from_context(
                    &audit.with_actor(tool_agent),
                    "tool.called",
                    AuditCategory::Tool,
                    AuditOutcome::Success,
                )
                .with_metadata("tool", tool),
            );
        }

        let AgentRun { transcript, mut context, .. } = run;
        let mut anomalies = Vec::new();
        let mut next_agent = agent.name.clone();
        if let Some(target) = classification.next_agent() {
            if classification.has_multiple_handoffs() {
                let anomaly = format!(
                    "{} handoffs emitted in one round, applied only the last (`{target}`)",
                    classification.handoff_targets.len()
                );
                warn!(
                    event_name = "handoff.anomaly",
                    correlation_id = %trace_id,
                    session_id = %session.id,
                    round,
                    targets = ?classification.handoff_targets,
                    "multiple handoffs in one round"
                );
                inner.audit.emit(
                    AuditEvent::from_context(
                        &audit,
                        "handoff.anomaly",
                        AuditCategory::Handoff,
                        AuditOutcome::Success,
                    )
                    .with_metadata("handoffs", classification.handoff_targets.len().to_string())
                    .with_metadata("applied", target),
                );
                anomalies.push(anomaly);
            }

            match inner.machine.transition_with_audit(
                &agent.name,
                target,
                &mut context,
                inner.audit.as_ref(),
                &audit,
            ) {
                Ok(transition) => next_agent = transition.to,
                Err(error) => {
                    let message = format!("agent emitted an invalid handoff: {error}");
                    return self.fail_round(session, draft, ledger.drain(), message).await;
                }
            }
        }

        session.context = context;
        session.transcript = transcript;
        session.active_agent = next_agent;
        let (record, audit) = draft.into_record(
            classification.events,
            classification.messages,
            ledger.drain(),
            RoundOutcome::Completed,
            anomalies,
        );
        self.finish(session, record, &audit).await
    }

    /// Retries the save of a session left behind by a failed round.
    ///
    /// The caller must hold the session lock.
    async fn store_unsaved(&self, session_id: &str) -> Result<Option<Session>, ApplicationError> {
        let Some(session) = self.inner.unsaved.take(session_id) else {
            return Ok(None);
        };

        match self.inner.sessions.save(&session).await {
            Ok(()) => {
                info!(
                    event_name = "session.save_recovered",
                    correlation_id = "session",
                    session_id = %session.id,
                    round_counter = session.round_counter,
                    "stored previously unsaved rounds"
                );
                Ok(Some(session))
            }
            Err(failure) => {
                warn!(
                    event_name = "session.save_retry_failed",
                    correlation_id = "session",
                    session_id = %session.id,
                    error = %failure,
                    "unsaved rounds still cannot be stored"
                );
                let error = ApplicationError::Persistence(format!(
                    "session {} has unsaved rounds: {failure}",
                    session.id
                ));
                self.inner.unsaved.keep(session);
                Err(error)
            }
        }
    }

    /// Calls the capability on its own task under the configured timeout.
    ///
    /// Errors, panics and timeouts all come back as the failure text for the round.
    async fn invoke(&self, request: AgentRequest) -> Result<AgentRun, String> {
        let capability = Arc::clone(&self.inner.capability);
        let timeout = self.inner.settings.invoke_timeout;
        let task = tokio::spawn(async move { capability.invoke(request).await });
        let abort = task.abort_handle();

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(run))) => Ok(run),
            Ok(Ok(Err(error))) => Err(format!("agent invocation failed: {error}")),
            Ok(Err(join_error)) => Err(format!("agent invocation aborted: {join_error}")),
            Err(_) => {
                abort.abort();
                Err(format!("agent invocation timed out after {}ms", timeout.as_millis()))
            }
        }
    }

    async fn fail_round(
        &self,
        mut session: Session,
        draft: RoundDraft,
        guardrails: Vec<GuardrailCheckResult>,
        message: String,
    ) -> Result<TurnResponse, ApplicationError> {
        error!(
            event_name = "round.internal_error",
            correlation_id = %draft.trace_id,
            session_id = %session.id,
            round = draft.round,
            error = %message,
            "round failed, replying with apology"
        );
        let apology = PublicMessage {
            content: self.inner.settings.failure_message.clone(),
            agent: draft.agent.clone(),
        };
        session.transcript.push(TranscriptItem::assistant(&draft.agent, &apology.content));
        let (record, audit) = draft.into_record(
            Vec::new(),
            vec![apology],
            guardrails,
            RoundOutcome::InternalError { message },
            Vec::new(),
        );
        self.finish(session, record, &audit).await
    }

    async fn finish(
        &self,
        mut session: Session,
        record: RoundRecord,
        audit: &AuditContext,
    ) -> Result<TurnResponse, ApplicationError> {
        let (event_type, outcome) = match &record.outcome {
            RoundOutcome::Completed => ("round.committed", AuditOutcome::Success),
            RoundOutcome::GuardrailRejected => ("round.rejected", AuditOutcome::Rejected),
            RoundOutcome::InternalError { .. } => ("round.failed", AuditOutcome::Failed),
        };
        let round = record.round;
        let trace_id = record.trace_id.clone();
        let outcome_record = record.outcome.clone();
        let messages = record.messages.clone();
        let events = record.events.clone();
        let guardrails = record.guardrails.clone();

        session.commit_round(record)?;
        if let Err(failure) = self.inner.sessions.save(&session).await {
            error!(
                event_name = "session.save_failed",
                correlation_id = %trace_id,
                session_id = %session.id,
                round,
                error = %failure,
                "could not persist round"
            );
            self.inner.audit.emit(
                AuditEvent::from_context(
                    audit,
                    "session.save_failed",
                    AuditCategory::Persistence,
                    AuditOutcome::Failed,
                )
                .with_metadata("error", failure.to_string()),
            );
            let error = ApplicationError::Persistence(format!(
                "session {} round {round} was not stored: {failure}",
                session.id
            ));
            self.inner.unsaved.keep(session);
            return Err(error);
        }

        self.inner.audit.emit(
            AuditEvent::from_context(audit, event_type, AuditCategory::Round, outcome)
                .with_metadata("active_agent", session.active_agent.clone()),
        );
        info!(
            event_name = event_type,
            correlation_id = %trace_id,
            session_id = %session.id,
            round,
            active_agent = %session.active_agent,
            "round committed"
        );

        Ok(TurnResponse {
            session_id: session.id,
            active_agent: session.active_agent,
            round,
            outcome: outcome_record,
            messages,
            events,
            context: session.context,
            guardrails,
            trace_id,
            agents: self.agents(),
        })
    }
}
