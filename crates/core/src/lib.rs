pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod handoff;
pub mod registry;

pub use audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
    NoopAuditSink, TracingAuditSink,
};
pub use domain::booking::{Flight, Order, OrderStatus};
pub use domain::context::{BootstrapContext, SharedContext};
pub use domain::event::{Event, EventKind, PublicMessage};
pub use domain::guardrail::GuardrailCheckResult;
pub use domain::session::{RoundOutcome, RoundRecord, Session, SessionId, SessionSummary};
pub use domain::transcript::{Role, TranscriptItem};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use handoff::{HandoffHook, HandoffMachine, HandoffTransition};
pub use registry::{AgentRole, AgentSpec, AgentSummary, Registry};
