use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{ApplicationError, DomainError};
use crate::handoff::hooks::{FillCancellationIdentifiers, FillSeatBookingIdentifiers, HandoffHook};

pub const TRIAGE_AGENT: &str = "Triage Agent";
pub const FLIGHT_STATUS_AGENT: &str = "Flight Status Agent";
pub const CANCELLATION_AGENT: &str = "Cancellation Agent";
pub const SEAT_BOOKING_AGENT: &str = "Seat Booking Agent";
pub const FAQ_AGENT: &str = "FAQ Agent";
pub const FOOD_AGENT: &str = "Food Agent";

pub const JAILBREAK_GUARDRAIL: &str = "Jailbreak Guardrail";
pub const RELEVANCE_GUARDRAIL: &str = "Relevance Guardrail";

pub const FLIGHT_STATUS_TOOL: &str = "flight_status_tool";
pub const CANCEL_FLIGHT_TOOL: &str = "cancel_flight";
pub const UPDATE_SEAT_TOOL: &str = "update_seat";
pub const DISPLAY_SEAT_MAP_TOOL: &str = "display_seat_map";
pub const FAQ_LOOKUP_TOOL: &str = "faq_lookup_tool";
pub const BAGGAGE_TOOL: &str = "baggage_tool";
pub const ORDER_FOOD_TOOL: &str = "order_food";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Triage,
    FlightStatus,
    Cancellation,
    SeatBooking,
    Faq,
    Food,
}

impl AgentRole {
    pub fn is_hub(self) -> bool {
        matches!(self, Self::Triage)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Triage => "triage",
            Self::FlightStatus => "flight_status",
            Self::Cancellation => "cancellation",
            Self::SeatBooking => "seat_booking",
            Self::Faq => "faq",
            Self::Food => "food",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static declaration of one agent.
#[derive(Clone, Debug)]
pub struct AgentSpec {
    pub name: String,
    pub role: AgentRole,
    pub description: String,
    pub tools: Vec<String>,
    pub guardrails: Vec<String>,
    pub on_handoff: Option<Arc<dyn HandoffHook>>,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>, role: AgentRole, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role,
            description: description.into(),
            tools: Vec::new(),
            guardrails: Vec::new(),
            on_handoff: None,
        }
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|tool| (*tool).to_string()).collect();
        self
    }

    pub fn with_guardrails(mut self, guardrails: &[&str]) -> Self {
        self.guardrails = guardrails.iter().map(|name| (*name).to_string()).collect();
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn HandoffHook>) -> Self {
        self.on_handoff = Some(hook);
        self
    }

    pub fn declares_tool(&self, tool: &str) -> bool {
        self.tools.iter().any(|declared| declared == tool)
    }
}

/// Panel entry shown next to a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub name: String,
    pub description: String,
    pub handoffs: Vec<String>,
    pub tools: Vec<String>,
    pub input_guardrails: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct Registry {
    agents: BTreeMap<String, AgentSpec>,
    roles: BTreeMap<AgentRole, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: AgentSpec) -> Result<(), ApplicationError> {
        if self.agents.contains_key(&spec.name) {
            return Err(ApplicationError::Configuration(format!(
                "agent `{}` is registered twice",
                spec.name
            )));
        }
        if let Some(existing) = self.roles.get(&spec.role) {
            return Err(ApplicationError::Configuration(format!(
                "role {} is already served by `{existing}`",
                spec.role
            )));
        }
        self.roles.insert(spec.role, spec.name.clone());
        self.agents.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn by_name(&self, name: &str) -> Result<&AgentSpec, DomainError> {
        self.agents.get(name).ok_or_else(|| DomainError::UnknownAgent(name.to_string()))
    }

    pub fn by_role(&self, role: AgentRole) -> Result<&AgentSpec, DomainError> {
        self.roles
            .get(&role)
            .and_then(|name| self.agents.get(name))
            .ok_or_else(|| DomainError::UnknownRole(role.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn hub(&self) -> Result<&AgentSpec, DomainError> {
        self.by_role(AgentRole::Triage)
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentSpec> {
        self.agents.values()
    }

    /// Agents reachable from `name` in one handoff.
    pub fn handoffs_of(&self, name: &str) -> Result<Vec<String>, DomainError> {
        let spec = self.by_name(name)?;
        if spec.role.is_hub() {
            return Ok(self
                .agents
                .values()
                .filter(|agent| !agent.role.is_hub())
                .map(|agent| agent.name.clone())
                .collect());
        }
        Ok(vec![self.hub()?.name.clone()])
    }

    /// Summaries for the given roles, or every spoke when `roles` is `None`.
    pub fn list(&self, roles: Option<&[AgentRole]>) -> Vec<AgentSummary> {
        self.agents
            .values()
            .filter(|agent| match roles {
                Some(roles) => roles.contains(&agent.role),
                None => !agent.role.is_hub(),
            })
            .map(|agent| AgentSummary {
                name: agent.name.clone(),
                description: agent.description.clone(),
                handoffs: self.handoffs_of(&agent.name).unwrap_or_default(),
                tools: agent.tools.clone(),
                input_guardrails: agent.guardrails.clone(),
            })
            .collect()
    }

    pub fn declared_guardrails(&self) -> BTreeSet<String> {
        self.agents.values().flat_map(|agent| agent.guardrails.iter().cloned()).collect()
    }

    pub fn declared_tools(&self) -> BTreeSet<String> {
        self.agents.values().flat_map(|agent| agent.tools.iter().cloned()).collect()
    }

    pub fn validate(&self) -> Result<(), ApplicationError> {
        self.hub().map_err(|_| {
            ApplicationError::Configuration("no triage (hub) agent is registered".to_string())
        })?;
        Ok(())
    }

    pub fn airline_default() -> Result<Self, ApplicationError> {
        let mut registry = Self::new();
        registry.register(
            AgentSpec::new(
                TRIAGE_AGENT,
                AgentRole::Triage,
                "A triage agent that can delegate a customer's request to the appropriate agent.",
            )
            .with_guardrails(&[RELEVANCE_GUARDRAIL, JAILBREAK_GUARDRAIL]),
        )?;
        registry.register(
            AgentSpec::new(
                FLIGHT_STATUS_AGENT,
                AgentRole::FlightStatus,
                "An agent to provide flight status information.",
            )
            .with_tools(&[FLIGHT_STATUS_TOOL])
            .with_guardrails(&[JAILBREAK_GUARDRAIL]),
        )?;
        registry.register(
            AgentSpec::new(
                CANCELLATION_AGENT,
                AgentRole::Cancellation,
                "An agent to cancel flights.",
            )
            .with_tools(&[CANCEL_FLIGHT_TOOL])
            .with_guardrails(&[JAILBREAK_GUARDRAIL])
            .with_hook(Arc::new(FillCancellationIdentifiers)),
        )?;
        registry.register(
            AgentSpec::new(
                SEAT_BOOKING_AGENT,
                AgentRole::SeatBooking,
                "A helpful agent that can update a seat on a flight.",
            )
            .with_tools(&[UPDATE_SEAT_TOOL, DISPLAY_SEAT_MAP_TOOL])
            .with_guardrails(&[JAILBREAK_GUARDRAIL])
            .with_hook(Arc::new(FillSeatBookingIdentifiers)),
        )?;
        registry.register(
            AgentSpec::new(
                FAQ_AGENT,
                AgentRole::Faq,
                "A helpful agent that can answer questions about the airline.",
            )
            .with_tools(&[FAQ_LOOKUP_TOOL, BAGGAGE_TOOL])
            .with_guardrails(&[RELEVANCE_GUARDRAIL, JAILBREAK_GUARDRAIL]),
        )?;
        registry.register(
            AgentSpec::new(
                FOOD_AGENT,
                AgentRole::Food,
                "An agent that takes in-flight meal orders.",
            )
            .with_tools(&[ORDER_FOOD_TOOL])
            .with_guardrails(&[RELEVANCE_GUARDRAIL, JAILBREAK_GUARDRAIL]),
        )?;
        registry.validate()?;
        Ok(registry)
    }
}
