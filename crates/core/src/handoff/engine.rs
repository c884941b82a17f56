use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::context::SharedContext;
use crate::errors::DomainError;
use crate::handoff::hooks::HandoffHook;
use crate::registry::Registry;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffTransition {
    pub from: String,
    pub to: String,
    pub hook: Option<String>,
}

impl HandoffTransition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Single-token state machine over the registered agents.
///
/// The hub reaches every spoke through an edge carrying the spoke's hook; every
/// spoke returns to the hub through a plain edge.
#[derive(Clone, Debug)]
pub struct HandoffMachine {
    initial: String,
    agents: BTreeSet<String>,
    edges: BTreeMap<(String, String), Option<Arc<dyn HandoffHook>>>,
}

impl HandoffMachine {
    pub fn from_registry(registry: &Registry) -> Result<Self, DomainError> {
        let hub = registry.hub()?;
        let mut agents = BTreeSet::new();
        let mut edges = BTreeMap::new();

        for spec in registry.agents() {
            agents.insert(spec.name.clone());
            if spec.name == hub.name {
                continue;
            }
            edges.insert((hub.name.clone(), spec.name.clone()), spec.on_handoff.clone());
            edges.insert((spec.name.clone(), hub.name.clone()), None);
        }

        Ok(Self { initial: hub.name.clone(), agents, edges })
    }

    pub fn initial_state(&self) -> &str {
        &self.initial
    }

    pub fn targets_of(&self, agent: &str) -> Vec<String> {
        self.edges.keys().filter(|(from, _)| from == agent).map(|(_, to)| to.clone()).collect()
    }

    /// Runs the edge hook against `context`, then reports the new active agent.
    ///
    /// The caller commits `to` only after this returns `Ok`.
    pub fn transition(
        &self,
        current: &str,
        target: &str,
        context: &mut SharedContext,
    ) -> Result<HandoffTransition, DomainError> {
        if !self.agents.contains(current) {
            return Err(DomainError::UnknownAgent(current.to_string()));
        }
        if !self.agents.contains(target) {
            return Err(DomainError::UnknownAgent(target.to_string()));
        }
        if current == target {
            return Ok(HandoffTransition {
                from: current.to_string(),
                to: target.to_string(),
                hook: None,
            });
        }

        let Some(hook) = self.edges.get(&(current.to_string(), target.to_string())) else {
            return Err(DomainError::InvalidHandoff {
                from: current.to_string(),
                to: target.to_string(),
            });
        };

        let hook_name = hook.as_ref().map(|hook| {
            hook.apply(context);
            hook.name().to_string()
        });

        Ok(HandoffTransition { from: current.to_string(), to: target.to_string(), hook: hook_name })
    }

    pub fn transition_with_audit<S>(
        &self,
        current: &str,
        target: &str,
        context: &mut SharedContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<HandoffTransition, DomainError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.transition(current, target, context);
        match &result {
            Ok(transition) => {
                let mut event = AuditEvent::from_context(
                    audit,
                    "handoff.applied",
                    AuditCategory::Handoff,
                    AuditOutcome::Success,
                )
                .with_metadata("from", transition.from.clone())
                .with_metadata("to", transition.to.clone());
                if let Some(hook) = &transition.hook {
                    event = event.with_metadata("hook", hook.clone());
                }
                sink.emit(event);
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "handoff.rejected",
                        AuditCategory::Handoff,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("from", current)
                    .with_metadata("to", target)
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::context::SharedContext;
    use crate::errors::DomainError;
    use crate::handoff::engine::HandoffMachine;
    use crate::registry::{
        Registry, CANCELLATION_AGENT, FAQ_AGENT, SEAT_BOOKING_AGENT, TRIAGE_AGENT,
    };

    fn machine() -> HandoffMachine {
        let registry = Registry::airline_default().expect("default registry");
        HandoffMachine::from_registry(&registry).expect("machine")
    }

    #[test]
    fn initial_state_is_the_hub() {
        assert_eq!(machine().initial_state(), TRIAGE_AGENT);
    }

    #[test]
    fn hub_to_cancellation_runs_hook_before_commit() {
        let machine = machine();
        let mut context = SharedContext::default();

        let transition =
            machine.transition(TRIAGE_AGENT, CANCELLATION_AGENT, &mut context).expect("edge");

        assert_eq!(transition.to, CANCELLATION_AGENT);
        assert_eq!(transition.hook.as_deref(), Some("fill_cancellation_identifiers"));
        assert!(transition.changed());
        assert!(context.confirmation_number.is_some());
        assert!(context.flight_number.is_some());
    }

    #[test]
    fn return_edge_to_hub_has_no_hook() {
        let machine = machine();
        let mut context = SharedContext::default();

        let transition =
            machine.transition(SEAT_BOOKING_AGENT, TRIAGE_AGENT, &mut context).expect("edge");

        assert!(transition.hook.is_none());
        assert_eq!(context, SharedContext::default());
    }

    #[test]
    fn spoke_to_spoke_is_not_an_edge() {
        let machine = machine();
        let mut context = SharedContext::default();

        let error = machine
            .transition(SEAT_BOOKING_AGENT, CANCELLATION_AGENT, &mut context)
            .expect_err("spokes only return to the hub");

        assert!(matches!(error, DomainError::InvalidHandoff { .. }));
        assert_eq!(context, SharedContext::default());
    }

    #[test]
    fn unknown_target_is_reported() {
        let machine = machine();
        let mut context = SharedContext::default();

        let error = machine
            .transition(TRIAGE_AGENT, "Baggage Agent", &mut context)
            .expect_err("unknown agent");
        assert_eq!(error, DomainError::UnknownAgent("Baggage Agent".to_string()));
    }

    #[test]
    fn self_handoff_is_a_no_op() {
        let machine = machine();
        let mut context = SharedContext::default();

        let transition = machine.transition(FAQ_AGENT, FAQ_AGENT, &mut context).expect("no-op");
        assert!(!transition.changed());
        assert!(transition.hook.is_none());
    }

    #[test]
    fn hub_reaches_every_spoke() {
        let machine = machine();
        let targets = machine.targets_of(TRIAGE_AGENT);
        assert_eq!(targets.len(), 5);
        assert_eq!(machine.targets_of(FAQ_AGENT), vec![TRIAGE_AGENT.to_string()]);
    }

    #[test]
    fn audited_transition_emits_handoff_event() {
        let machine = machine();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(Some("s-1".to_string()), Some(0), "trace-1", TRIAGE_AGENT);
        let mut context = SharedContext::default();

        machine
            .transition_with_audit(
                TRIAGE_AGENT,
                SEAT_BOOKING_AGENT,
                &mut context,
                &sink,
                &audit,
            )
            .expect("edge");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "handoff.applied");
        assert_eq!(events[0].metadata.get("hook").map(String::as_str), Some("fill_seat_booking_identifiers"));
    }
}
