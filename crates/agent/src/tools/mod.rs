use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use airloop_core::domain::context::SharedContext;
use airloop_core::registry::AgentSpec;
use airloop_db::repositories::{BookingRepository, RepositoryError};

pub mod airline;

pub use airline::{
    BaggageTool, CancelFlightTool, DisplaySeatMapTool, FaqLookupTool, FlightStatusTool,
    OrderFoodTool, UpdateSeatTool,
};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool `{0}` is not registered")]
    Unknown(String),
    #[error("agent `{agent}` does not declare tool `{tool}`")]
    NotDeclared { agent: String, tool: String },
    #[error("invalid arguments for `{tool}`: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// A procedure an agent may call during its invocation.
///
/// Business-rule refusals come back as ordinary result text; only failures of the
/// backing stores are errors.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    async fn call(&self, arguments: Value, context: &mut SharedContext)
        -> Result<String, ToolError>;
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The seven airline tools over one booking store.
    pub fn airline_default(bookings: Arc<dyn BookingRepository>) -> Self {
        let mut registry = Self::default();
        registry.register(FlightStatusTool::new(bookings.clone()));
        registry.register(CancelFlightTool::new(bookings.clone()));
        registry.register(BaggageTool);
        registry.register(UpdateSeatTool::new(bookings.clone()));
        registry.register(DisplaySeatMapTool::new(bookings.clone()));
        registry.register(OrderFoodTool::new(bookings));
        registry.register(FaqLookupTool);
        registry
    }
}

/// The slice of the tool registry one agent is allowed to call.
#[derive(Clone)]
pub struct ToolScope {
    registry: Arc<ToolRegistry>,
    agent: String,
    allowed: Vec<String>,
}

impl ToolScope {
    pub fn new(registry: Arc<ToolRegistry>, agent: &AgentSpec) -> Self {
        Self { registry, agent: agent.name.clone(), allowed: agent.tools.clone() }
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    pub async fn call(
        &self,
        name: &str,
        arguments: Value,
        context: &mut SharedContext,
    ) -> Result<String, ToolError> {
        if !self.allowed.iter().any(|tool| tool == name) {
            return Err(ToolError::NotDeclared {
                agent: self.agent.clone(),
                tool: name.to_string(),
            });
        }
        let tool = self.registry.get(name).ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        tool.call(arguments, context).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use airloop_core::domain::context::SharedContext;
    use airloop_core::registry::{
        AgentRole, AgentSpec, BAGGAGE_TOOL, FAQ_LOOKUP_TOOL, UPDATE_SEAT_TOOL,
    };
    use airloop_db::repositories::InMemoryBookingRepository;

    use super::{ToolError, ToolRegistry, ToolScope};

    fn registry() -> Arc<ToolRegistry> {
        Arc::new(ToolRegistry::airline_default(Arc::new(InMemoryBookingRepository::default())))
    }

    #[test]
    fn airline_registry_holds_all_seven_tools() {
        let registry = registry();
        assert_eq!(registry.len(), 7);
        assert!(registry.contains(UPDATE_SEAT_TOOL));
        assert_eq!(registry.names().first().map(String::as_str), Some(BAGGAGE_TOOL));
    }

    #[tokio::test]
    async fn scope_refuses_tools_the_agent_does_not_declare() {
        let faq = AgentSpec::new("FAQ Agent", AgentRole::Faq, "faq")
            .with_tools(&[FAQ_LOOKUP_TOOL, BAGGAGE_TOOL]);
        let scope = ToolScope::new(registry(), &faq);
        let mut context = SharedContext::default();

        let error = scope
            .call(UPDATE_SEAT_TOOL, json!({"new_seat": "4"}), &mut context)
            .await
            .expect_err("undeclared tool");
        assert!(matches!(error, ToolError::NotDeclared { .. }));

        let answer = scope
            .call(FAQ_LOOKUP_TOOL, json!({"question": "is there wifi?"}), &mut context)
            .await
            .expect("declared tool");
        assert!(answer.contains("Airline-Wifi"));
    }

    #[tokio::test]
    async fn scope_reports_declared_but_unregistered_tools() {
        let agent = AgentSpec::new("Odd Agent", AgentRole::Faq, "odd").with_tools(&["teleport"]);
        let scope = ToolScope::new(Arc::new(ToolRegistry::default()), &agent);

        let error = scope
            .call("teleport", json!({}), &mut SharedContext::default())
            .await
            .expect_err("unregistered");
        assert!(matches!(error, ToolError::Unknown(name) if name == "teleport"));
    }
}
