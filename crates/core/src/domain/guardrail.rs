use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Verdict of one guardrail check for one round, kept for audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailCheckResult {
    pub name: String,
    pub input: String,
    pub passed: bool,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

impl GuardrailCheckResult {
    pub fn new(
        name: impl Into<String>,
        input: impl Into<String>,
        passed: bool,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            input: input.into(),
            passed,
            reasoning: reasoning.into(),
            timestamp: Utc::now(),
        }
    }
}
