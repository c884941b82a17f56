use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinSet;

use airloop_core::domain::context::SharedContext;
use airloop_core::domain::guardrail::GuardrailCheckResult;
use airloop_core::domain::transcript::{latest_user_text, TranscriptItem};
use airloop_core::errors::ApplicationError;
use airloop_core::registry::{JAILBREAK_GUARDRAIL, RELEVANCE_GUARDRAIL};

use crate::conversation::{normalize_text, tokenize};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailVerdict {
    pub passed: bool,
    pub reasoning: String,
}

impl GuardrailVerdict {
    pub fn pass(reasoning: impl Into<String>) -> Self {
        Self { passed: true, reasoning: reasoning.into() }
    }

    pub fn fail(reasoning: impl Into<String>) -> Self {
        Self { passed: false, reasoning: reasoning.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GuardrailError {
    #[error("classification failed: {0}")]
    Classification(String),
}

/// A pre-turn classifier of the latest user message.
#[async_trait]
pub trait GuardrailCheck: Send + Sync {
    fn name(&self) -> &str;
    async fn check(
        &self,
        input: &str,
        context: &SharedContext,
    ) -> Result<GuardrailVerdict, GuardrailError>;
}

/// Per-round buffer of check results.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GuardrailLedger {
    results: Vec<GuardrailCheckResult>,
}

impl GuardrailLedger {
    pub fn record(&mut self, result: GuardrailCheckResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[GuardrailCheckResult] {
        &self.results
    }

    /// Hands out the buffered results and leaves the ledger empty.
    pub fn drain(&mut self) -> Vec<GuardrailCheckResult> {
        std::mem::take(&mut self.results)
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailGate {
    Passed,
    Rejected { failed: Vec<String> },
}

impl GuardrailGate {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

#[derive(Clone)]
pub struct GuardrailEvaluator {
    checks: BTreeMap<String, Arc<dyn GuardrailCheck>>,
    timeout: Duration,
}

impl GuardrailEvaluator {
    pub fn new(timeout: Duration) -> Self {
        Self { checks: BTreeMap::new(), timeout }
    }

    /// Keyword checks for the two airline guardrails.
    pub fn airline_default(timeout: Duration) -> Self {
        let mut evaluator = Self::new(timeout);
        evaluator.checks.insert(JAILBREAK_GUARDRAIL.to_string(), Arc::new(JailbreakKeywordCheck));
        evaluator.checks.insert(RELEVANCE_GUARDRAIL.to_string(), Arc::new(RelevanceKeywordCheck));
        evaluator
    }

    pub fn register(&mut self, check: Arc<dyn GuardrailCheck>) -> Result<(), ApplicationError> {
        let name = check.name().to_string();
        if self.checks.contains_key(&name) {
            return Err(ApplicationError::Configuration(format!(
                "guardrail `{name}` is registered twice"
            )));
        }
        self.checks.insert(name, check);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.checks.contains_key(name)
    }

    /// Runs every named check against the latest user message.
    ///
    /// All checks run concurrently and all are awaited. Results land in `ledger` in
    /// the order of `names`. Errors, panics, timeouts and unknown names count as
    /// failures.
    pub async fn evaluate(
        &self,
        names: &[String],
        transcript: &[TranscriptItem],
        context: &SharedContext,
        ledger: &mut GuardrailLedger,
    ) -> GuardrailGate {
        let input = latest_user_text(transcript);
        let mut slots: Vec<Option<GuardrailCheckResult>> = vec![None; names.len()];
        let mut tasks = JoinSet::new();

        for (index, name) in names.iter().enumerate() {
            let Some(check) = self.checks.get(name).cloned() else {
                slots[index] = Some(GuardrailCheckResult::new(
                    name,
                    &input,
                    false,
                    format!("Guardrail parse failure: no check registered as `{name}`"),
                ));
                continue;
            };
            let input = input.clone();
            let context = context.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                let outcome = tokio::time::timeout(timeout, check.check(&input, &context)).await;
                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let Ok((index, outcome)) = joined else {
                // Panicked checks leave their slot empty and are filled below.
                continue;
            };
            let name = &names[index];
            let result = match outcome {
                Ok(Ok(verdict)) => {
                    GuardrailCheckResult::new(name, &input, verdict.passed, verdict.reasoning)
                }
                Ok(Err(error)) => GuardrailCheckResult::new(
                    name,
                    &input,
                    false,
                    format!("Guardrail parse failure: {error}"),
                ),
                Err(_) => GuardrailCheckResult::new(
                    name,
                    &input,
                    false,
                    format!(
                        "Guardrail parse failure: check timed out after {}ms",
                        self.timeout.as_millis()
                    ),
                ),
            };
            slots[index] = Some(result);
        }

        let mut failed = Vec::new();
        for (name, slot) in names.iter().zip(slots) {
            let result = slot.unwrap_or_else(|| {
                GuardrailCheckResult::new(
                    name,
                    &input,
                    false,
                    "Guardrail parse failure: check panicked",
                )
            });
            if !result.passed {
                failed.push(result.name.clone());
            }
            ledger.record(result);
        }

        if failed.is_empty() {
            GuardrailGate::Passed
        } else {
            GuardrailGate::Rejected { failed }
        }
    }
}

const JAILBREAK_PATTERNS: &[&str] = &[
    "ignore previous instructions",
    "ignore all previous",
    "ignore your instructions",
    "disregard your instructions",
    "disregard previous",
    "system prompt",
    "reveal your instructions",
    "pretend you are",
    "developer mode",
    "jailbreak",
    "drop table",
    "delete from",
    "or 1=1",
    "'; --",
    "<script",
];

/// Flags attempts to override instructions or smuggle code into the conversation.
#[derive(Clone, Copy, Debug, Default)]
pub struct JailbreakKeywordCheck;

#[async_trait]
impl GuardrailCheck for JailbreakKeywordCheck {
    fn name(&self) -> &str {
        JAILBREAK_GUARDRAIL
    }

    async fn check(
        &self,
        input: &str,
        _context: &SharedContext,
    ) -> Result<GuardrailVerdict, GuardrailError> {
        let normalized = normalize_text(input);
        match JAILBREAK_PATTERNS.iter().find(|pattern| normalized.contains(*pattern)) {
            Some(pattern) => Ok(GuardrailVerdict::fail(format!(
                "Message looks like an attempt to bypass instructions (matched `{pattern}`)."
            ))),
            None => Ok(GuardrailVerdict::pass("No jailbreak attempt detected.")),
        }
    }
}

const AIRLINE_KEYWORDS: &[&str] = &[
    "flight", "flights", "fly", "flying", "seat", "seats", "seating", "bag", "bags", "baggage",
    "luggage", "cancel", "cancellation", "book", "booking", "booked", "confirmation", "meal",
    "meals", "food", "eat", "hungry", "drink", "wifi", "plane", "aircraft", "airline", "airport",
    "travel", "trip", "ticket", "boarding", "gate", "delay", "delayed", "status", "refund",
    "check-in", "checkin", "upgrade", "passenger", "reservation", "departure", "arrival",
    "layover", "order", "window", "aisle", "chicken", "beef", "vegetarian", "allowance", "fee",
    "carry-on", "legroom", "row",
];

const CONVERSATIONAL_TOKENS: &[&str] = &[
    "hi", "hello", "hey", "ok", "okay", "thanks", "thank", "thx", "yes", "no", "yep", "nope",
    "sure", "please", "bye", "goodbye", "morning", "afternoon", "evening", "help", "great",
    "cool", "fine", "confirm",
];

/// Keeps the conversation on airline travel.
///
/// Greetings, acknowledgements and short identifier answers (seat numbers,
/// confirmation codes) count as relevant.
#[derive(Clone, Copy, Debug, Default)]
pub struct RelevanceKeywordCheck;

#[async_trait]
impl GuardrailCheck for RelevanceKeywordCheck {
    fn name(&self) -> &str {
        RELEVANCE_GUARDRAIL
    }

    async fn check(
        &self,
        input: &str,
        _context: &SharedContext,
    ) -> Result<GuardrailVerdict, GuardrailError> {
        let tokens = tokenize(&normalize_text(input));
        if tokens.is_empty() {
            return Ok(GuardrailVerdict::pass("Empty message carries no off-topic request."));
        }
        if tokens.iter().any(|token| AIRLINE_KEYWORDS.contains(&token.as_str())) {
            return Ok(GuardrailVerdict::pass("Message is about airline travel."));
        }
        if tokens.iter().all(|token| CONVERSATIONAL_TOKENS.contains(&token.as_str())) {
            return Ok(GuardrailVerdict::pass("Conversational message."));
        }
        if tokens.len() <= 3 && input.split_whitespace().all(is_identifier_answer) {
            return Ok(GuardrailVerdict::pass("Short answer with a booking identifier."));
        }
        Ok(GuardrailVerdict::fail("Message is unrelated to airline travel."))
    }
}

fn is_identifier_answer(word: &str) -> bool {
    let word = word.trim_end_matches(&['.', ',', '!'][..]);
    !word.is_empty()
        && word.chars().all(|character| character.is_ascii_alphanumeric() || character == '-')
        && word.chars().any(|character| character.is_ascii_digit())
}
