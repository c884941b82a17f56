//! Deterministic keyword-driven agent backend.
//!
//! The hub routes on intent keywords; each spoke runs a fixed routine with its
//! declared tools and hands back to the hub when the customer changes topic.

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use airloop_core::domain::context::SharedContext;
use airloop_core::domain::transcript::latest_user_text;
use airloop_core::registry::{
    AgentRole, Registry, BAGGAGE_TOOL, CANCEL_FLIGHT_TOOL, DISPLAY_SEAT_MAP_TOOL, FAQ_LOOKUP_TOOL,
    FLIGHT_STATUS_TOOL, ORDER_FOOD_TOOL, UPDATE_SEAT_TOOL,
};

use crate::llm::{AgentCapability, AgentError, AgentRequest, AgentRun, OutputItem};
use crate::tools::ToolScope;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    FlightStatus,
    Cancellation,
    SeatBooking,
    Faq,
    Food,
}

impl Intent {
    pub fn role(self) -> AgentRole {
        match self {
            Self::FlightStatus => AgentRole::FlightStatus,
            Self::Cancellation => AgentRole::Cancellation,
            Self::SeatBooking => AgentRole::SeatBooking,
            Self::Faq => AgentRole::Faq,
            Self::Food => AgentRole::Food,
        }
    }

    fn greeting(self) -> &'static str {
        match self {
            Self::FlightStatus => "I can check on that flight. What is your flight number?",
            Self::Cancellation => {
                "I can help you cancel your booking. Reply yes to confirm the cancellation."
            }
            Self::SeatBooking => {
                "I can help you change your seat. Which seat would you like? \
                 I can also show you the seat map."
            }
            Self::Faq => {
                "I can answer questions about baggage, seating and wifi. What would you like to know?"
            }
            Self::Food => "I can order a meal for your flight. Which meal would you like?",
        }
    }
}

const CANCEL_WORDS: &[&str] = &["cancel", "cancellation", "refund"];
const FOOD_WORDS: &[&str] =
    &["meal", "meals", "food", "eat", "hungry", "chicken", "beef", "vegetarian", "menu"];
const SEAT_CHANGE_WORDS: &[&str] =
    &["change", "switch", "move", "pick", "select", "update", "map", "different", "new", "book"];
const STATUS_WORDS: &[&str] =
    &["status", "delay", "delayed", "late", "time", "departure", "arrival", "gate", "departing"];
const FAQ_WORDS: &[&str] = &[
    "bag", "bags", "baggage", "luggage", "wifi", "allowance", "fee", "fees", "plane", "legroom",
    "policy", "carry-on", "many",
];
const SEAT_WORDS: &[&str] = &["seat", "seats", "window", "aisle"];
const AFFIRMATIVE_WORDS: &[&str] =
    &["yes", "yep", "yeah", "confirm", "confirmed", "sure", "please"];
const NEGATIVE_WORDS: &[&str] = &["no", "nope", "don't", "keep"];
const SEAT_MAP_WORDS: &[&str] = &["map", "show", "see", "available", "options"];

pub fn normalize_text(text: &str) -> String {
    text.to_ascii_lowercase()
}

pub fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_ascii_alphanumeric() || matches!(character, '\'' | '-') {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized.split_whitespace().map(|token| token.to_string()).collect()
}

fn mentions(tokens: &[String], words: &[&str]) -> bool {
    tokens.iter().any(|token| words.contains(&token.as_str()))
}

/// Which spoke a customer message belongs to, if any.
pub fn detect_intent(text: &str) -> Option<Intent> {
    let tokens = tokenize(&normalize_text(text));
    let seat = mentions(&tokens, SEAT_WORDS);

    if mentions(&tokens, CANCEL_WORDS) {
        Some(Intent::Cancellation)
    } else if mentions(&tokens, FOOD_WORDS) {
        Some(Intent::Food)
    } else if seat && mentions(&tokens, SEAT_CHANGE_WORDS) {
        Some(Intent::SeatBooking)
    } else if mentions(&tokens, STATUS_WORDS) {
        Some(Intent::FlightStatus)
    } else if mentions(&tokens, FAQ_WORDS) {
        Some(Intent::Faq)
    } else if seat {
        Some(Intent::SeatBooking)
    } else {
        None
    }
}

/// `AL100`, `FLT-123` and similar: two or three letters followed by digits.
fn flight_number_in(text: &str) -> Option<String> {
    text.split(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | '?' | '!'))
        .map(|word| word.to_ascii_uppercase())
        .find(|word| {
            let letters = word.chars().take_while(|c| c.is_ascii_alphabetic()).count();
            let rest = word[letters..].trim_start_matches('-');
            (2..=3).contains(&letters)
                && (1..=4).contains(&rest.len())
                && rest.chars().all(|c| c.is_ascii_digit())
        })
}

/// A seat answer such as `14` or `14C`.
fn seat_in(tokens: &[String]) -> Option<String> {
    tokens
        .iter()
        .find(|token| {
            let digits = token.chars().take_while(|c| c.is_ascii_digit()).count();
            digits > 0 && digits <= 3 && token.len() - digits <= 1
        })
        .map(|token| token.to_ascii_uppercase())
}

/// Accumulates the output of one invocation.
struct Turn<'a> {
    agent: &'a str,
    tools: &'a ToolScope,
    max_turns: u32,
    tool_calls: u32,
    context: SharedContext,
    items: Vec<OutputItem>,
}

impl<'a> Turn<'a> {
    fn new(request: &'a AgentRequest) -> Self {
        Self {
            agent: &request.agent.name,
            tools: &request.tools,
            max_turns: request.run_config.max_turns,
            tool_calls: 0,
            context: request.context.clone(),
            items: Vec::new(),
        }
    }

    fn say(&mut self, content: impl Into<String>) {
        self.items
            .push(OutputItem::Message { agent: self.agent.to_string(), content: content.into() });
    }

    fn hand_off(&mut self, target: &str) {
        self.items.push(OutputItem::Handoff {
            source: self.agent.to_string(),
            target: target.to_string(),
        });
    }

    async fn call(&mut self, name: &str, arguments: Value) -> Result<String, AgentError> {
        self.tool_calls += 1;
        if self.tool_calls > self.max_turns {
            return Err(AgentError::MaxTurnsExceeded(self.max_turns));
        }

        let call_id = format!("call_{}", Uuid::new_v4().simple());
        self.items.push(OutputItem::ToolCall {
            agent: self.agent.to_string(),
            call_id: call_id.clone(),
            name: name.to_string(),
            arguments: arguments.clone(),
        });
        let output = self.tools.call(name, arguments, &mut self.context).await?;
        self.items.push(OutputItem::ToolOutput {
            agent: self.agent.to_string(),
            call_id,
            output: output.clone(),
        });
        Ok(output)
    }
}

#[derive(Clone, Debug)]
pub struct KeywordAgent {
    registry: Registry,
}

impl KeywordAgent {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    fn agent_for(&self, role: AgentRole) -> Result<String, AgentError> {
        self.registry
            .by_role(role)
            .map(|spec| spec.name.clone())
            .map_err(|error| AgentError::Backend(error.to_string()))
    }

    async fn run_spoke(
        &self,
        role: AgentRole,
        text: &str,
        turn: &mut Turn<'_>,
    ) -> Result<(), AgentError> {
        let normalized = normalize_text(text);
        let tokens = tokenize(&normalized);

        match role {
            AgentRole::Triage => {}
            AgentRole::FlightStatus => {
                let Some(flight) =
                    flight_number_in(text).or_else(|| turn.context.flight_number.clone())
                else {
                    turn.say("Could you share your flight number?");
                    return Ok(());
                };
                let status =
                    turn.call(FLIGHT_STATUS_TOOL, json!({ "flight_number": &flight })).await?;
                turn.context.flight_number = Some(flight);
                turn.say(status);
            }
            AgentRole::Cancellation => {
                if mentions(&tokens, AFFIRMATIVE_WORDS) {
                    let outcome = turn.call(CANCEL_FLIGHT_TOOL, json!({})).await?;
                    turn.say(outcome);
                } else if mentions(&tokens, NEGATIVE_WORDS) {
                    turn.say(
                        "No problem, your booking stays as it is. Anything else I can help with?",
                    );
                } else {
                    let unknown = || "unknown".to_string();
                    let confirmation =
                        turn.context.confirmation_number.clone().unwrap_or_else(unknown);
                    let flight = turn.context.flight_number.clone().unwrap_or_else(unknown);
                    turn.say(format!(
                        "Your confirmation number is {confirmation} for flight {flight}. \
                         Shall I go ahead and cancel it?"
                    ));
                }
            }
            AgentRole::SeatBooking => {
                if let Some(seat) = seat_in(&tokens) {
                    let confirmation = turn.context.confirmation_number.clone().unwrap_or_default();
                    let outcome = turn
                        .call(
                            UPDATE_SEAT_TOOL,
                            json!({ "confirmation_number": confirmation, "new_seat": seat }),
                        )
                        .await?;
                    turn.say(outcome);
                } else if mentions(&tokens, SEAT_MAP_WORDS) {
                    let map = turn.call(DISPLAY_SEAT_MAP_TOOL, json!({})).await?;
                    turn.say(format!("Here is the seat map:\n{map}\nWhich seat would you like?"));
                } else {
                    turn.say("Which seat would you like? I can also show you the seat map.");
                }
            }
            AgentRole::Faq => {
                let answer = if normalized.contains("fee") || normalized.contains("allowance") {
                    turn.call(BAGGAGE_TOOL, json!({ "query": text })).await?
                } else {
                    turn.call(FAQ_LOOKUP_TOOL, json!({ "question": text })).await?
                };
                turn.say(answer);
            }
            AgentRole::Food => {
                let meals = turn.context.meals_or_default();
                let chosen = meals.iter().find(|meal| {
                    meal.split_whitespace()
                        .next()
                        .map(|word| tokens.contains(&word.to_ascii_lowercase()))
                        .unwrap_or(false)
                });
                match chosen.cloned() {
                    Some(meal) => {
                        let outcome = turn.call(ORDER_FOOD_TOOL, json!({ "meal": meal })).await?;
                        turn.say(outcome);
                    }
                    None => turn.say(format!(
                        "Available meals: {}. Which one would you like?",
                        meals.join(", ")
                    )),
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AgentCapability for KeywordAgent {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentRun, AgentError> {
        let text = latest_user_text(&request.transcript);
        let intent = detect_intent(&text);
        let role = request.agent.role;
        let mut turn = Turn::new(&request);

        if role.is_hub() {
            match intent {
                Some(intent) => {
                    let target = self.agent_for(intent.role())?;
                    turn.hand_off(&target);
                    turn.items.push(OutputItem::Message {
                        agent: target,
                        content: intent.greeting().to_string(),
                    });
                }
                None => turn.say(
                    "Welcome to Airloop! I can help with flight status, seat changes, \
                     cancellations, meals and airline questions. What can I do for you?",
                ),
            }
        } else if intent.is_some_and(|intent| intent.role() != role) {
            let hub = self.agent_for(AgentRole::Triage)?;
            turn.say("That is outside what I can help with, let me transfer you back.");
            turn.hand_off(&hub);
        } else {
            self.run_spoke(role, &text, &mut turn).await?;
        }

        let Turn { context, items, .. } = turn;
        Ok(AgentRun::from_items(request.transcript.clone(), items, context))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use airloop_core::domain::context::SharedContext;
    use airloop_core::domain::transcript::TranscriptItem;
    use airloop_core::registry::{
        AgentRole, Registry, CANCELLATION_AGENT, SEAT_BOOKING_AGENT, TRIAGE_AGENT,
    };
    use airloop_db::repositories::{BookingRepository, InMemoryBookingRepository};

    use super::{detect_intent, flight_number_in, Intent, KeywordAgent};
    use crate::llm::{AgentCapability, AgentRequest, OutputItem, RunConfig};
    use crate::tools::{ToolRegistry, ToolScope};

    fn request(
        registry: &Registry,
        tools: Arc<ToolRegistry>,
        role: AgentRole,
        text: &str,
        context: SharedContext,
    ) -> AgentRequest {
        let agent = registry.by_role(role).expect("registered role").clone();
        AgentRequest {
            tools: ToolScope::new(tools, &agent),
            agent,
            transcript: vec![TranscriptItem::user(text)],
            context,
            run_config: RunConfig {
                model: "keyword".to_string(),
                max_turns: 10,
                trace_id: "trace-1".to_string(),
                session_id: "session-1".to_string(),
            },
        }
    }

    #[test]
    fn intents_follow_keywords() {
        assert_eq!(detect_intent("I want to cancel my flight"), Some(Intent::Cancellation));
        assert_eq!(detect_intent("Can I change my seat?"), Some(Intent::SeatBooking));
        assert_eq!(detect_intent("Is AL100 delayed?"), Some(Intent::FlightStatus));
        assert_eq!(detect_intent("How many seats are on the plane?"), Some(Intent::Faq));
        assert_eq!(detect_intent("I'd like the beef"), Some(Intent::Food));
        assert_eq!(detect_intent("Hi"), None);
        assert_eq!(detect_intent("23"), None);
    }

    #[test]
    fn flight_numbers_are_recognised_in_free_text() {
        assert_eq!(flight_number_in("what about al200?"), Some("AL200".to_string()));
        assert_eq!(flight_number_in("flight FLT-123 please"), Some("FLT-123".to_string()));
        assert_eq!(flight_number_in("hello there"), None);
    }

    #[tokio::test]
    async fn hub_hands_off_with_a_greeting_from_the_target() {
        let registry = Registry::airline_default().expect("registry");
        let tools = Arc::new(ToolRegistry::default());
        let agent = KeywordAgent::new(registry.clone());

        let run = agent
            .invoke(request(
                &registry,
                tools,
                AgentRole::Triage,
                "I need to cancel my booking",
                SharedContext::default(),
            ))
            .await
            .expect("run");

        assert_eq!(
            run.items[0],
            OutputItem::Handoff {
                source: TRIAGE_AGENT.to_string(),
                target: CANCELLATION_AGENT.to_string()
            }
        );
        assert!(matches!(&run.items[1], OutputItem::Message { agent, .. } if agent == CANCELLATION_AGENT));
        assert_eq!(run.transcript.len(), 3);
    }

    #[tokio::test]
    async fn hub_greets_when_no_intent_is_found() {
        let registry = Registry::airline_default().expect("registry");
        let agent = KeywordAgent::new(registry.clone());

        let run = agent
            .invoke(request(
                &registry,
                Arc::new(ToolRegistry::default()),
                AgentRole::Triage,
                "Hi",
                SharedContext::default(),
            ))
            .await
            .expect("run");

        assert_eq!(run.items.len(), 1);
        assert!(matches!(&run.items[0], OutputItem::Message { agent, .. } if agent == TRIAGE_AGENT));
    }

    #[tokio::test]
    async fn seat_agent_updates_the_booked_seat_through_its_tool() {
        let registry = Registry::airline_default().expect("registry");
        let bookings = Arc::new(InMemoryBookingRepository::default());
        let order = bookings.create_order(4).await.expect("order");
        let tools = Arc::new(ToolRegistry::airline_default(bookings.clone()));
        let agent = KeywordAgent::new(registry.clone());
        let context = SharedContext {
            user_id: Some(4),
            order_id: Some(order.id),
            confirmation_number: Some("QW12ER".to_string()),
            ..SharedContext::default()
        };

        let run = agent
            .invoke(request(&registry, tools, AgentRole::SeatBooking, "12", context))
            .await
            .expect("run");

        let kinds: Vec<&str> = run
            .items
            .iter()
            .map(|item| match item {
                OutputItem::Message { .. } => "message",
                OutputItem::ToolCall { .. } => "tool_call",
                OutputItem::ToolOutput { .. } => "tool_output",
                OutputItem::Handoff { .. } => "handoff",
            })
            .collect();
        assert_eq!(kinds, vec!["tool_call", "tool_output", "message"]);
        assert_eq!(run.context.seat_number.as_deref(), Some("12"));
        let stored = bookings.find_order(order.id, 4).await.expect("find").expect("exists");
        assert_eq!(stored.seat_number, 12);
    }

    #[tokio::test]
    async fn spoke_returns_off_topic_requests_to_the_hub() {
        let registry = Registry::airline_default().expect("registry");
        let agent = KeywordAgent::new(registry.clone());

        let run = agent
            .invoke(request(
                &registry,
                Arc::new(ToolRegistry::default()),
                AgentRole::SeatBooking,
                "Actually, what meals do you have?",
                SharedContext::default(),
            ))
            .await
            .expect("run");

        assert_eq!(
            run.items.last(),
            Some(&OutputItem::Handoff {
                source: SEAT_BOOKING_AGENT.to_string(),
                target: TRIAGE_AGENT.to_string()
            })
        );
    }
}
