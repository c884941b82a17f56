use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

const DEMO_PASSENGER_NAMES: &[&str] = &["Mike", "Amy", "Fred", "Cinderella", "Alice", "Bob"];

pub const DEFAULT_MEALS: &[&str] = &["Chicken set", "Beef set", "Vegetarian set"];

/// Passenger and booking attributes shared by every agent and tool of a session.
///
/// `None` means "unknown": the active agent is expected to ask the customer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedContext {
    pub passenger_name: Option<String>,
    pub confirmation_number: Option<String>,
    pub seat_number: Option<String>,
    pub flight_number: Option<String>,
    pub account_number: Option<String>,
    pub meal_preference: Option<String>,
    pub meal_selection: Option<String>,
    #[serde(default)]
    pub available_meals: Vec<String>,
    pub user_id: Option<i64>,
    pub order_id: Option<i64>,
}

/// Caller-supplied linkage applied when a session is created or authenticated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapContext {
    pub user_id: Option<i64>,
    pub order_id: Option<i64>,
    pub passenger_name: Option<String>,
    pub account_number: Option<String>,
    pub confirmation_number: Option<String>,
    pub flight_number: Option<String>,
}

impl SharedContext {
    /// Builds the context of a brand new session.
    ///
    /// Missing account number and passenger name are filled with demo values.
    pub fn bootstrap(bootstrap: Option<&BootstrapContext>) -> Self {
        let mut rng = rand::thread_rng();
        let mut context = Self {
            available_meals: DEFAULT_MEALS.iter().map(|meal| (*meal).to_string()).collect(),
            ..Self::default()
        };
        if let Some(bootstrap) = bootstrap {
            context.fill_from(bootstrap);
        }
        if is_unset(&context.account_number) {
            context.account_number = Some(rng.gen_range(10_000_000..=99_999_999).to_string());
        }
        if is_unset(&context.passenger_name) {
            context.passenger_name =
                DEMO_PASSENGER_NAMES.choose(&mut rng).map(|name| (*name).to_string());
        }
        context
    }

    /// Copies bootstrap values into fields that are still unknown.
    ///
    /// Blank strings carry no information and never become field values.
    pub fn fill_from(&mut self, bootstrap: &BootstrapContext) {
        fill(&mut self.user_id, bootstrap.user_id);
        fill(&mut self.order_id, bootstrap.order_id);
        fill_text(&mut self.passenger_name, bootstrap.passenger_name.as_deref());
        fill_text(&mut self.account_number, bootstrap.account_number.as_deref());
        fill_text(&mut self.confirmation_number, bootstrap.confirmation_number.as_deref());
        fill_text(&mut self.flight_number, bootstrap.flight_number.as_deref());
    }

    pub fn meals_or_default(&self) -> Vec<String> {
        if self.available_meals.is_empty() {
            DEFAULT_MEALS.iter().map(|meal| (*meal).to_string()).collect()
        } else {
            self.available_meals.clone()
        }
    }
}

/// A text field is unset when it is missing or only whitespace.
pub fn is_unset(field: &Option<String>) -> bool {
    field.as_deref().map_or(true, |value| value.trim().is_empty())
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

fn fill_text(slot: &mut Option<String>, value: Option<&str>) {
    if is_unset(slot) {
        *slot = value.map(str::trim).filter(|value| !value.is_empty()).map(str::to_string);
    }
}

#[cfg(test)]
mod tests {
    use super::{is_unset, BootstrapContext, SharedContext, DEFAULT_MEALS};

    #[test]
    fn bootstrap_generates_demo_account_and_default_meals() {
        let context = SharedContext::bootstrap(None);

        let account = context.account_number.clone().unwrap_or_default();
        assert_eq!(account.len(), 8);
        assert!(account.chars().all(|c| c.is_ascii_digit()));
        assert!(context.passenger_name.is_some());
        assert_eq!(context.available_meals.len(), DEFAULT_MEALS.len());
        assert!(context.confirmation_number.is_none());
        assert!(context.flight_number.is_none());
    }

    #[test]
    fn bootstrap_keeps_caller_supplied_linkage() {
        let context = SharedContext::bootstrap(Some(&BootstrapContext {
            user_id: Some(7),
            order_id: Some(42),
            account_number: Some("12345678".to_string()),
            ..BootstrapContext::default()
        }));

        assert_eq!(context.user_id, Some(7));
        assert_eq!(context.order_id, Some(42));
        assert_eq!(context.account_number.as_deref(), Some("12345678"));
    }

    #[test]
    fn fill_from_never_overwrites_known_values() {
        let mut context = SharedContext {
            confirmation_number: Some("ABC123".to_string()),
            ..SharedContext::default()
        };
        context.fill_from(&BootstrapContext {
            confirmation_number: Some("ZZZ999".to_string()),
            user_id: Some(3),
            ..BootstrapContext::default()
        });

        assert_eq!(context.confirmation_number.as_deref(), Some("ABC123"));
        assert_eq!(context.user_id, Some(3));
    }

    #[test]
    fn blank_bootstrap_values_stay_unset() {
        let context = SharedContext::bootstrap(Some(&BootstrapContext {
            confirmation_number: Some(String::new()),
            flight_number: Some("   ".to_string()),
            account_number: Some(String::new()),
            ..BootstrapContext::default()
        }));

        assert!(context.confirmation_number.is_none());
        assert!(context.flight_number.is_none());
        assert_eq!(context.account_number.as_deref().map(str::len), Some(8));
    }

    #[test]
    fn blank_fields_accept_later_bootstrap_values() {
        let mut context = SharedContext {
            flight_number: Some(String::new()),
            ..SharedContext::default()
        };
        assert!(is_unset(&context.flight_number));

        context.fill_from(&BootstrapContext {
            flight_number: Some("AL200".to_string()),
            ..BootstrapContext::default()
        });

        assert_eq!(context.flight_number.as_deref(), Some("AL200"));
    }
}
