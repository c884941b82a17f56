use std::fmt;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::domain::context::{is_unset, SharedContext};

/// Side effect run exactly once while a handoff into its agent is applied.
///
/// Hooks only fill fields that are still unknown; blank strings count as unknown.
pub trait HandoffHook: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;
    fn apply(&self, context: &mut SharedContext);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FillCancellationIdentifiers;

impl HandoffHook for FillCancellationIdentifiers {
    fn name(&self) -> &'static str {
        "fill_cancellation_identifiers"
    }

    fn apply(&self, context: &mut SharedContext) {
        let mut rng = rand::thread_rng();
        if is_unset(&context.confirmation_number) {
            context.confirmation_number = Some(confirmation_code(&mut rng));
        }
        if is_unset(&context.flight_number) {
            context.flight_number = Some(format!("FLT-{}", rng.gen_range(100..=999)));
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FillSeatBookingIdentifiers;

impl HandoffHook for FillSeatBookingIdentifiers {
    fn name(&self) -> &'static str {
        "fill_seat_booking_identifiers"
    }

    fn apply(&self, context: &mut SharedContext) {
        let mut rng = rand::thread_rng();
        if is_unset(&context.flight_number) {
            context.flight_number = Some(format!("AL{}", rng.gen_range(100..=999)));
        }
        if is_unset(&context.confirmation_number) {
            context.confirmation_number = Some(confirmation_code(&mut rng));
        }
    }
}

/// Six upper-case alphanumeric characters.
pub fn confirmation_code<R: Rng>(rng: &mut R) -> String {
    rng.sample_iter(&Alphanumeric)
        .map(|byte| (byte as char).to_ascii_uppercase())
        .take(6)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{confirmation_code, FillCancellationIdentifiers, FillSeatBookingIdentifiers, HandoffHook};
    use crate::domain::context::SharedContext;

    #[test]
    fn cancellation_hook_fills_missing_identifiers() {
        let mut context = SharedContext::default();
        FillCancellationIdentifiers.apply(&mut context);

        let confirmation = context.confirmation_number.clone().unwrap_or_default();
        assert_eq!(confirmation.len(), 6);
        assert!(confirmation.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert!(context.flight_number.as_deref().unwrap_or_default().starts_with("FLT-"));
    }

    #[test]
    fn hooks_never_overwrite_known_values() {
        let mut context = SharedContext {
            confirmation_number: Some("KEEP01".to_string()),
            flight_number: Some("AL100".to_string()),
            ..SharedContext::default()
        };

        FillCancellationIdentifiers.apply(&mut context);
        FillSeatBookingIdentifiers.apply(&mut context);

        assert_eq!(context.confirmation_number.as_deref(), Some("KEEP01"));
        assert_eq!(context.flight_number.as_deref(), Some("AL100"));
    }

    #[test]
    fn hooks_replace_blank_identifiers() {
        let mut context = SharedContext {
            confirmation_number: Some(String::new()),
            flight_number: Some(" ".to_string()),
            ..SharedContext::default()
        };

        FillCancellationIdentifiers.apply(&mut context);

        assert_eq!(context.confirmation_number.as_deref().map(str::len), Some(6));
        assert!(context.flight_number.as_deref().unwrap_or_default().starts_with("FLT-"));
    }

    #[test]
    fn seat_booking_hook_uses_airline_flight_prefix() {
        let mut context = SharedContext::default();
        FillSeatBookingIdentifiers.apply(&mut context);

        let flight = context.flight_number.unwrap_or_default();
        assert!(flight.starts_with("AL"));
        assert_eq!(flight.len(), 5);
        assert!(context.confirmation_number.is_some());
    }

    #[test]
    fn confirmation_codes_are_six_characters() {
        let mut rng = rand::thread_rng();
        for _ in 0..32 {
            assert_eq!(confirmation_code(&mut rng).len(), 6);
        }
    }
}
