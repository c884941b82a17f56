pub mod engine;
pub mod hooks;

pub use engine::{HandoffMachine, HandoffTransition};
pub use hooks::{FillCancellationIdentifiers, FillSeatBookingIdentifiers, HandoffHook};
