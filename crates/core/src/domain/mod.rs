pub mod booking;
pub mod context;
pub mod event;
pub mod guardrail;
pub mod session;
pub mod transcript;
