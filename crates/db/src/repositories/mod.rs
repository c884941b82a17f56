use async_trait::async_trait;
use thiserror::Error;

use airloop_core::domain::booking::{Flight, Order};
use airloop_core::domain::session::{Session, SessionId, SessionSummary};
use airloop_core::errors::ApplicationError;

pub mod booking;
pub mod memory;
pub mod session;

pub use booking::SqlBookingRepository;
pub use memory::{InMemoryBookingRepository, InMemorySessionRepository};
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        ApplicationError::Persistence(error.to_string())
    }
}

/// Durable home of sessions and their round records.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError>;

    /// Stores the session row and every round not yet stored, atomically.
    ///
    /// Stored rounds are never rewritten. Saving a session whose round counter
    /// is behind the stored one is a [`RepositoryError::Conflict`].
    async fn save(&self, session: &Session) -> Result<(), RepositoryError>;

    async fn list(&self, limit: u32) -> Result<Vec<SessionSummary>, RepositoryError>;
}

/// Flights and orders the airline tools read and mutate.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn find_flight(&self, flight_number: &str) -> Result<Option<Flight>, RepositoryError>;

    async fn find_order(&self, order_id: i64, user_id: i64)
        -> Result<Option<Order>, RepositoryError>;

    async fn list_orders(&self, user_id: i64) -> Result<Vec<Order>, RepositoryError>;

    /// Books the first flight with a fresh confirmation number and a random seat.
    async fn create_order(&self, user_id: i64) -> Result<Order, RepositoryError>;

    async fn update_order(
        &self,
        order_id: i64,
        user_id: i64,
        seat_number: Option<i64>,
        meal_selection: Option<String>,
    ) -> Result<Order, RepositoryError>;

    async fn cancel_order(&self, order_id: i64, user_id: i64) -> Result<(), RepositoryError>;
}
