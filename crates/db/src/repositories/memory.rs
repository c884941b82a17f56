use std::collections::{BTreeMap, HashMap};

use rand::Rng;
use tokio::sync::RwLock;

use airloop_core::domain::booking::{Flight, Order, OrderStatus};
use airloop_core::domain::session::{Session, SessionId, SessionSummary};

use super::booking::random_confirmation;
use super::{BookingRepository, RepositoryError, SessionRepository};

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, Session>>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(id.as_str()).cloned())
    }

    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let mut incoming = session.clone();

        if let Some(stored) = sessions.get(session.id.as_str()) {
            if stored.round_counter > session.round_counter {
                return Err(RepositoryError::Conflict(format!(
                    "session `{}` is at round {}, refusing to write round counter {}",
                    session.id, stored.round_counter, session.round_counter
                )));
            }
            for (round, record) in &stored.rounds {
                incoming.rounds.insert(*round, record.clone());
            }
            incoming.created_at = stored.created_at;
        }

        sessions.insert(session.id.0.clone(), incoming);
        Ok(())
    }

    async fn list(&self, limit: u32) -> Result<Vec<SessionSummary>, RepositoryError> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = sessions.values().map(Session::summary).collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries.truncate(limit as usize);
        Ok(summaries)
    }
}

struct BookingState {
    flights: Vec<Flight>,
    orders: BTreeMap<i64, Order>,
    next_order_id: i64,
}

/// Booking store seeded with the same flights as the migrations.
pub struct InMemoryBookingRepository {
    state: RwLock<BookingState>,
}

impl Default for InMemoryBookingRepository {
    fn default() -> Self {
        let flights = [("AL100", 1, 30), ("AL200", 1, 24), ("AL300", 1, 36)]
            .into_iter()
            .enumerate()
            .map(|(index, (number, start, end))| Flight {
                id: index as i64 + 1,
                flight_number: number.to_string(),
                seat_start: start,
                seat_end: end,
            })
            .collect();
        Self {
            state: RwLock::new(BookingState {
                flights,
                orders: BTreeMap::new(),
                next_order_id: 1,
            }),
        }
    }
}

#[async_trait::async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn find_flight(&self, flight_number: &str) -> Result<Option<Flight>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.flights.iter().find(|flight| flight.flight_number == flight_number).cloned())
    }

    async fn find_order(
        &self,
        order_id: i64,
        user_id: i64,
    ) -> Result<Option<Order>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.orders.get(&order_id).filter(|order| order.user_id == user_id).cloned())
    }

    async fn list_orders(&self, user_id: i64) -> Result<Vec<Order>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.orders.values().rev().filter(|order| order.user_id == user_id).cloned().collect())
    }

    async fn create_order(&self, user_id: i64) -> Result<Order, RepositoryError> {
        let mut state = self.state.write().await;
        let flight = state
            .flights
            .first()
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound("no flights available".to_string()))?;

        let confirmation = loop {
            let candidate = random_confirmation();
            let taken = state
                .orders
                .values()
                .any(|order| order.confirmation_number.as_deref() == Some(candidate.as_str()));
            if !taken {
                break candidate;
            }
        };

        let order = Order {
            id: state.next_order_id,
            user_id,
            seat_number: rand::thread_rng().gen_range(flight.seat_start..=flight.seat_end),
            flight,
            confirmation_number: Some(confirmation),
            meal_selection: None,
            status: OrderStatus::Active,
        };
        state.next_order_id += 1;
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn update_order(
        &self,
        order_id: i64,
        user_id: i64,
        seat_number: Option<i64>,
        meal_selection: Option<String>,
    ) -> Result<Order, RepositoryError> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .filter(|order| order.user_id == user_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("order {order_id}")))?;
        if order.is_canceled() {
            return Err(RepositoryError::Conflict(format!("order {order_id} is canceled")));
        }

        if let Some(seat) = seat_number {
            order.seat_number = seat;
        }
        if meal_selection.is_some() {
            order.meal_selection = meal_selection;
        }
        Ok(order.clone())
    }

    async fn cancel_order(&self, order_id: i64, user_id: i64) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .filter(|order| order.user_id == user_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("order {order_id}")))?;
        order.status = OrderStatus::Canceled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use airloop_core::domain::context::SharedContext;
    use airloop_core::domain::session::{RoundOutcome, RoundRecord, Session, SessionId};

    use crate::repositories::{
        BookingRepository, InMemoryBookingRepository, InMemorySessionRepository, RepositoryError,
        SessionRepository,
    };

    fn record(round: u64, trace_id: &str) -> RoundRecord {
        RoundRecord {
            round,
            agent: "Triage Agent".to_string(),
            trace_id: trace_id.to_string(),
            input_items: Vec::new(),
            events: Vec::new(),
            messages: Vec::new(),
            guardrails: Vec::new(),
            outcome: RoundOutcome::Completed,
            anomalies: Vec::new(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn in_memory_session_repo_keeps_first_write_of_each_round() {
        let repo = InMemorySessionRepository::default();
        let mut session =
            Session::new(SessionId("s-1".to_string()), "Triage Agent", SharedContext::default());
        session.commit_round(record(0, "trace-a")).expect("commit");
        repo.save(&session).await.expect("save");

        if let Some(round) = session.rounds.get_mut(&0) {
            round.trace_id = "trace-b".to_string();
        }
        repo.save(&session).await.expect("resave");

        let found = repo.find(&session.id).await.expect("find").expect("exists");
        assert_eq!(found.rounds[&0].trace_id, "trace-a");
    }

    #[tokio::test]
    async fn in_memory_session_repo_rejects_stale_writes() {
        let repo = InMemorySessionRepository::default();
        let stale =
            Session::new(SessionId("s-2".to_string()), "Triage Agent", SharedContext::default());
        let mut fresh = stale.clone();
        fresh.commit_round(record(0, "trace-0")).expect("commit");
        repo.save(&fresh).await.expect("save");

        let error = repo.save(&stale).await.expect_err("stale");
        assert!(matches!(error, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn in_memory_session_repo_lists_most_recent_first() {
        let repo = InMemorySessionRepository::default();
        let now = Utc::now();
        for (offset, id) in ["a", "b", "c"].iter().enumerate() {
            let mut session =
                Session::new(SessionId(id.to_string()), "Triage Agent", SharedContext::default());
            session.updated_at = now + Duration::seconds(offset as i64);
            repo.save(&session).await.expect("save");
        }

        let listed = repo.list(2).await.expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id.as_str(), "c");
        assert_eq!(listed[1].id.as_str(), "b");
    }

    #[tokio::test]
    async fn in_memory_booking_repo_mirrors_sql_rules() {
        let repo = InMemoryBookingRepository::default();
        let order = repo.create_order(11).await.expect("create");
        assert_eq!(order.flight.flight_number, "AL100");
        assert!(order.flight.contains_seat(order.seat_number));

        let updated = repo.update_order(order.id, 11, Some(4), None).await.expect("update");
        assert_eq!(updated.seat_number, 4);

        assert!(repo.find_order(order.id, 12).await.expect("find").is_none());

        repo.cancel_order(order.id, 11).await.expect("cancel");
        let error = repo.update_order(order.id, 11, None, Some("Beef set".to_string())).await;
        assert!(matches!(error, Err(RepositoryError::Conflict(_))));
        assert_eq!(repo.list_orders(11).await.expect("list").len(), 1);
        assert!(repo.find_flight("AL300").await.expect("flight").is_some());
    }
}
