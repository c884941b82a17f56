use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::Row;

use airloop_core::domain::booking::{Flight, Order, OrderStatus};

use super::{BookingRepository, RepositoryError};
use crate::DbPool;

const ORDER_COLUMNS: &str = "orders.id, orders.user_id, orders.confirmation_number,
        orders.seat_number, orders.meal_selection, orders.status,
        flights.id AS flight_id, flights.flight_number, flights.seat_start, flights.seat_end";

pub struct SqlBookingRepository {
    pool: DbPool,
}

impl SqlBookingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn random_confirmation() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(|byte| (byte as char).to_ascii_uppercase())
        .take(6)
        .collect()
}

fn row_to_flight(row: &sqlx::sqlite::SqliteRow, id_column: &str) -> Result<Flight, RepositoryError> {
    Ok(Flight {
        id: row.try_get(id_column).map_err(|e| RepositoryError::Decode(e.to_string()))?,
        flight_number: row
            .try_get("flight_number")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        seat_start: row.try_get("seat_start").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        seat_end: row.try_get("seat_end").map_err(|e| RepositoryError::Decode(e.to_string()))?,
    })
}

fn row_to_order(row: &sqlx::sqlite::SqliteRow) -> Result<Order, RepositoryError> {
    let status: String = row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    Ok(Order {
        id: row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        user_id: row.try_get("user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        flight: row_to_flight(row, "flight_id")?,
        confirmation_number: row
            .try_get("confirmation_number")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        seat_number: row
            .try_get("seat_number")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        meal_selection: row
            .try_get("meal_selection")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        status: OrderStatus::parse(&status),
    })
}

#[async_trait::async_trait]
impl BookingRepository for SqlBookingRepository {
    async fn find_flight(&self, flight_number: &str) -> Result<Option<Flight>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, flight_number, seat_start, seat_end FROM flights WHERE flight_number = ?",
        )
        .bind(flight_number)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(|row| row_to_flight(row, "id")).transpose()
    }

    async fn find_order(
        &self,
        order_id: i64,
        user_id: i64,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS}
             FROM orders JOIN flights ON orders.flight_id = flights.id
             WHERE orders.id = ? AND orders.user_id = ?"
        ))
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn list_orders(&self, user_id: i64) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS}
             FROM orders JOIN flights ON orders.flight_id = flights.id
             WHERE orders.user_id = ?
             ORDER BY orders.id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_order).collect()
    }

    async fn create_order(&self, user_id: i64) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let flight = sqlx::query(
            "SELECT id, flight_number, seat_start, seat_end FROM flights ORDER BY id LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await?
        .as_ref()
        .map(|row| row_to_flight(row, "id"))
        .transpose()?
        .ok_or_else(|| RepositoryError::NotFound("no flights available".to_string()))?;

        let confirmation = loop {
            let candidate = random_confirmation();
            let taken: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM orders WHERE confirmation_number = ?")
                    .bind(&candidate)
                    .fetch_optional(&mut *tx)
                    .await?;
            if taken.is_none() {
                break candidate;
            }
        };
        let seat_number = rand::thread_rng().gen_range(flight.seat_start..=flight.seat_end);

        let result = sqlx::query(
            "INSERT INTO orders (user_id, flight_id, confirmation_number, seat_number, status)
             VALUES (?, ?, ?, ?, 'active')",
        )
        .bind(user_id)
        .bind(flight.id)
        .bind(&confirmation)
        .bind(seat_number)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Order {
            id: result.last_insert_rowid(),
            user_id,
            flight,
            confirmation_number: Some(confirmation),
            seat_number,
            meal_selection: None,
            status: OrderStatus::Active,
        })
    }

    async fn update_order(
        &self,
        order_id: i64,
        user_id: i64,
        seat_number: Option<i64>,
        meal_selection: Option<String>,
    ) -> Result<Order, RepositoryError> {
        let mut order = self
            .find_order(order_id, user_id)
            .await?
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

        sqlx::query(
            "UPDATE orders SET seat_number = ?, meal_selection = ?
             WHERE id = ? AND user_id = ? AND status != 'canceled'",
        )
        .bind(order.seat_number)
        .bind(&order.meal_selection)
        .bind(order_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(order)
    }

    async fn cancel_order(&self, order_id: i64, user_id: i64) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE orders SET status = 'canceled' WHERE id = ? AND user_id = ?")
                .bind(order_id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("order {order_id}")));
        }
        Ok(())
    }
}
