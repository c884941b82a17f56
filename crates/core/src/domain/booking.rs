use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flight {
    pub id: i64,
    pub flight_number: String,
    pub seat_start: i64,
    pub seat_end: i64,
}

impl Flight {
    pub fn contains_seat(&self, seat: i64) -> bool {
        (self.seat_start..=self.seat_end).contains(&seat)
    }

    /// Seat numbers laid out four per row.
    pub fn seat_map(&self) -> String {
        let seats: Vec<String> = (self.seat_start..=self.seat_end).map(|s| s.to_string()).collect();
        seats.chunks(4).map(|row| row.join(" ")).collect::<Vec<_>>().join("\n")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Active,
    Canceled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "canceled" | "cancelled" => Self::Canceled,
            _ => Self::Active,
        }
    }
}

/// A passenger's booking on one flight.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub flight: Flight,
    pub confirmation_number: Option<String>,
    pub seat_number: i64,
    pub meal_selection: Option<String>,
    pub status: OrderStatus,
}

impl Order {
    pub fn is_canceled(&self) -> bool {
        self.status == OrderStatus::Canceled
    }
}
