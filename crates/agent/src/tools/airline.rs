use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use airloop_core::domain::context::SharedContext;
use airloop_core::registry::{
    BAGGAGE_TOOL, CANCEL_FLIGHT_TOOL, DISPLAY_SEAT_MAP_TOOL, FAQ_LOOKUP_TOOL, FLIGHT_STATUS_TOOL,
    ORDER_FOOD_TOOL, UPDATE_SEAT_TOOL,
};
use airloop_db::repositories::{BookingRepository, RepositoryError};

use super::{Tool, ToolError};

const ORDER_NOT_FOUND: &str = "Order not found.";

fn optional_text(arguments: &Value, key: &str) -> Option<String> {
    match arguments.get(key)? {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn required_text(tool: &str, arguments: &Value, key: &str) -> Result<String, ToolError> {
    optional_text(arguments, key).ok_or_else(|| ToolError::InvalidArguments {
        tool: tool.to_string(),
        message: format!("missing string argument `{key}`"),
    })
}

/// User and order linkage every booking mutation needs, or the refusal to return.
fn linkage(context: &SharedContext, action: &str) -> Result<(i64, i64), String> {
    let user_id = context.user_id.ok_or_else(|| format!("User ID is required to {action}."))?;
    let order_id = context.order_id.ok_or_else(|| format!("Order ID is required to {action}."))?;
    Ok((user_id, order_id))
}

pub struct FlightStatusTool {
    bookings: Arc<dyn BookingRepository>,
}

impl FlightStatusTool {
    pub fn new(bookings: Arc<dyn BookingRepository>) -> Self {
        Self { bookings }
    }
}

#[async_trait]
impl Tool for FlightStatusTool {
    fn name(&self) -> &'static str {
        FLIGHT_STATUS_TOOL
    }

    fn description(&self) -> &'static str {
        "Lookup status for a flight."
    }

    async fn call(
        &self,
        arguments: Value,
        _context: &mut SharedContext,
    ) -> Result<String, ToolError> {
        let flight_number = required_text(self.name(), &arguments, "flight_number")?;
        Ok(match self.bookings.find_flight(&flight_number).await? {
            Some(flight) => format!(
                "Flight {} is on time. Seat range: {}-{}.",
                flight.flight_number, flight.seat_start, flight.seat_end
            ),
            None => format!("Flight {flight_number} was not found."),
        })
    }
}

pub struct CancelFlightTool {
    bookings: Arc<dyn BookingRepository>,
}

impl CancelFlightTool {
    pub fn new(bookings: Arc<dyn BookingRepository>) -> Self {
        Self { bookings }
    }
}

#[async_trait]
impl Tool for CancelFlightTool {
    fn name(&self) -> &'static str {
        CANCEL_FLIGHT_TOOL
    }

    fn description(&self) -> &'static str {
        "Cancel the flight booked in the current order."
    }

    async fn call(
        &self,
        _arguments: Value,
        context: &mut SharedContext,
    ) -> Result<String, ToolError> {
        let (user_id, order_id) = match linkage(context, "cancel a flight") {
            Ok(linkage) => linkage,
            Err(refusal) => return Ok(refusal),
        };
        let Some(order) = self.bookings.find_order(order_id, user_id).await? else {
            return Ok(ORDER_NOT_FOUND.to_string());
        };

        match self.bookings.cancel_order(order_id, user_id).await {
            Ok(()) => {}
            Err(RepositoryError::NotFound(_)) => return Ok(ORDER_NOT_FOUND.to_string()),
            Err(error) => return Err(error.into()),
        }
        context.order_id = None;
        Ok(format!("Flight {} successfully cancelled.", order.flight.flight_number))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BaggageTool;

#[async_trait]
impl Tool for BaggageTool {
    fn name(&self) -> &'static str {
        BAGGAGE_TOOL
    }

    fn description(&self) -> &'static str {
        "Answer baggage fee and allowance questions."
    }

    async fn call(
        &self,
        arguments: Value,
        _context: &mut SharedContext,
    ) -> Result<String, ToolError> {
        let query = optional_text(&arguments, "query").unwrap_or_default().to_ascii_lowercase();
        let answer = if query.contains("fee") {
            "Overweight bag fee is $75."
        } else if query.contains("allowance") {
            "One carry-on and one checked bag (up to 50 lbs) are included."
        } else {
            "Please provide details about your baggage inquiry."
        };
        Ok(answer.to_string())
    }
}

pub struct UpdateSeatTool {
    bookings: Arc<dyn BookingRepository>,
}

impl UpdateSeatTool {
    pub fn new(bookings: Arc<dyn BookingRepository>) -> Self {
        Self { bookings }
    }
}

#[async_trait]
impl Tool for UpdateSeatTool {
    fn name(&self) -> &'static str {
        UPDATE_SEAT_TOOL
    }

    fn description(&self) -> &'static str {
        "Update the seat for a given confirmation number."
    }

    async fn call(
        &self,
        arguments: Value,
        context: &mut SharedContext,
    ) -> Result<String, ToolError> {
        let confirmation_number = required_text(self.name(), &arguments, "confirmation_number")?;
        let new_seat = required_text(self.name(), &arguments, "new_seat")?;

        let (user_id, order_id) = match linkage(context, "update a seat") {
            Ok(linkage) => linkage,
            Err(refusal) => return Ok(refusal),
        };
        let Ok(seat) = new_seat.parse::<i64>() else {
            return Ok("Seat number must be a number.".to_string());
        };
        let Some(order) = self.bookings.find_order(order_id, user_id).await? else {
            return Ok(ORDER_NOT_FOUND.to_string());
        };
        if !order.flight.contains_seat(seat) {
            return Ok(format!(
                "Seat {seat} is outside the allowed range {}-{}.",
                order.flight.seat_start, order.flight.seat_end
            ));
        }

        match self.bookings.update_order(order_id, user_id, Some(seat), None).await {
            Ok(_) => {}
            Err(RepositoryError::NotFound(_) | RepositoryError::Conflict(_)) => {
                return Ok(ORDER_NOT_FOUND.to_string())
            }
            Err(error) => return Err(error.into()),
        }

        context.confirmation_number = Some(confirmation_number.clone());
        context.seat_number = Some(seat.to_string());
        Ok(format!("Updated seat to {seat} for confirmation number {confirmation_number}"))
    }
}

pub struct DisplaySeatMapTool {
    bookings: Arc<dyn BookingRepository>,
}

impl DisplaySeatMapTool {
    pub fn new(bookings: Arc<dyn BookingRepository>) -> Self {
        Self { bookings }
    }
}

#[async_trait]
impl Tool for DisplaySeatMapTool {
    fn name(&self) -> &'static str {
        DISPLAY_SEAT_MAP_TOOL
    }

    fn description(&self) -> &'static str {
        "Show the seat map of the booked flight so the customer can pick a seat."
    }

    async fn call(
        &self,
        _arguments: Value,
        context: &mut SharedContext,
    ) -> Result<String, ToolError> {
        let (user_id, order_id) = match linkage(context, "display seats") {
            Ok(linkage) => linkage,
            Err(refusal) => return Ok(refusal),
        };
        Ok(match self.bookings.find_order(order_id, user_id).await? {
            Some(order) => order.flight.seat_map(),
            None => ORDER_NOT_FOUND.to_string(),
        })
    }
}

pub struct OrderFoodTool {
    bookings: Arc<dyn BookingRepository>,
}

impl OrderFoodTool {
    pub fn new(bookings: Arc<dyn BookingRepository>) -> Self {
        Self { bookings }
    }
}

#[async_trait]
impl Tool for OrderFoodTool {
    fn name(&self) -> &'static str {
        ORDER_FOOD_TOOL
    }

    fn description(&self) -> &'static str {
        "Order one of the available meals for the current booking."
    }

    async fn call(
        &self,
        arguments: Value,
        context: &mut SharedContext,
    ) -> Result<String, ToolError> {
        let (user_id, order_id) = match linkage(context, "order food") {
            Ok(linkage) => linkage,
            Err(refusal) => return Ok(refusal),
        };
        let requested = optional_text(&arguments, "meal").unwrap_or_default();
        if requested.is_empty() {
            return Ok("Please specify a meal to order.".to_string());
        }

        let meals = context.meals_or_default();
        let Some(meal) = meals.iter().find(|meal| meal.eq_ignore_ascii_case(&requested)).cloned()
        else {
            return Ok(format!(
                "Meal '{requested}' is not available. Available meals: {}",
                meals.join(", ")
            ));
        };

        match self.bookings.update_order(order_id, user_id, None, Some(meal.clone())).await {
            Ok(_) => {}
            Err(RepositoryError::NotFound(_) | RepositoryError::Conflict(_)) => {
                return Ok(ORDER_NOT_FOUND.to_string())
            }
            Err(error) => return Err(error.into()),
        }

        context.meal_selection = Some(meal.clone());
        Ok(format!("Order placed for: {meal}"))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FaqLookupTool;

#[async_trait]
impl Tool for FaqLookupTool {
    fn name(&self) -> &'static str {
        FAQ_LOOKUP_TOOL
    }

    fn description(&self) -> &'static str {
        "Lookup frequently asked questions."
    }

    async fn call(
        &self,
        arguments: Value,
        _context: &mut SharedContext,
    ) -> Result<String, ToolError> {
        let question =
            optional_text(&arguments, "question").unwrap_or_default().to_ascii_lowercase();
        let answer = if question.contains("bag") || question.contains("baggage") {
            "You are allowed to bring one bag on the plane. It must be under 50 pounds and 22 \
             inches x 14 inches x 9 inches."
        } else if question.contains("seats") || question.contains("plane") {
            "There are 120 seats on the plane. There are 22 business class seats and 98 economy \
             seats. Exit rows are rows 4 and 16. Rows 5-8 are Economy Plus, with extra legroom."
        } else if question.contains("wifi") {
            "We have free wifi on the plane, join Airline-Wifi"
        } else {
            "I'm sorry, I don't know the answer to that question."
        };
        Ok(answer.to_string())
    }
}
