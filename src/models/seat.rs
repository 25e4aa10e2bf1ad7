use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Location {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub id: i64,
    pub location_id: i64,
    pub label: String,
    #[sqlx(rename = "seat_row")]
    pub row: i32,
    #[sqlx(rename = "seat_number")]
    pub number: i32,
}

impl Seat {
    // Место можно бронировать только на события в его локации
    pub fn is_at(&self, location_id: i64) -> bool {
        self.location_id == location_id
    }
}
