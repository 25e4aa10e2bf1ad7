use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Remaining seat quota of one user for one event. `remaining` never drops below zero.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allowance {
    pub user_id: i64,
    pub event_id: i64,
    pub remaining: i32,
}
