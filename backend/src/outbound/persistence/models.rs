//! Internal Diesel row structs for database operations.
//!
//! These types never leave the persistence layer.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use super::schema::rate_limit_windows;

/// Row struct for reading rate-limit windows, from the table or from a
/// `RETURNING` clause.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = rate_limit_windows)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct RateLimitWindowRow {
    pub actor_id: Uuid,
    pub endpoint: String,
    pub window_start: DateTime<Utc>,
    pub request_count: i32,
}
