//! PostgreSQL persistence adapters using Diesel with `diesel-async` and a
//! `bb8` pool.
//!
//! Row structs (`models.rs`) and table definitions (`schema.rs`) stay
//! private to this module; adapters translate them into domain types and
//! map every database failure into the port's error type.

mod diesel_rate_limit_store;
mod models;
mod pool;
mod schema;

pub use diesel_rate_limit_store::DieselRateLimitStore;
pub use pool::{DbPool, PoolConfig, PoolError};
