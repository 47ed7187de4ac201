//! Outbound adapters implementing domain ports.
//!
//! - **memory**: in-process rate-limit store, change feed, and record store
//! - **persistence**: PostgreSQL rate-limit store using Diesel
//!
//! Adapters translate between domain types and their backing
//! representation. They contain no business logic.

pub mod memory;
pub mod persistence;
