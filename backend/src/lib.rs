//! Optimistic record synchronisation for concurrently edited gradebooks.
//!
//! Clients mutate a local cache immediately, confirm the change with the
//! authoritative store, and roll back on failure. Changes made by other
//! actors arrive through a change listener and invalidate cached
//! collections. Mutating endpoints are guarded by a sliding-window rate
//! limiter whose check-and-increment is atomic in the backing store.

pub mod config;
pub mod domain;
pub mod outbound;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
