//! Domain types and services.
//!
//! Purpose: keep records, actors, and the three synchronisation services
//! (optimistic cache, change listener, rate limiter) independent of any
//! transport or database. Adapters live in `crate::outbound` and plug in
//! through the traits in [`ports`].
//!
//! Public surface:
//! - [`Record`], [`RecordId`], [`CollectionKey`]: cached data and its keys.
//! - [`ActorId`], [`Endpoint`]: rate-limit identity.
//! - [`cache::OptimisticCache`]: per-session collections with rollback.
//! - [`listener::ChangeListener`]: one change channel per collection.
//! - [`rate_limit::RateLimiter`]: per-actor, per-endpoint request windows.
//! - [`coordinator::SyncCoordinator`]: the mutation state machine tying the
//!   three together.

pub mod actor;
pub mod cache;
pub mod coordinator;
pub mod listener;
pub mod ports;
pub mod rate_limit;
pub mod record;

pub use self::actor::{ActorId, ActorValidationError, Endpoint};
pub use self::record::{CollectionKey, FieldChanges, KeyValidationError, Record, RecordId};
