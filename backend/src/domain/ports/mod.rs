//! Domain ports for the hexagonal boundary.
//!
//! Every external collaborator the synchronisation core consumes is a trait
//! here; adapters live under `crate::outbound`.

mod macros;
pub(crate) use macros::define_port_error;

mod authoritative_store;
mod change_event_source;
mod rate_limit_store;

#[cfg(test)]
pub use authoritative_store::MockAuthoritativeStore;
pub use authoritative_store::{AuthoritativeStore, AuthoritativeStoreError};
pub use change_event_source::{ChangeEventSource, ChangeEventSourceError, ChangeStream};
#[cfg(test)]
pub use rate_limit_store::MockRateLimitStore;
pub use rate_limit_store::{FixtureRateLimitStore, RateLimitStore, RateLimitStoreError};

#[cfg(test)]
mod tests;
