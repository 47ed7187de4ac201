//! In-process adapters.
//!
//! They back single-process deployments and let a full multi-actor session
//! run in tests without a database or network.

mod change_feed;
mod rate_limit_store;
mod record_store;

pub use change_feed::InMemoryChangeFeed;
pub use rate_limit_store::InMemoryRateLimitStore;
pub use record_store::InMemoryRecordStore;
