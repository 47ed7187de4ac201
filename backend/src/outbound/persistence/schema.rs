//! Diesel table definitions for the PostgreSQL schema.
//!
//! Mirrors the SQL under `backend/migrations/`; keep both in step.

diesel::table! {
    /// Sliding rate-limit windows.
    ///
    /// One row per actor and endpoint. Opening a new window overwrites the
    /// previous row for the pair.
    rate_limit_windows (actor_id, endpoint) {
        /// Throttled actor.
        actor_id -> Uuid,
        /// Throttled endpoint name.
        endpoint -> Text,
        /// First request of the current window.
        window_start -> Timestamptz,
        /// Requests admitted in the window.
        request_count -> Int4,
    }
}
