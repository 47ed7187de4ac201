//! PostgreSQL-backed `RateLimitStore` implementation using Diesel.
//!
//! Admission is a single conditional upsert. The `ON CONFLICT .. DO UPDATE
//! .. WHERE` clause runs under the row lock of the existing window, so the
//! capacity check and the increment cannot interleave with another request
//! for the same actor and endpoint. When the `WHERE` clause rejects the
//! update no row is returned and the window is read back to report it.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{Int4, Text, Timestamptz, Uuid as SqlUuid};
use diesel_async::RunQueryDsl;
use tracing::debug;

use crate::domain::ports::{RateLimitStore, RateLimitStoreError};
use crate::domain::rate_limit::{Quota, RateLimitWindow, WindowAdmission};
use crate::domain::{ActorId, Endpoint};

use super::models::RateLimitWindowRow;
use super::pool::{DbPool, PoolError};
use super::schema::rate_limit_windows;

/// Binds: actor, endpoint, now, window floor (`now - window`), max requests.
const ACQUIRE_SQL: &str = r#"
INSERT INTO rate_limit_windows AS w (actor_id, endpoint, window_start, request_count)
VALUES ($1, $2, $3, 1)
ON CONFLICT (actor_id, endpoint)
DO UPDATE SET
    window_start = CASE
        WHEN w.window_start > $4 THEN w.window_start
        ELSE EXCLUDED.window_start
    END,
    request_count = CASE
        WHEN w.window_start > $4 THEN w.request_count + 1
        ELSE 1
    END
WHERE w.window_start <= $4 OR w.request_count < $5
RETURNING w.actor_id, w.endpoint, w.window_start, w.request_count
"#;

/// Diesel-backed implementation of the `RateLimitStore` port.
#[derive(Clone)]
pub struct DieselRateLimitStore {
    pool: DbPool,
}

impl DieselRateLimitStore {
    /// Create a new store with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> RateLimitStoreError {
    match error {
        PoolError::Checkout { message } | PoolError::Build { message } => {
            RateLimitStoreError::connection(message)
        }
    }
}

fn map_diesel_error(error: diesel::result::Error) -> RateLimitStoreError {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match &error {
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), "diesel operation failed");
        }
        _ => debug!(
            error_type = %std::any::type_name_of_val(&error),
            "diesel operation failed"
        ),
    }

    match error {
        DieselError::NotFound => RateLimitStoreError::query("window not found"),
        DieselError::QueryBuilderError(_) => RateLimitStoreError::query("database query error"),
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
            RateLimitStoreError::connection("database connection error")
        }
        DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => {
            RateLimitStoreError::query("serialization failure")
        }
        _ => RateLimitStoreError::query("database error"),
    }
}

fn row_to_window(row: RateLimitWindowRow) -> Result<RateLimitWindow, RateLimitStoreError> {
    let endpoint = Endpoint::new(row.endpoint).map_err(|err| {
        RateLimitStoreError::corrupt(format!("invalid endpoint in database: {err}"))
    })?;
    let request_count = u32::try_from(row.request_count).map_err(|_| {
        RateLimitStoreError::corrupt(format!("negative request count {}", row.request_count))
    })?;
    Ok(RateLimitWindow {
        actor: ActorId::from_uuid(row.actor_id),
        endpoint,
        window_start: row.window_start,
        request_count,
    })
}

/// Classify a row returned by the upsert. Only a freshly opened window can
/// hold a single request; an incremented one holds at least two.
fn admitted(window: RateLimitWindow) -> WindowAdmission {
    if window.request_count == 1 {
        WindowAdmission::Opened(window)
    } else {
        WindowAdmission::Counted(window)
    }
}

#[async_trait]
impl RateLimitStore for DieselRateLimitStore {
    async fn acquire(
        &self,
        actor: &ActorId,
        endpoint: &Endpoint,
        quota: &Quota,
        now: DateTime<Utc>,
    ) -> Result<WindowAdmission, RateLimitStoreError> {
        // PostgreSQL keeps microseconds.
        let now = now.trunc_subsecs(6);
        let floor = now - quota.window();
        let max_requests = i32::try_from(quota.max_requests()).unwrap_or(i32::MAX);
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let updated: Option<RateLimitWindowRow> = sql_query(ACQUIRE_SQL)
            .bind::<SqlUuid, _>(*actor.as_uuid())
            .bind::<Text, _>(endpoint.as_str())
            .bind::<Timestamptz, _>(now)
            .bind::<Timestamptz, _>(floor)
            .bind::<Int4, _>(max_requests)
            .get_result(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        if let Some(row) = updated {
            return row_to_window(row).map(admitted);
        }

        let current = rate_limit_windows::table
            .filter(rate_limit_windows::actor_id.eq(*actor.as_uuid()))
            .filter(rate_limit_windows::endpoint.eq(endpoint.as_str()))
            .select(RateLimitWindowRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        match current {
            Some(row) => row_to_window(row).map(WindowAdmission::Exhausted),
            None => Err(RateLimitStoreError::corrupt(
                "window rejected the update but no longer exists",
            )),
        }
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, RateLimitStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let deleted = diesel::delete(
            rate_limit_windows::table.filter(rate_limit_windows::window_start.le(cutoff)),
        )
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error)?;

        debug!(deleted, cutoff = %cutoff, "purged expired rate limit windows");
        Ok(u64::try_from(deleted).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use uuid::Uuid;

    fn row(endpoint: &str, request_count: i32) -> RateLimitWindowRow {
        RateLimitWindowRow {
            actor_id: Uuid::nil(),
            endpoint: endpoint.to_owned(),
            window_start: Utc
                .with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
                .single()
                .expect("valid time"),
            request_count,
        }
    }

    #[rstest]
    fn pool_error_maps_to_connection_error() {
        let store_err = map_pool_error(PoolError::checkout("connection refused"));

        assert!(matches!(store_err, RateLimitStoreError::Connection { .. }));
        assert!(store_err.to_string().contains("connection refused"));
    }

    #[rstest]
    fn not_found_maps_to_query_error() {
        let store_err = map_diesel_error(diesel::result::Error::NotFound);

        assert!(matches!(store_err, RateLimitStoreError::Query { .. }));
        assert!(store_err.to_string().contains("window not found"));
    }

    #[rstest]
    fn closed_connection_maps_to_connection_error() {
        use diesel::result::{DatabaseErrorKind, Error as DieselError};

        let store_err = map_diesel_error(DieselError::DatabaseError(
            DatabaseErrorKind::ClosedConnection,
            Box::new("server closed the connection".to_owned()),
        ));

        assert!(matches!(store_err, RateLimitStoreError::Connection { .. }));
    }

    #[rstest]
    #[case(1, true)]
    #[case(2, false)]
    #[case(10, false)]
    fn returned_rows_classify_by_count(#[case] count: i32, #[case] opened: bool) {
        let window = row_to_window(row("bulk-grades", count)).expect("valid row");
        let admission = admitted(window);

        assert_eq!(matches!(admission, WindowAdmission::Opened(_)), opened);
        assert!(admission.is_admitted());
        assert_eq!(admission.window().request_count, count as u32);
    }

    #[rstest]
    #[case::bad_endpoint(row("Bulk Grades", 1))]
    #[case::negative_count(row("grades", -1))]
    fn corrupt_rows_are_reported(#[case] input: RateLimitWindowRow) {
        let err = row_to_window(input).expect_err("corrupt row");
        assert!(matches!(err, RateLimitStoreError::Corrupt { .. }));
    }
}
