//! Message and constructor coverage for port errors.

use super::*;
use rstest::rstest;

#[rstest]
#[case(
    RateLimitStoreError::connection("pool timed out"),
    "rate limit store connection failed: pool timed out"
)]
#[case(
    RateLimitStoreError::query("deadlock detected"),
    "rate limit store query failed: deadlock detected"
)]
#[case(
    RateLimitStoreError::corrupt("negative request_count"),
    "rate limit store returned invalid data: negative request_count"
)]
fn rate_limit_store_errors_render(#[case] err: RateLimitStoreError, #[case] expected: &str) {
    assert_eq!(err.to_string(), expected);
}

#[rstest]
#[case(AuthoritativeStoreError::not_found("g1"), "record g1 does not exist")]
#[case(
    AuthoritativeStoreError::rejected("grade out of range"),
    "write rejected: grade out of range"
)]
#[case(
    AuthoritativeStoreError::connection("reset by peer"),
    "authoritative store unavailable: reset by peer"
)]
fn authoritative_store_errors_render(#[case] err: AuthoritativeStoreError, #[case] expected: &str) {
    assert_eq!(err.to_string(), expected);
}

#[rstest]
fn change_source_errors_render() {
    assert_eq!(
        ChangeEventSourceError::rejected("table not published").to_string(),
        "change source rejected subscription: table not published"
    );
    assert_eq!(
        ChangeEventSourceError::connection("socket closed").to_string(),
        "change source connection failed: socket closed"
    );
}
