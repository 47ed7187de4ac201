//! Count one request against the PostgreSQL rate-limit store and print the
//! decision.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::env;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use gradesync::config::SyncSettings;
use gradesync::domain::rate_limit::{RateLimitDecision, RateLimiter};
use gradesync::domain::{ActorId, Endpoint};
use gradesync::outbound::persistence::{DbPool, DieselRateLimitStore, PoolConfig};
use mockable::DefaultClock;
use ortho_config::OrthoConfig;
use tokio::runtime::Builder;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// `rate-limit-check` command arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "rate-limit-check",
    about = "Count one request for an actor and endpoint and report the rate-limit decision",
    version
)]
struct CliArgs {
    /// Actor UUID.
    #[arg(long, value_name = "uuid")]
    actor: String,
    /// Endpoint identifier, for example `bulk-grades`.
    #[arg(long, value_name = "name")]
    endpoint: String,
    /// Database connection URL. Falls back to `GRADESYNC_DATABASE_URL`, then
    /// `DATABASE_URL`.
    #[arg(long = "database-url", value_name = "url")]
    database_url: Option<String>,
    /// JSON quota table overriding the configured one.
    #[arg(long = "quota-file", value_name = "path")]
    quota_file: Option<PathBuf>,
}

fn main() -> io::Result<()> {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| io::Error::other(format!("create Tokio runtime: {error}")))?;
    runtime.block_on(async_main())
}

async fn async_main() -> io::Result<()> {
    if let Err(error) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .with_writer(io::stderr)
        .try_init()
    {
        warn!(error = %error, "tracing init failed");
    }

    let args = CliArgs::try_parse().map_err(io::Error::other)?;
    let actor = ActorId::new(&args.actor)
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;
    let endpoint = Endpoint::new(args.endpoint)
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;

    let mut settings = SyncSettings::load_from_iter([OsString::from("rate-limit-check")])
        .map_err(|error| io::Error::other(format!("load settings: {error}")))?;
    if args.quota_file.is_some() {
        settings.quota_file = args.quota_file;
    }
    let policy = settings.quota_policy().map_err(io::Error::other)?;

    let database_url = resolve_database_url(args.database_url, settings.database_url.take())?;
    let pool = DbPool::new(PoolConfig::new(&database_url))
        .await
        .map_err(|error| io::Error::other(format!("create database pool: {error}")))?;

    let limiter = RateLimiter::new(
        Arc::new(DieselRateLimitStore::new(pool)),
        Arc::new(policy),
        Arc::new(DefaultClock),
    );

    if settings.purge_on_start {
        let removed = limiter
            .purge_expired()
            .await
            .map_err(|error| io::Error::other(format!("purge expired windows: {error}")))?;
        info!(removed, "purged expired rate limit windows");
    }

    let decision = limiter
        .check(&actor, &endpoint)
        .await
        .map_err(|error| io::Error::other(format!("rate limit check: {error}")))?;

    println!("{}", render_decision(decision));
    Ok(())
}

fn render_decision(decision: RateLimitDecision) -> String {
    match decision {
        RateLimitDecision::Allowed { remaining } => {
            format!("decision=allowed remaining={remaining}")
        }
        RateLimitDecision::Denied {
            retry_after_seconds,
        } => format!("decision=denied retry_after_seconds={retry_after_seconds}"),
    }
}

fn resolve_database_url(explicit: Option<String>, configured: Option<String>) -> io::Result<String> {
    if let Some(value) = explicit {
        if value.trim().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "--database-url must not be empty when provided",
            ));
        }
        return Ok(value);
    }

    if let Some(value) = configured.filter(|value| !value.trim().is_empty()) {
        return Ok(value);
    }

    let from_env = env::var("DATABASE_URL").map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "database URL missing: set --database-url, GRADESYNC_DATABASE_URL, or DATABASE_URL",
        )
    })?;
    if from_env.trim().is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "DATABASE_URL must not be empty",
        ));
    }
    Ok(from_env)
}
