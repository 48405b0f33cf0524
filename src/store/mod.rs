// =============================================================================
// Order State Store (C9) — the sole owner of Order/OrderEvent/ledger/cursor rows
// =============================================================================
//
// Every write here is idempotent (upsert keyed by primary identity, or
// ledger-uniqueness guarded) so the projector can safely replay a batch
// after a crash. Functions are generic over `sqlx::PgExecutor` so the same
// code path runs against a bare pool (ingestion/reads) or an open
// transaction (the projector's atomic batch apply).
// =============================================================================

pub mod market;
pub mod orders;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::config::DbConfig;
use crate::error::Result;

/// `min 2, max 10` — the pool shape spec §5 assigns to ingestion/reads.
pub const READ_POOL_MIN: u32 = 2;
pub const READ_POOL_MAX: u32 = 10;

/// `min 10, max 50` — the pool shape spec §5 assigns to the
/// projector-facing connection pool.
pub const PROJECTOR_POOL_MIN: u32 = 10;
pub const PROJECTOR_POOL_MAX: u32 = 50;

const STATEMENT_TIMEOUT_SECS: u64 = 30;
const IDLE_IN_TRANSACTION_TIMEOUT_SECS: u64 = 300;

/// A thin handle around a `sqlx::PgPool`. Held behind `Arc` by `AppState`
/// and cloned into every worker/handler that needs database access.
#[derive(Clone)]
pub struct Store {
    pub pool: PgPool,
}

impl Store {
    pub async fn connect(db: &DbConfig, min_connections: u32, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(min_connections)
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(STATEMENT_TIMEOUT_SECS))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query(&format!(
                        "SET statement_timeout = {}; SET idle_in_transaction_session_timeout = {}",
                        STATEMENT_TIMEOUT_SECS * 1000,
                        IDLE_IN_TRANSACTION_TIMEOUT_SECS * 1000,
                    ))
                    .execute(conn)
                    .await?;
                    Ok(())
                })
            })
            .connect(&db.connection_string())
            .await?;

        info!(min_connections, max_connections, "database pool connected");
        Ok(Self { pool })
    }

    pub async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Postgres>> {
        Ok(self.pool.begin().await?)
    }
}

/// Retry a transient-failure-prone operation with exponential back-off, up
/// to 3 attempts total, per spec §4.9. Non-transient errors (constraint
/// violations, bad input) are returned immediately without retrying.
pub async fn with_retry<T, F, Fut>(operation_name: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    const MAX_ATTEMPTS: u32 = 3;
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if is_transient(&e) && attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                let delay = Duration::from_millis(100 * 2u64.pow(attempt));
                warn!(operation_name, attempt, error = %e, "transient store error, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_transient(err: &crate::error::Error) -> bool {
    matches!(
        err,
        crate::error::Error::Database(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_))
    )
}
