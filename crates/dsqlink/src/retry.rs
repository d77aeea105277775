//! Retry with backoff for optimistic-concurrency commit conflicts
//!
//! Aurora DSQL detects write conflicts at commit time: the first transaction
//! to commit wins and the loser gets a serialization failure. Losing a
//! conflict says nothing about the transaction's validity, so the right
//! response is to re-run it against fresh data, backing off a little more
//! each time.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use dsqlink_core::{Connection, Error, Result};

use crate::pool::Pool;


/// Conflict code for concurrent mutations of the same rows.
pub const ERROR_CODE_MUTATION: &str = "OC000";

/// Conflict code for transactions racing a schema change.
pub const ERROR_CODE_SCHEMA: &str = "OC001";

/// SQLSTATE the server reports for both conflict kinds.
pub const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";

/// Backoff configuration for commit-conflict retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    max_retries: u32,
    initial_wait_ms: u64,
    max_wait_ms: u64,
    multiplier: f64,
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn with_initial_wait_ms(mut self, ms: u64) -> Self {
        self.initial_wait_ms = ms;
        self
    }

    pub fn with_max_wait_ms(mut self, ms: u64) -> Self {
        self.max_wait_ms = ms;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn initial_wait(&self) -> Duration {
        Duration::from_millis(self.initial_wait_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }
}

impl Default for RetryConfig {
    /// Defaults: 3 retries, 100ms initial wait, 5s cap, doubling.
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_wait_ms: 100,
            max_wait_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

/// Whether an error is a DSQL commit conflict.
///
/// When the error carries a structured SQLSTATE the decision rests on it
/// alone; the OC000/OC001 message check is a fallback for errors that lost
/// their SQLSTATE on the way here. Keeping that order avoids false negatives
/// should the server ever reword its messages.
pub fn is_occ_error(error: &Error) -> bool {
    if let Some(sqlstate) = error.sqlstate() {
        return sqlstate == SQLSTATE_SERIALIZATION_FAILURE;
    }
    let message = error.to_string();
    message.contains(ERROR_CODE_MUTATION) || message.contains(ERROR_CODE_SCHEMA)
}

/// Outcome of a single transaction attempt.
enum Attempt<T> {
    Success(T),
    /// Commit conflict; eligible for another attempt.
    Conflict(Error),
    /// Anything else; propagated immediately.
    Fatal(Error),
}

/// Run `work` in a transaction on a pooled connection, retrying commit
/// conflicts with jittered exponential backoff.
///
/// Non-conflict errors propagate on first occurrence. When the attempt
/// budget (`max_retries + 1`) is spent while still conflicting, the last
/// conflict is reported through [`Error::RetriesExhausted`].
pub async fn with_retry<T, F, Fut>(pool: &Pool, config: &RetryConfig, work: F) -> Result<T>
where
    F: Fn(Arc<dyn Connection>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut wait = config.initial_wait();
    let mut last_conflict: Option<Error> = None;

    for attempt in 0..=config.max_retries() {
        match run_attempt(pool, &work).await {
            Attempt::Success(value) => return Ok(value),
            Attempt::Fatal(error) => return Err(error),
            Attempt::Conflict(error) => {
                tracing::debug!(attempt, error = %error, "commit conflict");
                last_conflict = Some(error);
                if attempt < config.max_retries() {
                    // Sleep outside any lock; other callers keep moving.
                    tokio::time::sleep(jittered(wait)).await;
                    wait = next_wait(wait, config);
                }
            }
        }
    }

    let last_error = last_conflict
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown conflict".to_string());
    Err(Error::RetriesExhausted {
        retries: config.max_retries(),
        last_error,
    })
}

/// One checkout-begin-work-commit cycle, classified.
async fn run_attempt<T, F, Fut>(pool: &Pool, work: &F) -> Attempt<T>
where
    F: Fn(Arc<dyn Connection>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let result = pool
        .with(|conn| async move {
            let tx = conn.begin_transaction().await?;
            match work(Arc::clone(&conn)).await {
                Ok(value) => {
                    tx.commit().await?;
                    Ok(value)
                }
                Err(error) => {
                    if let Err(rollback_error) = tx.rollback().await {
                        tracing::debug!(error = %rollback_error, "rollback failed");
                    }
                    Err(error)
                }
            }
        })
        .await;

    match result {
        Ok(value) => Attempt::Success(value),
        Err(error) if is_occ_error(&error) => Attempt::Conflict(error),
        Err(error) => Attempt::Fatal(error),
    }
}

/// Execute a single statement with conflict retry; convenient for DDL and
/// one-statement DML.
pub async fn exec_with_retry(pool: &Pool, config: &RetryConfig, sql: &str) -> Result<u64> {
    with_retry(pool, config, |conn| async move {
        conn.execute(sql, &[]).await
    })
    .await
}

/// The actual sleep before the next attempt: `wait` plus a uniform jitter
/// from `[0, wait/4)`.
fn jittered(wait: Duration) -> Duration {
    let quarter = wait / 4;
    if quarter.is_zero() {
        return wait;
    }
    let jitter_nanos = rand::thread_rng().gen_range(0..quarter.as_nanos() as u64);
    wait + Duration::from_nanos(jitter_nanos)
}

/// Grow the wait for the next attempt, capped at `max_wait`.
fn next_wait(wait: Duration, config: &RetryConfig) -> Duration {
    wait.mul_f64(config.multiplier()).min(config.max_wait())
}
