//! Connection pool with token caching and lifetime enforcement

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use dsqlink_core::{Connection, ConnectionFactory, Error, Result};

use crate::config::{Config, ResolvedConfig};
use crate::token::{DsqlTokenSigner, TokenSigner};
use crate::token_cache::TokenCache;

#[cfg(test)]
mod tests;

/// How long a checkout waits for a free slot before failing with a timeout.
/// Callers should treat that timeout as retryable resource exhaustion.
pub(crate) const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// A pooled connection tagged with its creation time. `created_at` survives
/// checkout/return cycles so the lifetime bound applies to the connection's
/// true age.
struct PooledConn {
    conn: Arc<dyn Connection>,
    created_at: Instant,
}

/// Connection pool for Aurora DSQL.
///
/// The pool holds at most `pool_size` connections, created lazily. Every
/// checkout re-validates the candidate connection's age against the
/// configured `max_lifetime`; anything older is closed and replaced before
/// caller code runs. There is no background sweeper - aging is enforced
/// exactly at the handoff point.
pub struct Pool {
    config: ResolvedConfig,
    token_cache: TokenCache,
    factory: Arc<dyn ConnectionFactory>,
    idle: parking_lot::Mutex<VecDeque<PooledConn>>,
    semaphore: Arc<Semaphore>,
    checkout_timeout: Duration,
    shut_down: AtomicBool,
    active: AtomicUsize,
    waiting: AtomicUsize,
}

impl Pool {
    /// Resolve the configuration, resolve AWS credentials, and build a pool
    /// over the PostgreSQL driver.
    pub async fn connect(config: Config) -> Result<Self> {
        let resolved = config.resolve()?;
        let signer = DsqlTokenSigner::new(&resolved).await?;
        Ok(Self::new(
            resolved,
            Arc::new(signer),
            Arc::new(dsqlink_postgres::PgConnectionFactory),
        ))
    }

    /// As [`Pool::connect`], from a connection URL.
    pub async fn connect_url(conn_string: &str) -> Result<Self> {
        Self::connect(Config::parse(conn_string)?).await
    }

    /// Build a pool from parts. Useful for swapping the signer or factory,
    /// e.g. in tests.
    pub fn new(
        config: ResolvedConfig,
        signer: Arc<dyn TokenSigner>,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.pool_size()));
        Self {
            config,
            token_cache: TokenCache::new(signer),
            factory,
            idle: parking_lot::Mutex::new(VecDeque::new()),
            semaphore,
            checkout_timeout: CHECKOUT_TIMEOUT,
            shut_down: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Check out a connection, run `work` with it, and release the slot.
    ///
    /// The slot is released on every exit path, including a failing work
    /// future. The handle passed to `work` must not be retained beyond the
    /// closure; the connection belongs to the pool.
    pub async fn with<T, F, Fut>(&self, work: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn Connection>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::Connection("pool is shut down".into()));
        }

        self.waiting.fetch_add(1, Ordering::SeqCst);
        let acquired =
            tokio::time::timeout(self.checkout_timeout, self.semaphore.clone().acquire_owned())
                .await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);

        let _permit = match acquired {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::Connection("pool is shut down".into())),
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "no connection available within {:?}",
                    self.checkout_timeout
                )));
            }
        };

        let pooled = self.acquire_conn().await?;

        self.active.fetch_add(1, Ordering::SeqCst);
        let result = work(Arc::clone(&pooled.conn)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        self.release(pooled).await;
        result
    }

    /// Pop idle connections until one passes the age check, discarding and
    /// closing stale ones; create a new connection when none is left.
    async fn acquire_conn(&self) -> Result<PooledConn> {
        loop {
            let candidate = self.idle.lock().pop_front();
            match candidate {
                Some(pooled) => {
                    let age = pooled.created_at.elapsed();
                    if age >= self.config.max_lifetime() {
                        tracing::debug!(
                            age_secs = age.as_secs(),
                            "discarding connection past max lifetime"
                        );
                        self.close_quietly(&pooled).await;
                        continue;
                    }
                    if pooled.conn.is_closed() {
                        continue;
                    }
                    return Ok(pooled);
                }
                None => return self.create_conn().await,
            }
        }
    }

    async fn create_conn(&self) -> Result<PooledConn> {
        let token = self
            .token_cache
            .get_token(
                self.config.host(),
                self.config.region(),
                self.config.user(),
                self.config.token_duration(),
            )
            .await?;
        let params = self.config.connect_params(&token);
        let conn = self.factory.connect(&params).await?;
        Ok(PooledConn {
            conn,
            created_at: Instant::now(),
        })
    }

    async fn release(&self, pooled: PooledConn) {
        if self.shut_down.load(Ordering::SeqCst) || pooled.conn.is_closed() {
            self.close_quietly(&pooled).await;
            return;
        }
        self.idle.lock().push_back(pooled);
    }

    /// Close a connection that is being discarded. Close failures are
    /// swallowed: the resource is on its way out either way.
    async fn close_quietly(&self, pooled: &PooledConn) {
        if let Err(e) = pooled.conn.close().await {
            tracing::debug!(error = %e, "error closing discarded connection");
        }
    }

    /// Close every connection the pool knows about and refuse further
    /// checkouts. Connections still checked out are closed on return.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.semaphore.close();

        let drained: Vec<PooledConn> = {
            let mut idle = self.idle.lock();
            idle.drain(..).collect()
        };
        tracing::debug!(count = drained.len(), "closing pooled connections");
        for pooled in &drained {
            self.close_quietly(pooled).await;
        }
    }

    /// Drop all cached auth tokens. Subsequent connection creation mints
    /// fresh tokens; already-open connections are unaffected.
    pub async fn clear_token_cache(&self) {
        self.token_cache.clear().await;
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn set_checkout_timeout(&mut self, timeout: Duration) {
        self.checkout_timeout = timeout;
    }

    /// Snapshot of pool occupancy.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.idle.lock().len(),
            active: self.active.load(Ordering::SeqCst),
            waiting: self.waiting.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time pool occupancy counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    idle: usize,
    active: usize,
    waiting: usize,
}

impl PoolStats {
    pub fn idle(&self) -> usize {
        self.idle
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn waiting(&self) -> usize {
        self.waiting
    }

    pub fn total(&self) -> usize {
        self.idle + self.active
    }
}
