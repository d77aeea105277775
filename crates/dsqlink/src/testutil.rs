//! Shared mocks for pool and retry tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use dsqlink_core::{
    ConnectParams, Connection, ConnectionFactory, Error, QueryResult, Result, Transaction, Value,
};

use crate::config::{Config, ResolvedConfig};
use crate::token::TokenSigner;

pub fn test_config(pool_size: usize) -> ResolvedConfig {
    Config::new("mycluster.dsql.us-east-1.on.aws")
        .with_pool_size(pool_size)
        .resolve()
        .expect("test config resolves")
}

/// Signer that counts calls; never talks to AWS.
pub struct MockSigner {
    calls: AtomicUsize,
}

impl MockSigner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSigner for MockSigner {
    async fn generate_token(
        &self,
        _host: &str,
        _region: &str,
        user: &str,
        _expires_in: Duration,
    ) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("mock-token-{}-{}", user, n))
    }
}

/// Per-connection transaction counters, shared with the transactions the
/// connection hands out.
pub struct TxState {
    /// Remaining commits that will fail with a commit conflict.
    pub commit_conflicts: AtomicUsize,
    pub begins: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
}

pub struct MockConnection {
    #[allow(dead_code)]
    pub id: usize,
    pub token: String,
    closed: AtomicBool,
    pub tx: Arc<TxState>,
}

impl MockConnection {
    fn new(id: usize, token: String, commit_conflicts: usize) -> Self {
        Self {
            id,
            token,
            closed: AtomicBool::new(false),
            tx: Arc::new(TxState {
                commit_conflicts: AtomicUsize::new(commit_conflicts),
                begins: AtomicUsize::new(0),
                commits: AtomicUsize::new(0),
                rollbacks: AtomicUsize::new(0),
            }),
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<u64> {
        Ok(0)
    }

    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
        Ok(QueryResult::empty())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        self.tx.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockTransaction {
            state: Arc::clone(&self.tx),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct MockTransaction {
    state: Arc<TxState>,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<u64> {
        Ok(0)
    }

    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
        Ok(QueryResult::empty())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self
            .state
            .commit_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Query {
                message: "change conflicts with another transaction (OC000)".into(),
                sqlstate: Some("40001".into()),
            });
        }
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory producing `MockConnection`s; records every connection it made and
/// can be scripted to fail or to hand out conflict-committing connections.
pub struct MockFactory {
    created: AtomicUsize,
    failures: AtomicUsize,
    commit_conflicts_per_conn: usize,
    pub connections: parking_lot::Mutex<Vec<Arc<MockConnection>>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            created: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            commit_conflicts_per_conn: 0,
            connections: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Every connection's first `conflicts` commits fail with OC000.
    pub fn with_commit_conflicts(conflicts: usize) -> Arc<Self> {
        Arc::new(Self {
            created: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            commit_conflicts_per_conn: conflicts,
            connections: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn connection(&self, idx: usize) -> Arc<MockConnection> {
        Arc::clone(&self.connections.lock()[idx])
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn Connection>> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Connection("factory is down".into()));
        }
        let id = self.created.fetch_add(1, Ordering::SeqCst);
        let conn = Arc::new(MockConnection::new(
            id,
            params.password.clone(),
            self.commit_conflicts_per_conn,
        ));
        self.connections.lock().push(Arc::clone(&conn));
        Ok(conn)
    }
}
