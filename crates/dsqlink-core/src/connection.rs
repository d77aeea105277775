//! Connection and transaction traits

use std::sync::Arc;

use async_trait::async_trait;

use crate::{QueryResult, Result, Value};

/// A live database connection.
///
/// The trait exposes only the operations the connector uses; callers never
/// reach the underlying driver handle directly.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a statement (INSERT/UPDATE/DELETE/DDL), returning the number
    /// of affected rows. Pass an empty slice for unparameterized statements.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a query returning rows.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Begin a transaction on this connection.
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>>;

    /// Close the connection. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Whether the connection has been closed.
    fn is_closed(&self) -> bool;
}

/// An open transaction. Consumed by `commit` or `rollback`.
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Everything a factory needs to establish one connection.
///
/// The password field carries the freshly minted IAM token; a new
/// `ConnectParams` is computed for every connection attempt so tokens are
/// never reused past their cache window.
#[derive(Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
    pub password: String,
    pub application_name: String,
}

impl std::fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("password", &"<redacted>")
            .field("application_name", &self.application_name)
            .finish()
    }
}

/// Boundary for establishing new database connections.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn Connection>>;
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn Connection>> {
        (**self).connect(params).await
    }
}
