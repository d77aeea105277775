//! Connection factory wiring for the pool

use std::sync::Arc;

use async_trait::async_trait;

use dsqlink_core::{ConnectParams, Connection, ConnectionFactory, Result};

use crate::connection::PostgresConnection;

/// Factory producing `PostgresConnection`s. Stateless; the pool supplies a
/// fresh `ConnectParams` (with a current token) per connection attempt.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn Connection>> {
        let conn = PostgresConnection::connect(params).await?;
        Ok(Arc::new(conn))
    }
}
