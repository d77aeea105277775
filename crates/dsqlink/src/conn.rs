//! Single, non-pooled connection to Aurora DSQL

use std::ops::Deref;
use std::sync::Arc;

use dsqlink_core::{Connection, ConnectionFactory, Result};

use crate::config::{Config, ResolvedConfig};
use crate::token::{DsqlTokenSigner, TokenSigner};

/// A single authenticated connection.
///
/// For anything long-lived prefer [`crate::Pool`], which also renews tokens
/// and retires aged connections; this wrapper mints one token and connects
/// once.
pub struct DsqlConnection {
    inner: Arc<dyn Connection>,
    config: ResolvedConfig,
}

impl DsqlConnection {
    /// Resolve the configuration, mint a token, and connect.
    pub async fn connect(config: Config) -> Result<Self> {
        let resolved = config.resolve()?;
        let signer = DsqlTokenSigner::new(&resolved).await?;
        Self::connect_with(
            resolved,
            Arc::new(signer),
            Arc::new(dsqlink_postgres::PgConnectionFactory),
        )
        .await
    }

    /// As [`DsqlConnection::connect`], from a connection URL.
    pub async fn connect_url(conn_string: &str) -> Result<Self> {
        Self::connect(Config::parse(conn_string)?).await
    }

    /// Connect with an explicit signer and factory.
    pub async fn connect_with(
        resolved: ResolvedConfig,
        signer: Arc<dyn TokenSigner>,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<Self> {
        let token = signer
            .generate_token(
                resolved.host(),
                resolved.region(),
                resolved.user(),
                resolved.token_duration(),
            )
            .await?;
        let params = resolved.connect_params(&token);
        let inner = factory.connect(&params).await?;
        Ok(Self {
            inner,
            config: resolved,
        })
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

impl Deref for DsqlConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testutil::{MockFactory, MockSigner};

    #[tokio::test]
    async fn connect_mints_one_token_and_one_connection() {
        let resolved = Config::new("mycluster.dsql.us-east-1.on.aws")
            .resolve()
            .expect("resolve");
        let signer = MockSigner::new();
        let factory = MockFactory::new();

        let conn = DsqlConnection::connect_with(resolved, signer.clone(), factory.clone())
            .await
            .expect("connect");

        assert_eq!(signer.count(), 1);
        assert_eq!(factory.count(), 1);
        // The minted token rode in as the connection password.
        assert_eq!(factory.connection(0).token, "mock-token-admin-0");

        conn.execute("SELECT 1", &[]).await.expect("execute");
        conn.close().await.expect("close");
        assert!(conn.is_closed());
    }
}
