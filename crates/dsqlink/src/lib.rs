//! Aurora DSQL connector with IAM authentication.
//!
//! The connector wraps a PostgreSQL driver with the three pieces Aurora DSQL
//! needs on top of a plain connection:
//!
//! - a thread-safe token cache that regenerates IAM auth tokens before they
//!   expire ([`TokenCache`])
//! - a connection pool that retires connections past their lifetime bound at
//!   checkout time ([`Pool`])
//! - retry with jittered exponential backoff for optimistic-concurrency
//!   conflicts detected at commit ([`with_retry`])
//!
//! Basic usage with a connection pool:
//!
//! ```ignore
//! let pool = Pool::connect(Config::new("cluster.dsql.us-east-1.on.aws")).await?;
//!
//! let rows = pool
//!     .with(|conn| async move { conn.query("SELECT * FROM users", &[]).await })
//!     .await?;
//! ```
//!
//! Using a connection string:
//!
//! ```ignore
//! let pool = Pool::connect_url("postgres://admin@cluster.dsql.us-east-1.on.aws/postgres").await?;
//! ```
//!
//! Transactions that may hit commit conflicts:
//!
//! ```ignore
//! with_retry(&pool, &RetryConfig::default(), |conn| async move {
//!     conn.execute("UPDATE accounts SET balance = balance - $1 WHERE id = $2",
//!                  &[amount.into(), from.into()]).await?;
//!     conn.execute("UPDATE accounts SET balance = balance + $1 WHERE id = $2",
//!                  &[amount.into(), to.into()]).await
//! })
//! .await?;
//! ```

mod config;
mod conn;
mod endpoint;
mod pool;
mod retry;
mod token;
mod token_cache;

#[cfg(test)]
mod testutil;

pub use config::{
    Config, DEFAULT_DATABASE, DEFAULT_MAX_LIFETIME, DEFAULT_POOL_SIZE, DEFAULT_PORT,
    DEFAULT_TOKEN_DURATION, DEFAULT_USER, ResolvedConfig,
};
pub use conn::DsqlConnection;
pub use endpoint::{build_hostname, is_cluster_id, parse_region};
pub use pool::{Pool, PoolStats};
pub use retry::{
    ERROR_CODE_MUTATION, ERROR_CODE_SCHEMA, RetryConfig, SQLSTATE_SERIALIZATION_FAILURE,
    exec_with_retry, is_occ_error, with_retry,
};
pub use token::{ADMIN_USER, DsqlTokenSigner, TokenSigner, generate_token};
pub use token_cache::{REFRESH_BUFFER_PERCENTAGE, TokenCache};

pub use dsqlink_core::{
    ConnectParams, Connection, ConnectionFactory, Error, QueryResult, Result, Row, Transaction,
    Value,
};

/// Connector version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name reported to the server for observability.
pub const APPLICATION_NAME: &str = concat!("dsqlink/", env!("CARGO_PKG_VERSION"));

/// Build the application_name, optionally prefixed with an ORM/framework tag
/// as `"<tag>:dsqlink/<version>"`.
pub fn build_application_name(orm_tag: Option<&str>) -> String {
    match orm_tag.map(str::trim) {
        Some(tag) if !tag.is_empty() => format!("{}:{}", tag, APPLICATION_NAME),
        _ => APPLICATION_NAME.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_name_without_tag() {
        assert_eq!(build_application_name(None), APPLICATION_NAME);
        assert_eq!(build_application_name(Some("  ")), APPLICATION_NAME);
    }

    #[test]
    fn application_name_with_orm_tag() {
        assert_eq!(
            build_application_name(Some("diesel")),
            format!("diesel:dsqlink/{}", VERSION)
        );
    }
}
