//! PostgreSQL driver for dsqlink
//!
//! Implements the `dsqlink-core` connection traits over `tokio-postgres`.
//! Aurora DSQL speaks the PostgreSQL wire protocol and requires TLS, so
//! connections are always established with certificate and hostname
//! verification (verify-full semantics).

mod connection;
mod factory;

pub use connection::{PostgresConnection, PostgresTransaction};
pub use factory::PgConnectionFactory;
