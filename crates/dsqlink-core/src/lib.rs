//! dsqlink core - foundational traits and types for the Aurora DSQL connector
//!
//! This crate defines what the rest of the workspace builds on:
//!
//! - `Connection` / `Transaction` - traits for live database connections
//! - `ConnectionFactory` - boundary for establishing new connections
//! - `Value`, `Row`, `QueryResult` - parameter and result types
//! - `Error` / `Result` - the workspace-wide error type

mod connection;
mod error;
mod value;

pub use connection::*;
pub use error::*;
pub use value::*;
