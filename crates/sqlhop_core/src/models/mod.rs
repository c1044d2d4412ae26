//! Data models for sqlhop.
//!
//! - `connection` - ConnectionSpec, TunnelSpec, AuthMethod, PoolStats
//! - `query` - ScanValue, ResultSet, TypedValue, QueryResult
//! - `schema` - Schema introspection models

pub mod connection;
pub mod query;
pub mod schema;

pub use connection::{AuthMethod, ConnectionSpec, HostVerification, PoolStats, TunnelSpec};
pub use query::{ColumnType, QueryResult, ResultSet, ScanValue, Temporal, TypedValue};
pub use schema::{ColumnSchema, QualifiedName, TableSchema, DEFAULT_SCHEMA};
