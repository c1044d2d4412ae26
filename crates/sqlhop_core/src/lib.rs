//! Core library for sqlhop.
//!
//! Manages named database connections reachable directly or through SSH
//! bastions, with schema introspection and ad-hoc queries:
//!
//! - **error**: Error taxonomy
//! - **config**: JSON config loading and validation
//! - **models**: Connection specs, scan values, typed results, schemas
//! - **services**: Drivers, tunnels, metadata, query execution
//! - **registry**: The connection registry front ends talk to
//! - **logging**: Tracing subscriber setup

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod registry;
pub mod services;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{HopError, HopResult};
pub use models::{
    AuthMethod, ColumnSchema, ConnectionSpec, PoolStats, QueryResult, TableSchema, TunnelSpec,
    TypedValue,
};
pub use registry::ConnectionRegistry;
pub use services::{SecretPrompter, TerminalPrompter};
