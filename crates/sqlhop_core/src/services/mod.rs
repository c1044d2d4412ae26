//! Services behind the connection registry.
//!
//! - `prompt` - Secret prompting and password resolution
//! - `connection` - Driver and querier traits, Postgres pool
//! - `pg_types` - Postgres native scan representation
//! - `result_types` - Runtime result typing
//! - `query` - Ad-hoc query execution
//! - `metadata` - Schema introspection
//! - `tunnel` - Tunnel manager and local forwarder
//! - `ssh_tunnel` - SSH dialer

pub mod connection;
pub mod metadata;
pub mod pg_types;
pub mod prompt;
pub mod query;
pub mod result_types;
pub mod ssh_tunnel;
pub mod tunnel;

pub use connection::{Driver, PostgresDriver, Querier};
pub use metadata::MetadataService;
pub use prompt::{SecretPrompter, TerminalPrompter};
pub use query::QueryService;
pub use result_types::ResultTypeResolver;
pub use ssh_tunnel::SshDialer;
pub use tunnel::{Tunnel, TunnelDialer, TunnelManager};
