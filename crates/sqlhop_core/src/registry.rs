//! The connection registry.
//!
//! Front ends hold one [`ConnectionRegistry`]. It owns every live database
//! handle and tunnel, keyed by name, plus a pointer to the current
//! connection. Mutating operations take `&mut self`, so a registry is
//! confined to a single owner; wrap it in a mutex to share it.

use crate::config::Config;
use crate::error::{HopError, HopResult};
use crate::models::{ConnectionSpec, PoolStats, QueryResult, TableSchema, TunnelSpec};
use crate::services::connection::{Driver, PostgresDriver, Querier};
use crate::services::metadata::MetadataService;
use crate::services::prompt::{resolve_database_password, SecretPrompter};
use crate::services::query::QueryService;
use crate::services::result_types::ResultTypeResolver;
use crate::services::ssh_tunnel::SshDialer;
use crate::services::tunnel::{RemoteTarget, TunnelDialer, TunnelManager};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Named connections, their live handles and the current selection.
pub struct ConnectionRegistry {
    connections: BTreeMap<String, ConnectionSpec>,
    tunnels: BTreeMap<String, TunnelSpec>,
    drivers: HashMap<&'static str, Arc<dyn Driver>>,
    tunnel_manager: TunnelManager,
    active: HashMap<String, Box<dyn Querier>>,
    current: Option<String>,
    resolver: ResultTypeResolver,
}

impl ConnectionRegistry {
    /// Registry using the Postgres driver and SSH tunnels.
    pub fn new(
        connections: impl IntoIterator<Item = ConnectionSpec>,
        tunnels: impl IntoIterator<Item = TunnelSpec>,
    ) -> Self {
        let mut registry = Self::with_dialer(connections, tunnels, Box::new(SshDialer));
        registry.register_driver(Arc::new(PostgresDriver));
        registry
    }

    /// Registry over a loaded [`Config`].
    pub fn from_config(config: Config) -> Self {
        Self::new(config.connections.into_values(), config.tunnels.into_values())
    }

    /// Registry with a custom tunnel dialer and no drivers registered.
    pub fn with_dialer(
        connections: impl IntoIterator<Item = ConnectionSpec>,
        tunnels: impl IntoIterator<Item = TunnelSpec>,
        dialer: Box<dyn TunnelDialer>,
    ) -> Self {
        Self {
            connections: connections.into_iter().map(|c| (c.name.clone(), c)).collect(),
            tunnels: tunnels.into_iter().map(|t| (t.name.clone(), t)).collect(),
            drivers: HashMap::new(),
            tunnel_manager: TunnelManager::new(dialer),
            active: HashMap::new(),
            current: None,
            resolver: ResultTypeResolver::new(),
        }
    }

    /// Register a driver under its identifier, replacing any previous one.
    pub fn register_driver(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.insert(driver.name(), driver);
    }

    /// Every configured connection name, sorted, with whether it is open.
    pub fn list_connections(&self) -> Vec<(String, bool)> {
        self.connections
            .keys()
            .map(|name| (name.clone(), self.active.contains_key(name)))
            .collect()
    }

    /// Name of the current connection.
    pub fn current_name(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Make `name` the current connection, opening it on first use.
    ///
    /// Switching to an already open connection does no I/O. A connection is
    /// only registered once it answers a ping; on any failure the previous
    /// selection stays current.
    pub async fn switch_connection(
        &mut self,
        name: &str,
        prompter: &dyn SecretPrompter,
    ) -> HopResult<()> {
        let spec = self
            .connections
            .get(name)
            .ok_or_else(|| HopError::config(format!("'{name}' is not a configured connection")))?;

        if self.active.contains_key(name) {
            tracing::debug!(connection = %name, "Switching to open connection");
            self.current = Some(name.to_string());
            return Ok(());
        }

        let driver = self.drivers.get(spec.driver.as_str()).cloned().ok_or_else(|| {
            HopError::config(format!(
                "connection '{name}': unsupported database driver '{}'",
                spec.driver
            ))
        })?;

        // Tunnelled connections dial the tunnel's local endpoint.
        let mut target = spec.clone();
        if let Some(tunnel_name) = spec.tunnel.as_deref() {
            let tunnel = self.tunnels.get(tunnel_name).ok_or_else(|| {
                HopError::config(format!(
                    "connection '{name}': tunnel '{tunnel_name}' is not configured"
                ))
            })?;
            let local = self
                .tunnel_manager
                .establish(tunnel, RemoteTarget::new(spec.host.as_str(), spec.port), prompter)
                .await
                .map_err(|e| e.context(format!("connection '{name}'")))?;
            target.host = local.ip().to_string();
            target.port = local.port();
        }

        let password = resolve_database_password(&target, prompter)?;

        tracing::info!(connection = %name, url = %target.display_url(), "Opening connection");
        let querier = driver
            .open(&target, &password)
            .await
            .map_err(|e| e.context(format!("connection '{name}'")))?;

        if let Err(e) = ping(querier.as_ref(), target.connect_timeout()).await {
            if let Err(close_err) = querier.close() {
                tracing::warn!(connection = %name, error = %close_err, "Failed to close unhealthy handle");
            }
            tracing::warn!(connection = %name, error = %e, "Connection failed liveness check");
            return Err(e.context(format!("connection '{name}': failed to connect to database instance")));
        }

        self.active.insert(name.to_string(), querier);
        self.current = Some(name.to_string());
        tracing::info!(connection = %name, "Connection established");
        Ok(())
    }

    fn current(&self) -> HopResult<&dyn Querier> {
        self.current
            .as_deref()
            .and_then(|name| self.active.get(name))
            .map(|q| q.as_ref())
            .ok_or(HopError::NoActiveConnection)
    }

    /// Tables in `schema`, or in the default schema when `schema` is empty.
    pub async fn list_tables(&self, schema: &str) -> HopResult<Vec<String>> {
        let q = self.current()?;
        if schema.is_empty() {
            MetadataService::list_tables(q).await
        } else {
            MetadataService::list_tables_in_schema(q, schema).await
        }
    }

    /// Every table outside the ignored schemas as `schema.table`.
    pub async fn list_all_tables(&self) -> HopResult<Vec<String>> {
        MetadataService::list_all_tables(self.current()?).await
    }

    pub async fn list_schemas(&self) -> HopResult<Vec<String>> {
        MetadataService::list_schemas(self.current()?).await
    }

    /// Describe `table` or `schema.table`.
    pub async fn describe_table(&self, name: &str) -> HopResult<TableSchema> {
        MetadataService::describe_table(self.current()?, name).await
    }

    /// Run SQL verbatim on the current connection.
    ///
    /// `None` means the statement produced no result set.
    pub async fn query(&self, sql: &str) -> HopResult<Option<QueryResult>> {
        QueryService::execute_with(self.current()?, sql, &self.resolver).await
    }

    /// Pool statistics of the current connection.
    pub fn stats(&self) -> HopResult<PoolStats> {
        Ok(self.current()?.stats())
    }

    /// Close every connection, then every tunnel.
    ///
    /// Failures are logged and returned rather than stopping the teardown.
    /// The registry is empty afterwards and can be switched again.
    pub async fn close(&mut self) -> Vec<(String, HopError)> {
        let mut failures = Vec::new();

        for (name, querier) in self.active.drain() {
            if let Err(e) = querier.close() {
                tracing::warn!(connection = %name, error = %e, "Failed to close connection");
                failures.push((name, e));
            }
        }

        failures.extend(self.tunnel_manager.close_all().await);
        self.current = None;

        tracing::info!(failures = failures.len(), "Registry closed");
        failures
    }
}

async fn ping(querier: &dyn Querier, timeout: Option<Duration>) -> HopResult<()> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, querier.ping()).await.map_err(|_| {
            HopError::connection(format!("ping timed out after {}s", timeout.as_secs()))
        })?,
        None => querier.ping().await,
    }
}
