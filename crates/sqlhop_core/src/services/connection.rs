//! Database drivers and live connection handles.
//!
//! A [`Driver`] opens a [`Querier`] for a [`ConnectionSpec`]. The only
//! built-in driver is Postgres, backed by a deadpool-postgres pool whose
//! size is capped by the connection's `max_open_conns`.

use crate::error::{HopError, HopResult};
use crate::models::{ColumnType, ConnectionSpec, PoolStats, ResultSet, ScanValue};
use crate::services::pg_types;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::time::Duration;
use tokio_postgres::config::SslMode;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, SimpleQueryMessage};

/// Identifier of the Postgres driver.
pub const POSTGRES_DRIVER: &str = "postgres";

/// `sslmode` used when a connection does not set one.
pub const DEFAULT_SSL_MODE: &str = "require";

/// Type name reported for columns of a script run over the simple protocol,
/// where every cell arrives as text.
pub const SCRIPT_COLUMN_TYPE: &str = "TEXT";

/// How long an idle pooled connection is kept before it is recycled.
const IDLE_KEEPALIVE: Duration = Duration::from_secs(60);

/// A live database handle that can run SQL.
#[async_trait]
pub trait Querier: Send + Sync {
    /// Verify the server is reachable.
    async fn ping(&self) -> HopResult<()>;

    /// Run SQL with text parameters and drain its result set.
    ///
    /// Statements without a result set return an empty column list. A
    /// parameterless script of several statements returns the first
    /// result set it produces.
    async fn fetch(&self, sql: &str, params: &[&str]) -> HopResult<ResultSet>;

    /// Pool statistics.
    fn stats(&self) -> PoolStats;

    /// Close the handle and every pooled connection.
    fn close(&self) -> HopResult<()>;
}

/// Opens connections for one driver identifier.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Identifier used in `ConnectionSpec::driver`.
    fn name(&self) -> &'static str;

    /// Open a handle. Does not verify liveness; callers ping.
    async fn open(&self, spec: &ConnectionSpec, password: &str) -> HopResult<Box<dyn Querier>>;
}

/// The Postgres driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDriver;

#[async_trait]
impl Driver for PostgresDriver {
    fn name(&self) -> &'static str {
        POSTGRES_DRIVER
    }

    async fn open(&self, spec: &ConnectionSpec, password: &str) -> HopResult<Box<dyn Querier>> {
        let pool = PgPool::open(spec, password)?;
        Ok(Box::new(pool))
    }
}

/// TLS behaviour derived from the `sslmode` driver option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPolicy {
    /// Plain TCP
    Disable,
    /// Try TLS without verifying the certificate, fall back to plain TCP
    Prefer,
    /// TLS without certificate verification
    Require,
    /// TLS with certificate verification
    Verify,
}

impl TlsPolicy {
    /// Parse a libpq-style `sslmode` value.
    pub fn parse(sslmode: &str) -> HopResult<Self> {
        match sslmode.to_lowercase().as_str() {
            "disable" => Ok(Self::Disable),
            "allow" | "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            "verify-ca" | "verify_ca" | "verify-full" | "verify_full" => Ok(Self::Verify),
            other => Err(HopError::config(format!("unsupported sslmode '{other}'"))),
        }
    }

    fn ssl_mode(self) -> SslMode {
        match self {
            Self::Disable => SslMode::Disable,
            Self::Prefer => SslMode::Prefer,
            Self::Require | Self::Verify => SslMode::Require,
        }
    }
}

/// A pooled Postgres connection handle.
#[derive(Debug)]
pub struct PgPool {
    /// Connection name, for logging
    name: String,
    /// The actual connection pool
    pool: Pool,
}

impl PgPool {
    /// Build the pool. Connections are created lazily on first use.
    pub fn open(spec: &ConnectionSpec, password: &str) -> HopResult<Self> {
        let tls = TlsPolicy::parse(spec.driver_opt("sslmode").unwrap_or(DEFAULT_SSL_MODE))?;

        let mut pg_config = tokio_postgres::Config::new();
        pg_config.host(&spec.host);
        pg_config.port(spec.port);
        pg_config.dbname(&spec.database);
        pg_config.user(&spec.username);
        pg_config.password(password);
        pg_config.ssl_mode(tls.ssl_mode());
        pg_config.application_name(spec.driver_opt("application_name").unwrap_or("sqlhop"));
        pg_config.keepalives(true);
        pg_config.keepalives_idle(IDLE_KEEPALIVE);
        if let Some(timeout) = spec.connect_timeout() {
            pg_config.connect_timeout(timeout);
        }

        let manager_config = ManagerConfig { recycling_method: RecyclingMethod::Fast };
        let manager = match tls {
            TlsPolicy::Disable => Manager::from_config(pg_config, NoTls, manager_config),
            _ => Manager::from_config(pg_config, make_tls(tls == TlsPolicy::Verify)?, manager_config),
        };

        let pool = Pool::builder(manager)
            .max_size(spec.max_open())
            .create_timeout(spec.connect_timeout())
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| HopError::connection(format!("failed to create pool: {e}")))?;

        tracing::debug!(
            connection = %spec.name,
            url = %spec.display_url(),
            max_open = spec.max_open(),
            "Postgres pool created"
        );

        Ok(Self { name: spec.name.clone(), pool })
    }

    async fn client(&self) -> HopResult<deadpool_postgres::Client> {
        self.pool.get().await.map_err(|e| match e {
            deadpool_postgres::PoolError::Backend(err) => HopError::from(err),
            other => HopError::connection(format!("failed to acquire connection: {other}")),
        })
    }
}

fn make_tls(verify: bool) -> HopResult<postgres_native_tls::MakeTlsConnector> {
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(!verify)
        .danger_accept_invalid_hostnames(!verify)
        .build()
        .map_err(|e| HopError::connection_with_source("failed to initialise TLS", e))?;
    Ok(postgres_native_tls::MakeTlsConnector::new(connector))
}

#[async_trait]
impl Querier for PgPool {
    async fn ping(&self) -> HopResult<()> {
        let client = self.client().await?;
        client.execute("SELECT 1", &[]).await?;
        Ok(())
    }

    async fn fetch(&self, sql: &str, params: &[&str]) -> HopResult<ResultSet> {
        let client = self.client().await?;
        let statement = match client.prepare(sql).await {
            Ok(statement) => statement,
            Err(e) if runs_as_script(e.code(), params) => {
                tracing::debug!(connection = %self.name, "Statement cannot be prepared, running as script");
                let messages = client.simple_query(sql).await?;
                return Ok(first_result_set(messages.into_iter().filter_map(script_message)));
            }
            Err(e) => return Err(e.into()),
        };
        let params: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let columns: Vec<ColumnType> = statement
            .columns()
            .iter()
            .map(|col| ColumnType::new(col.name(), pg_types::type_name(col.type_())))
            .collect();

        if columns.is_empty() {
            let affected = client.execute(&statement, &params).await?;
            tracing::debug!(connection = %self.name, affected, "Statement executed");
            return Ok(ResultSet::no_columns());
        }

        let rows = client.query(&statement, &params).await?;
        let rows = rows.iter().map(pg_types::scan_row).collect::<HopResult<Vec<_>>>()?;
        tracing::debug!(connection = %self.name, row_count = rows.len(), "Query completed");

        Ok(ResultSet::new(columns, rows))
    }

    fn stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            max_size: status.max_size,
            size: status.size,
            available: status.available as isize,
            waiting: status.waiting,
        }
    }

    fn close(&self) -> HopResult<()> {
        self.pool.close();
        tracing::info!(connection = %self.name, "Connection pool closed");
        Ok(())
    }
}

/// Multi-statement scripts cannot be prepared; the server rejects them as a
/// syntax error. Only parameterless SQL may be retried over the simple
/// protocol.
fn runs_as_script(code: Option<&SqlState>, params: &[&str]) -> bool {
    params.is_empty() && code == Some(&SqlState::SYNTAX_ERROR)
}

/// Simple-protocol messages reduced to what a [`ResultSet`] needs.
#[derive(Debug, Clone, PartialEq)]
enum ScriptMessage {
    Columns(Vec<String>),
    Row(Vec<Option<String>>),
    Complete,
}

fn script_message(message: SimpleQueryMessage) -> Option<ScriptMessage> {
    match message {
        SimpleQueryMessage::RowDescription(columns) => {
            Some(ScriptMessage::Columns(columns.iter().map(|c| c.name().to_string()).collect()))
        }
        SimpleQueryMessage::Row(row) => {
            Some(ScriptMessage::Row((0..row.len()).map(|i| row.get(i).map(String::from)).collect()))
        }
        SimpleQueryMessage::CommandComplete(_) => Some(ScriptMessage::Complete),
        _ => None,
    }
}

/// The first statement of a script that produced a result set, with cells
/// as text. Scripts where no statement returns rows yield no columns.
fn first_result_set(messages: impl IntoIterator<Item = ScriptMessage>) -> ResultSet {
    let mut columns: Option<Vec<ColumnType>> = None;
    let mut rows = Vec::new();

    for message in messages {
        match message {
            ScriptMessage::Columns(names) if columns.is_none() => {
                columns = Some(
                    names.into_iter().map(|n| ColumnType::new(n, SCRIPT_COLUMN_TYPE)).collect(),
                );
            }
            ScriptMessage::Row(cells) if columns.is_some() => rows.push(
                cells
                    .into_iter()
                    .map(|cell| cell.map_or(ScanValue::Null, ScanValue::Text))
                    .collect(),
            ),
            ScriptMessage::Complete if columns.is_some() => break,
            _ => {}
        }
    }

    match columns {
        Some(columns) => ResultSet::new(columns, rows),
        None => ResultSet::no_columns(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_policy_parse() {
        assert_eq!(TlsPolicy::parse("disable").unwrap(), TlsPolicy::Disable);
        assert_eq!(TlsPolicy::parse("PREFER").unwrap(), TlsPolicy::Prefer);
        assert_eq!(TlsPolicy::parse("require").unwrap(), TlsPolicy::Require);
        assert_eq!(TlsPolicy::parse("verify-full").unwrap(), TlsPolicy::Verify);
        assert!(TlsPolicy::parse("ignore").unwrap_err().is_config());
    }

    #[test]
    fn test_only_parameterless_syntax_errors_run_as_script() {
        assert!(runs_as_script(Some(&SqlState::SYNTAX_ERROR), &[]));
        assert!(!runs_as_script(Some(&SqlState::SYNTAX_ERROR), &["public"]));
        assert!(!runs_as_script(Some(&SqlState::UNDEFINED_TABLE), &[]));
        assert!(!runs_as_script(None, &[]));
    }

    #[test]
    fn test_script_without_result_set_has_no_columns() {
        let set = first_result_set([ScriptMessage::Complete, ScriptMessage::Complete]);
        assert!(set.columns.is_empty());
        assert!(set.rows.is_empty());
    }

    #[test]
    fn test_script_returns_first_result_set() {
        let set = first_result_set([
            ScriptMessage::Complete,
            ScriptMessage::Complete,
            ScriptMessage::Columns(vec!["x".into(), "note".into()]),
            ScriptMessage::Row(vec![Some("1".into()), None]),
            ScriptMessage::Row(vec![Some("2".into()), Some("two".into())]),
            ScriptMessage::Complete,
            ScriptMessage::Columns(vec!["other".into()]),
            ScriptMessage::Row(vec![Some("ignored".into())]),
            ScriptMessage::Complete,
        ]);

        assert_eq!(
            set.columns,
            vec![ColumnType::new("x", SCRIPT_COLUMN_TYPE), ColumnType::new("note", SCRIPT_COLUMN_TYPE)]
        );
        assert_eq!(
            set.rows,
            vec![
                vec![ScanValue::Text("1".into()), ScanValue::Null],
                vec![ScanValue::Text("2".into()), ScanValue::Text("two".into())],
            ]
        );
    }

    #[test]
    fn test_script_select_without_rows_keeps_columns() {
        let set = first_result_set([
            ScriptMessage::Columns(vec!["x".into()]),
            ScriptMessage::Complete,
        ]);
        assert_eq!(set.columns.len(), 1);
        assert!(set.rows.is_empty());
    }

    #[tokio::test]
    async fn test_open_is_lazy() {
        let mut spec = ConnectionSpec::new("lazy", "127.0.0.1", 1, "db", "user", POSTGRES_DRIVER);
        spec.driver_opts.insert("sslmode".into(), "disable".into());
        spec.max_open_conns = 2;

        let pool = PostgresDriver.open(&spec, "secret").await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.max_size, 2);
        assert_eq!(stats.size, 0);
        pool.close().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_sslmode_fails_before_io() {
        let mut spec = ConnectionSpec::new("bad", "127.0.0.1", 1, "db", "user", POSTGRES_DRIVER);
        spec.driver_opts.insert("sslmode".into(), "sometimes".into());
        assert!(PgPool::open(&spec, "secret").unwrap_err().is_config());
    }
}
