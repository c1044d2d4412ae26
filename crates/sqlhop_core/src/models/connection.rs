//! Connection and tunnel specifications and pool status models.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default port for SSH bastions.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Pool size used when a spec leaves `max_open_conns` at zero.
pub const DEFAULT_MAX_OPEN_CONNS: usize = 4;

/// A named database connection.
///
/// Owned by the config loader and never mutated afterwards; the registry
/// rewrites host and port on a transient clone when routing through a tunnel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    /// Name this connection is registered under.
    #[serde(skip)]
    pub name: String,
    /// Server hostname or IP
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// Server port
    #[serde(default)]
    pub port: u16,
    /// Database name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub database: String,
    /// Login username
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    /// Optional; prompted for when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Driver identifier, e.g. "postgres".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub driver: String,
    /// Driver-specific options such as `sslmode`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub driver_opts: HashMap<String, String>,
    /// Name of the tunnel to route through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<String>,
    /// Zero means unbounded.
    #[serde(default)]
    pub connect_timeout_sec: u64,
    /// Zero means [`DEFAULT_MAX_OPEN_CONNS`].
    #[serde(default)]
    pub max_open_conns: usize,
}

impl ConnectionSpec {
    /// Create a spec with the required fields.
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        driver: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            database: database.into(),
            username: username.into(),
            driver: driver.into(),
            ..Default::default()
        }
    }

    /// Route this connection through a named tunnel.
    pub fn with_tunnel(mut self, tunnel: impl Into<String>) -> Self {
        self.tunnel = Some(tunnel.into());
        self
    }

    /// Set a configured password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the connect timeout in seconds.
    pub fn with_connect_timeout_sec(mut self, secs: u64) -> Self {
        self.connect_timeout_sec = secs;
        self
    }

    /// Connect timeout, `None` when unbounded.
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_sec > 0).then(|| Duration::from_secs(self.connect_timeout_sec))
    }

    /// Effective pool cap.
    pub fn max_open(&self) -> usize {
        if self.max_open_conns == 0 {
            DEFAULT_MAX_OPEN_CONNS
        } else {
            self.max_open_conns
        }
    }

    /// Look up a driver option.
    pub fn driver_opt(&self, key: &str) -> Option<&str> {
        self.driver_opts.get(key).map(String::as_str)
    }

    /// Get the display connection string (without password).
    pub fn display_url(&self) -> String {
        format!("{}://{}@{}:{}/{}", self.driver, self.username, self.host, self.port, self.database)
    }
}

/// SSH authentication method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Fixed password, or keyboard-interactive prompting when absent
    Password,
    /// Private key file
    PublicKey,
    /// SSH agent authentication
    #[default]
    Agent,
}

impl AuthMethod {
    /// Convert to string representation for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::PublicKey => "public_key",
            Self::Agent => "agent",
        }
    }
}

/// How the bastion's host key is verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostVerification {
    /// Look the host up in `~/.ssh/known_hosts`.
    KnownHosts,
    /// Compare against a pinned public key file.
    Pinned(PathBuf),
    /// Accept any host key.
    Insecure,
}

/// A named SSH tunnel through a bastion host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelSpec {
    /// Name this tunnel is registered under.
    #[serde(skip)]
    pub name: String,
    /// Bastion hostname
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// Bastion port
    #[serde(default)]
    pub port: u16,
    /// SSH username
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    /// Authentication method
    #[serde(default)]
    pub auth_method: AuthMethod,
    /// Only used with [`AuthMethod::Password`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Only used with [`AuthMethod::PublicKey`]. A leading `~` is expanded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_file: Option<PathBuf>,
    /// Passphrase for an encrypted private key; prompted for when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_passphrase: Option<String>,
    /// Zero means unbounded.
    #[serde(default)]
    pub connect_timeout_sec: u64,
    /// Skip host key verification entirely.
    #[serde(default)]
    pub disable_verify_known_host: bool,
    /// Pinned host public key; takes precedence over every other mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_public_key_file: Option<PathBuf>,
}

impl TunnelSpec {
    /// Create a new tunnel spec using agent authentication.
    pub fn new(name: impl Into<String>, host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            user: user.into(),
            ..Default::default()
        }
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set key-based authentication.
    pub fn with_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.auth_method = AuthMethod::PublicKey;
        self.private_key_file = Some(key_path.into());
        self
    }

    /// Set password-based authentication.
    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.auth_method = AuthMethod::Password;
        self.password = password;
        self
    }

    /// Connect timeout, `None` when unbounded.
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_sec > 0).then(|| Duration::from_secs(self.connect_timeout_sec))
    }

    /// Resolve the host verification mode.
    ///
    /// Pinned key wins over the insecure bypass, which wins over known_hosts.
    pub fn host_verification(&self) -> HostVerification {
        if let Some(path) = &self.host_public_key_file {
            HostVerification::Pinned(path.clone())
        } else if self.disable_verify_known_host {
            HostVerification::Insecure
        } else {
            HostVerification::KnownHosts
        }
    }

    /// `host:port` of the bastion.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Connection pool status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Maximum pool capacity
    pub max_size: usize,
    /// Current connections (idle + active)
    pub size: usize,
    /// Idle connections (can be negative during contention)
    pub available: isize,
    /// Tasks waiting for connections
    pub waiting: usize,
}

impl PoolStats {
    /// Get the number of active (in-use) connections.
    pub fn in_use(&self) -> usize {
        self.size.saturating_sub(self.available.max(0) as usize)
    }
}
