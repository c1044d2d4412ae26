//! JSON configuration file.
//!
//! ```json
//! {
//!   "connections": { "<name>": { "host": "...", "port": 5432, ... } },
//!   "tunnels": { "<name>": { "host": "...", "port": 22, "user": "..." } }
//! }
//! ```

use crate::error::{HopError, HopResult};
use crate::models::{AuthMethod, ConnectionSpec, TunnelSpec};
use crate::services::connection::{TlsPolicy, POSTGRES_DRIVER};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Drivers accepted by [`Config::validate`].
pub const KNOWN_DRIVERS: &[&str] = &[POSTGRES_DRIVER];

/// Named connections and tunnels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionSpec>,
    #[serde(default)]
    pub tunnels: BTreeMap<String, TunnelSpec>,
}

impl Config {
    /// `<config_dir>/sqlhop/config.json`.
    pub fn default_path() -> HopResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("sqlhop").join("config.json"))
            .ok_or_else(|| HopError::config("could not locate the user config directory"))
    }

    /// Load the default config file, creating an example when it is missing.
    pub fn load_default() -> HopResult<Self> {
        Self::load(&Self::default_path()?, true)
    }

    /// Load, name and validate a config file.
    ///
    /// When `is_default` is set and the file is missing, an example config is
    /// written in its place and an error pointing at it is returned.
    pub fn load(path: &Path, is_default: bool) -> HopResult<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && is_default => {
                Self::write_example(path)?;
                return Err(HopError::config(format!(
                    "config file could not be found at '{}'; an example config has been created",
                    path.display()
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HopError::config(format!("'{}' could not be found", path.display())));
            }
            Err(e) => {
                return Err(HopError::config(format!("could not open '{}': {e}", path.display())));
            }
        };

        let config = Self::from_json(&data)?;
        if config.connections.is_empty() {
            return Err(HopError::config(format!("no connections defined in '{}'", path.display())));
        }

        tracing::debug!(
            path = %path.display(),
            connections = config.connections.len(),
            tunnels = config.tunnels.len(),
            "Loaded config"
        );
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(data: &str) -> HopResult<Self> {
        let mut config: Config = serde_json::from_str(data)?;
        config.fill_names();
        config.validate()?;
        Ok(config)
    }

    /// Copy map keys into the specs' `name` fields.
    pub fn fill_names(&mut self) {
        for (name, spec) in &mut self.connections {
            spec.name = name.clone();
        }
        for (name, spec) in &mut self.tunnels {
            spec.name = name.clone();
        }
    }

    /// Check every connection and tunnel, reporting all problems at once.
    pub fn validate(&self) -> HopResult<()> {
        let mut problems = Vec::new();

        for (name, conn) in &self.connections {
            validate_connection(name, conn, &mut problems);
            if let Some(tunnel) = conn.tunnel.as_deref() {
                if !self.tunnels.contains_key(tunnel) {
                    problems.push(format!("{name}.tunnel: tunnel '{tunnel}' does not exist"));
                }
            }
        }

        for (name, tunnel) in &self.tunnels {
            validate_tunnel(name, tunnel, &mut problems);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(HopError::config(format!("invalid config:\n{}", problems.join("\n"))))
        }
    }

    /// Example written when the default config file is missing.
    pub fn example() -> Self {
        let mut local = ConnectionSpec::new("localdb", "localhost", 5432, "postgres", "postgres", POSTGRES_DRIVER)
            .with_password("postgres")
            .with_connect_timeout_sec(30);
        local.driver_opts = HashMap::from([("sslmode".to_string(), "disable".to_string())]);
        local.max_open_conns = 4;

        Self { connections: BTreeMap::from([("localdb".to_string(), local)]), tunnels: BTreeMap::new() }
    }

    fn write_example(path: &Path) -> HopResult<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| {
                HopError::config(format!("failed to create config directory '{}': {e}", dir.display()))
            })?;
        }
        let json = serde_json::to_string_pretty(&Self::example())
            .map_err(|e| HopError::internal(format!("failed to encode example config: {e}")))?;
        std::fs::write(path, json).map_err(|e| {
            HopError::config(format!("failed to create config file '{}': {e}", path.display()))
        })?;

        tracing::info!(path = %path.display(), "Wrote example config");
        Ok(())
    }
}

fn validate_connection(name: &str, conn: &ConnectionSpec, problems: &mut Vec<String>) {
    if conn.host.is_empty() {
        problems.push(format!("{name}.host: required"));
    }
    if conn.port == 0 {
        problems.push(format!("{name}.port: required"));
    }
    if conn.database.is_empty() {
        problems.push(format!("{name}.database: required"));
    }
    if conn.username.is_empty() {
        problems.push(format!("{name}.username: required"));
    }
    if conn.driver.is_empty() {
        problems.push(format!("{name}.driver: required"));
    } else if !KNOWN_DRIVERS.contains(&conn.driver.as_str()) {
        problems.push(format!("{name}.driver: not a supported driver"));
    }
    if let Some(sslmode) = conn.driver_opt("sslmode") {
        if TlsPolicy::parse(sslmode).is_err() {
            problems.push(format!("{name}.driver_opts.sslmode: unsupported value '{sslmode}'"));
        }
    }
}

fn validate_tunnel(name: &str, tunnel: &TunnelSpec, problems: &mut Vec<String>) {
    if tunnel.host.is_empty() {
        problems.push(format!("{name}.host: required"));
    }
    if tunnel.port == 0 {
        problems.push(format!("{name}.port: required"));
    }
    if tunnel.user.is_empty() {
        problems.push(format!("{name}.user: required"));
    }
    if tunnel.auth_method == AuthMethod::PublicKey && tunnel.private_key_file.is_none() {
        problems.push(format!("{name}.private_key_file: required for public_key auth"));
    }
}
