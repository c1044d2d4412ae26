//! Error types for sqlhop.
//!
//! Every failure surfaces to the immediate caller with the failing
//! connection, tunnel, or table name in its message.

use thiserror::Error;

/// Main error type for sqlhop.
#[derive(Debug, Error)]
pub enum HopError {
    /// Invalid or unknown configuration: unknown connection or tunnel name,
    /// malformed qualified table name, unsupported driver identifier.
    #[error("Config error: {message}")]
    Config {
        /// Human-readable error message.
        message: String,
    },

    /// Credential rejection, host identity verification failure, or
    /// passphrase decryption failure after retries were exhausted.
    #[error("Authentication error: {message}")]
    Authentication {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the user.
        hint: Option<String>,
    },

    /// Database connection open or ping failed.
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// SSH tunnel dial or forwarding failed.
    #[error("SSH error: {message}")]
    Ssh {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The operation needs a selected connection.
    #[error("an active connection is required")]
    NoActiveConnection,

    /// Server-reported query error with PostgreSQL-specific details.
    #[error("{message}")]
    Query {
        /// PostgreSQL error message.
        message: String,
        /// Additional detail from PostgreSQL.
        detail: Option<String>,
        /// PostgreSQL hint.
        hint: Option<String>,
        /// Position in query (1-indexed).
        position: Option<usize>,
        /// PostgreSQL error code (e.g., "42P01").
        code: Option<String>,
    },

    /// A result value could not be decoded into any known representation.
    #[error("Scan error in column '{column}': {message}")]
    Scan {
        /// Column being decoded.
        column: String,
        /// Human-readable error message.
        message: String,
    },

    /// Unexpected internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result alias used throughout the crate.
pub type HopResult<T> = Result<T, HopError>;

impl HopError {
    // ========== Constructors ==========

    /// Create a new config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a new authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication { message: message.into(), hint: None }
    }

    /// Create a new authentication error with custom hint.
    pub fn authentication_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Authentication { message: message.into(), hint: Some(hint.into()) }
    }

    /// Create a new connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Create a new connection error with source.
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a new SSH error.
    pub fn ssh(message: impl Into<String>) -> Self {
        Self::Ssh { message: message.into(), source: None }
    }

    /// Create a new SSH error with source.
    pub fn ssh_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Ssh { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a new scan error for a column.
    pub fn scan(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Scan { column: column.into(), message: message.into() }
    }

    /// Create a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Prefix the message with context identifying the failing object.
    ///
    /// Variants without a free-form message are returned unchanged.
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        match self {
            Self::Config { message } => Self::Config { message: format!("{context}: {message}") },
            Self::Authentication { message, hint } => {
                Self::Authentication { message: format!("{context}: {message}"), hint }
            }
            Self::Connection { message, source } => {
                Self::Connection { message: format!("{context}: {message}"), source }
            }
            Self::Ssh { message, source } => {
                Self::Ssh { message: format!("{context}: {message}"), source }
            }
            Self::Internal { message, source } => {
                Self::Internal { message: format!("{context}: {message}"), source }
            }
            Self::Query { message, detail, hint, position, code } => Self::Query {
                message: format!("{context}: {message}"),
                detail,
                hint,
                position,
                code,
            },
            Self::Scan { column, message } => {
                Self::Scan { column, message: format!("{context}: {message}") }
            }
            Self::NoActiveConnection => Self::NoActiveConnection,
        }
    }

    // ========== Methods ==========

    /// Check if this is a connectivity failure (tunnel dial, open, ping).
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Ssh { .. })
    }

    /// Check if this is an authentication failure.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Check if this is a configuration failure.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Get the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "Config",
            Self::Authentication { .. } => "Authentication",
            Self::Connection { .. } => "Connection",
            Self::Ssh { .. } => "SSH",
            Self::NoActiveConnection => "Connection",
            Self::Query { .. } => "Query",
            Self::Scan { .. } => "Scan",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Get actionable hint for the user.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Config { .. } => Some("Check the connection and tunnel definitions"),
            Self::Authentication { hint, .. } => hint.as_deref(),
            Self::Connection { .. } => Some("Check that the database server is running"),
            Self::Ssh { .. } => Some("Check that the bastion host is reachable"),
            Self::NoActiveConnection => Some("Switch to a connection first"),
            Self::Query { hint, .. } => hint.as_deref(),
            Self::Scan { .. } => None,
            Self::Internal { .. } => Some("Please report this issue"),
        }
    }

    /// Get PostgreSQL error code (if applicable).
    pub fn pg_code(&self) -> Option<&str> {
        match self {
            Self::Query { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

// ========== Error Conversions ==========

/// Convert from tokio_postgres::Error to HopError.
impl From<tokio_postgres::Error> for HopError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let message = db_err.message().to_string();
            let detail = db_err.detail().map(String::from);
            let hint = db_err.hint().map(String::from);
            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos as usize),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });
            let code_str = db_err.code().code();
            let code = Some(code_str.to_string());

            return match code_str {
                "28P01" => HopError::Authentication {
                    message,
                    hint: Some("Invalid password - check your credentials".to_string()),
                },
                "28000" => HopError::Authentication {
                    message,
                    hint: Some("Authentication failed - check username and permissions".to_string()),
                },
                _ if code_str.starts_with("08") => {
                    HopError::Connection { message, source: Some(Box::new(err)) }
                }
                _ => HopError::Query { message, detail, hint, position, code },
            };
        }

        if err.is_closed() {
            return HopError::Connection {
                message: "Connection closed".to_string(),
                source: Some(Box::new(err)),
            };
        }

        HopError::Connection { message: err.to_string(), source: Some(Box::new(err)) }
    }
}

/// Convert from russh::Error to HopError.
impl From<russh::Error> for HopError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::UnknownKey => HopError::authentication_with_hint(
                "host key verification failed",
                "Check known_hosts or the pinned host public key",
            ),
            russh::Error::NotAuthenticated => HopError::authentication("not authenticated"),
            other => HopError::ssh_with_source(other.to_string(), other),
        }
    }
}

/// Convert from serde_json::Error to HopError.
impl From<serde_json::Error> for HopError {
    fn from(err: serde_json::Error) -> Self {
        HopError::config(format!("invalid config json: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_prefixes_message() {
        let err = HopError::connection("ping timed out").context("connection 'prod'");
        assert_eq!(err.to_string(), "Connection error: connection 'prod': ping timed out");
        assert!(err.is_connectivity());
    }

    #[test]
    fn test_context_reaches_server_errors() {
        let err = HopError::Query {
            message: "permission denied for table orders".into(),
            detail: None,
            hint: None,
            position: None,
            code: Some("42501".into()),
        }
        .context("table 'sales.orders'");
        assert_eq!(err.to_string(), "table 'sales.orders': permission denied for table orders");
        assert_eq!(err.pg_code(), Some("42501"));

        let err = HopError::scan("qty", "value 70000 overflows int16").context("connection 'prod'");
        assert_eq!(
            err.to_string(),
            "Scan error in column 'qty': connection 'prod': value 70000 overflows int16"
        );
    }

    #[test]
    fn test_context_leaves_tagless_variants() {
        let err = HopError::NoActiveConnection.context("ignored");
        assert!(matches!(err, HopError::NoActiveConnection));
    }

    #[test]
    fn test_categories() {
        assert_eq!(HopError::config("x").category(), "Config");
        assert_eq!(HopError::ssh("x").category(), "SSH");
        assert_eq!(HopError::scan("id", "bad").category(), "Scan");
        assert!(HopError::ssh("x").is_connectivity());
        assert!(!HopError::authentication("x").is_connectivity());
        assert!(HopError::authentication("x").is_authentication());
    }

    #[test]
    fn test_unknown_key_maps_to_authentication() {
        let err = HopError::from(russh::Error::UnknownKey);
        assert!(err.is_authentication());
    }
}
