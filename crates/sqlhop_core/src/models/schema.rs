//! Schema introspection models.

use crate::error::{HopError, HopResult};
use serde::Serialize;
use std::fmt;

/// Schema assumed when a table name is not qualified.
pub const DEFAULT_SCHEMA: &str = "public";

/// A column as described by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,
    /// Resolved type name; user-defined types use `schema.type`.
    pub data_type: String,
    /// `DEFAULT <expr>` when a default exists, then `NULL` or `NOT NULL`.
    pub attrs: Vec<String>,
}

/// A described table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    /// Table name (unqualified).
    pub name: String,
    /// Columns in ordinal order.
    pub columns: Vec<ColumnSchema>,
}

/// A `schema.table` pair parsed from user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    /// Schema name
    pub schema: String,
    /// Table name
    pub table: String,
}

impl QualifiedName {
    /// Parse `table` or `schema.table`.
    ///
    /// Unqualified names land in [`DEFAULT_SCHEMA`]. Empty input, empty
    /// segments and more than two segments are rejected.
    pub fn parse(name: &str) -> HopResult<Self> {
        let parts: Vec<&str> = name.split('.').collect();
        let (schema, table) = match parts.as_slice() {
            [table] => (DEFAULT_SCHEMA, *table),
            [schema, table] => (*schema, *table),
            _ => return Err(HopError::config(format!("invalid table name: '{name}'"))),
        };

        if schema.is_empty() || table.is_empty() {
            return Err(HopError::config(format!("invalid table name: '{name}'")));
        }

        Ok(Self { schema: schema.to_string(), table: table.to_string() })
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}
