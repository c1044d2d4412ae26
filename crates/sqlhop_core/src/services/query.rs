//! Ad-hoc query execution.
//!
//! SQL is sent verbatim. The driver's result set is decoded by the
//! [`ResultTypeResolver`] into null-aware typed values.

use crate::error::HopResult;
use crate::models::QueryResult;
use crate::services::connection::Querier;
use crate::services::result_types::ResultTypeResolver;

use std::time::Instant;

/// Service for running ad-hoc SQL.
pub struct QueryService;

impl QueryService {
    /// Execute a statement and materialise its results.
    ///
    /// Returns `None` when the statement has no result set (DDL, DML
    /// without `RETURNING`). A result set with zero rows is `Some` with an
    /// empty row list.
    pub async fn execute(q: &dyn Querier, sql: &str) -> HopResult<Option<QueryResult>> {
        Self::execute_with(q, sql, &ResultTypeResolver::new()).await
    }

    /// Execute with a caller-provided resolver.
    pub async fn execute_with(
        q: &dyn Querier,
        sql: &str,
        resolver: &ResultTypeResolver,
    ) -> HopResult<Option<QueryResult>> {
        let start = Instant::now();
        let set = q.fetch(sql, &[]).await?;

        if set.columns.is_empty() {
            tracing::debug!(elapsed_ms = start.elapsed().as_millis() as u64, "Statement executed");
            return Ok(None);
        }

        let result = resolver.resolve(set)?;

        tracing::debug!(
            columns = result.columns.len(),
            rows = result.row_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Query completed"
        );

        Ok(Some(result))
    }
}
