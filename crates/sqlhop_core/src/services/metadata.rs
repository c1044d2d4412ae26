//! Schema introspection service.
//!
//! Reads `information_schema` through a [`Querier`] so every driver that
//! exposes the standard catalog views can be introspected the same way.

use crate::error::{HopError, HopResult};
use crate::models::{ColumnSchema, QualifiedName, ResultSet, ScanValue, TableSchema, DEFAULT_SCHEMA};
use crate::services::connection::Querier;

/// Schemas hidden from listings. `*` and `?` are wildcards.
pub const IGNORED_SCHEMAS: &[&str] = &["pg_*", "information_schema"];

/// Schema introspection service.
pub struct MetadataService;

impl MetadataService {
    /// List tables in the default schema.
    pub async fn list_tables(q: &dyn Querier) -> HopResult<Vec<String>> {
        Self::list_tables_in_schema(q, DEFAULT_SCHEMA).await
    }

    /// List tables in one schema, ordered by name.
    pub async fn list_tables_in_schema(q: &dyn Querier, schema: &str) -> HopResult<Vec<String>> {
        let set = q
            .fetch(
                r#"
                SELECT table_name::text
                FROM information_schema.tables
                WHERE table_schema = $1::text
                ORDER BY table_name
                "#,
                &[schema],
            )
            .await?;

        set.rows
            .iter()
            .map(|row| required_text(&set, row, 0))
            .collect()
    }

    /// List every table outside the ignored schemas as `schema.table`.
    pub async fn list_all_tables(q: &dyn Querier) -> HopResult<Vec<String>> {
        let set = q
            .fetch(
                r#"
                SELECT table_schema::text, table_name::text
                FROM information_schema.tables
                ORDER BY table_schema, table_name
                "#,
                &[],
            )
            .await?;

        let mut tables = Vec::new();
        for row in &set.rows {
            let schema = required_text(&set, row, 0)?;
            if is_ignored_schema(&schema) {
                continue;
            }
            let table = required_text(&set, row, 1)?;
            tables.push(QualifiedName { schema, table }.to_string());
        }
        Ok(tables)
    }

    /// List schemas outside the ignore list.
    pub async fn list_schemas(q: &dyn Querier) -> HopResult<Vec<String>> {
        let set = q
            .fetch(
                r#"
                SELECT schema_name::text
                FROM information_schema.schemata
                ORDER BY schema_name
                "#,
                &[],
            )
            .await?;

        let mut schemas = Vec::new();
        for row in &set.rows {
            let schema = required_text(&set, row, 0)?;
            if !is_ignored_schema(&schema) {
                schemas.push(schema);
            }
        }
        Ok(schemas)
    }

    /// Describe a table given as `table` or `schema.table`.
    ///
    /// An unknown table yields a schema with no columns.
    pub async fn describe_table(q: &dyn Querier, name: &str) -> HopResult<TableSchema> {
        let qualified = QualifiedName::parse(name)?;

        let set = q
            .fetch(
                r#"
                SELECT
                    column_name::text,
                    column_default::text,
                    is_nullable::text,
                    data_type::text,
                    udt_schema::text,
                    udt_name::text
                FROM information_schema.columns
                WHERE table_schema = $1::text AND table_name = $2::text
                ORDER BY ordinal_position
                "#,
                &[qualified.schema.as_str(), qualified.table.as_str()],
            )
            .await
            .map_err(|e| e.context(format!("table '{qualified}'")))?;

        let columns = set
            .rows
            .iter()
            .map(|row| column_from_row(&set, row))
            .collect::<HopResult<Vec<_>>>()?;

        tracing::debug!(table = %qualified, columns = columns.len(), "Described table");

        Ok(TableSchema { name: qualified.table, columns })
    }
}

fn column_from_row(set: &ResultSet, row: &[ScanValue]) -> HopResult<ColumnSchema> {
    let name = required_text(set, row, 0)?;
    let default = optional_text(set, row, 1)?;
    let nullable = parse_yes_no(column_name(set, 2), &required_text(set, row, 2)?)?;
    let mut data_type = required_text(set, row, 3)?;

    if data_type == "USER-DEFINED" {
        let udt_schema = optional_text(set, row, 4)?.unwrap_or_default();
        let udt_name = optional_text(set, row, 5)?.unwrap_or_default();
        data_type = format!("{udt_schema}.{udt_name}");
    }

    let mut attrs = Vec::with_capacity(2);
    if let Some(default) = default {
        attrs.push(format!("DEFAULT {default}"));
    }
    attrs.push(if nullable { "NULL" } else { "NOT NULL" }.to_string());

    Ok(ColumnSchema { name, data_type, attrs })
}

/// Parse an `is_nullable` value.
fn parse_yes_no(column: &str, value: &str) -> HopResult<bool> {
    if value.eq_ignore_ascii_case("yes") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("no") {
        Ok(false)
    } else {
        Err(HopError::scan(column, format!("expected YES or NO, got '{value}'")))
    }
}

fn column_name(set: &ResultSet, idx: usize) -> &str {
    set.columns.get(idx).map(|c| c.name.as_str()).unwrap_or("?")
}

fn optional_text(set: &ResultSet, row: &[ScanValue], idx: usize) -> HopResult<Option<String>> {
    match row.get(idx) {
        None | Some(ScanValue::Null) => Ok(None),
        Some(ScanValue::Text(s)) => Ok(Some(s.clone())),
        Some(other) => Err(HopError::scan(
            column_name(set, idx),
            format!("expected text, got {}", other.kind()),
        )),
    }
}

fn required_text(set: &ResultSet, row: &[ScanValue], idx: usize) -> HopResult<String> {
    optional_text(set, row, idx)?
        .ok_or_else(|| HopError::scan(column_name(set, idx), "unexpected NULL"))
}

/// Check a schema name against [`IGNORED_SCHEMAS`].
pub fn is_ignored_schema(schema: &str) -> bool {
    IGNORED_SCHEMAS.iter().any(|pattern| glob_match(pattern, schema))
}

/// Minimal glob: `*` matches any run, `?` matches one character.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnType;
    use crate::test_support::MockQuerier;

    fn text(s: &str) -> ScanValue {
        ScanValue::Text(s.to_string())
    }

    fn columns_set(rows: Vec<Vec<ScanValue>>) -> ResultSet {
        let columns = ["column_name", "column_default", "is_nullable", "data_type", "udt_schema", "udt_name"]
            .into_iter()
            .map(|n| ColumnType::new(n, "TEXT"))
            .collect();
        ResultSet::new(columns, rows)
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("pg_*", "pg_catalog"));
        assert!(glob_match("pg_*", "pg_"));
        assert!(!glob_match("pg_*", "public"));
        assert!(glob_match("a?c", "abc"));
        assert!(glob_match("*_temp_*", "pg_temp_1"));
        assert!(glob_match("information_schema", "information_schema"));
        assert!(!glob_match("information_schema", "information_schemas"));
    }

    #[test]
    fn test_ignored_schemas() {
        assert!(is_ignored_schema("pg_toast"));
        assert!(is_ignored_schema("information_schema"));
        assert!(!is_ignored_schema("public"));
        assert!(!is_ignored_schema("app_pg_data"));
    }

    #[test]
    fn test_parse_yes_no_any_case() {
        assert!(parse_yes_no("is_nullable", "YES").unwrap());
        assert!(parse_yes_no("is_nullable", "yes").unwrap());
        assert!(!parse_yes_no("is_nullable", "No").unwrap());
        let err = parse_yes_no("is_nullable", "maybe").unwrap_err();
        assert!(matches!(err, HopError::Scan { .. }));
    }

    #[tokio::test]
    async fn test_describe_table_attrs() {
        let q = MockQuerier::new().with_result(columns_set(vec![
            vec![text("id"), text("nextval('orders_id_seq'::regclass)"), text("NO"), text("integer"), text("pg_catalog"), text("int4")],
            vec![text("status"), ScanValue::Null, text("YES"), text("USER-DEFINED"), text("public"), text("order_status")],
        ]));

        let schema = MetadataService::describe_table(&q, "orders").await.unwrap();
        assert_eq!(schema.name, "orders");
        assert_eq!(schema.columns.len(), 2);
        assert_eq!(
            schema.columns[0].attrs,
            vec!["DEFAULT nextval('orders_id_seq'::regclass)", "NOT NULL"]
        );
        assert_eq!(schema.columns[1].data_type, "public.order_status");
        assert_eq!(schema.columns[1].attrs, vec!["NULL"]);
        assert_eq!(q.last_params(), vec!["public", "orders"]);
    }

    #[tokio::test]
    async fn test_describe_table_bad_nullability() {
        let q = MockQuerier::new().with_result(columns_set(vec![vec![
            text("id"),
            ScanValue::Null,
            text("sometimes"),
            text("integer"),
            text("pg_catalog"),
            text("int4"),
        ]]));
        let err = MetadataService::describe_table(&q, "public.t").await.unwrap_err();
        assert!(matches!(err, HopError::Scan { .. }));
    }

    #[tokio::test]
    async fn test_list_schemas_filters_ignored() {
        let set = ResultSet::new(
            vec![ColumnType::new("schema_name", "TEXT")],
            vec![vec![text("information_schema")], vec![text("pg_catalog")], vec![text("public")], vec![text("sales")]],
        );
        let q = MockQuerier::new().with_result(set);
        let schemas = MetadataService::list_schemas(&q).await.unwrap();
        assert_eq!(schemas, vec!["public", "sales"]);
    }

    #[tokio::test]
    async fn test_list_all_tables_qualifies_names() {
        let set = ResultSet::new(
            vec![ColumnType::new("table_schema", "TEXT"), ColumnType::new("table_name", "TEXT")],
            vec![
                vec![text("pg_catalog"), text("pg_class")],
                vec![text("public"), text("orders")],
                vec![text("sales"), text("invoices")],
            ],
        );
        let q = MockQuerier::new().with_result(set);
        let tables = MetadataService::list_all_tables(&q).await.unwrap();
        assert_eq!(tables, vec!["public.orders", "sales.invoices"]);
    }

    #[tokio::test]
    async fn test_list_tables_defaults_to_public() {
        let q = MockQuerier::new().with_result(ResultSet::new(
            vec![ColumnType::new("table_name", "TEXT")],
            vec![vec![text("orders")]],
        ));
        let tables = MetadataService::list_tables(&q).await.unwrap();
        assert_eq!(tables, vec!["orders"]);
        assert_eq!(q.last_params(), vec!["public"]);
    }
}
