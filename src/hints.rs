//! Error messages that point the user at what the database actually holds.

use anyhow::anyhow;
use itertools::Itertools;

use crate::engine::{CatalogColumn, EngineError, SqlEngine};

const COLUMN_HINT: &str = "  Looks like you are referring to a column that is not present in the table(s).\n\
    \x20 Check the header (first line) in the CSV.\n\
    \x20 Here are the tables and columns are actually available:\n";

const TABLE_HINT: &str = "  Looks like you are referring to a table that was not created.\n\
    \x20 This could mean that you have a typo in the input file name,\n\
    \x20 or maybe you use --combineInputs but try to use the original inputs.\n\
    \x20 These tables are actually available:\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingObjectKind {
    Column,
    Table,
}

/// A missing identifier is taken for a column when it shows up in the
/// select list, i.e. after `SELECT` and before `FROM`.
pub fn classify_missing_object(sql: &str, name: &str) -> MissingObjectKind {
    let sql = sql.to_ascii_uppercase();
    let name = name.to_ascii_uppercase();
    let Some(select) = sql.find("SELECT") else {
        return MissingObjectKind::Table;
    };
    let after_select = &sql[select + "SELECT".len()..];
    let select_list = match after_select.find("FROM") {
        Some(from) => &after_select[..from],
        None => after_select,
    };
    if !name.is_empty() && select_list.contains(&name) {
        MissingObjectKind::Column
    } else {
        MissingObjectKind::Table
    }
}

/// Lists tables in catalog order, optionally with their columns and types.
pub fn format_catalog(catalog: &[CatalogColumn], with_columns: bool) -> String {
    if catalog.is_empty() {
        return "    (No tables)".to_string();
    }
    let mut out = String::new();
    for (table, columns) in &catalog.iter().chunk_by(|column| column.table.clone()) {
        out.push_str(&format!(" * {table}\n"));
        if with_columns {
            for column in columns {
                out.push_str(&format!(
                    "    - {:<28} {}\n",
                    column.column,
                    column.type_name.to_ascii_uppercase()
                ));
            }
        }
    }
    out
}

fn catalog_text(engine: &mut dyn SqlEngine, with_columns: bool) -> String {
    match engine.catalog() {
        Ok(catalog) => format_catalog(&catalog, with_columns),
        Err(err) => format!("    (Could not list tables: {err})"),
    }
}

/// Turns an "object not found" failure into an error listing what is available.
/// Other failures are annotated with the SQL and the current tables.
pub fn explain_sql_error(engine: &mut dyn SqlEngine, sql: &str, err: EngineError) -> anyhow::Error {
    match err.missing_object() {
        Some((name, statement)) => {
            let kind = classify_missing_object(statement, name);
            let (hint, with_columns) = match kind {
                MissingObjectKind::Column => (COLUMN_HINT, true),
                MissingObjectKind::Table => (TABLE_HINT, false),
            };
            let tables = catalog_text(engine, with_columns);
            anyhow!("{hint}{tables}\nMessage from the database:\n    {err}")
        }
        None => annotate_with_catalog(engine, sql, &err),
    }
}

/// Appends the SQL and the tables with their column types to an engine error.
pub fn annotate_with_catalog(
    engine: &mut dyn SqlEngine,
    sql: &str,
    err: &EngineError,
) -> anyhow::Error {
    let tables = catalog_text(engine, true);
    anyhow!("  SQL: {sql}\n  DB error: {err}\n  Tables and column types:\n{tables}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SqliteEngine;

    fn column(table: &str, column: &str, type_name: &str) -> CatalogColumn {
        CatalogColumn {
            table: table.to_string(),
            column: column.to_string(),
            type_name: type_name.to_string(),
        }
    }

    #[test]
    fn classify_looks_at_select_list() {
        let sql = "SELECT id, amount FROM orders WHERE id > 1";
        assert_eq!(classify_missing_object(sql, "AMOUNT"), MissingObjectKind::Column);
        assert_eq!(classify_missing_object(sql, "orders"), MissingObjectKind::Table);
        assert_eq!(
            classify_missing_object("select * from nope", "nope"),
            MissingObjectKind::Table
        );
    }

    #[test]
    fn format_catalog_groups_columns_under_tables() {
        let catalog = vec![
            column("items", "id", "BIGINT"),
            column("items", "name", "varchar(255)"),
            column("orders", "id", "INTEGER"),
        ];
        let with_columns = format_catalog(&catalog, true);
        assert!(with_columns.starts_with(" * items\n    - id "));
        assert!(with_columns.contains("    - name                         VARCHAR(255)\n"));
        assert!(with_columns.contains(" * orders\n"));
        assert_eq!(format_catalog(&catalog, false), " * items\n * orders\n");
        assert_eq!(format_catalog(&[], true), "    (No tables)");
    }

    #[test]
    fn missing_column_hint_lists_columns() {
        let mut engine = SqliteEngine::open_in_memory().unwrap();
        engine
            .execute("CREATE TABLE orders (id BIGINT, name VARCHAR(255))")
            .unwrap();
        let sql = "SELECT amount FROM orders";
        let err = engine.describe_query(sql).unwrap_err();
        let message = explain_sql_error(&mut engine, sql, err).to_string();
        assert!(message.contains("referring to a column"));
        assert!(message.contains(" * orders\n"));
        assert!(message.contains("    - name"));
        assert!(message.contains("object not found: amount"));
    }

    #[test]
    fn missing_table_hint_lists_only_tables() {
        let mut engine = SqliteEngine::open_in_memory().unwrap();
        engine.execute("CREATE TABLE orders (id BIGINT)").unwrap();
        let sql = "SELECT * FROM order_items";
        let err = engine.describe_query(sql).unwrap_err();
        let message = explain_sql_error(&mut engine, sql, err).to_string();
        assert!(message.contains("referring to a table"));
        assert!(message.contains(" * orders\n"));
        assert!(!message.contains("    - id"));
    }
}
