//! The embedded SQL engine the cruncher drives.
//!
//! [`SqlEngine`] is the contract: text-backed tables whose rows live in a CSV
//! file, a switch to detach and re-attach that file, result-set metadata and a
//! catalog view. [`SqliteEngine`] implements it on top of SQLite.

pub mod functions;
pub mod sqlite;

use std::path::PathBuf;

use encoding_rs::Encoding;
use thiserror::Error;

use crate::data::{SqlType, SqlValue};

pub use sqlite::SqliteEngine;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("object not found: {name} in statement [{statement}]")]
    ObjectNotFound { name: String, statement: String },
    #[error("{message} in statement [{statement}]")]
    Sql { statement: String, message: String },
    #[error("Cannot convert value '{value}' of column {table}.{column} to {target}")]
    Cast {
        table: String,
        column: String,
        target: String,
        value: String,
    },
    #[error("Operation not allowed on text table with data: {0}")]
    TableAttached(String),
    #[error("Text source of table {table}: {message}")]
    TextSource { table: String, message: String },
    #[error("Unknown text table: {0}")]
    UnknownTable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// The identifier an "object not found" error refers to.
    pub fn missing_object(&self) -> Option<(&str, &str)> {
        match self {
            EngineError::ObjectNotFound { name, statement } => Some((name, statement)),
            _ => None,
        }
    }

    pub fn is_type_mismatch(&self) -> bool {
        match self {
            EngineError::Sql { message, .. } => {
                let lowered = message.to_ascii_lowercase();
                lowered.contains("mismatch") || lowered.contains("cannot convert")
            }
            EngineError::Cast { .. } => true,
            _ => false,
        }
    }
}

/// Where a text-backed table keeps its rows.
#[derive(Debug, Clone)]
pub struct TextSource {
    pub path: PathBuf,
    /// Whether the first line of the file is a header rather than data.
    pub ignore_first: bool,
    pub quote: u8,
    pub encoding: &'static Encoding,
    /// Read-only sources are never written back.
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
    /// Row counter column, left out of inserts and filled by [`SqlEngine::number_rows`].
    pub counter: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            counter: false,
        }
    }

    pub fn counter(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: SqlType::BigInt,
            counter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultColumn {
    pub name: String,
    pub sql_type: SqlType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub table: String,
    pub column: String,
    pub type_name: String,
}

/// Receives rows of a query, one at a time.
pub type RowVisitor<'a> = dyn FnMut(&[SqlValue]) -> Result<(), EngineError> + 'a;

pub trait SqlEngine {
    /// Executes one statement and returns the number of affected rows.
    fn execute(&mut self, sql: &str) -> Result<usize, EngineError>;

    fn execute_script(&mut self, sql: &str) -> Result<(), EngineError>;

    fn create_text_table(&mut self, name: &str, columns: &[ColumnDef]) -> Result<(), EngineError>;

    /// Binds the table to `source` and loads its rows.
    fn set_table_source(&mut self, table: &str, source: TextSource) -> Result<(), EngineError>;

    /// Header line written on top of the file, instead of one derived from the DDL.
    fn set_table_source_header(&mut self, table: &str, header: &str) -> Result<(), EngineError>;

    /// Detaching writes a writable table back to its file and empties it;
    /// attaching reloads the rows from the file.
    fn set_table_source_enabled(&mut self, table: &str, enabled: bool)
    -> Result<(), EngineError>;

    /// Only allowed while the table is detached.
    fn alter_column_type(
        &mut self,
        table: &str,
        column: &str,
        sql_type: &SqlType,
    ) -> Result<(), EngineError>;

    /// Checks that every non-null value of the column converts to `sql_type`.
    fn try_cast_column(
        &mut self,
        table: &str,
        column: &str,
        sql_type: &SqlType,
    ) -> Result<(), EngineError>;

    /// Numbers the rows of a freshly filled table in insertion order,
    /// writing `start`, `start + 1`, ... into its counter column.
    fn number_rows(&mut self, table: &str, start: i64) -> Result<usize, EngineError>;

    fn describe_query(&mut self, sql: &str) -> Result<Vec<ResultColumn>, EngineError>;

    fn query(&mut self, sql: &str, visitor: &mut RowVisitor<'_>) -> Result<(), EngineError>;

    fn catalog(&mut self) -> Result<Vec<CatalogColumn>, EngineError>;

    /// Writes all attached writable tables to their files.
    fn checkpoint(&mut self) -> Result<(), EngineError>;

    fn drop_table(&mut self, table: &str) -> Result<(), EngineError>;

    /// Drops every table and view in the working schema.
    fn drop_all(&mut self) -> Result<(), EngineError>;

    fn close(self: Box<Self>) -> Result<(), EngineError>;
}

/// Quotes an identifier for use in SQL text.
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}
