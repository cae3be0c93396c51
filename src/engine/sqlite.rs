//! SQLite implementation of [`SqlEngine`].
//!
//! SQLite has no native file-backed tables, so they are emulated: the engine
//! keeps a registry of text tables and their [`TextSource`]. Attaching a table
//! loads the file into it, converting each field to the declared column type;
//! detaching writes writable tables back to their file and empties them.

use std::{
    collections::HashMap,
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

use encoding_rs_io::DecodeReaderBytesBuilder;
use itertools::Itertools;
use log::{debug, trace};
use rusqlite::{
    Connection, Row, ToSql, params, params_from_iter,
    types::{ToSqlOutput, Value, ValueRef},
};

use super::{
    CatalogColumn, ColumnDef, EngineError, ResultColumn, RowVisitor, SqlEngine, TextSource,
    functions, quote_identifier,
};
use crate::{
    data::{SqlType, SqlValue, coerce_text},
    io_utils,
};

pub const DB_FILE_NAME: &str = "cruncher.sqlite";

const CATALOG_SQL: &str = "SELECT m.name, p.name, p.type \
     FROM sqlite_master m JOIN pragma_table_info(m.name) p \
     WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%' \
     ORDER BY m.name, p.cid";

const OBJECT_NOT_FOUND_MARKERS: &[&str] = &["no such table: ", "no such column: "];

#[derive(Debug)]
struct TextTable {
    name: String,
    columns: Vec<ColumnDef>,
    source: Option<TextSource>,
    header: Option<String>,
    attached: bool,
}

impl TextTable {
    fn writable_source(&self) -> Option<&TextSource> {
        self.source.as_ref().filter(|source| !source.read_only)
    }
}

pub struct SqliteEngine {
    conn: Connection,
    tables: HashMap<String, TextTable>,
}

impl SqliteEngine {
    /// Opens a database file under `dir`, or an in-memory one when `dir` is `None`.
    pub fn open(dir: Option<&Path>) -> Result<Self, EngineError> {
        let conn = match dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                let path = dir.join(DB_FILE_NAME);
                debug!("Opening SQLite database {path:?}");
                Connection::open(&path)
                    .map_err(|err| sql_error(&format!("open {}", path.display()), err))?
            }
            None => {
                debug!("Opening in-memory SQLite database");
                Connection::open_in_memory().map_err(|err| sql_error("open :memory:", err))?
            }
        };
        functions::register(&conn).map_err(|err| sql_error("register functions", err))?;
        Ok(Self {
            conn,
            tables: HashMap::new(),
        })
    }

    pub fn open_in_memory() -> Result<Self, EngineError> {
        Self::open(None)
    }

    pub fn is_attached(&self, table: &str) -> bool {
        self.tables
            .get(&table_key(table))
            .is_some_and(|t| t.attached)
    }

    fn text_table(&self, table: &str) -> Result<&TextTable, EngineError> {
        self.tables
            .get(&table_key(table))
            .ok_or_else(|| EngineError::UnknownTable(table.to_string()))
    }

    fn text_table_mut(&mut self, table: &str) -> Result<&mut TextTable, EngineError> {
        self.tables
            .get_mut(&table_key(table))
            .ok_or_else(|| EngineError::UnknownTable(table.to_string()))
    }

    fn create_table_sql(table: &TextTable) -> String {
        let columns = table
            .columns
            .iter()
            .map(|column| format!("{} {}", quote_identifier(&column.name), column.sql_type.ddl()))
            .join(", ");
        format!("CREATE TABLE {} ({columns})", quote_identifier(&table.name))
    }

    fn select_all(&mut self, sql: &str) -> Result<Vec<Vec<String>>, EngineError> {
        let mut stmt = self.conn.prepare(sql).map_err(|err| sql_error(sql, err))?;
        let width = stmt.column_count();
        let mut rows = stmt.query([]).map_err(|err| sql_error(sql, err))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next().map_err(|err| sql_error(sql, err))? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                let value: String = row.get(idx).map_err(|err| sql_error(sql, err))?;
                values.push(value);
            }
            result.push(values);
        }
        Ok(result)
    }
}

impl SqlEngine for SqliteEngine {
    fn execute(&mut self, sql: &str) -> Result<usize, EngineError> {
        trace!("Executing: {sql}");
        self.conn.execute(sql, []).map_err(|err| sql_error(sql, err))
    }

    fn execute_script(&mut self, sql: &str) -> Result<(), EngineError> {
        self.conn.execute_batch(sql).map_err(|err| sql_error(sql, err))
    }

    fn create_text_table(&mut self, name: &str, columns: &[ColumnDef]) -> Result<(), EngineError> {
        let table = TextTable {
            name: name.to_string(),
            columns: columns.to_vec(),
            source: None,
            header: None,
            attached: false,
        };
        let ddl = Self::create_table_sql(&table);
        debug!("Table DDL SQL: {ddl}");
        self.execute(&ddl)?;
        self.tables.insert(table_key(name), table);
        Ok(())
    }

    fn set_table_source(&mut self, table: &str, source: TextSource) -> Result<(), EngineError> {
        debug!(
            "Binding table {table} to {:?} (ignore_first={}, read_only={})",
            source.path, source.ignore_first, source.read_only
        );
        let entry = self.text_table_mut(table)?;
        entry.source = Some(source);
        entry.attached = false;
        self.set_table_source_enabled(table, true)
    }

    fn set_table_source_header(&mut self, table: &str, header: &str) -> Result<(), EngineError> {
        self.text_table_mut(table)?.header = Some(header.to_string());
        Ok(())
    }

    fn set_table_source_enabled(
        &mut self,
        table: &str,
        enabled: bool,
    ) -> Result<(), EngineError> {
        let key = table_key(table);
        let entry = self
            .tables
            .get(&key)
            .ok_or_else(|| EngineError::UnknownTable(table.to_string()))?;
        if entry.attached == enabled {
            return Ok(());
        }
        if enabled {
            let loaded = load_rows(&mut self.conn, entry)?;
            debug!("Attached table {table}, {loaded} row(s) loaded");
        } else {
            write_back(&self.conn, entry)?;
            let sql = format!("DELETE FROM {}", quote_identifier(&entry.name));
            self.conn.execute(&sql, []).map_err(|err| sql_error(&sql, err))?;
            debug!("Detached table {table}");
        }
        if let Some(entry) = self.tables.get_mut(&key) {
            entry.attached = enabled;
        }
        Ok(())
    }

    fn alter_column_type(
        &mut self,
        table: &str,
        column: &str,
        sql_type: &SqlType,
    ) -> Result<(), EngineError> {
        let entry = self.text_table_mut(table)?;
        if entry.attached {
            return Err(EngineError::TableAttached(entry.name.clone()));
        }
        let statement = format!(
            "ALTER TABLE {} ALTER COLUMN {} SET DATA TYPE {}",
            quote_identifier(&entry.name),
            quote_identifier(column),
            sql_type.ddl()
        );
        let Some(def) = entry
            .columns
            .iter_mut()
            .find(|def| def.name.eq_ignore_ascii_case(column))
        else {
            return Err(EngineError::ObjectNotFound {
                name: column.to_string(),
                statement,
            });
        };
        def.sql_type = sql_type.clone();
        debug!("{statement}");

        // The table is empty while detached, so it can simply be recreated.
        let drop_sql = format!("DROP TABLE {}", quote_identifier(&entry.name));
        let create_sql = Self::create_table_sql(entry);
        self.execute(&drop_sql)?;
        self.execute(&create_sql)?;
        Ok(())
    }

    fn try_cast_column(
        &mut self,
        table: &str,
        column: &str,
        sql_type: &SqlType,
    ) -> Result<(), EngineError> {
        let sql = format!(
            "SELECT {col} FROM {tbl} WHERE {col} IS NOT NULL",
            col = quote_identifier(column),
            tbl = quote_identifier(table)
        );
        trace!("Trial cast of {table}.{column} to {sql_type}");
        let mut stmt = self.conn.prepare(&sql).map_err(|err| sql_error(&sql, err))?;
        let mut rows = stmt.query([]).map_err(|err| sql_error(&sql, err))?;
        while let Some(row) = rows.next().map_err(|err| sql_error(&sql, err))? {
            let text = match row.get_ref(0).map_err(|err| sql_error(&sql, err))? {
                ValueRef::Null => continue,
                ValueRef::Integer(i) => i.to_string(),
                ValueRef::Real(f) => f.to_string(),
                ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                    String::from_utf8_lossy(bytes).into_owned()
                }
            };
            if coerce_text(&text, sql_type).is_err() {
                return Err(EngineError::Cast {
                    table: table.to_string(),
                    column: column.to_string(),
                    target: sql_type.ddl(),
                    value: text,
                });
            }
        }
        Ok(())
    }

    fn number_rows(&mut self, table: &str, start: i64) -> Result<usize, EngineError> {
        let entry = self.text_table(table)?;
        let Some(counter) = entry.columns.iter().find(|column| column.counter) else {
            return Err(source_error(entry, "table has no counter column"));
        };
        // Rows of a fresh table carry rowids 1, 2, ... in insertion order.
        let sql = format!(
            "UPDATE {} SET {} = rowid - 1 + ?1",
            quote_identifier(&entry.name),
            quote_identifier(&counter.name)
        );
        self.conn
            .execute(&sql, params![start])
            .map_err(|err| sql_error(&sql, err))
    }

    fn describe_query(&mut self, sql: &str) -> Result<Vec<ResultColumn>, EngineError> {
        let mut stmt = self.conn.prepare(sql).map_err(|err| sql_error(sql, err))?;
        let declared: Vec<(String, Option<SqlType>)> = stmt
            .columns()
            .iter()
            .map(|column| {
                (
                    column.name().to_string(),
                    column.decl_type().map(SqlType::from_decl),
                )
            })
            .collect();

        // Expressions have no declared type; use what the first row holds.
        let mut sampled: Vec<Option<SqlType>> = vec![None; declared.len()];
        if declared.iter().any(|(_, ty)| ty.is_none()) {
            let mut rows = stmt.query([]).map_err(|err| sql_error(sql, err))?;
            if let Some(row) = rows.next().map_err(|err| sql_error(sql, err))? {
                for (idx, slot) in sampled.iter_mut().enumerate() {
                    *slot = match row.get_ref(idx).map_err(|err| sql_error(sql, err))? {
                        ValueRef::Integer(_) => Some(SqlType::BigInt),
                        ValueRef::Real(_) => Some(SqlType::Double),
                        _ => None,
                    };
                }
            }
        }

        Ok(declared
            .into_iter()
            .zip(sampled)
            .map(|((name, declared), sampled)| ResultColumn {
                name,
                sql_type: declared.or(sampled).unwrap_or_else(SqlType::wide_string),
            })
            .collect())
    }

    fn query(&mut self, sql: &str, visitor: &mut RowVisitor<'_>) -> Result<(), EngineError> {
        let mut stmt = self.conn.prepare(sql).map_err(|err| sql_error(sql, err))?;
        let types: Vec<SqlType> = stmt
            .columns()
            .iter()
            .map(|column| {
                column
                    .decl_type()
                    .map(SqlType::from_decl)
                    .unwrap_or_else(SqlType::wide_string)
            })
            .collect();
        let mut rows = stmt.query([]).map_err(|err| sql_error(sql, err))?;
        while let Some(row) = rows.next().map_err(|err| sql_error(sql, err))? {
            let values = read_row(row, &types).map_err(|err| sql_error(sql, err))?;
            visitor(&values)?;
        }
        Ok(())
    }

    fn catalog(&mut self) -> Result<Vec<CatalogColumn>, EngineError> {
        let mut stmt = self
            .conn
            .prepare(CATALOG_SQL)
            .map_err(|err| sql_error(CATALOG_SQL, err))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CatalogColumn {
                    table: row.get(0)?,
                    column: row.get(1)?,
                    type_name: row.get(2)?,
                })
            })
            .map_err(|err| sql_error(CATALOG_SQL, err))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|err| sql_error(CATALOG_SQL, err))
    }

    fn checkpoint(&mut self) -> Result<(), EngineError> {
        for table in self.tables.values().filter(|t| t.attached) {
            write_back(&self.conn, table)?;
        }
        Ok(())
    }

    fn drop_table(&mut self, table: &str) -> Result<(), EngineError> {
        let sql = format!("DROP TABLE IF EXISTS {}", quote_identifier(table));
        self.execute(&sql)?;
        self.tables.remove(&table_key(table));
        Ok(())
    }

    fn drop_all(&mut self) -> Result<(), EngineError> {
        let objects = self.select_all(
            "SELECT type, name FROM sqlite_master \
             WHERE type IN ('view', 'table') AND name NOT LIKE 'sqlite_%' \
             ORDER BY type DESC",
        )?;
        for object in objects {
            if let [kind, name] = object.as_slice() {
                let sql = format!(
                    "DROP {} IF EXISTS {}",
                    kind.to_ascii_uppercase(),
                    quote_identifier(name)
                );
                self.execute(&sql)?;
            }
        }
        self.tables.clear();
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.conn
            .close()
            .map_err(|(_, err)| sql_error("close connection", err))
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Text(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
            SqlValue::Integer(value) => ToSqlOutput::Owned(Value::Integer(*value)),
            SqlValue::Real(value) => ToSqlOutput::Owned(Value::Real(*value)),
            SqlValue::Boolean(value) => ToSqlOutput::Owned(Value::Integer(i64::from(*value))),
        })
    }
}

fn table_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

fn read_value(value: ValueRef<'_>, sql_type: &SqlType) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) if *sql_type == SqlType::Boolean => SqlValue::Boolean(i != 0),
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn read_row(row: &Row<'_>, types: &[SqlType]) -> rusqlite::Result<Vec<SqlValue>> {
    types
        .iter()
        .enumerate()
        .map(|(idx, sql_type)| row.get_ref(idx).map(|value| read_value(value, sql_type)))
        .collect()
}

/// Translates a SQLite error, recognising missing tables and columns.
fn sql_error(statement: &str, err: rusqlite::Error) -> EngineError {
    let message = match &err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => message.clone(),
        other => other.to_string(),
    };
    for marker in OBJECT_NOT_FOUND_MARKERS {
        if let Some(pos) = message.find(marker) {
            let name = message[pos + marker.len()..]
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
            return EngineError::ObjectNotFound {
                name,
                statement: statement.to_string(),
            };
        }
    }
    EngineError::Sql {
        statement: statement.to_string(),
        message,
    }
}

fn source_error(table: &TextTable, message: impl Into<String>) -> EngineError {
    EngineError::TextSource {
        table: table.name.clone(),
        message: message.into(),
    }
}

/// Loads the rows of the table's source file, converting values to the column types.
fn load_rows(conn: &mut Connection, table: &TextTable) -> Result<usize, EngineError> {
    let Some(source) = &table.source else {
        return Ok(0);
    };
    if !source.path.exists() {
        if source.read_only {
            return Err(source_error(
                table,
                format!("file not found: {}", source.path.display()),
            ));
        }
        return Ok(0);
    }

    let decoded = DecodeReaderBytesBuilder::new()
        .encoding(Some(source.encoding))
        .build(File::open(&source.path)?);
    let mut reader = io_utils::open_csv_reader(decoded, source.quote);
    let insert_sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(&table.name),
        table
            .columns
            .iter()
            .map(|column| quote_identifier(&column.name))
            .join(", "),
        (1..=table.columns.len()).map(|idx| format!("?{idx}")).join(", ")
    );

    let tx = conn
        .transaction()
        .map_err(|err| sql_error(&insert_sql, err))?;
    let mut loaded = 0usize;
    {
        let mut stmt = tx
            .prepare(&insert_sql)
            .map_err(|err| sql_error(&insert_sql, err))?;
        for (idx, record) in reader.records().enumerate() {
            let record = record.map_err(|err| source_error(table, err.to_string()))?;
            if idx == 0 && source.ignore_first {
                continue;
            }
            if record.len() > table.columns.len() {
                return Err(source_error(
                    table,
                    format!(
                        "line {}: {} values for {} columns",
                        idx + 1,
                        record.len(),
                        table.columns.len()
                    ),
                ));
            }
            let values = table
                .columns
                .iter()
                .enumerate()
                .map(|(pos, column)| {
                    let raw = record.get(pos).unwrap_or_default();
                    coerce_text(raw, &column.sql_type).map_err(|_| EngineError::Cast {
                        table: table.name.clone(),
                        column: column.name.clone(),
                        target: column.sql_type.ddl(),
                        value: raw.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            stmt.execute(params_from_iter(values.iter()))
                .map_err(|err| sql_error(&insert_sql, err))?;
            loaded += 1;
        }
    }
    tx.commit().map_err(|err| sql_error(&insert_sql, err))?;
    Ok(loaded)
}

/// Writes a writable table back to its source file, header first.
fn write_back(conn: &Connection, table: &TextTable) -> Result<(), EngineError> {
    let Some(source) = table.writable_source() else {
        return Ok(());
    };
    if let Some(parent) = source.path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut file = BufWriter::new(File::create(&source.path)?);
    if source.ignore_first {
        let header = table.header.clone().unwrap_or_else(|| {
            table.columns.iter().map(|column| column.name.as_str()).join(",")
        });
        file.write_all(header.as_bytes())?;
        file.write_all(b"\n")?;
    }
    let mut writer = io_utils::open_csv_writer(file, source.quote);

    let sql = format!("SELECT * FROM {} ORDER BY rowid", quote_identifier(&table.name));
    let types: Vec<SqlType> = table.columns.iter().map(|c| c.sql_type.clone()).collect();
    let mut stmt = conn.prepare(&sql).map_err(|err| sql_error(&sql, err))?;
    let mut rows = stmt.query([]).map_err(|err| sql_error(&sql, err))?;
    while let Some(row) = rows.next().map_err(|err| sql_error(&sql, err))? {
        let values = read_row(row, &types).map_err(|err| sql_error(&sql, err))?;
        writer
            .write_record(values.iter().map(SqlValue::render))
            .map_err(|err| source_error(table, err.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}
