//! Materializes an output table as JSON.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::info;
use serde_json::{Map, Number, Value};

use crate::{
    data::{SqlType, SqlValue},
    engine::{EngineError, ResultColumn, SqlEngine, quote_identifier},
    io_utils,
    options::JsonExportFormat,
};

/// `out/result.csv` becomes `out/result.json`.
pub fn json_path_for(csv_path: &Path) -> PathBuf {
    let name = csv_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    csv_path.with_file_name(format!("{}.json", io_utils::strip_csv_suffix(&name)))
}

/// Property name for a column. All-uppercase names, as engines like to
/// report them, are lowercased.
pub fn json_label(column: &str) -> String {
    let mut chars = column.chars();
    let shouty = chars.next().is_some_and(|c| c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c == '_');
    if shouty {
        column.to_ascii_lowercase()
    } else {
        column.to_string()
    }
}

pub fn json_value(value: &SqlValue, sql_type: &SqlType) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Boolean(flag) => Value::Bool(*flag),
        SqlValue::Integer(number) if *sql_type == SqlType::Boolean => Value::Bool(*number != 0),
        SqlValue::Integer(number) => Value::Number((*number).into()),
        SqlValue::Real(number) => Number::from_f64(*number)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        SqlValue::Text(text) if *sql_type == SqlType::Timestamp => {
            Value::String(text.replacen(' ', "T", 1))
        }
        SqlValue::Text(text) => Value::String(text.clone()),
    }
}

/// Writes all rows of `table` to `dest` and returns the number of rows written.
pub fn export_table(
    engine: &mut dyn SqlEngine,
    table: &str,
    dest: &Path,
    format: JsonExportFormat,
) -> Result<usize> {
    let sql = format!("SELECT * FROM {}", quote_identifier(table));
    let columns: Vec<ResultColumn> = engine
        .describe_query(&sql)
        .with_context(|| format!("Reading columns of table {table}"))?;
    let labels: Vec<String> = columns.iter().map(|column| json_label(&column.name)).collect();

    let file = File::create(dest).with_context(|| format!("Creating JSON file {dest:?}"))?;
    let mut writer = BufWriter::new(file);
    let mut rows = 0usize;
    if format == JsonExportFormat::Array {
        writer.write_all(b"[\n")?;
    }
    engine
        .query(&sql, &mut |row: &[SqlValue]| {
            let mut object = Map::with_capacity(row.len());
            for ((label, column), value) in labels.iter().zip(&columns).zip(row) {
                object.insert(label.clone(), json_value(value, &column.sql_type));
            }
            if format == JsonExportFormat::Array && rows > 0 {
                writer.write_all(b",\n")?;
            }
            serde_json::to_writer(&mut writer, &object).map_err(std::io::Error::from)?;
            if format == JsonExportFormat::Entries {
                writer.write_all(b"\n")?;
            }
            rows += 1;
            Ok::<(), EngineError>(())
        })
        .with_context(|| format!("Converting table {table} to JSON"))?;
    if format == JsonExportFormat::Array {
        if rows > 0 {
            writer.write_all(b"\n")?;
        }
        writer.write_all(b"]\n")?;
    }
    writer
        .flush()
        .with_context(|| format!("Writing JSON file {dest:?}"))?;
    info!("Wrote {rows} row(s) of {table} to {dest:?}");
    Ok(rows)
}
