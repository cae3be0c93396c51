//! Narrowing of input columns from wide strings to the most specific type
//! their values fit.

use anyhow::{Context, Result};
use log::{debug, info, trace, warn};

use crate::{
    data::{SqlType, SqlValue},
    engine::{EngineError, SqlEngine, quote_identifier},
};

/// Longest value a narrowed string column holds.
pub const SHORT_STRING_LENGTH: u32 = 255;

/// Types probed before the string candidates, most specific first.
const PROBED_TYPES: &[SqlType] = &[
    SqlType::Boolean,
    SqlType::SmallInt,
    SqlType::Integer,
    SqlType::BigInt,
    SqlType::Uuid,
    SqlType::Timestamp,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnStats {
    non_null: i64,
    min_length: Option<i64>,
    max_length: Option<i64>,
}

/// Picks a narrower type for each column of an attached input table and
/// applies it.
///
/// Columns holding only NULLs keep their type. A column whose type cannot be
/// altered is left as it was. Returns the columns that were changed.
pub fn optimize_column_types(
    engine: &mut dyn SqlEngine,
    table: &str,
    columns: &[String],
) -> Result<Vec<(String, SqlType)>> {
    let mut planned = Vec::new();
    for column in columns {
        if let Some(sql_type) = best_fitting_type(engine, table, column)? {
            debug!("Column {table}.{column} fits {sql_type}");
            planned.push((column.clone(), sql_type));
        }
    }
    if planned.is_empty() {
        return Ok(planned);
    }

    engine
        .set_table_source_enabled(table, false)
        .with_context(|| format!("Detaching table {table} to change column types"))?;
    let mut applied = Vec::with_capacity(planned.len());
    for (column, sql_type) in planned {
        match engine.alter_column_type(table, &column, &sql_type) {
            Ok(()) => applied.push((column, sql_type)),
            Err(err) => warn!("Could not change type of {table}.{column} to {sql_type}: {err}"),
        }
    }

    if let Err(err) = engine.set_table_source_enabled(table, true) {
        warn!("Reattaching {table} with narrowed types failed, reverting to strings: {err}");
        revert_to_strings(engine, table, &applied)?;
        return Ok(Vec::new());
    }
    if !applied.is_empty() {
        info!(
            "Table {table}: {}",
            applied
                .iter()
                .map(|(column, sql_type)| format!("{column} {sql_type}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(applied)
}

fn revert_to_strings(
    engine: &mut dyn SqlEngine,
    table: &str,
    applied: &[(String, SqlType)],
) -> Result<()> {
    engine
        .set_table_source_enabled(table, false)
        .with_context(|| format!("Detaching table {table}"))?;
    for (column, _) in applied {
        engine
            .alter_column_type(table, column, &SqlType::wide_string())
            .with_context(|| format!("Reverting type of {table}.{column}"))?;
    }
    engine
        .set_table_source_enabled(table, true)
        .with_context(|| format!("Reattaching table {table}"))?;
    Ok(())
}

/// The first candidate every non-null value of the column converts to.
fn best_fitting_type(
    engine: &mut dyn SqlEngine,
    table: &str,
    column: &str,
) -> Result<Option<SqlType>> {
    let stats = column_stats(engine, table, column)?;
    if stats.non_null == 0 {
        return Ok(None);
    }
    for candidate in PROBED_TYPES {
        trace!("Probing {table}.{column} as {candidate}");
        match engine.try_cast_column(table, column, candidate) {
            Ok(()) => return Ok(Some(candidate.clone())),
            Err(err) if err.is_type_mismatch() => {}
            Err(err) => {
                return Err(err).with_context(|| format!("Probing {table}.{column}"));
            }
        }
    }
    Ok(string_candidate(&stats))
}

fn string_candidate(stats: &ColumnStats) -> Option<SqlType> {
    let (Some(min), Some(max)) = (stats.min_length, stats.max_length) else {
        return None;
    };
    let max = u32::try_from(max).ok()?;
    if max > SHORT_STRING_LENGTH {
        return None;
    }
    if i64::from(max) == min && max > 0 {
        Some(SqlType::Char(max))
    } else {
        Some(SqlType::Varchar(SHORT_STRING_LENGTH))
    }
}

fn column_stats(engine: &mut dyn SqlEngine, table: &str, column: &str) -> Result<ColumnStats> {
    let col = quote_identifier(column);
    let sql = format!(
        "SELECT COUNT({col}), MIN(LENGTH({col})), MAX(LENGTH({col})) FROM {}",
        quote_identifier(table)
    );
    let mut stats = ColumnStats {
        non_null: 0,
        min_length: None,
        max_length: None,
    };
    engine
        .query(&sql, &mut |row: &[SqlValue]| {
            let int_at = |idx: usize| match row.get(idx) {
                Some(SqlValue::Integer(value)) => Some(*value),
                _ => None,
            };
            stats = ColumnStats {
                non_null: int_at(0).unwrap_or(0),
                min_length: int_at(1),
                max_length: int_at(2),
            };
            Ok::<(), EngineError>(())
        })
        .with_context(|| format!("Reading value lengths of {table}.{column}"))?;
    Ok(stats)
}
