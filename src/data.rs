use std::fmt;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

/// Width of the wide string type every input column starts with.
pub const MAX_STRING_COLUMN_LENGTH: u32 = 4092;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Column types the cruncher declares on tables and reads back from result sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    Varchar(u32),
    Char(u32),
    Timestamp,
    Date,
    Time,
    Uuid,
    BigInt,
    Integer,
    SmallInt,
    Boolean,
    Double,
    Decimal,
    Other(String),
}

impl SqlType {
    pub fn wide_string() -> Self {
        SqlType::Varchar(MAX_STRING_COLUMN_LENGTH)
    }

    pub fn ddl(&self) -> String {
        match self {
            SqlType::Varchar(len) => format!("VARCHAR({len})"),
            SqlType::Char(len) => format!("CHAR({len})"),
            SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::Date => "DATE".to_string(),
            SqlType::Time => "TIME".to_string(),
            SqlType::Uuid => "UUID".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::SmallInt => "SMALLINT".to_string(),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::Double => "DOUBLE".to_string(),
            SqlType::Decimal => "DECIMAL".to_string(),
            SqlType::Other(decl) => decl.clone(),
        }
    }

    /// Maps a declared column type, as reported by the engine, back to a [`SqlType`].
    pub fn from_decl(decl: &str) -> Self {
        let upper = decl.trim().to_ascii_uppercase();
        let (base, length) = match upper.split_once('(') {
            Some((base, rest)) => (
                base.trim(),
                rest.trim_end_matches(')').trim().parse::<u32>().ok(),
            ),
            None => (upper.as_str(), None),
        };
        match base {
            "VARCHAR" | "CHARACTER VARYING" | "TEXT" | "CLOB" => {
                SqlType::Varchar(length.unwrap_or(MAX_STRING_COLUMN_LENGTH))
            }
            "CHAR" | "CHARACTER" => SqlType::Char(length.unwrap_or(1)),
            "TIMESTAMP" | "DATETIME" => SqlType::Timestamp,
            "DATE" => SqlType::Date,
            "TIME" => SqlType::Time,
            "UUID" => SqlType::Uuid,
            "BIGINT" => SqlType::BigInt,
            "INTEGER" | "INT" => SqlType::Integer,
            "SMALLINT" | "TINYINT" => SqlType::SmallInt,
            "BOOLEAN" | "BOOL" => SqlType::Boolean,
            "DOUBLE" | "REAL" | "FLOAT" => SqlType::Double,
            "DECIMAL" | "NUMERIC" => SqlType::Decimal,
            _ => SqlType::Other(decl.trim().to_string()),
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ddl())
    }
}

/// A single cell as stored in, or read from, the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
}

impl SqlValue {
    /// Text form used when writing a table back to its CSV file.
    pub fn render(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Real(f) => f.to_string(),
            SqlValue::Boolean(b) => b.to_string(),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_time(value: &str) -> Result<NaiveTime> {
    const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];
    for fmt in TIME_FORMATS {
        if let Ok(parsed) = NaiveTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as time"))
}

/// Accepts full timestamps and plain dates (taken as midnight).
pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    if let Ok(date) = parse_naive_date(value) {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    Err(anyhow!("Failed to parse '{value}' as timestamp"))
}

fn parse_integer(value: &str, min: i64, max: i64, label: &str) -> Result<i64> {
    let parsed: i64 = value
        .parse()
        .with_context(|| format!("Failed to parse '{value}' as {label}"))?;
    if parsed < min || parsed > max {
        bail!("Value '{value}' is out of range for {label}");
    }
    // Leading zeros or a plus sign would not survive the conversion.
    if parsed.to_string() != value {
        bail!("Value '{value}' would change when stored as {label}");
    }
    Ok(parsed)
}

/// Converts raw CSV text into the value stored for a column of type `ty`.
///
/// Empty text is NULL for every type. Values that cannot be held by the type
/// without loss are rejected, which is what the column type optimizer relies on
/// when probing candidate types.
pub fn coerce_text(value: &str, ty: &SqlType) -> Result<SqlValue> {
    if value.is_empty() {
        return Ok(SqlValue::Null);
    }
    let coerced = match ty {
        SqlType::Varchar(len) => {
            if value.chars().count() > *len as usize {
                bail!("Value longer than {len} characters");
            }
            SqlValue::Text(value.to_string())
        }
        SqlType::Char(len) => {
            if value.chars().count() > *len as usize {
                bail!("Value longer than {len} characters");
            }
            SqlValue::Text(value.to_string())
        }
        SqlType::Timestamp => {
            let parsed = parse_naive_datetime(value)?;
            SqlValue::Text(parsed.format(TIMESTAMP_FORMAT).to_string())
        }
        SqlType::Date => SqlValue::Text(parse_naive_date(value)?.format("%Y-%m-%d").to_string()),
        SqlType::Time => SqlValue::Text(parse_naive_time(value)?.format("%H:%M:%S%.f").to_string()),
        SqlType::Uuid => {
            let trimmed = value.trim().trim_matches(|c| matches!(c, '{' | '}'));
            let parsed = Uuid::parse_str(trimmed)
                .with_context(|| format!("Failed to parse '{value}' as UUID"))?;
            SqlValue::Text(parsed.hyphenated().to_string())
        }
        SqlType::BigInt => SqlValue::Integer(parse_integer(value, i64::MIN, i64::MAX, "BIGINT")?),
        SqlType::Integer => SqlValue::Integer(parse_integer(
            value,
            i64::from(i32::MIN),
            i64::from(i32::MAX),
            "INTEGER",
        )?),
        SqlType::SmallInt => SqlValue::Integer(parse_integer(
            value,
            i64::from(i16::MIN),
            i64::from(i16::MAX),
            "SMALLINT",
        )?),
        SqlType::Boolean => {
            if value.eq_ignore_ascii_case("true") {
                SqlValue::Boolean(true)
            } else if value.eq_ignore_ascii_case("false") {
                SqlValue::Boolean(false)
            } else {
                bail!("Failed to parse '{value}' as boolean")
            }
        }
        SqlType::Double | SqlType::Decimal => {
            let parsed: f64 = value
                .parse()
                .with_context(|| format!("Failed to parse '{value}' as {ty}"))?;
            SqlValue::Real(parsed)
        }
        SqlType::Other(_) => SqlValue::Text(value.to_string()),
    };
    Ok(coerced)
}
