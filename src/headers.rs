//! Column names from the first line of a CSV file.

use std::{io::BufRead, path::Path};

use anyhow::{Context, Result, bail};
use encoding_rs::Encoding;

use crate::io_utils;

/// `[A-Za-z][A-Za-z0-9_]*`
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Reads the header line of `path` and returns its column names in order.
///
/// Lines starting with `###` are skipped. A single leading `#` on the header
/// is tolerated, and both `,` and `;` separate names. Every name must be a
/// plain SQL identifier.
pub fn parse_columns_from_first_csv_line(
    path: &Path,
    encoding: &'static Encoding,
) -> Result<Vec<String>> {
    let reader = io_utils::open_text_lines(path, encoding)?;
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Reading header of {path:?}"))?;
        if line.starts_with("###") {
            continue;
        }
        return split_header_line(&line)
            .with_context(|| format!("Invalid CSV header in {path:?}, line {}", index + 1));
    }
    bail!("No header line found in {path:?}")
}

pub fn split_header_line(line: &str) -> Result<Vec<String>> {
    let trimmed = line.trim();
    let trimmed = trimmed.strip_prefix('#').unwrap_or(trimmed);
    let mut names = Vec::new();
    for (idx, raw) in trimmed.split([',', ';']).enumerate() {
        let name = raw.trim();
        let name = name
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
            .unwrap_or(name);
        if name.is_empty() {
            bail!("Column #{} has an empty name", idx + 1);
        }
        if !is_valid_identifier(name) {
            bail!(
                "Column #{} '{name}' is not a valid SQL identifier (letter followed by letters, digits or '_')",
                idx + 1
            );
        }
        names.push(name.to_string());
    }
    Ok(names)
}
