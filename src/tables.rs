//! Binding of CSV files to text-backed tables in the engine.

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use encoding_rs::{Encoding, UTF_8};
use itertools::Itertools;
use log::{debug, error};

use crate::{
    combine::InputSubpart,
    data::SqlType,
    engine::{ColumnDef, ResultColumn, SqlEngine, TextSource},
    io_utils::{self, CSV_QUOTE},
};

/// Table name for a file: its name without `.csv`, with every character
/// outside `[A-Za-z0-9_]` replaced by `_`.
pub fn normalize_table_name(file: &Path) -> String {
    let name = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    io_utils::strip_csv_suffix(&name)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Assigns table names to all subparts, failing before anything is bound
/// if two of them would share a name. Names compare case-insensitively,
/// as the engine does.
pub fn assign_table_names(subparts: &mut [InputSubpart]) -> Result<()> {
    let mut seen: HashMap<String, &Path> = HashMap::new();
    let mut names = Vec::with_capacity(subparts.len());
    for subpart in subparts.iter() {
        let name = normalize_table_name(&subpart.combined_file);
        if name.is_empty() {
            bail!(
                "Cannot derive a table name from {:?}",
                subpart.combined_file
            );
        }
        if let Some(previous) = seen.insert(name.to_ascii_lowercase(), &subpart.combined_file) {
            bail!(
                "Input files {previous:?} and {:?} would both be bound to table '{name}'; \
                 rename one of them or combine them with --combineInputs",
                subpart.combined_file
            );
        }
        names.push(name);
    }
    for (subpart, name) in subparts.iter_mut().zip(names) {
        subpart.table_name = Some(name);
    }
    Ok(())
}

/// Picks `base`, or `base_1`, `base_2`, ... when that is taken, and marks the
/// result as used. `used` holds lowercased names.
pub fn claim_table_name(base: &str, used: &mut HashSet<String>) -> String {
    let mut name = base.to_string();
    let mut counter = 1usize;
    while used.contains(&name.to_ascii_lowercase()) {
        name = format!("{base}_{counter}");
        counter += 1;
    }
    used.insert(name.to_ascii_lowercase());
    name
}

/// Creates a table with one wide string column per name and binds `file` to it.
/// The first line of the file is taken as its header.
pub fn bind_input_table(
    engine: &mut dyn SqlEngine,
    table_name: &str,
    file: &Path,
    column_names: &[String],
    encoding: &'static Encoding,
) -> Result<()> {
    if !file.is_file() {
        bail!("The input file does not exist: {file:?}");
    }
    let columns = column_names
        .iter()
        .map(|name| ColumnDef::new(name.clone(), SqlType::wide_string()))
        .collect::<Vec<_>>();
    engine
        .create_text_table(table_name, &columns)
        .with_context(|| format!("Failed to create input table {table_name}"))?;
    let source = TextSource {
        path: absolute(file),
        ignore_first: true,
        quote: CSV_QUOTE,
        encoding,
        read_only: true,
    };
    engine
        .set_table_source(table_name, source)
        .with_context(|| format!("Failed to bind {file:?} to table {table_name}"))?;
    Ok(())
}

/// Creates the output table and binds a fresh `file` to it.
///
/// Any existing file is replaced. The file's header line lists the counter
/// column (if any) followed by `columns`, in that order.
pub fn bind_output_table(
    engine: &mut dyn SqlEngine,
    table_name: &str,
    file: &Path,
    columns: &[ResultColumn],
    counter: Option<&ColumnDef>,
) -> Result<()> {
    let file = absolute(file);
    if file.exists() {
        debug!("Replacing existing output file {file:?}");
        fs::remove_file(&file).with_context(|| format!("Deleting old output file {file:?}"))?;
    } else if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed creating directory to store the output to: {parent:?}"))?;
    }

    let defs = counter
        .cloned()
        .into_iter()
        .chain(
            columns
                .iter()
                .map(|column| ColumnDef::new(column.name.clone(), column.sql_type.clone())),
        )
        .collect::<Vec<_>>();
    let header = defs.iter().map(|def| def.name.as_str()).join(",");

    engine
        .create_text_table(table_name, &defs)
        .with_context(|| format!("Failed to create output table {table_name}"))?;
    let source = TextSource {
        path: file.clone(),
        ignore_first: true,
        quote: CSV_QUOTE,
        encoding: UTF_8,
        read_only: false,
    };
    engine
        .set_table_source(table_name, source)
        .with_context(|| format!("Failed to bind {file:?} to table {table_name}"))?;
    engine
        .set_table_source_header(table_name, &header)
        .with_context(|| format!("Failed to set CSV header of table {table_name}"))?;
    Ok(())
}

/// Detaches and drops a table. Never fails: problems are logged, since this
/// runs during cleanup and must not stop the remaining steps.
pub fn detach_and_drop(engine: &mut dyn SqlEngine, table_name: &str) {
    debug!("Detaching and dropping table {table_name}");
    if let Err(err) = engine.set_table_source_enabled(table_name, false) {
        error!("Could not detach table {table_name}: {err}");
    }
    if let Err(err) = engine.drop_table(table_name) {
        error!("Could not drop table {table_name}: {err}");
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
