//! The crunch pipeline: inputs to tables, tables through the query into
//! output files, and the cleanup that always follows.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use itertools::Itertools;
use log::{debug, error, info, warn};
use regex::Regex;

use crate::{
    combine::{self, InputSubpart},
    engine::{ColumnDef, ResultColumn, SqlEngine, SqliteEngine, quote_identifier},
    error::CrunchError,
    headers, hints, input_groups, json_export,
    options::{CrunchOptions, TABLE_PLACEHOLDER},
    tables, type_reducer,
};

pub const COUNTER_COLUMN: &str = "crunchCounter";
pub const DEFAULT_SQL: &str = "SELECT $table.* FROM $table";
pub const GLOBAL_OUTPUT_TABLE: &str = "output";

/// Subtracted from the current time when the counter start is not given.
const COUNTER_EPOCH_OFFSET_MILLIS: i64 = 1_600_000_000_000;

/// How far a run got. Cleanup only has to undo what the reached stage created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum CrunchStage {
    #[default]
    None,
    InputFilesPreprocessed,
    InputTablesCreated,
    OutputTableCreated,
    OutputTableFilled,
    OutputJsonConverted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupAction {
    DetachAndDrop(String),
    DropAll,
    Close,
}

/// Order in which cleanup runs: registered actions last-in first-out, then
/// dropping everything left in the schema, then closing the engine.
pub fn unwind_plan(reached: CrunchStage, registered: &[CleanupAction]) -> Vec<CleanupAction> {
    let mut plan: Vec<CleanupAction> = registered.iter().rev().cloned().collect();
    if reached > CrunchStage::None || !registered.is_empty() {
        plan.push(CleanupAction::DropAll);
    }
    plan.push(CleanupAction::Close);
    plan
}

/// One query run and the table and file it fills.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPart {
    pub sql: String,
    pub output_file: PathBuf,
    pub table_name: String,
    /// Input table the query is scoped to, for per-subpart queries.
    pub input_table: Option<String>,
}

/// First number of the counter column, if one was asked for.
pub fn counter_start(row_numbers: Option<Option<i64>>, now_millis: i64) -> Option<i64> {
    match row_numbers? {
        Some(start) if start != -1 => Some(start),
        _ => Some(now_millis - COUNTER_EPOCH_OFFSET_MILLIS),
    }
}

/// The query with `LIMIT 1`, used to learn the result columns. A query that
/// already ends in a `LIMIT` is left as it is.
pub fn probe_sql(sql: &str) -> Result<String> {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    let trailing_limit =
        Regex::new(r"(?i)\bLIMIT\s+\d+(?:\s*(?:,|\bOFFSET\b)\s*\d+)?$")?;
    if trailing_limit.is_match(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed} LIMIT 1"))
    }
}

/// Makes column names unique, case-insensitively: `id`, `id_1`, `id_2`, ...
/// Names in `reserved` are treated as taken.
pub fn dedupe_column_names(columns: Vec<ResultColumn>, reserved: &[&str]) -> Vec<ResultColumn> {
    let mut used: HashSet<String> = reserved.iter().map(|name| name.to_ascii_lowercase()).collect();
    columns
        .into_iter()
        .map(|mut column| {
            if used.contains(&column.name.to_ascii_lowercase()) {
                let mut counter = 1usize;
                while used.contains(&format!("{}_{counter}", column.name).to_ascii_lowercase()) {
                    counter += 1;
                }
                column.name = format!("{}_{counter}", column.name);
            }
            used.insert(column.name.to_ascii_lowercase());
            column
        })
        .collect()
}

/// Decides what queries run and where their results go.
///
/// Needs table names already assigned to `subparts`.
pub fn plan_outputs(options: &CrunchOptions, subparts: &[InputSubpart]) -> Result<Vec<OutputPart>> {
    let table_names = subparts
        .iter()
        .map(|subpart| {
            subpart
                .table_name
                .clone()
                .with_context(|| format!("No table name for {:?}", subpart.combined_file))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut used_tables: HashSet<String> =
        table_names.iter().map(|name| name.to_ascii_lowercase()).collect();

    if options.query_per_input_subpart {
        let sql = options.sql.as_deref().unwrap_or(DEFAULT_SQL);
        let mut used = HashSet::new();
        let mut parts = Vec::with_capacity(subparts.len());
        for (subpart, table) in subparts.iter().zip(table_names) {
            let file_name = subpart
                .combined_file
                .file_name()
                .with_context(|| format!("No file name in {:?}", subpart.combined_file))?;
            let output_file =
                combine::get_non_used_name(&options.output_path.join(file_name), &used);
            used.insert(output_file.clone());
            parts.push(OutputPart {
                sql: sql.replace(TABLE_PLACEHOLDER, &table),
                output_file,
                table_name: tables::claim_table_name(&format!("{table}_out"), &mut used_tables),
                input_table: Some(table),
            });
        }
        return Ok(parts);
    }

    if options.output_path.is_dir() {
        return Err(CrunchError::config(format!(
            "The output path {:?} is a directory; give a file path, or use --queryPerInputSubpart",
            options.output_path
        ))
        .into());
    }
    let sql = match options.sql.as_deref() {
        Some(sql) => sql.to_string(),
        None => match table_names.as_slice() {
            [table] => DEFAULT_SQL.replace(TABLE_PLACEHOLDER, table),
            _ => {
                return Err(CrunchError::config(format!(
                    "No SQL given (-sql) and there are {} input tables; \
                     the default query needs exactly one",
                    table_names.len()
                ))
                .into());
            }
        },
    };
    let sql = match table_names.as_slice() {
        [table] => sql.replace(TABLE_PLACEHOLDER, table),
        _ => sql,
    };
    Ok(vec![OutputPart {
        sql,
        output_file: options.output_path.clone(),
        table_name: tables::claim_table_name(GLOBAL_OUTPUT_TABLE, &mut used_tables),
        input_table: None,
    }])
}

/// Runs the crunch described by a set of options.
pub struct Cruncher {
    options: CrunchOptions,
}

#[derive(Debug, Default)]
struct RunState {
    stage: CrunchStage,
    cleanup: Vec<CleanupAction>,
    outputs: Vec<OutputPart>,
}

impl RunState {
    fn advance(&mut self, stage: CrunchStage) {
        if stage > self.stage {
            debug!("Crunch stage: {stage:?}");
            self.stage = stage;
        }
    }
}

impl Cruncher {
    pub fn new(options: CrunchOptions) -> Self {
        Self { options }
    }

    /// Runs the whole pipeline. Cleanup runs whether or not it succeeds.
    pub fn crunch(&self) -> Result<(), CrunchError> {
        self.options.validate()?;
        let engine = SqliteEngine::open(self.options.db_dir.as_deref())
            .context("Opening the SQL engine")
            .map_err(CrunchError::failed)?;
        let mut engine: Box<dyn SqlEngine> = Box::new(engine);

        let mut state = RunState::default();
        let result = self.run_stages(engine.as_mut(), &mut state);
        run_cleanup(engine, state.stage, &state.cleanup);

        match result {
            Ok(()) => {
                self.remove_converted_csv(&state.outputs);
                info!("Crunch finished at stage {:?}", state.stage);
                Ok(())
            }
            Err(err) => {
                debug!("Crunch failed at stage {:?}", state.stage);
                Err(CrunchError::failed(err))
            }
        }
    }

    fn run_stages(&self, engine: &mut dyn SqlEngine, state: &mut RunState) -> Result<()> {
        let options = &self.options;

        let groups = input_groups::expand_filter_sort(options)?;
        let mut subparts = combine::combine_input_files(groups, options)?;
        if subparts.is_empty() {
            bail!("No CSV files found in the input paths");
        }
        tables::assign_table_names(&mut subparts)?;
        let outputs = plan_outputs(options, &subparts)?;
        state.advance(CrunchStage::InputFilesPreprocessed);

        for script in &options.init_sql_scripts {
            let sql = fs::read_to_string(script)
                .with_context(|| format!("Reading init SQL script {script:?}"))?;
            info!("Running init SQL script {script:?}");
            engine
                .execute_script(&sql)
                .with_context(|| format!("Executing init SQL script {script:?}"))?;
        }

        for subpart in &subparts {
            self.create_input_table(engine, subpart, state)?;
        }
        state.advance(CrunchStage::InputTablesCreated);

        for part in &outputs {
            self.fill_output(engine, part, state)?;
        }

        if let Some(format) = options.json {
            for part in &outputs {
                let dest = json_export::json_path_for(&part.output_file);
                json_export::export_table(engine, &part.table_name, &dest, format)?;
            }
            state.advance(CrunchStage::OutputJsonConverted);
        }
        state.outputs = outputs;
        Ok(())
    }

    fn create_input_table(
        &self,
        engine: &mut dyn SqlEngine,
        subpart: &InputSubpart,
        state: &mut RunState,
    ) -> Result<()> {
        let table = subpart
            .table_name
            .as_deref()
            .with_context(|| format!("No table name for {:?}", subpart.combined_file))?;
        let columns =
            headers::parse_columns_from_first_csv_line(&subpart.combined_file, subpart.encoding)?;
        info!(
            "Loading {} ({} columns) as table {table}",
            subpart.combined_file.display(),
            columns.len()
        );
        tables::bind_input_table(
            engine,
            table,
            &subpart.combined_file,
            &columns,
            subpart.encoding,
        )?;
        state
            .cleanup
            .push(CleanupAction::DetachAndDrop(table.to_string()));
        type_reducer::optimize_column_types(engine, table, &columns)?;
        Ok(())
    }

    fn fill_output(
        &self,
        engine: &mut dyn SqlEngine,
        part: &OutputPart,
        state: &mut RunState,
    ) -> Result<()> {
        let probe = probe_sql(&part.sql)?;
        debug!("Probing result columns: {probe}");
        let columns = engine
            .describe_query(&probe)
            .map_err(|err| hints::explain_sql_error(engine, &probe, err))?;

        let start = counter_start(self.options.row_numbers, Utc::now().timestamp_millis());
        let counter = start.map(|_| ColumnDef::counter(COUNTER_COLUMN));
        let reserved: &[&str] = if counter.is_some() { &[COUNTER_COLUMN] } else { &[] };
        let columns = dedupe_column_names(columns, reserved);

        tables::bind_output_table(
            engine,
            &part.table_name,
            &part.output_file,
            &columns,
            counter.as_ref(),
        )?;
        state
            .cleanup
            .push(CleanupAction::DetachAndDrop(part.table_name.clone()));
        state.advance(CrunchStage::OutputTableCreated);

        let target_columns = columns
            .iter()
            .map(|column| quote_identifier(&column.name))
            .join(", ");
        let insert = format!(
            "INSERT INTO {} ({target_columns}) {}",
            quote_identifier(&part.table_name),
            part.sql.trim().trim_end_matches(';')
        );
        debug!("{insert}");
        let rows = engine
            .execute(&insert)
            .map_err(|err| hints::explain_sql_error(engine, &insert, err))?;
        if let Some(start) = start {
            engine
                .number_rows(&part.table_name, start)
                .with_context(|| format!("Numbering the rows of {} from {start}", part.table_name))?;
        }
        engine
            .checkpoint()
            .with_context(|| format!("Writing {:?}", part.output_file))?;
        info!("Wrote {rows} row(s) to {}", part.output_file.display());
        state.advance(CrunchStage::OutputTableFilled);
        Ok(())
    }

    fn remove_converted_csv(&self, outputs: &[OutputPart]) {
        if self.options.json.is_none() || self.options.keep_work_files {
            return;
        }
        for part in outputs {
            remove_work_file(&part.output_file);
        }
    }
}

fn remove_work_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed {path:?}"),
        Err(err) => warn!("Could not remove {path:?}: {err}"),
    }
}

fn run_cleanup(engine: Box<dyn SqlEngine>, reached: CrunchStage, registered: &[CleanupAction]) {
    let mut engine = Some(engine);
    for action in unwind_plan(reached, registered) {
        match action {
            CleanupAction::DetachAndDrop(table) => {
                if let Some(engine) = engine.as_mut() {
                    tables::detach_and_drop(engine.as_mut(), &table);
                }
            }
            CleanupAction::DropAll => {
                if let Some(engine) = engine.as_mut()
                    && let Err(err) = engine.drop_all()
                {
                    error!("Could not drop the remaining tables: {err}");
                }
            }
            CleanupAction::Close => {
                if let Some(engine) = engine.take()
                    && let Err(err) = engine.close()
                {
                    error!("Could not close the SQL engine: {err}");
                }
            }
        }
    }
}
