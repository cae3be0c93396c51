use std::{ffi::OsString, path::PathBuf, str::FromStr};

use clap::{ArgAction, Parser};
use log::LevelFilter;
use regex::Regex;

use crate::{
    error::CrunchError,
    io_utils,
    options::{CombineDirectories, CombineInputFiles, CrunchOptions, JsonExportFormat, SortInputPaths},
};

/// Single-dash spellings still accepted for the main options.
const LEGACY_FLAGS: &[(&str, &str)] = &[
    ("-in", "--in"),
    ("-out", "--out"),
    ("-sql", "--sql"),
    ("-db", "--db"),
    ("-initSql", "--initSql"),
];

#[derive(Debug, Parser)]
#[command(
    name = "crunch",
    version,
    disable_version_flag = true,
    about = "Query CSV files with SQL",
    long_about = "Binds CSV files (or combinations of them) as tables, runs a SQL query \
                  over them and writes the result as CSV, optionally converted to JSON."
)]
pub struct CrunchArgs {
    /// Input CSV files or directories
    #[arg(long = "in", num_args = 1.., required = true, value_name = "PATH")]
    pub inputs: Vec<PathBuf>,
    /// Output CSV file, or directory with --queryPerInputSubpart
    #[arg(long = "out", required = true, value_name = "PATH")]
    pub output: PathBuf,
    /// SQL query; `$table` stands for the input table
    #[arg(long = "sql")]
    pub sql: Option<String>,
    /// Working directory of the database (in memory when omitted)
    #[arg(long = "db", value_name = "DIR")]
    pub db_dir: Option<PathBuf>,
    /// SQL script run before the input tables are created (repeatable)
    #[arg(long = "initSql", value_name = "FILE", action = ArgAction::Append)]
    pub init_sql: Vec<PathBuf>,
    /// Also convert the output to JSON
    #[arg(
        long = "json",
        value_enum,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "entries"
    )]
    pub json: Option<JsonExportFormat>,
    /// Prepend a counter column, starting at the given number (time-based when omitted)
    #[arg(
        long = "rowNumbers",
        num_args = 0..=1,
        require_equals = true,
        allow_negative_numbers = true,
        value_name = "START"
    )]
    pub row_numbers: Option<Option<i64>>,
    /// Overwrite existing output files
    #[arg(long = "overwrite")]
    pub overwrite: bool,
    /// Keep the output CSV after converting it to JSON
    #[arg(long = "keepWorkFiles")]
    pub keep_work_files: bool,
    /// Skip unreadable input files instead of failing
    #[arg(long = "skipNonReadable")]
    pub skip_non_readable: bool,
    /// Only use input files whose path fully matches this regex
    #[arg(long = "include", value_parser = parse_full_match_regex, value_name = "REGEX")]
    pub include: Option<Regex>,
    /// Skip input files whose path fully matches this regex
    #[arg(long = "exclude", value_parser = parse_full_match_regex, value_name = "REGEX")]
    pub exclude: Option<Regex>,
    /// Lines to drop at the start of every combined file after the first header
    #[arg(
        long = "ignoreFirstLines",
        num_args = 0..=1,
        require_equals = true,
        default_value_t = 1,
        default_missing_value = "1",
        value_name = "N"
    )]
    pub ignore_first_lines: usize,
    /// Drop lines fully matching this regex when combining files
    #[arg(long = "ignoreLinesMatching", value_parser = parse_full_match_regex, value_name = "REGEX")]
    pub ignore_lines_matching: Option<Regex>,
    /// How to combine input files
    #[arg(
        long = "combineInputs",
        value_enum,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "concat"
    )]
    pub combine_inputs: Option<CombineInputFiles>,
    /// How to group files found in directories
    #[arg(
        long = "combineDirs",
        value_enum,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "all"
    )]
    pub combine_dirs: Option<CombineDirectories>,
    /// Order of the input paths
    #[arg(
        long = "sortInputPaths",
        value_enum,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "paramOrder"
    )]
    pub sort_input_paths: Option<SortInputPaths>,
    /// Order of the files within each group
    #[arg(
        long = "sortFileGroups",
        value_enum,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "alpha"
    )]
    pub sort_file_groups: Option<SortInputPaths>,
    /// Run the query once per input table, replacing `$table`
    #[arg(long = "queryPerInputSubpart")]
    pub query_per_input_subpart: bool,
    /// Encoding of the input files
    #[arg(long = "encoding", value_name = "LABEL")]
    pub encoding: Option<String>,
    /// Log level of the cruncher (trace, debug, info, warn, error, off)
    #[arg(long = "logLevel", value_parser = parse_log_level, value_name = "LEVEL")]
    pub log_level: Option<LevelFilter>,
    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    pub version: Option<bool>,
}

impl CrunchArgs {
    pub fn into_options(self) -> Result<CrunchOptions, CrunchError> {
        let encoding = io_utils::resolve_encoding(self.encoding.as_deref())
            .map_err(|err| CrunchError::config(format!("{err:#}")))?;
        let mut options = CrunchOptions::new(self.inputs, self.output);
        options.sql = self.sql;
        options.db_dir = self.db_dir;
        options.init_sql_scripts = self.init_sql;
        options.combine_inputs = self.combine_inputs.unwrap_or_default();
        options.combine_dirs = self.combine_dirs.unwrap_or_default();
        options.sort_input_paths = self.sort_input_paths.unwrap_or_default();
        options.sort_file_groups = self.sort_file_groups.unwrap_or(SortInputPaths::Alpha);
        options.include = self.include;
        options.exclude = self.exclude;
        options.ignore_first_lines = self.ignore_first_lines;
        options.ignore_lines_matching = self.ignore_lines_matching;
        options.query_per_input_subpart = self.query_per_input_subpart;
        options.row_numbers = self.row_numbers;
        options.json = self.json;
        options.overwrite = self.overwrite;
        options.keep_work_files = self.keep_work_files;
        options.skip_non_readable = self.skip_non_readable;
        options.encoding = encoding;
        options.log_level = self.log_level;
        Ok(options)
    }
}

/// Rewrites the single-dash spellings (`-in`, `-out=x`, ...) to their `--` forms.
pub fn preprocess_cli_args(args: Vec<OsString>) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| {
            let Some(text) = arg.to_str() else {
                return arg;
            };
            let (flag, value) = match text.split_once('=') {
                Some((flag, value)) => (flag, Some(value)),
                None => (text, None),
            };
            match LEGACY_FLAGS.iter().find(|(legacy, _)| *legacy == flag) {
                Some((_, long)) => match value {
                    Some(value) => OsString::from(format!("{long}={value}")),
                    None => OsString::from(*long),
                },
                None => arg,
            }
        })
        .collect()
}

/// Compiles a regex that has to match the whole text.
pub fn parse_full_match_regex(value: &str) -> Result<Regex, String> {
    Regex::new(&format!("^(?:{value})$")).map_err(|err| err.to_string())
}

pub fn parse_log_level(value: &str) -> Result<LevelFilter, String> {
    LevelFilter::from_str(value).map_err(|_| {
        format!("Unknown log level '{value}' (expected trace, debug, info, warn, error or off)")
    })
}
