//! Run configuration.
//!
//! [`CrunchOptions`] is built once from the command line (or directly by library
//! callers) and then only read. [`CrunchOptions::validate`] runs before any file
//! or table is touched.

use std::path::PathBuf;

use clap::ValueEnum;
use encoding_rs::{Encoding, UTF_8};
use log::LevelFilter;
use regex::Regex;

use crate::error::CrunchError;

/// Placeholder substituted with the table name in user SQL.
pub const TABLE_PLACEHOLDER: &str = "$table";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CombineInputFiles {
    /// Every input file becomes its own table
    #[default]
    #[value(skip)]
    None,
    /// Concatenate files of a group into one table
    Concat,
    /// Rows present in all files of a group (not implemented)
    Intersect,
    /// Rows of the first file missing from the others (not implemented)
    Substract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CombineDirectories {
    /// One group per directory containing CSV files
    #[default]
    #[value(name = "perDir")]
    PerEachDir,
    /// One group per directory given as input
    #[value(name = "perInputDir")]
    PerInputDir,
    /// One group per first-level subdirectory of each input (not implemented)
    #[value(name = "perInputSubdir")]
    PerInputSubdir,
    /// All discovered files in one group
    #[value(name = "all")]
    AllFiles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SortInputPaths {
    /// Keep the order in which paths were given or discovered
    #[default]
    #[value(name = "paramOrder")]
    ParamsOrder,
    /// Lexicographic order of the full path
    #[value(name = "alpha")]
    Alpha,
    /// Modification time (not implemented)
    #[value(name = "time")]
    Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum JsonExportFormat {
    /// One JSON object per line
    #[default]
    Entries,
    /// A single JSON array
    Array,
}

#[derive(Debug, Clone)]
pub struct CrunchOptions {
    pub input_paths: Vec<PathBuf>,
    pub output_path: PathBuf,
    pub sql: Option<String>,
    pub db_dir: Option<PathBuf>,
    pub init_sql_scripts: Vec<PathBuf>,
    pub combine_inputs: CombineInputFiles,
    pub combine_dirs: CombineDirectories,
    pub sort_input_paths: SortInputPaths,
    pub sort_file_groups: SortInputPaths,
    pub include: Option<Regex>,
    pub exclude: Option<Regex>,
    pub ignore_first_lines: usize,
    pub ignore_lines_matching: Option<Regex>,
    pub query_per_input_subpart: bool,
    /// `Some(None)` asks for a counter seeded from the current time.
    pub row_numbers: Option<Option<i64>>,
    pub json: Option<JsonExportFormat>,
    pub overwrite: bool,
    pub keep_work_files: bool,
    pub skip_non_readable: bool,
    pub encoding: &'static Encoding,
    pub log_level: Option<LevelFilter>,
}

impl CrunchOptions {
    pub fn new(input_paths: Vec<PathBuf>, output_path: PathBuf) -> Self {
        Self {
            input_paths,
            output_path,
            sql: None,
            db_dir: None,
            init_sql_scripts: Vec::new(),
            combine_inputs: CombineInputFiles::None,
            combine_dirs: CombineDirectories::PerEachDir,
            sort_input_paths: SortInputPaths::ParamsOrder,
            sort_file_groups: SortInputPaths::Alpha,
            include: None,
            exclude: None,
            ignore_first_lines: 1,
            ignore_lines_matching: None,
            query_per_input_subpart: false,
            row_numbers: None,
            json: None,
            overwrite: false,
            keep_work_files: false,
            skip_non_readable: false,
            encoding: UTF_8,
            log_level: None,
        }
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Directory under which outputs (and the `_concat` work directory) live.
    ///
    /// With per-subpart queries, or when the output path is an existing
    /// directory, that is the output path itself; otherwise its parent.
    pub fn main_output_dir(&self) -> PathBuf {
        let base = if self.query_per_input_subpart || self.output_path.is_dir() {
            self.output_path.clone()
        } else {
            self.output_path
                .parent()
                .map(|parent| parent.to_path_buf())
                .unwrap_or_default()
        };
        if base.as_os_str().is_empty() {
            return std::env::current_dir().unwrap_or(base);
        }
        std::path::absolute(&base).unwrap_or(base)
    }

    pub fn validate(&self) -> Result<(), CrunchError> {
        if self.input_paths.is_empty() {
            return Err(CrunchError::config("At least one input path is required (--in)"));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(CrunchError::config("The output path is required (--out)"));
        }
        for path in &self.input_paths {
            if !path.exists() {
                return Err(CrunchError::config(format!(
                    "Input path does not exist: {}",
                    path.display()
                )));
            }
        }
        for script in &self.init_sql_scripts {
            if !script.is_file() {
                return Err(CrunchError::config(format!(
                    "Init SQL script does not exist: {}",
                    script.display()
                )));
            }
        }
        if self.query_per_input_subpart {
            let has_placeholder = self
                .sql
                .as_deref()
                .is_some_and(|sql| sql.contains(TABLE_PLACEHOLDER));
            if !has_placeholder {
                return Err(CrunchError::config(format!(
                    "--queryPerInputSubpart requires the SQL to refer to the table as {TABLE_PLACEHOLDER}"
                )));
            }
        }
        match self.combine_inputs {
            CombineInputFiles::Intersect | CombineInputFiles::Substract => {
                return Err(CrunchError::not_implemented(format!(
                    "--combineInputs={}",
                    value_name(self.combine_inputs)
                )));
            }
            CombineInputFiles::None | CombineInputFiles::Concat => {}
        }
        if self.combine_dirs == CombineDirectories::PerInputSubdir {
            return Err(CrunchError::not_implemented("--combineDirs=perInputSubdir"));
        }
        if self.sort_input_paths == SortInputPaths::Time {
            return Err(CrunchError::not_implemented("--sortInputPaths=time"));
        }
        if self.sort_file_groups == SortInputPaths::Time {
            return Err(CrunchError::not_implemented("--sortFileGroups=time"));
        }
        Ok(())
    }
}

pub fn value_name<T: ValueEnum>(value: T) -> String {
    value
        .to_possible_value()
        .map(|pv| pv.get_name().to_string())
        .unwrap_or_default()
}
