//! Concatenation of file groups into the working files bound as input tables.

use std::{
    collections::HashSet,
    ffi::OsString,
    fs::{self, File},
    io::{BufRead, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use encoding_rs::{Encoding, UTF_8};
use itertools::Itertools;
use log::{debug, info};
use regex::Regex;

use crate::{
    error::CrunchError,
    input_groups::FileGroups,
    io_utils::{self, CSV_SUFFIX},
    options::{CombineInputFiles, CrunchOptions},
    schema_split,
};

const CONCAT_DIR_SUFFIX: &str = "_concat";
const CATCH_ALL_FILE_NAME: &str = "concat.csv";

/// One unit of input handed to the table stage.
#[derive(Debug, Clone)]
pub struct InputSubpart {
    /// Group key the combined file was built from; `None` for the catch-all group.
    pub original_input_path: Option<PathBuf>,
    pub combined_file: PathBuf,
    pub combined_from_files: Vec<PathBuf>,
    pub encoding: &'static Encoding,
    /// Assigned once, when the input table is created.
    pub table_name: Option<String>,
}

impl InputSubpart {
    /// A file used directly, without combining.
    pub fn single(file: PathBuf, encoding: &'static Encoding) -> Self {
        Self {
            original_input_path: Some(file.clone()),
            combined_file: file.clone(),
            combined_from_files: vec![file],
            encoding,
            table_name: None,
        }
    }
}

/// Turns file groups into input subparts according to `--combineInputs`.
pub fn combine_input_files(
    groups: FileGroups,
    options: &CrunchOptions,
) -> Result<Vec<InputSubpart>> {
    match options.combine_inputs {
        CombineInputFiles::None => Ok(groups
            .into_values()
            .flatten()
            .map(|file| InputSubpart::single(file, options.encoding))
            .collect()),
        CombineInputFiles::Concat => {
            let groups = schema_split::split_by_headers(groups, options.encoding)?;
            let concat_dir = concat_dir_for(&options.main_output_dir());
            concatenate_file_groups(groups, &concat_dir, options)
        }
        CombineInputFiles::Intersect | CombineInputFiles::Substract => Err(
            CrunchError::not_implemented("intersect and substract combining of input files")
                .into(),
        ),
    }
}

/// `<dir>_concat`, next to the directory the outputs go to.
pub fn concat_dir_for(main_output_dir: &Path) -> PathBuf {
    let mut name = OsString::from(main_output_dir.as_os_str());
    name.push(CONCAT_DIR_SUFFIX);
    PathBuf::from(name)
}

fn concatenate_file_groups(
    groups: FileGroups,
    concat_dir: &Path,
    options: &CrunchOptions,
) -> Result<Vec<InputSubpart>> {
    fs::create_dir_all(concat_dir)
        .with_context(|| format!("Creating work directory {concat_dir:?}"))?;
    let mut used_paths = HashSet::new();
    let mut subparts = Vec::with_capacity(groups.len());
    for (key, files) in groups {
        let wanted = concat_dir.join(combined_file_name(key.as_deref()));
        let dest = get_non_used_name(&wanted, &used_paths);
        used_paths.insert(dest.clone());
        debug!(
            "Combining into {dest:?}: [{}]",
            files.iter().map(|f| f.display()).join(", ")
        );
        concat_files(
            &files,
            &dest,
            options.ignore_first_lines,
            options.ignore_lines_matching.as_ref(),
            options.encoding,
        )?;
        info!("Combined {} file(s) into {dest:?}", files.len());
        subparts.push(InputSubpart {
            original_input_path: key,
            combined_file: dest,
            combined_from_files: files,
            encoding: UTF_8,
            table_name: None,
        });
    }
    Ok(subparts)
}

/// File name for a group's combined file: `concat.csv` for the catch-all
/// group, otherwise the origin's name with `.csv` appended when missing.
pub fn combined_file_name(key: Option<&Path>) -> String {
    let Some(origin) = key.and_then(|path| path.file_name()) else {
        return CATCH_ALL_FILE_NAME.to_string();
    };
    let name = origin.to_string_lossy();
    if name.to_ascii_lowercase().ends_with(CSV_SUFFIX) {
        name.into_owned()
    } else {
        format!("{name}{CSV_SUFFIX}")
    }
}

/// Returns `path` when it is not in `used`, otherwise the first free
/// `<stem>_<n><.ext>` with `n` counting from 1. Does not reserve the result.
pub fn get_non_used_name(path: &Path, used: &HashSet<PathBuf>) -> PathBuf {
    if !used.contains(path) {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let mut counter = 1usize;
    loop {
        let candidate = path.with_file_name(format!("{stem}_{counter}{extension}"));
        if !used.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Concatenates `files` into `dest`.
///
/// The first line written is the header. After that, the first
/// `ignore_first_lines` lines of every file (the first file included) are
/// dropped, as is any line fully matching `ignore_line`.
pub fn concat_files(
    files: &[PathBuf],
    dest: &Path,
    ignore_first_lines: usize,
    ignore_line: Option<&Regex>,
    encoding: &'static Encoding,
) -> Result<()> {
    write_concatenation(files, dest, ignore_first_lines, ignore_line, encoding)
        .with_context(|| format!("Failed concatenating files into {}", dest.display()))
}

fn write_concatenation(
    files: &[PathBuf],
    dest: &Path,
    ignore_first_lines: usize,
    ignore_line: Option<&Regex>,
    encoding: &'static Encoding,
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(dest)?);
    let mut header_written = false;
    for file in files {
        let reader = io_utils::open_text_lines(file, encoding)?;
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("Reading {file:?}"))?;
            if header_written {
                if line_no < ignore_first_lines {
                    continue;
                }
                if ignore_line.is_some_and(|re| re.is_match(&line)) {
                    continue;
                }
            }
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            header_written = true;
        }
    }
    writer.flush()?;
    Ok(())
}
