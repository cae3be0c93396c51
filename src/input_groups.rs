//! Expansion of input paths into file groups, with filtering and sorting.
//!
//! A group is keyed by the path it originates from; `None` is the catch-all
//! group for plain files and for `--combineDirs=all`. The map is rebuilt by
//! every stage instead of being edited in place.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use itertools::Itertools;
use log::{debug, info, warn};
use regex::Regex;

use crate::{
    error::CrunchError,
    io_utils::CSV_SUFFIX,
    options::{CombineDirectories, CrunchOptions, SortInputPaths},
};

pub type FileGroups = BTreeMap<Option<PathBuf>, Vec<PathBuf>>;

/// Runs the whole input stage: sort the given paths, walk directories, filter,
/// re-key a lone catch-all group, and sort the files of each group.
pub fn expand_filter_sort(options: &CrunchOptions) -> Result<FileGroups> {
    let inputs = sort_input_paths(&options.input_paths, options.sort_input_paths)?;
    let groups = expand_directories(&inputs, options.combine_dirs, options.skip_non_readable)?;
    log_groups("Discovered file groups", &groups);
    let groups = filter_groups(
        groups,
        options.include.as_ref(),
        options.exclude.as_ref(),
    );
    if groups.is_empty() {
        info!("No input files left after filtering");
        return Ok(groups);
    }
    let groups = rekey_catch_all(groups, &inputs);
    let groups = sort_file_groups(groups, options.sort_file_groups)?;
    log_groups("Sorted and filtered file groups", &groups);
    Ok(groups)
}

pub fn expand_directories(
    inputs: &[PathBuf],
    policy: CombineDirectories,
    skip_non_readable: bool,
) -> Result<FileGroups> {
    if policy == CombineDirectories::PerInputSubdir {
        return Err(CrunchError::not_implemented("--combineDirs=perInputSubdir").into());
    }
    let mut groups = FileGroups::new();
    for input in inputs {
        if !input.exists() {
            bail!("Input path does not exist: {input:?}");
        }
        if !input.is_dir() {
            if accept_readable(input, skip_non_readable)? {
                groups.entry(None).or_default().push(input.clone());
            }
            continue;
        }

        let mut discovered = Vec::new();
        collect_csv_files(input, &mut discovered)?;
        for file in discovered {
            if !accept_readable(&file, skip_non_readable)? {
                continue;
            }
            let key = match policy {
                CombineDirectories::AllFiles => None,
                CombineDirectories::PerInputDir => Some(absolute(input)),
                CombineDirectories::PerEachDir => file.parent().map(absolute),
                CombineDirectories::PerInputSubdir => {
                    return Err(
                        CrunchError::not_implemented("--combineDirs=perInputSubdir").into()
                    );
                }
            };
            groups.entry(key).or_default().push(file);
        }
    }
    Ok(groups)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn accept_readable(path: &Path, skip_non_readable: bool) -> Result<bool> {
    match File::open(path) {
        Ok(_) => Ok(true),
        Err(err) if skip_non_readable => {
            warn!("Skipping non-readable file {path:?}: {err}");
            Ok(false)
        }
        Err(err) => Err(err).with_context(|| {
            format!("Input file is not readable (use --skipNonReadable to skip it): {path:?}")
        }),
    }
}

/// Recursively collects `*.csv` files, visiting directory entries by name.
fn collect_csv_files(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Listing directory {dir:?}"))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Listing directory {dir:?}"))?;
    entries.sort();
    for path in entries {
        if path.is_dir() {
            collect_csv_files(&path, found)?;
        } else if has_csv_suffix(&path) {
            found.push(path);
        }
    }
    Ok(())
}

fn has_csv_suffix(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.to_ascii_lowercase().ends_with(CSV_SUFFIX))
}

/// Keeps files whose whole path matches `include` and does not match `exclude`.
/// Groups left empty are dropped.
pub fn filter_groups(
    groups: FileGroups,
    include: Option<&Regex>,
    exclude: Option<&Regex>,
) -> FileGroups {
    groups
        .into_iter()
        .filter_map(|(key, paths)| {
            let kept = filter_paths(paths, include, exclude);
            if kept.is_empty() {
                info!("Dropping empty file group {}", describe_key(key.as_deref()));
                None
            } else {
                Some((key, kept))
            }
        })
        .collect()
}

pub fn filter_paths(
    paths: Vec<PathBuf>,
    include: Option<&Regex>,
    exclude: Option<&Regex>,
) -> Vec<PathBuf> {
    paths
        .into_iter()
        .filter(|path| {
            let text = path.to_string_lossy();
            let included = include.is_none_or(|re| re.is_match(&text));
            let excluded = exclude.is_some_and(|re| re.is_match(&text));
            if !included || excluded {
                debug!("Filtered out {path:?}");
            }
            included && !excluded
        })
        .collect()
}

/// A lone catch-all group is named after its only file, or after the only
/// input path, so that downstream file and table names are meaningful.
pub fn rekey_catch_all(groups: FileGroups, inputs: &[PathBuf]) -> FileGroups {
    if groups.len() == 1
        && let Some(paths) = groups.get(&None::<PathBuf>)
    {
        if let [single] = paths.as_slice() {
            return FileGroups::from([(Some(single.clone()), vec![single.clone()])]);
        }
        if let [input] = inputs {
            return FileGroups::from([(Some(input.clone()), paths.clone())]);
        }
    }
    groups
}

pub fn sort_file_groups(groups: FileGroups, order: SortInputPaths) -> Result<FileGroups> {
    groups
        .into_iter()
        .map(|(key, paths)| Ok((key, sort_input_paths(&paths, order)?)))
        .collect()
}

pub fn sort_input_paths(paths: &[PathBuf], order: SortInputPaths) -> Result<Vec<PathBuf>> {
    match order {
        SortInputPaths::ParamsOrder => Ok(paths.to_vec()),
        SortInputPaths::Alpha => Ok(paths.iter().cloned().sorted().collect()),
        SortInputPaths::Time => Err(CrunchError::not_implemented("sorting input paths by time").into()),
    }
}

pub fn describe_key(key: Option<&Path>) -> String {
    key.map(|path| path.display().to_string())
        .unwrap_or_else(|| "<all files>".to_string())
}

fn log_groups(label: &str, groups: &FileGroups) {
    debug!("{label}:");
    for (key, paths) in groups {
        debug!(
            "  {} => [{}]",
            describe_key(key.as_deref()),
            paths.iter().map(|p| p.display()).join(", ")
        );
    }
}
