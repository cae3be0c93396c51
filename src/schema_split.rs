//! Splitting of file groups whose members disagree on the CSV header.

use std::path::{Path, PathBuf};

use anyhow::Result;
use encoding_rs::Encoding;
use log::{debug, info};

use crate::{
    headers::parse_columns_from_first_csv_line,
    input_groups::{FileGroups, describe_key},
};

const CATCH_ALL_SUBGROUP_PREFIX: &str = "concat";

/// Replaces every group holding more than one header shape by subgroups
/// keyed `<key>_1`, `<key>_2`, ... in the order the shapes first appear.
///
/// Files sharing a shape always land in the same subgroup, even when a file
/// with a different header sits between them.
pub fn split_by_headers(groups: FileGroups, encoding: &'static Encoding) -> Result<FileGroups> {
    let mut result = FileGroups::new();
    for (key, paths) in groups {
        let shapes = partition_by_header(paths, encoding)?;
        if shapes.len() == 1 {
            if let Some((_, files)) = shapes.into_iter().next() {
                result.insert(key, files);
            }
            continue;
        }
        info!(
            "Group {} has {} different headers, splitting it",
            describe_key(key.as_deref()),
            shapes.len()
        );
        for (idx, (columns, files)) in shapes.into_iter().enumerate() {
            let sub_key = subgroup_key(key.as_deref(), idx + 1);
            debug!("  {} <= [{}]", sub_key.display(), columns.join(", "));
            result.insert(Some(sub_key), files);
        }
    }
    Ok(result)
}

/// Groups files by their exact ordered column list, first-seen order.
pub fn partition_by_header(
    paths: Vec<PathBuf>,
    encoding: &'static Encoding,
) -> Result<Vec<(Vec<String>, Vec<PathBuf>)>> {
    let mut shapes: Vec<(Vec<String>, Vec<PathBuf>)> = Vec::new();
    for path in paths {
        let columns = parse_columns_from_first_csv_line(&path, encoding)?;
        match shapes.iter_mut().find(|(shape, _)| *shape == columns) {
            Some((_, files)) => files.push(path),
            None => shapes.push((columns, vec![path])),
        }
    }
    Ok(shapes)
}

fn subgroup_key(key: Option<&Path>, ordinal: usize) -> PathBuf {
    let mut name = key
        .map(|path| path.as_os_str().to_os_string())
        .unwrap_or_else(|| CATCH_ALL_SUBGROUP_PREFIX.into());
    name.push(format!("_{ordinal}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::UTF_8;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn uniform_group_passes_through() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        fs::write(&a, "id,name\n1,x\n").unwrap();
        fs::write(&b, "id,name\n2,y\n").unwrap();
        let key = Some(dir.path().to_path_buf());
        let groups = FileGroups::from([(key.clone(), vec![a.clone(), b.clone()])]);

        let split = split_by_headers(groups, UTF_8).unwrap();
        assert_eq!(split.len(), 1);
        assert_eq!(split[&key], vec![a, b]);
    }

    #[test]
    fn mixed_group_splits_by_first_seen_shape() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        let c = dir.path().join("c.csv");
        fs::write(&a, "id,name\n1,x\n").unwrap();
        fs::write(&b, "id,name,extra\n2,y,z\n").unwrap();
        fs::write(&c, "id,name\n3,w\n").unwrap();
        let groups = FileGroups::from([(None, vec![a.clone(), b.clone(), c.clone()])]);

        let split = split_by_headers(groups, UTF_8).unwrap();
        assert_eq!(split.len(), 2);
        assert_eq!(split[&Some(PathBuf::from("concat_1"))], vec![a, c]);
        assert_eq!(split[&Some(PathBuf::from("concat_2"))], vec![b]);
    }

    #[test]
    fn subgroup_key_appends_ordinal_to_origin() {
        assert_eq!(
            subgroup_key(Some(Path::new("/data/in")), 2),
            PathBuf::from("/data/in_2")
        );
        assert_eq!(subgroup_key(None, 1), PathBuf::from("concat_1"));
    }

    #[test]
    fn invalid_header_fails_with_file_name() {
        let dir = tempdir().unwrap();
        let bad = dir.path().join("bad.csv");
        fs::write(&bad, "id,first name\n1,x\n").unwrap();
        let groups = FileGroups::from([(None, vec![bad])]);
        let err = split_by_headers(groups, UTF_8).unwrap_err();
        assert!(format!("{err:#}").contains("bad.csv"));
    }
}
