use crate::layout::is_temp_artifact;
use anyhow::{bail, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const MEDIA_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "flv", "wmv", "webm"];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub files: Vec<PathBuf>,
    /// `_tmp_` files from an interrupted run. Never processed.
    pub leftovers: Vec<PathBuf>,
}

pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            MEDIA_EXTENSIONS
                .iter()
                .any(|m| m.eq_ignore_ascii_case(ext))
        })
}

fn accept(path: PathBuf, found: &mut Discovered) {
    if is_temp_artifact(&path) {
        warn!(
            "Skipping leftover temporary file '{}' from an interrupted run",
            path.display()
        );
        found.leftovers.push(path);
    } else {
        found.files.push(path);
    }
}

/// Media files under `root`, sorted for a stable job order.
pub fn discover_dir(root: &Path) -> Result<Discovered> {
    if !root.is_dir() {
        bail!("'{}' is not a directory", root.display());
    }
    let mut found = Discovered::default();
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry under '{}': {}", root.display(), err);
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_media_file(entry.path()) {
            continue;
        }
        accept(entry.into_path(), &mut found);
    }
    info!(
        "Found {} media file(s) under '{}'",
        found.files.len(),
        root.display()
    );
    Ok(found)
}

pub fn discover_file(path: &Path) -> Result<Discovered> {
    if !path.is_file() {
        bail!("'{}' is not a file", path.display());
    }
    if !is_media_file(path) {
        debug!(
            "'{}' has an unfamiliar extension; processing it anyway",
            path.display()
        );
    }
    let mut found = Discovered::default();
    accept(path.to_path_buf(), &mut found);
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn walks_tree_and_skips_leftovers() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("Show/S01")).unwrap();
        for name in [
            "b.MKV",
            "a.mp4",
            "notes.txt",
            "Show/S01/e1.avi",
            "Show/S01/_tmp_e2.mkv",
        ] {
            fs::write(root.join(name), b"x").unwrap();
        }

        let found = discover_dir(root).unwrap();
        let rel: Vec<_> = found
            .files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            rel,
            vec![
                PathBuf::from("Show/S01/e1.avi"),
                PathBuf::from("a.mp4"),
                PathBuf::from("b.MKV"),
            ]
        );
        assert_eq!(found.leftovers, vec![root.join("Show/S01/_tmp_e2.mkv")]);
    }

    #[test]
    fn rejects_missing_inputs() {
        let dir = tempdir().unwrap();
        assert!(discover_dir(&dir.path().join("nope")).is_err());
        assert!(discover_file(&dir.path().join("nope.mkv")).is_err());
        assert!(discover_file(dir.path()).is_err());
    }
}
