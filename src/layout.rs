//! Where outputs and their temporary files live.

use crate::policy::ReplaceMode;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const TEMP_PREFIX: &str = "_tmp_";
/// Inserted before the extension when keep-both would overwrite the source.
pub const KEEP_BOTH_SUFFIX: &str = ".fixed";

#[derive(Debug, Clone)]
pub struct OutputLayout {
    input_root: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    mode: ReplaceMode,
}

impl OutputLayout {
    /// `input_root` is the `--dir` argument; relative structure under it is
    /// mirrored into `output_dir` when one is given.
    pub fn new(input_root: Option<PathBuf>, output_dir: Option<PathBuf>, mode: ReplaceMode) -> Self {
        Self {
            input_root,
            output_dir,
            mode,
        }
    }

    pub fn mode(&self) -> ReplaceMode {
        self.mode
    }

    /// Outputs go to a separate tree.
    pub fn relocates(&self) -> bool {
        self.output_dir.is_some()
    }

    pub fn final_path(&self, source: &Path, container: &str) -> PathBuf {
        let dir = match &self.output_dir {
            Some(out) => {
                let relative = self
                    .input_root
                    .as_deref()
                    .and_then(|root| source.parent()?.strip_prefix(root).ok())
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                out.join(relative)
            }
            None => source.parent().map(Path::to_path_buf).unwrap_or_default(),
        };

        let candidate = dir.join(with_extension(source, container));
        if self.mode == ReplaceMode::KeepBoth && candidate == source {
            append_suffix(&candidate, KEEP_BOTH_SUFFIX)
        } else {
            candidate
        }
    }
}

fn with_extension(source: &Path, container: &str) -> OsString {
    let mut name = source
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| OsString::from("output"));
    if !container.is_empty() {
        name.push(".");
        name.push(container);
    }
    name
}

/// `_tmp_<name>` next to the final path, so promotion is a same-directory rename.
pub fn temp_path_for(final_path: &Path) -> PathBuf {
    let mut name = OsString::from(TEMP_PREFIX);
    name.push(
        final_path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("output")),
    );
    match final_path.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Leftover of an interrupted run.
pub fn is_temp_artifact(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(TEMP_PREFIX))
}

pub fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let parent = path.parent();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("file"));

    let new_name = match filename.rfind('.') {
        Some(idx) if idx > 0 => {
            let (stem, ext) = filename.split_at(idx);
            format!("{}{}{}", stem, suffix, ext)
        }
        _ => format!("{}{}", filename, suffix),
    };

    match parent {
        Some(dir) => dir.join(new_name),
        None => PathBuf::from(new_name),
    }
}
