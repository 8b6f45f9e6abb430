//! stdout output: probe listings and the end-of-run summary.

use crate::commit::Disposition;
use crate::inventory::{MediaInventory, ProbeError, StreamDescriptor, StreamKind};
use crate::job::JobResult;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub fn write_inventory_text(out: &mut dyn Write, inventory: &MediaInventory) -> io::Result<()> {
    writeln!(out, "Input: {}", inventory.path.display())?;
    match &inventory.format_name {
        Some(format) => writeln!(out, "Container: {} ({})", inventory.container, format)?,
        None => writeln!(out, "Container: {}", inventory.container)?,
    }
    for stream in &inventory.streams {
        write!(
            out,
            "[stream {}] type={} codec={}",
            stream.index, stream.kind, stream.codec
        )?;
        if stream.kind == StreamKind::Audio {
            match stream.channels {
                Some(ch) => write!(out, " channels={}", ch)?,
                None => write!(out, " channels=?")?,
            }
        }
        writeln!(
            out,
            " language={}",
            stream.language.as_deref().unwrap_or("unknown")
        )?;
    }
    if inventory.ignored_streams > 0 {
        writeln!(
            out,
            "  ({} data/attachment stream(s) not shown)",
            inventory.ignored_streams
        )?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ProbeRecord {
    pub input: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_name: Option<String>,
    pub streams: Vec<StreamDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeRecord {
    pub fn new(path: &Path, result: Result<MediaInventory, ProbeError>) -> Self {
        match result {
            Ok(inv) => Self {
                input: inv.path,
                container: Some(inv.container),
                format_name: inv.format_name,
                streams: inv.streams,
                error: None,
            },
            Err(err) => Self {
                input: path.to_path_buf(),
                container: None,
                format_name: None,
                streams: Vec::new(),
                error: Some(err.to_string()),
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    succeeded: BTreeMap<Disposition, Vec<PathBuf>>,
    failed: Vec<(PathBuf, &'static str, String)>,
}

impl RunSummary {
    pub fn from_results(results: &[JobResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result {
                JobResult::Succeeded {
                    final_path,
                    disposition,
                    ..
                } => summary
                    .succeeded
                    .entry(*disposition)
                    .or_default()
                    .push(final_path.clone()),
                JobResult::Failed { source, error } => {
                    summary
                        .failed
                        .push((source.clone(), error.kind(), error.to_string()))
                }
            }
        }
        summary
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn count(&self, disposition: Disposition) -> usize {
        self.succeeded.get(&disposition).map_or(0, Vec::len)
    }

    pub fn write(&self, out: &mut dyn Write) -> io::Result<()> {
        let ok: usize = self.succeeded.values().map(Vec::len).sum();
        writeln!(
            out,
            "Summary: {} succeeded, {} failed (of {})",
            ok,
            self.failed.len(),
            ok + self.failed.len()
        )?;
        for (disposition, paths) in &self.succeeded {
            writeln!(out, "{} ({}):", disposition, paths.len())?;
            for path in paths {
                writeln!(out, "  {}", path.display())?;
            }
        }
        if !self.failed.is_empty() {
            writeln!(out, "failed ({}):", self.failed.len())?;
            for (path, kind, cause) in &self.failed {
                let first_line = cause.lines().next().unwrap_or_default();
                writeln!(out, "  {} [{}] {}", path.display(), kind, first_line)?;
            }
        }
        Ok(())
    }
}
