//! Append-only JSON Lines log of failed files.

use crate::error::JobError;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, error};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub timestamp: String,
    pub source: PathBuf,
    pub kind: String,
    pub cause: String,
}

impl LedgerEntry {
    pub fn new(source: &Path, error: &JobError, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
            source: source.to_path_buf(),
            kind: error.kind().to_string(),
            cause: error.to_string(),
        }
    }
}

/// Opened on first failure so clean runs leave no file behind.
pub struct ErrorLedger {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl ErrorLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best effort: a ledger that cannot be written is reported and ignored.
    pub fn record(&self, source: &Path, failure: &JobError) {
        let entry = LedgerEntry::new(source, failure, Utc::now());
        if let Err(err) = self.append(&entry) {
            error!(
                "Could not write error ledger '{}': {} (failure for '{}' was: {})",
                self.path.display(),
                err,
                source.display(),
                failure
            );
        }
    }

    fn append(&self, entry: &LedgerEntry) -> std::io::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut guard = self.file.lock();
        if guard.is_none() {
            debug!("Opening error ledger '{}'", self.path.display());
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            *guard = Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?,
            );
        }
        if let Some(file) = guard.as_mut() {
            file.write_all(line.as_bytes())?;
            file.flush()?;
        }
        Ok(())
    }
}
