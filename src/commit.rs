//! Temporary output lifecycle: verify, promote, or discard.

use crate::engine::{ExecutionOutcome, MediaToolkit};
use crate::error::JobError;
use crate::inventory::{self, StreamKind};
use crate::job::{Job, JobResult};
use crate::plan::TranscodePlan;
use crate::policy::ReplaceMode;
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use strum_macros::Display;

/// How a successful job left the disk.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    #[strum(serialize = "replaced in place")]
    ReplacedInPlace,
    #[strum(serialize = "replaced source")]
    ReplacedSource,
    #[strum(serialize = "written alongside")]
    WrittenAlongside,
    #[strum(serialize = "unchanged")]
    Unchanged,
    #[strum(serialize = "planned")]
    Planned,
}

/// Owns a job's temporary output file. Removed on drop unless promoted.
#[derive(Debug)]
pub struct TempOutput {
    path: PathBuf,
    promoted: bool,
}

impl TempOutput {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            promoted: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renames onto `final_path`. On error the guard still cleans up.
    pub fn promote(mut self, final_path: &Path) -> std::io::Result<()> {
        fs::rename(&self.path, final_path)?;
        self.promoted = true;
        Ok(())
    }
}

impl Drop for TempOutput {
    fn drop(&mut self) {
        if self.promoted {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Discarded temporary output '{}'.", self.path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                "Failed to remove temporary output '{}': {} (remove it manually)",
                self.path.display(),
                err
            ),
        }
    }
}

pub struct Committer<'a> {
    toolkit: &'a dyn MediaToolkit,
    mode: ReplaceMode,
    verify_streams: bool,
}

impl<'a> Committer<'a> {
    pub fn new(toolkit: &'a dyn MediaToolkit, mode: ReplaceMode, verify_streams: bool) -> Self {
        Self {
            toolkit,
            mode,
            verify_streams,
        }
    }

    pub fn commit(
        &self,
        job: &Job,
        temp: TempOutput,
        plan: &TranscodePlan,
        outcome: ExecutionOutcome,
    ) -> JobResult {
        let result = match outcome {
            ExecutionOutcome::Success => self.promote(job, temp, plan),
            ExecutionOutcome::SoftwareFallbackRequired { diagnostic } => {
                drop(temp);
                Err(JobError::HardwareInit(diagnostic))
            }
            ExecutionOutcome::HardFailure(err) => {
                drop(temp);
                Err(err)
            }
        };

        match result {
            Ok(disposition) => JobResult::Succeeded {
                source: job.source.clone(),
                final_path: job.final_path.clone(),
                disposition,
            },
            Err(error) => JobResult::Failed {
                source: job.source.clone(),
                error,
            },
        }
    }

    fn promote(
        &self,
        job: &Job,
        temp: TempOutput,
        plan: &TranscodePlan,
    ) -> Result<Disposition, JobError> {
        self.verify(temp.path(), plan)?;

        // rename() replaces silently; only the source itself may be overwritten.
        if job.final_path != job.source && job.final_path.exists() {
            return Err(JobError::OutputConflict {
                path: job.final_path.clone(),
                reason: String::from("already exists; not overwriting it"),
            });
        }

        temp.promote(&job.final_path).map_err(|e| {
            JobError::io(
                format!("failed to move output into '{}'", job.final_path.display()),
                e,
            )
        })?;

        let disposition = if job.final_path == job.source {
            Disposition::ReplacedInPlace
        } else if self.mode == ReplaceMode::Replace {
            match fs::remove_file(&job.source) {
                Ok(()) => Disposition::ReplacedSource,
                Err(err) if err.kind() == ErrorKind::NotFound => Disposition::ReplacedSource,
                Err(err) => {
                    warn!(
                        "Wrote '{}' but could not remove source '{}': {}",
                        job.final_path.display(),
                        job.source.display(),
                        err
                    );
                    Disposition::WrittenAlongside
                }
            }
        } else {
            Disposition::WrittenAlongside
        };

        info!(
            "Committed '{}' ({})",
            job.final_path.display(),
            disposition
        );
        Ok(disposition)
    }

    fn verify(&self, temp: &Path, plan: &TranscodePlan) -> Result<(), JobError> {
        let meta = fs::metadata(temp).map_err(|e| {
            JobError::CommitVerification(format!(
                "temporary output '{}' is missing: {}",
                temp.display(),
                e
            ))
        })?;
        if meta.len() == 0 {
            return Err(JobError::CommitVerification(format!(
                "temporary output '{}' is empty",
                temp.display()
            )));
        }
        if !self.verify_streams {
            return Ok(());
        }

        let produced = inventory::probe(self.toolkit, temp).map_err(|e| {
            JobError::CommitVerification(format!("re-probe of '{}' failed: {}", temp.display(), e))
        })?;
        for kind in [StreamKind::Video, StreamKind::Audio, StreamKind::Subtitle] {
            let expected = plan.retained_count(kind);
            let found = produced.count(kind);
            if expected != found {
                return Err(JobError::CommitVerification(format!(
                    "expected {} {} stream(s), found {}",
                    expected, kind, found
                )));
            }
        }
        Ok(())
    }
}
