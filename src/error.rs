use crate::inventory::ProbeError;
use crate::plan::PlanError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Everything that can sink a single file. None of these stop the batch.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    EmptyPlan(#[from] PlanError),
    #[error("hardware encoder failed to initialise: {0}")]
    HardwareInit(String),
    #[error("ffmpeg exited with {status}: {diagnostic}")]
    Transcode { status: String, diagnostic: String },
    #[error("output verification failed: {0}")]
    CommitVerification(String),
    #[error("output '{}' {reason}", .path.display())]
    OutputConflict { path: PathBuf, reason: String },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        JobError::Io {
            context: context.into(),
            source,
        }
    }

    /// Stable label written to the error ledger.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Probe(_) => "probe_error",
            JobError::EmptyPlan(_) => "empty_plan",
            JobError::HardwareInit(_) => "hardware_init_failure",
            // A malformed output is a failed transcode as far as tooling is concerned.
            JobError::Transcode { .. } | JobError::CommitVerification(_) => "transcode_failure",
            JobError::OutputConflict { .. } => "output_conflict",
            JobError::Io { .. } => "io_error",
            JobError::Panicked(_) => "panic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(JobError::Probe(ProbeError::NoStreams).kind(), "probe_error");
        assert_eq!(
            JobError::EmptyPlan(PlanError::Empty { dropped: 2 }).kind(),
            "empty_plan"
        );
        assert_eq!(
            JobError::CommitVerification("empty".into()).kind(),
            "transcode_failure"
        );
        let io_err = JobError::io(
            "renaming '_tmp_a.mkv'",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(io_err.kind(), "io_error");
        let conflict = JobError::OutputConflict {
            path: PathBuf::from("/m/A.mp4"),
            reason: "already exists".into(),
        };
        assert_eq!(conflict.kind(), "output_conflict");
        assert_eq!(conflict.to_string(), "output '/m/A.mp4' already exists");
        assert_eq!(io_err.to_string(), "renaming '_tmp_a.mkv': denied");
    }
}
