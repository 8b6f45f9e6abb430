//! One job per input file: probe, plan, transcode, commit.

use crate::commit::{Committer, Disposition, TempOutput};
use crate::engine::{execute, ExecutionOutcome, MediaToolkit};
use crate::error::JobError;
use crate::inventory::{normalize_container, probe};
use crate::invocation::InvocationBuilder;
use crate::layout::{temp_path_for, OutputLayout};
use crate::ledger::ErrorLedger;
use crate::plan::{build_plan, StreamAction};
use crate::policy::Policy;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum_macros::Display;
use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("illegal job transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: usize,
    pub source: PathBuf,
    /// Where the output lands once committed. Equals `source` until planned.
    pub final_path: PathBuf,
    status: JobStatus,
}

impl Job {
    pub fn new(id: usize, source: PathBuf) -> Self {
        Self {
            id,
            final_path: source.clone(),
            source,
            status: JobStatus::Pending,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug)]
pub enum JobResult {
    Succeeded {
        source: PathBuf,
        final_path: PathBuf,
        disposition: Disposition,
    },
    Failed {
        source: PathBuf,
        error: JobError,
    },
}

impl JobResult {
    pub fn failed(source: &Path, error: JobError) -> Self {
        JobResult::Failed {
            source: source.to_path_buf(),
            error,
        }
    }

    pub fn source(&self) -> &Path {
        match self {
            JobResult::Succeeded { source, .. } | JobResult::Failed { source, .. } => source,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobResult::Failed { .. })
    }

    pub fn disposition(&self) -> Option<Disposition> {
        match self {
            JobResult::Succeeded { disposition, .. } => Some(*disposition),
            JobResult::Failed { .. } => None,
        }
    }
}

/// Everything a worker needs, shared read-only across the pool.
pub struct JobRunner {
    toolkit: Arc<dyn MediaToolkit>,
    policy: Arc<Policy>,
    invocations: InvocationBuilder,
    layout: OutputLayout,
    ledger: Arc<ErrorLedger>,
    /// Output path -> the source that owns it for this run.
    claims: Mutex<HashMap<PathBuf, PathBuf>>,
    dry_run: bool,
    verify_streams: bool,
}

impl JobRunner {
    pub fn new(
        toolkit: Arc<dyn MediaToolkit>,
        policy: Arc<Policy>,
        invocations: InvocationBuilder,
        layout: OutputLayout,
        ledger: Arc<ErrorLedger>,
    ) -> Self {
        Self {
            toolkit,
            policy,
            invocations,
            layout,
            ledger,
            claims: Mutex::new(HashMap::new()),
            dry_run: false,
            verify_streams: true,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn verify_streams(mut self, verify: bool) -> Self {
        self.verify_streams = verify;
        self
    }

    /// Claims, in input order, every source's own path and then the output
    /// each source is expected to produce. A later source whose output is
    /// already claimed fails instead of overwriting it.
    pub fn reserve_outputs(&self, sources: &[PathBuf]) {
        let mut claims = self.claims.lock();
        for source in sources {
            claims.insert(source.clone(), source.clone());
        }
        for source in sources {
            let hint = source
                .extension()
                .and_then(|e| e.to_str())
                .map(normalize_container)
                .unwrap_or_default();
            let expected = self
                .layout
                .final_path(source, &self.policy.target_container(&hint));
            claims.entry(expected).or_insert_with(|| source.clone());
        }
    }

    fn claim_output(&self, job: &Job) -> Result<(), JobError> {
        let mut claims = self.claims.lock();
        let owner = claims
            .entry(job.final_path.clone())
            .or_insert_with(|| job.source.clone());
        if *owner != job.source {
            return Err(JobError::OutputConflict {
                path: job.final_path.clone(),
                reason: format!("is also claimed by '{}'", owner.display()),
            });
        }
        if job.final_path != job.source && job.final_path.exists() {
            return Err(JobError::OutputConflict {
                path: job.final_path.clone(),
                reason: String::from("already exists"),
            });
        }
        Ok(())
    }

    pub fn run(&self, id: usize, source: &Path) -> JobResult {
        let mut job = Job::new(id, source.to_path_buf());
        if let Err(err) = job.transition(JobStatus::Running) {
            warn!("[{}] {}", id, err);
        }
        info!("[{}] Processing '{}'", id, source.display());
        let result = self.process(&mut job);
        self.finish(&mut job, result)
    }

    /// Converts a panic caught at the job boundary into a recorded failure.
    pub fn panicked(&self, id: usize, source: &Path, message: String) -> JobResult {
        error!("[{}] Job for '{}' panicked: {}", id, source.display(), message);
        let result = JobResult::failed(source, JobError::Panicked(message));
        self.record_failure(&result);
        result
    }

    fn finish(&self, job: &mut Job, result: JobResult) -> JobResult {
        let next = if result.is_failure() {
            JobStatus::Failed
        } else {
            JobStatus::Succeeded
        };
        if let Err(err) = job.transition(next) {
            warn!("[{}] {}", job.id, err);
        }
        if let JobResult::Failed { source, error } = &result {
            error!("[{}] Failed '{}': {}", job.id, source.display(), error);
        }
        self.record_failure(&result);
        result
    }

    fn record_failure(&self, result: &JobResult) {
        if self.dry_run {
            return;
        }
        if let JobResult::Failed { source, error } = result {
            self.ledger.record(source, error);
        }
    }

    fn process(&self, job: &mut Job) -> JobResult {
        let toolkit = self.toolkit.as_ref();

        let inventory = match probe(toolkit, &job.source) {
            Ok(inventory) => inventory,
            Err(err) => return JobResult::failed(&job.source, err.into()),
        };
        let plan = match build_plan(&inventory, &self.policy) {
            Ok(plan) => plan,
            Err(err) => return JobResult::failed(&job.source, err.into()),
        };
        info!("[{}] Plan: {}", job.id, plan.summary());
        for planned in &plan.streams {
            if !matches!(planned.action, StreamAction::Copy) {
                debug!(
                    "[{}]   #{} {} {} -> {}",
                    job.id, planned.stream.index, planned.stream.kind, planned.stream.codec, planned.action
                );
            }
        }

        job.final_path = self.layout.final_path(&job.source, &plan.container);
        if let Err(err) = self.claim_output(job) {
            return JobResult::failed(&job.source, err);
        }

        if plan.is_noop() && !self.layout.relocates() {
            info!("[{}] Nothing to change; leaving '{}' as is", job.id, job.source.display());
            return JobResult::Succeeded {
                source: job.source.clone(),
                final_path: job.source.clone(),
                disposition: Disposition::Unchanged,
            };
        }

        let temp_path = temp_path_for(&job.final_path);
        let use_hardware = self.invocations.hardware().is_available();
        let invocation = self
            .invocations
            .build(&plan, &job.source, &temp_path, use_hardware);

        if self.dry_run {
            info!("[{}] Dry run: {}", job.id, invocation.command_line());
            info!(
                "[{}] Dry run: would write '{}'",
                job.id,
                job.final_path.display()
            );
            return JobResult::Succeeded {
                source: job.source.clone(),
                final_path: job.final_path.clone(),
                disposition: Disposition::Planned,
            };
        }

        if let Some(parent) = job.final_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(err) = fs::create_dir_all(parent) {
                return JobResult::failed(
                    &job.source,
                    JobError::io(format!("failed to create '{}'", parent.display()), err),
                );
            }
        }

        let temp = TempOutput::new(temp_path);
        let mut outcome = execute(toolkit, &invocation);
        if let ExecutionOutcome::SoftwareFallbackRequired { diagnostic } = &outcome {
            warn!(
                "[{}] Hardware encoder {} failed to initialise; retrying with software encoders",
                job.id,
                invocation.hardware_encoder.as_deref().unwrap_or("?")
            );
            debug!("[{}] {}", job.id, diagnostic);
            let software = self
                .invocations
                .build(&plan, &job.source, temp.path(), false);
            outcome = execute(toolkit, &software);
        }

        Committer::new(toolkit, self.layout.mode(), self.verify_streams)
            .commit(job, temp, &plan, outcome)
    }
}
