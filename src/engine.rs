//! External process seam: probing and running ffmpeg, and classifying the
//! result of a transcode attempt.

use crate::encoders::{parse_encoders, parse_hwaccels, HardwareCapability, HwAccel};
use crate::error::JobError;
use crate::inventory::ProbeError;
use crate::invocation::Invocation;
use anyhow::{Context, Result};
use log::{debug, warn};
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Lines of engine stderr kept for error reports.
const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// stderr fragments that mean the hardware device or encoder session never
/// came up, as opposed to the input or the encode itself being broken.
const HW_INIT_SIGNATURES: &[&str] = &[
    "cannot load libcuda",
    "cannot load libnvidia-encode",
    "no nvenc capable devices found",
    "openencodesessionex failed",
    "no capable devices found",
    "failed to initialise vaapi connection",
    "failed to create a vaapi device",
    "no va display found",
    "error creating a mfx session",
    "error initializing an internal mfx session",
    "hardware device setup failed",
    "try reducing the number of parallel sessions",
];

/// Generic ffmpeg lines any encoder can print. They only count as a hardware
/// init failure when the hardware encoder itself is the one complaining.
const GENERIC_OPEN_FAILURES: &[&str] = &[
    "error while opening encoder",
    "error initializing output stream",
    "could not open encoder before eof",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub success: bool,
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn describe_status(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {}", code),
            None => String::from("a signal"),
        }
    }
}

/// The two external tools the pipeline depends on.
pub trait MediaToolkit: Send + Sync {
    /// Raw `ffprobe -of json -show_streams -show_format` output for `path`.
    fn probe(&self, path: &Path) -> Result<String, ProbeError>;

    /// Runs a transcode and waits for it to exit.
    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput>;
}

#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegToolkit {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Resolves both binaries through `PATH` unless explicit paths are given.
    pub fn locate(ffmpeg: Option<&Path>, ffprobe: Option<&Path>) -> Result<Self> {
        let find = |explicit: Option<&Path>, name: &str| -> Result<PathBuf> {
            let wanted = explicit.map(Path::to_path_buf).unwrap_or_else(|| name.into());
            which::which(&wanted)
                .with_context(|| format!("Could not find '{}' executable", wanted.display()))
        };
        let toolkit = Self::new(find(ffmpeg, "ffmpeg")?, find(ffprobe, "ffprobe")?);
        debug!(
            "Using ffmpeg '{}' and ffprobe '{}'",
            toolkit.ffmpeg.display(),
            toolkit.ffprobe.display()
        );
        Ok(toolkit)
    }

    pub fn ffmpeg(&self) -> &Path {
        &self.ffmpeg
    }

    /// Asks ffmpeg which accelerators and encoders it was built with. Runs once
    /// per batch; any failure here just means software encoding.
    pub fn detect_hardware(&self, preference: HwAccel) -> HardwareCapability {
        if preference == HwAccel::None {
            return HardwareCapability::none();
        }
        let listing = |flag: &str| -> Option<String> {
            let output = Command::new(&self.ffmpeg)
                .args(["-hide_banner", flag])
                .stdin(Stdio::null())
                .output();
            match output {
                Ok(out) if out.status.success() => {
                    Some(String::from_utf8_lossy(&out.stdout).into_owned())
                }
                Ok(out) => {
                    warn!(
                        "'{} {}' exited with {}; assuming no hardware acceleration",
                        self.ffmpeg.display(),
                        flag,
                        out.status
                    );
                    None
                }
                Err(err) => {
                    warn!(
                        "Failed to run '{} {}': {}; assuming no hardware acceleration",
                        self.ffmpeg.display(),
                        flag,
                        err
                    );
                    None
                }
            }
        };

        let hwaccels = listing("-hwaccels").map(|s| parse_hwaccels(&s));
        let encoders = listing("-encoders").map(|s| parse_encoders(&s));
        match (hwaccels, encoders) {
            (Some(h), Some(e)) => HardwareCapability::resolve(preference, &h, &e),
            _ => HardwareCapability::resolve(preference, &BTreeSet::new(), &BTreeSet::new()),
        }
    }
}

impl MediaToolkit for FfmpegToolkit {
    fn probe(&self, path: &Path) -> Result<String, ProbeError> {
        let program = self.ffprobe.display().to_string();
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-show_streams", "-show_format", "-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ProbeError::Spawn {
                program: program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(ProbeError::Failed {
                program,
                status: output.status.to_string(),
                diagnostic: diagnostic_tail(&String::from_utf8_lossy(&output.stderr)),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;
        Ok(ProcessOutput {
            success: output.status.success(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[derive(Debug)]
pub enum ExecutionOutcome {
    Success,
    /// The hardware encoder could not start; rebuild without it and try once more.
    SoftwareFallbackRequired { diagnostic: String },
    HardFailure(JobError),
}

/// Runs one invocation and classifies what happened.
pub fn execute(toolkit: &dyn MediaToolkit, invocation: &Invocation) -> ExecutionOutcome {
    debug!("Running: {}", invocation.command_line());
    let output = match toolkit.run(invocation) {
        Ok(output) => output,
        Err(err) => {
            return ExecutionOutcome::HardFailure(JobError::io(
                format!("failed to spawn '{}'", invocation.program.display()),
                err,
            ))
        }
    };

    if output.success {
        return ExecutionOutcome::Success;
    }

    let diagnostic = diagnostic_tail(&output.stderr);
    if let Some(encoder) = invocation.hardware_encoder.as_deref() {
        if is_hardware_init_failure(&output.stderr, encoder) {
            return ExecutionOutcome::SoftwareFallbackRequired { diagnostic };
        }
    }

    ExecutionOutcome::HardFailure(JobError::Transcode {
        status: output.describe_status(),
        diagnostic,
    })
}

pub fn is_hardware_init_failure(stderr: &str, encoder: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    if HW_INIT_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        return true;
    }
    let encoder_prefix = format!("[{} @", encoder.to_ascii_lowercase());
    lower.contains(&encoder_prefix)
        && GENERIC_OPEN_FAILURES.iter().any(|sig| lower.contains(sig))
}

/// Last few non-empty lines of a diagnostic stream.
pub fn diagnostic_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect();
    let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
    lines[start..].join("\n")
}
