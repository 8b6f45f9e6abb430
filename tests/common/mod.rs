#![allow(dead_code)]

use media_fixer::engine::{MediaToolkit, ProcessOutput};
use media_fixer::inventory::ProbeError;
use media_fixer::invocation::Invocation;
use media_fixer::ledger::LedgerEntry;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

pub const HW_INIT_STDERR: &str = "[hevc_nvenc @ 0x55d0] OpenEncodeSessionEx failed: unsupported device (2): (no details)\n\
Error while opening encoder for output stream #0:0 - maybe incorrect parameters such as bit_rate, rate, width or height\n";

/// What the next `run` call does.
#[derive(Debug, Clone)]
pub enum Script {
    /// Writes probe JSON for the mapped streams into the output file.
    Succeed,
    /// Leaves a partial output behind and exits 1.
    Fail(&'static str),
    /// Exits 1 with a hardware initialisation diagnostic.
    HwInitFail,
    /// Exits 0 but produces a zero-byte file.
    EmptyOutput,
}

/// In-process stand-in for ffprobe/ffmpeg. Probing a path it has no canned
/// answer for reads the file itself, so outputs written by `run` can be
/// re-probed.
pub struct StubToolkit {
    probes: Mutex<HashMap<PathBuf, String>>,
    script: Mutex<VecDeque<Script>>,
    runs: Mutex<Vec<Invocation>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
}

impl Default for StubToolkit {
    fn default() -> Self {
        Self::new()
    }
}

impl StubToolkit {
    pub fn new() -> Self {
        Self {
            probes: Mutex::new(HashMap::new()),
            script: Mutex::new(VecDeque::new()),
            runs: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn add_probe(&self, path: &Path, json: String) {
        self.probes.lock().insert(path.to_path_buf(), json);
    }

    pub fn push_script(&self, script: Script) {
        self.script.lock().push_back(script);
    }

    pub fn runs(&self) -> Vec<Invocation> {
        self.runs.lock().clone()
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().len()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn output_json(&self, invocation: &Invocation) -> String {
        let args = &invocation.args;
        let input = args
            .iter()
            .position(|a| a == "-i")
            .and_then(|i| args.get(i + 1))
            .map(PathBuf::from)
            .unwrap_or_default();
        let source: Value = self
            .probes
            .lock()
            .get(&input)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| json!({ "streams": [] }));
        let source_streams = source["streams"].as_array().cloned().unwrap_or_default();

        let mapped: Vec<u64> = args
            .windows(2)
            .filter(|w| w[0] == "-map")
            .filter_map(|w| w[1].strip_prefix("0:")?.parse().ok())
            .collect();
        let streams: Vec<Value> = mapped
            .iter()
            .enumerate()
            .filter_map(|(out_idx, src_idx)| {
                let mut s = source_streams
                    .iter()
                    .find(|s| s["index"].as_u64() == Some(*src_idx))?
                    .clone();
                s["index"] = json!(out_idx);
                Some(s)
            })
            .collect();
        json!({ "streams": streams, "format": { "format_name": "stub" } }).to_string()
    }
}

impl MediaToolkit for StubToolkit {
    fn probe(&self, path: &Path) -> Result<String, ProbeError> {
        if let Some(raw) = self.probes.lock().get(path) {
            return Ok(raw.clone());
        }
        fs::read_to_string(path).map_err(|e| ProbeError::Failed {
            program: "stub-ffprobe".into(),
            status: "exit status: 1".into(),
            diagnostic: e.to_string(),
        })
    }

    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.runs.lock().push(invocation.clone());

        let output_path = invocation.args.last().map(PathBuf::from).unwrap_or_default();
        let script = self.script.lock().pop_front().unwrap_or(Script::Succeed);
        let result = match script {
            Script::Succeed => {
                fs::write(&output_path, self.output_json(invocation))?;
                ProcessOutput {
                    success: true,
                    code: Some(0),
                    stderr: String::new(),
                }
            }
            Script::Fail(stderr) => {
                fs::write(&output_path, b"partial")?;
                ProcessOutput {
                    success: false,
                    code: Some(1),
                    stderr: stderr.to_string(),
                }
            }
            Script::HwInitFail => ProcessOutput {
                success: false,
                code: Some(1),
                stderr: HW_INIT_STDERR.to_string(),
            },
            Script::EmptyOutput => {
                fs::write(&output_path, b"")?;
                ProcessOutput {
                    success: true,
                    code: Some(0),
                    stderr: String::new(),
                }
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(result)
    }
}

pub fn stream(
    index: u32,
    kind: &str,
    codec: &str,
    language: Option<&str>,
    channels: Option<u32>,
) -> Value {
    let mut s = json!({ "index": index, "codec_type": kind, "codec_name": codec });
    if let Some(lang) = language {
        s["tags"] = json!({ "language": lang });
    }
    if let Some(ch) = channels {
        s["channels"] = json!(ch);
    }
    s
}

pub fn probe_json(streams: Vec<Value>) -> String {
    json!({ "streams": streams, "format": { "format_name": "matroska,webm" } }).to_string()
}

/// Video, English and Japanese audio, English subtitles.
pub fn bilingual_streams() -> Vec<Value> {
    vec![
        stream(0, "video", "h264", None, None),
        stream(1, "audio", "aac", Some("eng"), Some(2)),
        stream(2, "audio", "aac", Some("jpn"), Some(2)),
        stream(3, "subtitle", "subrip", Some("eng"), None),
    ]
}

/// Creates a source file with recognisable content and registers its probe.
pub fn add_source(toolkit: &StubToolkit, dir: &Path, name: &str, streams: Vec<Value>) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, format!("original bytes of {}", name)).unwrap();
    toolkit.add_probe(&path, probe_json(streams));
    path
}

pub fn ledger_entries(path: &Path) -> Vec<LedgerEntry> {
    match fs::read_to_string(path) {
        Ok(text) => text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Every file under `dir` with its contents, for before/after comparisons.
pub fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut out: Vec<(PathBuf, Vec<u8>)> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| (e.path().to_path_buf(), fs::read(e.path()).unwrap()))
        .collect();
    out.sort();
    out
}

pub fn temp_files(dir: &Path) -> Vec<PathBuf> {
    snapshot(dir)
        .into_iter()
        .map(|(p, _)| p)
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("_tmp_"))
        })
        .collect()
}

#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}
