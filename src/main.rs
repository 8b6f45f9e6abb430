use anyhow::{bail, Result};
use clap::{
    parser::ValueSource, value_parser, ArgGroup, ArgMatches, CommandFactory, FromArgMatches,
    Parser,
};
use log::{info, warn};
use media_fixer::config::{self, Config};
use media_fixer::discovery::{discover_dir, discover_file};
use media_fixer::encoders::HwAccel;
use media_fixer::engine::{FfmpegToolkit, MediaToolkit};
use media_fixer::inventory::probe;
use media_fixer::invocation::InvocationBuilder;
use media_fixer::job::JobRunner;
use media_fixer::layout::OutputLayout;
use media_fixer::ledger::ErrorLedger;
use media_fixer::logging;
use media_fixer::policy::{CodecChoice, LanguageFilter, Policy, ReplaceMode};
use media_fixer::pool::{WorkerPool, DEFAULT_WORKERS};
use media_fixer::report::{write_inventory_text, ProbeRecord, RunSummary};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("input").required(true).args(["file", "dir"])))]
struct Args {
    /// Single media file to process
    #[arg(short, long, value_parser = value_parser!(PathBuf))]
    file: Option<PathBuf>,

    /// Directory to scan recursively for media files
    #[arg(short, long, value_parser = value_parser!(PathBuf))]
    dir: Option<PathBuf>,

    /// Write outputs under this directory instead of next to the sources
    #[arg(short, long, value_parser = value_parser!(PathBuf))]
    output: Option<PathBuf>,

    /// Target container (mkv, mp4, ...); defaults to the source's
    #[arg(short, long)]
    container: Option<String>,

    /// Target video codec, or "copy"
    #[arg(long, default_value = "copy", id = "video_codec")]
    video_codec: CodecChoice,

    /// Target audio codec, or "copy"
    #[arg(long, default_value = "copy", id = "audio_codec")]
    audio_codec: CodecChoice,

    /// Target subtitle codec, or "copy"
    #[arg(long, default_value = "copy", id = "subtitle_codec")]
    subtitle_codec: CodecChoice,

    /// Quality factor for re-encoded video (CRF; lower is better)
    #[arg(short, long)]
    quality: Option<u32>,

    /// Channel count for audio streams
    #[arg(long, id = "audio_channels")]
    audio_channels: Option<u32>,

    /// Drop audio/subtitle streams whose language differs from the targets
    #[arg(long, default_value_t = false)]
    strip: bool,

    /// Audio language to keep in strip mode
    #[arg(long, default_value = "eng", id = "audio_lang")]
    audio_lang: String,

    /// Subtitle language to keep in strip mode
    #[arg(long, default_value = "eng", id = "subs_lang")]
    subs_lang: String,

    /// Number of files processed concurrently
    #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Plan and log, but do not transcode or touch any file
    #[arg(long, default_value_t = false, id = "dry_run")]
    dry_run: bool,

    /// Keep source files; write outputs alongside them
    #[arg(long, default_value_t = false, id = "no_replace")]
    no_replace: bool,

    /// Failure log (JSON Lines)
    #[arg(long, default_value = "transcode-errors.log", value_parser = value_parser!(PathBuf))]
    logfile: PathBuf,

    /// Print each file's streams and exit
    #[arg(long, default_value_t = false)]
    probe: bool,

    /// Like --probe, but as JSON
    #[arg(long, default_value_t = false, id = "probe_json")]
    probe_json: bool,

    /// Hardware acceleration preference (auto tries GPU encoders if available)
    #[arg(long, value_enum, default_value_t = HwAccel::Auto, id = "hw_accel")]
    hw_accel: HwAccel,

    /// Path to the configuration file
    #[arg(long, value_parser = value_parser!(PathBuf), id = "config_file")]
    config_file: Option<PathBuf>,

    /// ffmpeg executable (default: from PATH)
    #[arg(long, value_parser = value_parser!(PathBuf))]
    ffmpeg: Option<PathBuf>,

    /// ffprobe executable (default: from PATH)
    #[arg(long, value_parser = value_parser!(PathBuf))]
    ffprobe: Option<PathBuf>,

    /// Skip re-probing outputs before committing them
    #[arg(long, default_value_t = false, id = "no_verify")]
    no_verify: bool,

    /// Only log warnings and errors
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

impl Args {
    fn policy(&self) -> Policy {
        Policy {
            container: self.container.clone(),
            video_codec: self.video_codec.clone(),
            audio_codec: self.audio_codec.clone(),
            subtitle_codec: self.subtitle_codec.clone(),
            quality: self.quality,
            audio_channels: self.audio_channels,
            languages: LanguageFilter {
                strip: self.strip,
                audio: self.audio_lang.clone(),
                subtitle: self.subs_lang.clone(),
            },
            hw_accel: self.hw_accel,
            replace: if self.no_replace {
                ReplaceMode::KeepBoth
            } else {
                ReplaceMode::Replace
            },
        }
    }
}

/// `id` must name an argument; clap asserts on unknown ids in debug builds.
fn cli_value_provided(matches: &ArgMatches, id: &str) -> bool {
    matches
        .value_source(id)
        .is_some_and(|src| matches!(src, ValueSource::CommandLine))
}

fn apply_codec_override(
    target: &mut CodecChoice,
    key: &str,
    value: Option<&str>,
    matches: &ArgMatches,
) {
    if cli_value_provided(matches, key) {
        return;
    }
    if let Some(raw) = value {
        match raw.parse::<CodecChoice>() {
            Ok(choice) => *target = choice,
            Err(err) => warn!("Failed to parse config {}='{}': {}", key, raw, err),
        }
    }
}

fn apply_config_overrides(args: &mut Args, cfg: &Config, matches: &ArgMatches) {
    if args.output.is_none() && !cli_value_provided(matches, "output") {
        args.output = cfg.output.clone();
    }
    if args.container.is_none() && !cli_value_provided(matches, "container") {
        args.container = cfg.container.clone();
    }

    apply_codec_override(
        &mut args.video_codec,
        "video_codec",
        cfg.video_codec.as_deref(),
        matches,
    );
    apply_codec_override(
        &mut args.audio_codec,
        "audio_codec",
        cfg.audio_codec.as_deref(),
        matches,
    );
    apply_codec_override(
        &mut args.subtitle_codec,
        "subtitle_codec",
        cfg.subtitle_codec.as_deref(),
        matches,
    );

    if args.quality.is_none() && !cli_value_provided(matches, "quality") {
        args.quality = cfg.quality;
    }
    if args.audio_channels.is_none() && !cli_value_provided(matches, "audio_channels") {
        args.audio_channels = cfg.audio_channels;
    }

    if !cli_value_provided(matches, "strip") {
        if let Some(strip) = cfg.strip {
            args.strip = strip;
        }
    }
    if !cli_value_provided(matches, "audio_lang") {
        if let Some(lang) = cfg.audio_lang.as_ref() {
            args.audio_lang = lang.clone();
        }
    }
    if !cli_value_provided(matches, "subs_lang") {
        if let Some(lang) = cfg.subs_lang.as_ref() {
            args.subs_lang = lang.clone();
        }
    }
    if !cli_value_provided(matches, "workers") {
        if let Some(workers) = cfg.workers {
            args.workers = workers;
        }
    }
    if !cli_value_provided(matches, "no_replace") {
        if let Some(no_replace) = cfg.no_replace {
            args.no_replace = no_replace;
        }
    }
    if !cli_value_provided(matches, "logfile") {
        if let Some(logfile) = cfg.logfile.as_ref() {
            args.logfile = logfile.clone();
        }
    }
    if !cli_value_provided(matches, "hw_accel") {
        if let Some(hw_accel) = cfg.hw_accel {
            args.hw_accel = hw_accel;
        }
    }
    if args.ffmpeg.is_none() {
        args.ffmpeg = cfg.ffmpeg.clone();
    }
    if args.ffprobe.is_none() {
        args.ffprobe = cfg.ffprobe.clone();
    }
    if !cli_value_provided(matches, "no_verify") {
        if let Some(verify) = cfg.verify {
            args.no_verify = !verify;
        }
    }
}

fn run_probe(toolkit: &dyn MediaToolkit, files: &[PathBuf], json: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        let records: Vec<ProbeRecord> = files
            .iter()
            .map(|path| ProbeRecord::new(path, probe(toolkit, path)))
            .collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&records)?)?;
        return Ok(());
    }
    for path in files {
        match probe(toolkit, path) {
            Ok(inventory) => write_inventory_text(&mut out, &inventory)?,
            Err(err) => warn!("Could not probe '{}': {}", path.display(), err),
        }
    }
    Ok(())
}

fn main() -> Result<ExitCode> {
    // Parsing consumes the matched values; keep the original matches for
    // value_source lookups when layering the config file underneath.
    let matches = Args::command().get_matches();
    let mut args = Args::from_arg_matches(&matches)?;

    logging::init(args.quiet);
    logging::log_relevant_env();

    if let Some(loaded) = config::load_config(args.config_file.as_deref())? {
        apply_config_overrides(&mut args, &loaded.config, &matches);
    }

    let discovered = match (&args.file, &args.dir) {
        (Some(file), None) => discover_file(file)?,
        (None, Some(dir)) => discover_dir(dir)?,
        _ => bail!("Exactly one of --file or --dir is required"),
    };
    if discovered.files.is_empty() {
        bail!("No media files to process");
    }

    let toolkit = Arc::new(FfmpegToolkit::locate(
        args.ffmpeg.as_deref(),
        args.ffprobe.as_deref(),
    )?);

    if args.probe || args.probe_json {
        run_probe(&*toolkit, &discovered.files, args.probe_json)?;
        return Ok(ExitCode::SUCCESS);
    }

    let policy = Arc::new(args.policy());
    let hardware = toolkit.detect_hardware(policy.hw_accel);
    let invocations = InvocationBuilder::new(toolkit.ffmpeg(), hardware);
    let layout = OutputLayout::new(args.dir.clone(), args.output.clone(), policy.replace);
    let ledger = Arc::new(ErrorLedger::new(args.logfile.clone()));
    let pool = WorkerPool::new(args.workers);

    if args.dry_run {
        info!("Dry run: no files will be written, renamed or deleted");
    }
    info!(
        "Processing {} file(s) with {} worker(s)",
        discovered.files.len(),
        pool.workers()
    );

    let runner = JobRunner::new(toolkit, policy, invocations, layout, Arc::clone(&ledger))
        .dry_run(args.dry_run)
        .verify_streams(!args.no_verify);
    runner.reserve_outputs(&discovered.files);
    let results = pool.run(
        discovered.files,
        |id, path| runner.run(id, path),
        |id, path, message| runner.panicked(id, path, message),
    );

    let summary = RunSummary::from_results(&results);
    summary.write(&mut io::stdout().lock())?;

    if summary.failure_count() > 0 {
        if !args.dry_run {
            warn!(
                "{} failure(s) recorded in '{}'",
                summary.failure_count(),
                ledger.path().display()
            );
        }
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
