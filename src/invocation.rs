//! Turns a [`TranscodePlan`] into an ffmpeg argument list.

use crate::encoders::{resolve_video_encoder, video_family, HardwareCapability, VideoFamily};
use crate::inventory::StreamKind;
use crate::plan::{StreamAction, TranscodePlan};
use log::warn;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Hardware encoder the invocation relies on, if any.
    pub hardware_encoder: Option<String>,
}

impl Invocation {
    pub fn uses_hardware(&self) -> bool {
        self.hardware_encoder.is_some()
    }

    /// Shell-ish rendering for logs and dry-run output.
    pub fn command_line(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                out.push('\'');
                out.push_str(&arg.replace('\'', "'\\''"));
                out.push('\'');
            } else {
                out.push_str(arg);
            }
        }
        out
    }
}

const BASE_ARGS: &[&str] = &["-hide_banner", "-nostdin", "-y", "-loglevel", "error"];

#[derive(Clone, Debug)]
pub struct InvocationBuilder {
    program: PathBuf,
    hardware: HardwareCapability,
}

impl InvocationBuilder {
    pub fn new(program: impl Into<PathBuf>, hardware: HardwareCapability) -> Self {
        Self {
            program: program.into(),
            hardware,
        }
    }

    pub fn hardware(&self) -> &HardwareCapability {
        &self.hardware
    }

    pub fn build(
        &self,
        plan: &TranscodePlan,
        source: &Path,
        temp_output: &Path,
        use_hardware: bool,
    ) -> Invocation {
        let mut input_args: Vec<String> = Vec::new();
        let mut output_args: Vec<String> = Vec::new();
        let mut hardware_encoder = None;
        let mp4_like = matches!(plan.container.as_str(), "mp4" | "m4v" | "mov");

        for (out_idx, planned) in plan.retained().enumerate() {
            output_args.push("-map".into());
            output_args.push(format!("0:{}", planned.stream.index));

            match &planned.action {
                StreamAction::Copy => {
                    output_args.push(format!("-c:{}", out_idx));
                    output_args.push("copy".into());
                }
                StreamAction::Reencode {
                    codec,
                    quality,
                    channels,
                } => match planned.stream.kind {
                    StreamKind::Video => {
                        let encoder = resolve_video_encoder(codec, use_hardware, &self.hardware);
                        output_args.push(format!("-c:{}", out_idx));
                        output_args.push(encoder.name.clone());
                        match (quality, encoder.quality_flag) {
                            (Some(q), Some(flag)) => {
                                output_args.push(format!("{}:{}", flag, out_idx));
                                output_args.push(q.to_string());
                            }
                            (Some(q), None) => warn!(
                                "{} has no quality setting; ignoring quality {}",
                                encoder.name, q
                            ),
                            _ => {}
                        }
                        if let Some(hw) = encoder.hardware {
                            for arg in hw.input_args {
                                if !input_args.iter().any(|a| a == arg) {
                                    input_args.push((*arg).to_string());
                                }
                            }
                            if let Some(filter) = hw.filter {
                                output_args.push(format!("-filter:{}", out_idx));
                                output_args.push(filter.to_string());
                            }
                            hardware_encoder.get_or_insert_with(|| hw.name.to_string());
                        }
                        if mp4_like && video_family(&encoder.name) == Some(VideoFamily::Hevc) {
                            output_args.push(format!("-tag:{}", out_idx));
                            output_args.push("hvc1".into());
                        }
                    }
                    StreamKind::Audio => {
                        output_args.push(format!("-c:{}", out_idx));
                        output_args.push(codec.clone());
                        if let Some(ch) = channels {
                            output_args.push(format!("-ac:{}", out_idx));
                            output_args.push(ch.to_string());
                        }
                    }
                    StreamKind::Subtitle => {
                        output_args.push(format!("-c:{}", out_idx));
                        output_args.push(codec.clone());
                    }
                },
                StreamAction::Drop { .. } => unreachable!("retained() filters drops"),
            }
        }

        if mp4_like {
            output_args.push("-movflags".into());
            output_args.push("+faststart".into());
        }

        let mut args: Vec<String> = BASE_ARGS.iter().map(|a| a.to_string()).collect();
        args.extend(input_args);
        args.push("-i".into());
        args.push(source.to_string_lossy().into_owned());
        args.extend(output_args);
        args.push(temp_output.to_string_lossy().into_owned());

        Invocation {
            program: self.program.clone(),
            args,
            hardware_encoder,
        }
    }
}
