//! Per-file transcode planning: policy applied to an inventory.
//!
//! Planning is a pure function of `(MediaInventory, Policy)`. It never touches
//! the filesystem, so dry-runs and tests see exactly what a real run would do.

use crate::encoders::{
    audio_encoder, same_audio_codec, same_subtitle_codec, same_video_codec, subtitle_codec_of,
};
use crate::inventory::{MediaInventory, StreamDescriptor, StreamKind};
use crate::policy::Policy;
use serde::Serialize;
use std::fmt;
use strum_macros::Display;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan would keep no video or audio streams ({dropped} stream(s) dropped)")]
    Empty { dropped: usize },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DropReason {
    Language,
    UnsupportedByContainer,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum StreamAction {
    Copy,
    Reencode {
        codec: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        quality: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        channels: Option<u32>,
    },
    Drop {
        reason: DropReason,
    },
}

impl StreamAction {
    pub fn is_retained(&self) -> bool {
        !matches!(self, StreamAction::Drop { .. })
    }
}

impl fmt::Display for StreamAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamAction::Copy => f.write_str("copy"),
            StreamAction::Reencode {
                codec,
                quality,
                channels,
            } => {
                write!(f, "reencode -> {}", codec)?;
                if let Some(q) = quality {
                    write!(f, " q={}", q)?;
                }
                if let Some(ch) = channels {
                    write!(f, " ch={}", ch)?;
                }
                Ok(())
            }
            StreamAction::Drop { reason } => write!(f, "drop ({})", reason),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlannedStream {
    pub stream: StreamDescriptor,
    #[serde(flatten)]
    pub action: StreamAction,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TranscodePlan {
    pub source_container: String,
    pub container: String,
    pub streams: Vec<PlannedStream>,
}

impl TranscodePlan {
    /// Retained streams in output order.
    pub fn retained(&self) -> impl Iterator<Item = &PlannedStream> {
        self.streams.iter().filter(|p| p.action.is_retained())
    }

    pub fn retained_count(&self, kind: StreamKind) -> usize {
        self.retained().filter(|p| p.stream.kind == kind).count()
    }

    pub fn dropped_count(&self) -> usize {
        self.streams.len() - self.retained().count()
    }

    pub fn changes_container(&self) -> bool {
        self.container != self.source_container
    }

    /// Nothing to do: every stream copied and the container kept.
    pub fn is_noop(&self) -> bool {
        !self.changes_container()
            && self
                .streams
                .iter()
                .all(|p| matches!(p.action, StreamAction::Copy))
    }

    pub fn summary(&self) -> String {
        let reencode = self
            .streams
            .iter()
            .filter(|p| matches!(p.action, StreamAction::Reencode { .. }))
            .count();
        format!(
            "{} -> {}: {} copy, {} reencode, {} drop",
            self.source_container,
            self.container,
            self.retained().count() - reencode,
            reencode,
            self.dropped_count()
        )
    }
}

pub fn build_plan(inventory: &MediaInventory, policy: &Policy) -> Result<TranscodePlan, PlanError> {
    let source_container = inventory.container.clone();
    let container = policy.target_container(&source_container);
    let container_changes = container != source_container;

    let streams = inventory
        .streams
        .iter()
        .map(|stream| PlannedStream {
            stream: stream.clone(),
            action: match stream.kind {
                StreamKind::Video => plan_video(stream, policy),
                StreamKind::Audio => plan_audio(stream, policy),
                StreamKind::Subtitle => {
                    plan_subtitle(stream, policy, &container, container_changes)
                }
            },
        })
        .collect::<Vec<_>>();

    let plan = TranscodePlan {
        source_container,
        container,
        streams,
    };

    if plan.retained_count(StreamKind::Video) == 0 && plan.retained_count(StreamKind::Audio) == 0
    {
        return Err(PlanError::Empty {
            dropped: plan.dropped_count(),
        });
    }

    Ok(plan)
}

fn plan_video(stream: &StreamDescriptor, policy: &Policy) -> StreamAction {
    match policy.video_codec.target() {
        Some(target) if !same_video_codec(target, &stream.codec) => StreamAction::Reencode {
            codec: target.to_string(),
            quality: policy.quality,
            channels: None,
        },
        _ => StreamAction::Copy,
    }
}

fn plan_audio(stream: &StreamDescriptor, policy: &Policy) -> StreamAction {
    if policy
        .languages
        .rejects(StreamKind::Audio, stream.language.as_deref())
    {
        return StreamAction::Drop {
            reason: DropReason::Language,
        };
    }

    let codec_differs = policy
        .audio_codec
        .target()
        .is_some_and(|target| !same_audio_codec(target, &stream.codec));
    let channels_differ = matches!(
        (policy.audio_channels, stream.channels),
        (Some(wanted), Some(current)) if wanted != current
    );

    if !codec_differs && !channels_differ {
        return StreamAction::Copy;
    }

    let codec = match policy.audio_codec.target() {
        Some(target) if codec_differs => audio_encoder(target),
        _ => audio_encoder(&stream.codec),
    };
    StreamAction::Reencode {
        codec,
        quality: None,
        channels: policy.audio_channels,
    }
}

fn plan_subtitle(
    stream: &StreamDescriptor,
    policy: &Policy,
    container: &str,
    container_changes: bool,
) -> StreamAction {
    if policy
        .languages
        .rejects(StreamKind::Subtitle, stream.language.as_deref())
    {
        return StreamAction::Drop {
            reason: DropReason::Language,
        };
    }

    let natural = if container_changes {
        subtitle_fit(container, &stream.codec)
    } else {
        SubtitleFit::Keep
    };
    if natural == SubtitleFit::Unsupported {
        return StreamAction::Drop {
            reason: DropReason::UnsupportedByContainer,
        };
    }

    // ffmpeg converts text to text and bitmap to bitmap only.
    if let Some(target) = policy.subtitle_codec.target() {
        if is_text_subtitle(target) == is_text_subtitle(&stream.codec) {
            match subtitle_fit(container, target) {
                SubtitleFit::Keep => return subtitle_towards(stream, target),
                SubtitleFit::Convert(codec) => return subtitle_towards(stream, codec),
                SubtitleFit::Unsupported => {}
            }
        }
    }

    match natural {
        SubtitleFit::Convert(codec) => subtitle_towards(stream, codec),
        _ => StreamAction::Copy,
    }
}

fn subtitle_towards(stream: &StreamDescriptor, codec: &str) -> StreamAction {
    if same_subtitle_codec(codec, &stream.codec) {
        StreamAction::Copy
    } else {
        StreamAction::Reencode {
            codec: codec.to_string(),
            quality: None,
            channels: None,
        }
    }
}

const TEXT_SUBTITLES: &[&str] = &["srt", "ass", "ssa", "webvtt", "mov_text", "text"];

fn is_text_subtitle(codec: &str) -> bool {
    TEXT_SUBTITLES.contains(&subtitle_codec_of(codec).as_str())
}

#[derive(Debug, PartialEq, Eq)]
enum SubtitleFit {
    Keep,
    Convert(&'static str),
    Unsupported,
}

/// What a target container can do with a subtitle codec it is handed as-is.
fn subtitle_fit(container: &str, codec: &str) -> SubtitleFit {
    let is_text = is_text_subtitle(codec);
    let codec = subtitle_codec_of(codec);
    match container {
        "mkv" | "matroska" | "mka" => {
            if codec == "mov_text" {
                SubtitleFit::Convert("srt")
            } else {
                SubtitleFit::Keep
            }
        }
        "mp4" | "m4v" | "mov" => {
            if codec == "mov_text" {
                SubtitleFit::Keep
            } else if is_text {
                SubtitleFit::Convert("mov_text")
            } else {
                SubtitleFit::Unsupported
            }
        }
        "webm" => {
            if codec == "webvtt" {
                SubtitleFit::Keep
            } else if is_text {
                SubtitleFit::Convert("webvtt")
            } else {
                SubtitleFit::Unsupported
            }
        }
        _ => SubtitleFit::Unsupported,
    }
}
