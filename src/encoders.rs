//! Codec families and the encoder tables used to resolve a requested codec
//! into a concrete ffmpeg encoder, with or without hardware acceleration.

use clap::ValueEnum;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum_macros::Display;

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum, Deserialize, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HwAccel {
    Auto,
    None,
    Nvenc,
    Vaapi,
    Qsv,
    Videotoolbox,
    Amf,
}

impl HwAccel {
    /// `ffmpeg -hwaccels` entries that make this accelerator usable.
    fn device_types(self) -> &'static [&'static str] {
        match self {
            HwAccel::Nvenc => &["cuda"],
            HwAccel::Vaapi => &["vaapi"],
            HwAccel::Qsv => &["qsv"],
            HwAccel::Videotoolbox => &["videotoolbox"],
            HwAccel::Amf => &["d3d11va", "dxva2"],
            HwAccel::Auto | HwAccel::None => &[],
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VideoFamily {
    H264,
    Hevc,
    Av1,
    Vp9,
}

struct FamilyEncoders {
    family: VideoFamily,
    /// Names (codec, encoder, shorthand) that all denote this family.
    aliases: &'static [&'static str],
    software: &'static str,
}

const FAMILIES: &[FamilyEncoders] = &[
    FamilyEncoders {
        family: VideoFamily::H264,
        aliases: &["h264", "avc", "x264", "libx264", "libopenh264"],
        software: "libx264",
    },
    FamilyEncoders {
        family: VideoFamily::Hevc,
        aliases: &["hevc", "h265", "x265", "libx265"],
        software: "libx265",
    },
    FamilyEncoders {
        family: VideoFamily::Av1,
        aliases: &["av1", "libsvtav1", "libaom-av1", "librav1e"],
        software: "libsvtav1",
    },
    FamilyEncoders {
        family: VideoFamily::Vp9,
        aliases: &["vp9", "libvpx-vp9"],
        software: "libvpx-vp9",
    },
];

/// Software encoders that take a CRF-style quality factor, and the flag for it.
const SOFTWARE_QUALITY: &[(&str, &str)] = &[
    ("libx264", "-crf"),
    ("libx265", "-crf"),
    ("libsvtav1", "-crf"),
    ("libaom-av1", "-crf"),
    ("libvpx-vp9", "-crf"),
];

#[derive(Debug, PartialEq, Eq)]
pub struct HwEncoder {
    pub name: &'static str,
    pub accel: HwAccel,
    pub family: VideoFamily,
    pub quality_flag: Option<&'static str>,
    /// Arguments that must precede `-i`.
    pub input_args: &'static [&'static str],
    pub filter: Option<&'static str>,
}

const VAAPI_INPUT: &[&str] = &["-vaapi_device", "/dev/dri/renderD128"];
const VAAPI_UPLOAD: Option<&str> = Some("format=nv12,hwupload");

macro_rules! hw {
    ($name:literal, $accel:ident, $family:ident, $quality:expr) => {
        HwEncoder {
            name: $name,
            accel: HwAccel::$accel,
            family: VideoFamily::$family,
            quality_flag: $quality,
            input_args: &[],
            filter: None,
        }
    };
    ($name:literal, $accel:ident, $family:ident, $quality:expr, $input:expr, $filter:expr) => {
        HwEncoder {
            name: $name,
            accel: HwAccel::$accel,
            family: VideoFamily::$family,
            quality_flag: $quality,
            input_args: $input,
            filter: $filter,
        }
    };
}

pub const HW_ENCODERS: &[HwEncoder] = &[
    hw!("h264_nvenc", Nvenc, H264, Some("-cq")),
    hw!("hevc_nvenc", Nvenc, Hevc, Some("-cq")),
    hw!("av1_nvenc", Nvenc, Av1, Some("-cq")),
    hw!("h264_vaapi", Vaapi, H264, Some("-qp"), VAAPI_INPUT, VAAPI_UPLOAD),
    hw!("hevc_vaapi", Vaapi, Hevc, Some("-qp"), VAAPI_INPUT, VAAPI_UPLOAD),
    hw!("av1_vaapi", Vaapi, Av1, Some("-qp"), VAAPI_INPUT, VAAPI_UPLOAD),
    hw!("vp9_vaapi", Vaapi, Vp9, Some("-qp"), VAAPI_INPUT, VAAPI_UPLOAD),
    hw!("h264_qsv", Qsv, H264, Some("-global_quality")),
    hw!("hevc_qsv", Qsv, Hevc, Some("-global_quality")),
    hw!("av1_qsv", Qsv, Av1, Some("-global_quality")),
    hw!("vp9_qsv", Qsv, Vp9, Some("-global_quality")),
    hw!("h264_videotoolbox", Videotoolbox, H264, Some("-q")),
    hw!("hevc_videotoolbox", Videotoolbox, Hevc, Some("-q")),
    hw!("h264_amf", Amf, H264, None),
    hw!("hevc_amf", Amf, Hevc, None),
    hw!("av1_amf", Amf, Av1, None),
];

#[cfg(target_os = "macos")]
const AUTO_ORDER: &[HwAccel] = &[
    HwAccel::Videotoolbox,
    HwAccel::Nvenc,
    HwAccel::Qsv,
    HwAccel::Vaapi,
];

#[cfg(target_os = "windows")]
const AUTO_ORDER: &[HwAccel] = &[HwAccel::Nvenc, HwAccel::Qsv];

#[cfg(all(not(target_os = "macos"), not(target_os = "windows")))]
const AUTO_ORDER: &[HwAccel] = &[HwAccel::Nvenc, HwAccel::Vaapi, HwAccel::Qsv];

/// Maps a codec or encoder name to its video family.
pub fn video_family(name: &str) -> Option<VideoFamily> {
    let lower = name.trim().to_ascii_lowercase();
    if let Some(entry) = FAMILIES.iter().find(|f| f.aliases.contains(&lower.as_str())) {
        return Some(entry.family);
    }
    HW_ENCODERS
        .iter()
        .find(|e| e.name == lower)
        .map(|e| e.family)
}

/// True when `target` would produce the same bitstream format as `current`.
pub fn same_video_codec(target: &str, current: &str) -> bool {
    match (video_family(target), video_family(current)) {
        (Some(a), Some(b)) => a == b,
        _ => target.eq_ignore_ascii_case(current),
    }
}

/// Audio encoder to hand ffmpeg for a requested codec name.
pub fn audio_encoder(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "mp3" => "libmp3lame".into(),
        "opus" => "libopus".into(),
        "vorbis" => "libvorbis".into(),
        _ => lower,
    }
}

/// Codec name an audio encoder produces, as ffprobe reports it.
pub fn audio_codec_of(encoder: &str) -> String {
    let lower = encoder.trim().to_ascii_lowercase();
    match lower.as_str() {
        "libmp3lame" | "libshine" => "mp3".into(),
        "libopus" => "opus".into(),
        "libvorbis" => "vorbis".into(),
        "libfdk_aac" => "aac".into(),
        _ => lower,
    }
}

pub fn same_audio_codec(target: &str, current: &str) -> bool {
    audio_codec_of(target) == audio_codec_of(current)
}

/// Subtitle codec names with `srt` and `subrip` folded together.
pub fn subtitle_codec_of(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "subrip" => "srt".into(),
        _ => lower,
    }
}

pub fn same_subtitle_codec(target: &str, current: &str) -> bool {
    subtitle_codec_of(target) == subtitle_codec_of(current)
}

/// Hardware support resolved once at startup and then shared read-only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HardwareCapability {
    accel: Option<HwAccel>,
    encoders: BTreeSet<String>,
}

impl HardwareCapability {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_encoders<I, S>(accel: HwAccel, encoders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accel: Some(accel),
            encoders: encoders.into_iter().map(Into::into).collect(),
        }
    }

    pub fn accel(&self) -> Option<HwAccel> {
        self.accel
    }

    pub fn is_available(&self) -> bool {
        self.accel.is_some()
    }

    /// Picks an accelerator from what `ffmpeg -hwaccels` / `-encoders` report.
    pub fn resolve(
        preference: HwAccel,
        hwaccels: &BTreeSet<String>,
        encoders: &BTreeSet<String>,
    ) -> Self {
        let usable = |accel: HwAccel| {
            let device_ok = accel
                .device_types()
                .iter()
                .any(|d| hwaccels.contains(*d));
            let encoder_ok = HW_ENCODERS
                .iter()
                .any(|e| e.accel == accel && encoders.contains(e.name));
            device_ok && encoder_ok
        };

        let chosen = match preference {
            HwAccel::None => None,
            HwAccel::Auto => AUTO_ORDER.iter().copied().find(|a| usable(*a)),
            explicit => {
                if usable(explicit) {
                    Some(explicit)
                } else {
                    warn!(
                        "Requested hardware acceleration {} is not available; using software encoders",
                        explicit
                    );
                    None
                }
            }
        };

        match chosen {
            Some(accel) => {
                let names = HW_ENCODERS
                    .iter()
                    .filter(|e| e.accel == accel && encoders.contains(e.name))
                    .map(|e| e.name.to_string())
                    .collect::<BTreeSet<_>>();
                info!(
                    "Hardware acceleration: {} ({})",
                    accel,
                    names.iter().cloned().collect::<Vec<_>>().join(", ")
                );
                Self {
                    accel: Some(accel),
                    encoders: names,
                }
            }
            None => {
                info!("Hardware acceleration: none detected; using software encoders");
                Self::none()
            }
        }
    }

    pub fn hardware_encoder(&self, family: VideoFamily) -> Option<&'static HwEncoder> {
        let accel = self.accel?;
        HW_ENCODERS
            .iter()
            .find(|e| e.accel == accel && e.family == family && self.encoders.contains(e.name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEncoder {
    pub name: String,
    pub hardware: Option<&'static HwEncoder>,
    pub quality_flag: Option<&'static str>,
}

impl ResolvedEncoder {
    pub fn is_hardware(&self) -> bool {
        self.hardware.is_some()
    }
}

/// Resolves a video target (`libx265`, `hevc`, `hevc_nvenc`, …) to an encoder.
pub fn resolve_video_encoder(
    target: &str,
    use_hardware: bool,
    hardware: &HardwareCapability,
) -> ResolvedEncoder {
    let lower = target.trim().to_ascii_lowercase();
    let family = video_family(&lower);

    if use_hardware {
        if let Some(hw) = family.and_then(|f| hardware.hardware_encoder(f)) {
            return ResolvedEncoder {
                name: hw.name.to_string(),
                hardware: Some(hw),
                quality_flag: hw.quality_flag,
            };
        }
    }

    let software = match family {
        // Shorthands and hardware names fall back to the family's software encoder.
        Some(f) if !is_software_encoder(&lower) => FAMILIES
            .iter()
            .find(|entry| entry.family == f)
            .map(|entry| entry.software.to_string())
            .unwrap_or(lower),
        _ => lower,
    };
    if HW_ENCODERS.iter().any(|e| e.name == target) {
        debug!("Hardware encoder {} unavailable; using {}", target, software);
    }
    let quality_flag = SOFTWARE_QUALITY
        .iter()
        .find(|(name, _)| *name == software)
        .map(|(_, flag)| *flag);

    ResolvedEncoder {
        name: software,
        hardware: None,
        quality_flag,
    }
}

fn is_software_encoder(name: &str) -> bool {
    name.starts_with("lib")
}

/// Parses `ffmpeg -hide_banner -hwaccels` output.
pub fn parse_hwaccels(stdout: &str) -> BTreeSet<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.ends_with(':'))
        .map(str::to_ascii_lowercase)
        .collect()
}

/// Parses `ffmpeg -hide_banner -encoders` output, keeping video encoder names.
pub fn parse_encoders(stdout: &str) -> BTreeSet<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            if flags.len() == 6 && flags.starts_with('V') && name != "=" {
                Some(name.to_string())
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn families_fold_aliases() {
        assert_eq!(video_family("libx265"), Some(VideoFamily::Hevc));
        assert_eq!(video_family("H265"), Some(VideoFamily::Hevc));
        assert_eq!(video_family("hevc_nvenc"), Some(VideoFamily::Hevc));
        assert_eq!(video_family("mpeg4"), None);
        assert!(same_video_codec("x264", "h264"));
        assert!(!same_video_codec("libx265", "h264"));
        assert!(same_video_codec("mpeg4", "MPEG4"));
    }

    #[test]
    fn audio_and_subtitle_aliases() {
        assert!(same_audio_codec("libopus", "opus"));
        assert!(same_audio_codec("mp3", "mp3"));
        assert!(!same_audio_codec("aac", "ac3"));
        assert_eq!(audio_encoder("opus"), "libopus");
        assert!(same_subtitle_codec("srt", "subrip"));
        assert!(!same_subtitle_codec("mov_text", "subrip"));
    }

    #[test]
    fn software_resolution_without_hardware() {
        let hw = HardwareCapability::none();
        let enc = resolve_video_encoder("h265", true, &hw);
        assert_eq!(enc.name, "libx265");
        assert_eq!(enc.quality_flag, Some("-crf"));
        assert!(!enc.is_hardware());

        let enc = resolve_video_encoder("hevc_nvenc", true, &hw);
        assert_eq!(enc.name, "libx265");

        let enc = resolve_video_encoder("mpeg4", true, &hw);
        assert_eq!(enc.name, "mpeg4");
        assert_eq!(enc.quality_flag, None);
    }

    #[test]
    fn hardware_resolution_prefers_detected_encoder() {
        let hw = HardwareCapability::with_encoders(HwAccel::Nvenc, ["h264_nvenc", "hevc_nvenc"]);
        let enc = resolve_video_encoder("libx265", true, &hw);
        assert_eq!(enc.name, "hevc_nvenc");
        assert_eq!(enc.quality_flag, Some("-cq"));

        let enc = resolve_video_encoder("libx265", false, &hw);
        assert_eq!(enc.name, "libx265");

        let vt = HardwareCapability::with_encoders(HwAccel::Videotoolbox, ["hevc_videotoolbox"]);
        assert_eq!(resolve_video_encoder("hevc", true, &vt).quality_flag, Some("-q"));

        // av1_nvenc was not reported by ffmpeg
        let enc = resolve_video_encoder("av1", true, &hw);
        assert_eq!(enc.name, "libsvtav1");
    }

    #[test]
    fn resolve_capability_from_ffmpeg_listings() {
        let hwaccels = parse_hwaccels("Hardware acceleration methods:\nvdpau\ncuda\nvaapi\n");
        let encoders = parse_encoders(
            "Encoders:\n V..... = Video\n ------\n V....D libx264              H.264\n V....D h264_nvenc           NVIDIA NVENC H.264 encoder\n A....D aac                  AAC\n",
        );
        assert!(encoders.contains("h264_nvenc"));
        assert!(!encoders.contains("aac"));

        let cap = HardwareCapability::resolve(HwAccel::Auto, &hwaccels, &encoders);
        assert_eq!(cap.accel(), Some(HwAccel::Nvenc));

        let none = HardwareCapability::resolve(HwAccel::None, &hwaccels, &encoders);
        assert!(!none.is_available());

        let qsv = HardwareCapability::resolve(HwAccel::Qsv, &hwaccels, &encoders);
        assert!(!qsv.is_available());

        let empty = HardwareCapability::resolve(HwAccel::Auto, &set(&[]), &set(&["h264_nvenc"]));
        assert!(!empty.is_available());
    }
}
