//! Stream inventory: the validated view of a media file's streams.

use crate::engine::MediaToolkit;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumString};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {diagnostic}")]
    Failed {
        program: String,
        status: String,
        diagnostic: String,
    },
    #[error("unparseable probe output: {0}")]
    Malformed(String),
    #[error("no video, audio or subtitle streams found")]
    NoStreams,
}

#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Display, EnumString, Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct StreamDescriptor {
    pub index: u32,
    pub kind: StreamKind,
    pub codec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct MediaInventory {
    pub path: PathBuf,
    pub container: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_name: Option<String>,
    pub streams: Vec<StreamDescriptor>,
    /// Data/attachment entries the probe reported but no plan will map.
    pub ignored_streams: usize,
}

impl MediaInventory {
    pub fn streams_of(&self, kind: StreamKind) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.iter().filter(move |s| s.kind == kind)
    }

    pub fn count(&self, kind: StreamKind) -> usize {
        self.streams_of(kind).count()
    }

    /// Validates raw ffprobe JSON (`-show_streams -show_format -of json`).
    pub fn from_probe_json(path: &Path, raw: &str) -> Result<Self, ProbeError> {
        let parsed: ProbeDocument =
            serde_json::from_str(raw).map_err(|e| ProbeError::Malformed(e.to_string()))?;

        let mut seen = BTreeSet::new();
        let mut streams = Vec::with_capacity(parsed.streams.len());
        let mut ignored_streams = 0usize;

        for entry in parsed.streams {
            let index = entry
                .index
                .ok_or_else(|| ProbeError::Malformed("stream entry without an index".into()))?;
            if !seen.insert(index) {
                return Err(ProbeError::Malformed(format!(
                    "duplicate stream index {}",
                    index
                )));
            }
            let codec_type = entry.codec_type.as_deref().ok_or_else(|| {
                ProbeError::Malformed(format!("stream {} has no codec_type", index))
            })?;
            let kind = match codec_type.to_ascii_lowercase().parse::<StreamKind>() {
                Ok(kind) => kind,
                Err(_) => {
                    trace!("Ignoring {} stream {} in '{}'", codec_type, index, path.display());
                    ignored_streams += 1;
                    continue;
                }
            };

            let codec = entry
                .codec_name
                .map(|c| c.trim().to_ascii_lowercase())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| String::from("unknown"));
            let language = entry
                .tags
                .as_ref()
                .and_then(language_tag)
                .and_then(normalize_language);
            let channels = match kind {
                StreamKind::Audio => entry.channels.filter(|c| *c > 0),
                _ => None,
            };

            streams.push(StreamDescriptor {
                index,
                kind,
                codec,
                language,
                channels,
            });
        }

        // ffprobe orders by index already; keep it that way regardless of input.
        streams.sort_by_key(|s| s.index);

        if streams.is_empty() {
            return Err(ProbeError::NoStreams);
        }

        let format_name = parsed.format.and_then(|f| f.format_name);
        let container = container_of(path, format_name.as_deref());

        Ok(Self {
            path: path.to_path_buf(),
            container,
            format_name,
            streams,
            ignored_streams,
        })
    }
}

/// Probes `path` through the toolkit and validates the result.
pub fn probe(toolkit: &dyn MediaToolkit, path: &Path) -> Result<MediaInventory, ProbeError> {
    let raw = toolkit.probe(path)?;
    let inventory = MediaInventory::from_probe_json(path, &raw)?;
    debug!(
        "Probed '{}': {} stream(s), container {}",
        path.display(),
        inventory.streams.len(),
        inventory.container
    );
    Ok(inventory)
}

/// Lowercases an extension-like name and strips a leading dot.
pub fn normalize_container(raw: &str) -> String {
    raw.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn container_of(path: &Path, format_name: Option<&str>) -> String {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        let ext = normalize_container(ext);
        if !ext.is_empty() {
            return ext;
        }
    }
    format_name
        .and_then(|f| f.split(',').next())
        .map(normalize_container)
        .unwrap_or_default()
}

fn normalize_language(raw: String) -> Option<String> {
    let lang = raw.trim().to_ascii_lowercase();
    match lang.as_str() {
        "" | "und" | "unk" | "unknown" | "zxx" => None,
        _ => Some(lang),
    }
}

#[derive(Debug, Deserialize)]
struct ProbeDocument {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    index: Option<u32>,
    codec_type: Option<String>,
    codec_name: Option<String>,
    channels: Option<u32>,
    tags: Option<BTreeMap<String, serde_json::Value>>,
}

/// Matroska files can carry both `language` and `LANGUAGE`; the lowercase
/// key wins.
fn language_tag(tags: &BTreeMap<String, serde_json::Value>) -> Option<String> {
    tags.get("language")
        .or_else(|| {
            tags.iter()
                .find(|(key, _)| key.eq_ignore_ascii_case("language"))
                .map(|(_, value)| value)
        })
        .and_then(|value| value.as_str())
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    format_name: Option<String>,
}
