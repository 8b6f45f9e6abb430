use crate::encoders::HwAccel;
use crate::inventory::{normalize_container, StreamKind};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CodecChoice {
    Copy,
    Target(String),
}

impl CodecChoice {
    pub fn target(&self) -> Option<&str> {
        match self {
            CodecChoice::Copy => None,
            CodecChoice::Target(name) => Some(name),
        }
    }
}

impl FromStr for CodecChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("codec cannot be empty".to_string());
        }
        if trimmed.eq_ignore_ascii_case("copy") {
            Ok(CodecChoice::Copy)
        } else {
            Ok(CodecChoice::Target(trimmed.to_ascii_lowercase()))
        }
    }
}

impl fmt::Display for CodecChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecChoice::Copy => f.write_str("copy"),
            CodecChoice::Target(name) => f.write_str(name),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReplaceMode {
    /// The committed output takes the source's place; the source is removed.
    Replace,
    /// The source is never touched; output is written next to it.
    KeepBoth,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LanguageFilter {
    pub strip: bool,
    pub audio: String,
    pub subtitle: String,
}

impl Default for LanguageFilter {
    fn default() -> Self {
        Self {
            strip: false,
            audio: "eng".into(),
            subtitle: "eng".into(),
        }
    }
}

impl LanguageFilter {
    /// Whether strip mode removes a stream. Unknown languages are always kept.
    pub fn rejects(&self, kind: StreamKind, language: Option<&str>) -> bool {
        if !self.strip {
            return false;
        }
        let Some(language) = language else {
            return false;
        };
        let wanted = match kind {
            StreamKind::Audio => &self.audio,
            StreamKind::Subtitle => &self.subtitle,
            StreamKind::Video => return false,
        };
        !languages_match(language, wanted)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    pub container: Option<String>,
    pub video_codec: CodecChoice,
    pub audio_codec: CodecChoice,
    pub subtitle_codec: CodecChoice,
    pub quality: Option<u32>,
    pub audio_channels: Option<u32>,
    pub languages: LanguageFilter,
    pub hw_accel: HwAccel,
    pub replace: ReplaceMode,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            container: None,
            video_codec: CodecChoice::Copy,
            audio_codec: CodecChoice::Copy,
            subtitle_codec: CodecChoice::Copy,
            quality: None,
            audio_channels: None,
            languages: LanguageFilter::default(),
            hw_accel: HwAccel::Auto,
            replace: ReplaceMode::Replace,
        }
    }
}

impl Policy {
    pub fn target_container(&self, source_container: &str) -> String {
        self.container
            .as_deref()
            .map(normalize_container)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| normalize_container(source_container))
    }
}

/// ISO 639-1 codes with their 639-2 (bibliographic and terminology) forms.
const LANGUAGE_ALIASES: &[(&str, &[&str])] = &[
    ("en", &["eng"]),
    ("fr", &["fra", "fre"]),
    ("de", &["deu", "ger"]),
    ("es", &["spa"]),
    ("it", &["ita"]),
    ("pt", &["por"]),
    ("nl", &["nld", "dut"]),
    ("sv", &["swe"]),
    ("no", &["nor", "nob", "nno"]),
    ("da", &["dan"]),
    ("fi", &["fin"]),
    ("pl", &["pol"]),
    ("cs", &["ces", "cze"]),
    ("ru", &["rus"]),
    ("uk", &["ukr"]),
    ("el", &["ell", "gre"]),
    ("tr", &["tur"]),
    ("ar", &["ara"]),
    ("he", &["heb"]),
    ("hi", &["hin"]),
    ("ja", &["jpn"]),
    ("ko", &["kor"]),
    ("zh", &["zho", "chi"]),
    ("hu", &["hun"]),
    ("ro", &["ron", "rum"]),
];

fn canonical_language(code: &str) -> String {
    let lower = code.trim().to_ascii_lowercase();
    for (short, long) in LANGUAGE_ALIASES {
        if *short == lower || long.contains(&lower.as_str()) {
            return (*short).to_string();
        }
    }
    lower
}

pub fn languages_match(a: &str, b: &str) -> bool {
    canonical_language(a) == canonical_language(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_choice_parses_copy_case_insensitively() {
        assert_eq!("COPY".parse::<CodecChoice>().unwrap(), CodecChoice::Copy);
        assert_eq!(
            "LibX265".parse::<CodecChoice>().unwrap(),
            CodecChoice::Target("libx265".into())
        );
        assert!("  ".parse::<CodecChoice>().is_err());
    }

    #[test]
    fn language_aliases_match() {
        assert!(languages_match("en", "eng"));
        assert!(languages_match("ENG", "en"));
        assert!(languages_match("fre", "fra"));
        assert!(!languages_match("jpn", "eng"));
        assert!(languages_match("tlh", "TLH"));
    }

    #[test]
    fn filter_keeps_unknown_and_non_strip() {
        let mut filter = LanguageFilter::default();
        assert!(!filter.rejects(StreamKind::Audio, Some("jpn")));
        filter.strip = true;
        assert!(filter.rejects(StreamKind::Audio, Some("jpn")));
        assert!(!filter.rejects(StreamKind::Audio, None));
        assert!(!filter.rejects(StreamKind::Audio, Some("en")));
        assert!(!filter.rejects(StreamKind::Video, Some("jpn")));
        filter.subtitle = "fr".into();
        assert!(filter.rejects(StreamKind::Subtitle, Some("eng")));
        assert!(!filter.rejects(StreamKind::Subtitle, Some("fre")));
    }

    #[test]
    fn container_target_defaults_to_source() {
        let mut policy = Policy::default();
        assert_eq!(policy.target_container("MKV"), "mkv");
        policy.container = Some(".MP4".into());
        assert_eq!(policy.target_container("mkv"), "mp4");
    }
}
