use crate::encoders::HwAccel;
use anyhow::{bail, Context, Result};
use log::info;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "MEDIA_FIXER_CONFIG";
const APP_DIR: &str = "media-fixer";
const APP_FILE: &str = "media-fixer.toml";

/// Defaults read from `config.toml`. Every key mirrors a command-line flag;
/// flags given on the command line take precedence.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub output: Option<PathBuf>,
    pub container: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub subtitle_codec: Option<String>,
    pub quality: Option<u32>,
    pub audio_channels: Option<u32>,
    pub strip: Option<bool>,
    pub audio_lang: Option<String>,
    pub subs_lang: Option<String>,
    pub workers: Option<usize>,
    pub no_replace: Option<bool>,
    pub logfile: Option<PathBuf>,
    pub hw_accel: Option<HwAccel>,
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
    /// Re-probe outputs before committing them.
    pub verify: Option<bool>,
}

#[derive(Debug)]
pub struct FileConfig {
    pub path: PathBuf,
    pub config: Config,
}

pub fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    toml::from_str(contents)
        .with_context(|| format!("Invalid configuration file {}", path.display()))
}

/// An explicit path must exist; discovered locations are optional.
pub fn load_config(path_override: Option<&Path>) -> Result<Option<FileConfig>> {
    let mut candidates = Vec::new();

    if let Some(path) = path_override {
        if !path.exists() {
            bail!("Configuration file {} does not exist", path.display());
        }
        candidates.push(path.to_path_buf());
    } else {
        if let Some(env_path) = env::var_os(CONFIG_ENV).filter(|value| !value.is_empty()) {
            candidates.push(PathBuf::from(env_path));
        }
        candidates.extend(default_config_candidates());
    }

    for candidate in candidates {
        if candidate.as_os_str().is_empty() || !candidate.exists() {
            continue;
        }

        let contents = fs::read_to_string(&candidate).with_context(|| {
            format!(
                "Failed to read configuration file at {}",
                candidate.display()
            )
        })?;

        let config = parse_config(&contents, &candidate)?;
        info!("Using configuration from {}", candidate.display());

        return Ok(Some(FileConfig {
            path: candidate,
            config,
        }));
    }

    Ok(None)
}

fn default_config_candidates() -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();

    let mut push_unique = |path: PathBuf, out: &mut Vec<PathBuf>| {
        if !path.as_os_str().is_empty() && seen.insert(path.clone()) {
            out.push(path);
        }
    };

    if let Some(xdg_config) = env::var_os("XDG_CONFIG_HOME").filter(|val| !val.is_empty()) {
        let mut path = PathBuf::from(xdg_config);
        path.push(APP_DIR);
        path.push("config.toml");
        push_unique(path, &mut out);
    }

    if let Some(home) = detect_home_dir() {
        let mut path = home.join(".config");
        path.push(APP_DIR);
        path.push("config.toml");
        push_unique(path, &mut out);
    }

    if let Ok(current_dir) = env::current_dir() {
        push_unique(current_dir.join(APP_FILE), &mut out);
    }

    push_unique(
        Path::new("/etc").join(APP_DIR).join("config.toml"),
        &mut out,
    );

    out
}

fn detect_home_dir() -> Option<PathBuf> {
    if let Some(home) = env::var_os("HOME").filter(|val| !val.is_empty()) {
        return Some(PathBuf::from(home));
    }

    #[cfg(unix)]
    {
        use std::ffi::CStr;

        // SAFETY: getpwuid returns either null or a pointer to static storage
        // that stays valid until the next getpw* call on this thread.
        unsafe {
            let pwd = libc::getpwuid(libc::getuid());
            if pwd.is_null() || (*pwd).pw_dir.is_null() {
                return None;
            }
            if let Ok(path_str) = CStr::from_ptr((*pwd).pw_dir).to_str() {
                if !path_str.is_empty() {
                    return Some(PathBuf::from(path_str));
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_known_keys() {
        let cfg = parse_config(
            r#"
            container = "mp4"
            video_codec = "libx265"
            quality = 23
            strip = true
            audio_lang = "eng"
            workers = 2
            hw_accel = "vaapi"
            output = "/srv/out"
            "#,
            Path::new("config.toml"),
        )
        .unwrap();
        assert_eq!(cfg.container.as_deref(), Some("mp4"));
        assert_eq!(cfg.quality, Some(23));
        assert_eq!(cfg.strip, Some(true));
        assert_eq!(cfg.workers, Some(2));
        assert_eq!(cfg.hw_accel, Some(HwAccel::Vaapi));
        assert_eq!(cfg.output, Some(PathBuf::from("/srv/out")));
        assert_eq!(cfg.subs_lang, None);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_types() {
        let path = Path::new("config.toml");
        assert!(parse_config("qualty = 23", path).is_err());
        assert!(parse_config("workers = \"four\"", path).is_err());
        assert!(parse_config("hw_accel = \"cuda\"", path).is_err());
    }

    #[test]
    fn explicit_path_is_loaded_or_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mf.toml");
        assert!(load_config(Some(&path)).is_err());

        fs::write(&path, "workers = 3\n").unwrap();
        let loaded = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(loaded.path, path);
        assert_eq!(loaded.config.workers, Some(3));
    }
}
