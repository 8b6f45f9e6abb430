use log::debug;
use std::env;

const ENV_PREFIX: &str = "media_fixer_";

pub fn init(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", default_level);
    }
    let _ = env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .try_init();
}

pub fn collect_relevant_env() -> Vec<(String, String)> {
    let mut entries: Vec<(String, String)> = env::vars()
        .filter(|(key, _)| key.to_ascii_lowercase().starts_with(ENV_PREFIX))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

pub fn log_relevant_env() {
    let entries = collect_relevant_env();
    if entries.is_empty() {
        return;
    }
    debug!("Environment snapshot ({} entries):", entries.len());
    for (key, value) in entries {
        let display_value = if value.chars().count() > 200 {
            format!("{}…", value.chars().take(200).collect::<String>())
        } else {
            value
        };
        debug!("  {} = {}", key, display_value);
    }
}
