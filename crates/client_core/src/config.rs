use std::{
    env, fs,
    path::Path,
    time::Duration,
};

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::api::with_trailing_slash;

pub const DEFAULT_BASE_URL: &str = "https://jsonplaceholder.typicode.com";
pub const SETTINGS_FILE: &str = "directory.toml";
pub const BASE_URL_ENV: &str = "DIRECTORY_BASE_URL";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub stale_time_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            request_timeout_secs: 30,
            stale_time_secs: 5 * 60,
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stale_time(&self) -> Duration {
        Duration::from_secs(self.stale_time_secs)
    }

    pub fn base_url(&self) -> anyhow::Result<Url> {
        parse_base_url(&self.base_url)
    }
}

/// `directory.toml` in the working directory, then `DIRECTORY_BASE_URL`.
pub fn load_settings() -> Settings {
    load_settings_from(Path::new(SETTINGS_FILE), env::var(BASE_URL_ENV).ok())
}

pub fn load_settings_from(path: &Path, base_url_override: Option<String>) -> Settings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => match toml::from_str::<Settings>(&raw) {
            Ok(file_cfg) => file_cfg,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring malformed settings file");
                Settings::default()
            }
        },
        Err(_) => Settings::default(),
    };

    if let Some(v) = base_url_override {
        if !v.trim().is_empty() {
            settings.base_url = v;
        }
    }

    settings
}

pub fn parse_base_url(raw: &str) -> anyhow::Result<Url> {
    let raw = raw.trim();
    let raw = if raw.is_empty() { DEFAULT_BASE_URL } else { raw };

    let url = Url::parse(raw).with_context(|| format!("invalid backend base url '{raw}'"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("backend base url '{raw}' must use http or https");
    }
    Ok(with_trailing_slash(url))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
