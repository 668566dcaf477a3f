use std::path::PathBuf;

pub const DEFAULT_VIEWER_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_ENDPOINT_PATH: &str = "/cgi-bin/hachoir.py";
pub const ENV_VIEWER_BASE_URL: &str = "HACHOIR_BASE_URL";
pub const ENV_STATE_FILE: &str = "HACHOIR_STATE_FILE";
pub const BASE_URL_SOURCE_FLAG: &str = "flag";
pub const BASE_URL_SOURCE_DEFAULT: &str = "default_local";
const STATE_DIR_NAME: &str = "hachoir-view";
const STATE_FILE_NAME: &str = "cookies.json";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("base url must not be empty")]
    EmptyBaseUrl,
    #[error("base url must use http:// or https:// and include a host")]
    InvalidBaseUrl,
    #[error("no state file given and no config directory available")]
    NoStateDir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBaseUrl {
    pub base_url: String,
    pub source: &'static str,
}

/// Flag, then `HACHOIR_BASE_URL`, then the local default.
pub fn resolve_base_url(flag: Option<&str>) -> Result<ResolvedBaseUrl, ConfigError> {
    if let Some(raw) = flag.map(str::trim).filter(|value| !value.is_empty()) {
        return Ok(ResolvedBaseUrl {
            base_url: normalize_base_url(raw)?,
            source: BASE_URL_SOURCE_FLAG,
        });
    }
    if let Some(raw) = env_non_empty(ENV_VIEWER_BASE_URL) {
        return Ok(ResolvedBaseUrl {
            base_url: normalize_base_url(&raw)?,
            source: ENV_VIEWER_BASE_URL,
        });
    }
    Ok(ResolvedBaseUrl {
        base_url: normalize_base_url(DEFAULT_VIEWER_BASE_URL)?,
        source: BASE_URL_SOURCE_DEFAULT,
    })
}

pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyBaseUrl);
    }
    let parsed = url::Url::parse(trimmed).map_err(|_| ConfigError::InvalidBaseUrl)?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ConfigError::InvalidBaseUrl);
    }
    Ok(trimmed.to_string())
}

/// Flag, then `HACHOIR_STATE_FILE`, then `<config dir>/hachoir-view/cookies.json`.
pub fn resolve_state_file(flag: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = flag {
        return Ok(path);
    }
    if let Some(path) = env_non_empty(ENV_STATE_FILE) {
        return Ok(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join(STATE_DIR_NAME).join(STATE_FILE_NAME))
        .ok_or(ConfigError::NoStateDir)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
