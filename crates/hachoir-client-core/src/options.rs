use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const OPT_HPATH: &str = "hpath";
pub const OPT_STREAM: &str = "stream";
pub const OPT_RAW: &str = "raw";
pub const OPT_HEX: &str = "hex";
pub const OPT_REL: &str = "rel";
pub const CMD_ADD_STREAM: &str = "addStream";
pub const CMD_DEL_STREAM: &str = "delStream";

pub const DEFAULT_HPATH: &str = "/";
pub const DEFAULT_STREAM: &str = "0";

/// Separator between per-stream paths inside `hpath`.
pub const HPATH_SEPARATOR: char = ':';

/// Display toggles rendered as `check_<name>` checkboxes.
pub const DISPLAY_TOGGLES: [&str; 3] = [OPT_RAW, OPT_HEX, OPT_REL];

/// Keys that are sent once and never persisted.
pub const COMMAND_KEYS: [&str; 2] = [CMD_ADD_STREAM, CMD_DEL_STREAM];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    #[error("stream index `{0}` is not a non-negative integer")]
    InvalidStreamIndex(String),
    #[error("unknown display toggle `{0}`")]
    UnknownToggle(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadEncoding {
    /// `key=value` pairs exactly as stored. Values containing `&` or `=`
    /// are not representable.
    #[default]
    Legacy,
    /// `application/x-www-form-urlencoded` escaping of keys and values.
    Form,
}

impl PayloadEncoding {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Form => "form",
        }
    }
}

/// The page-lifetime option map sent with every viewer request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerOptions {
    entries: BTreeMap<String, String>,
}

impl ViewerOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options a fresh page starts from: root path of the first stream.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut options = Self::new();
        options.set(OPT_HPATH, DEFAULT_HPATH);
        options.set(OPT_STREAM, DEFAULT_STREAM);
        options
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn set_flag(&mut self, name: impl Into<String>, enabled: bool) {
        self.set(name, if enabled { "1" } else { "0" });
    }

    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.get(name) == Some("1")
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Entries worth persisting; one-shot commands are skipped.
    pub fn persistent(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter()
            .filter(|(name, _)| !COMMAND_KEYS.contains(name))
    }

    #[must_use]
    pub fn to_payload(&self, encoding: PayloadEncoding) -> String {
        match encoding {
            PayloadEncoding::Legacy => self
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("&"),
            PayloadEncoding::Form => url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.iter())
                .finish(),
        }
    }

    /// Snapshot the payload with a one-shot command riding along. The command
    /// is present in the map only while the snapshot is taken.
    #[must_use]
    pub fn to_payload_with_command(
        &mut self,
        command: &str,
        argument: &str,
        encoding: PayloadEncoding,
    ) -> String {
        self.set(command, argument);
        let payload = self.to_payload(encoding);
        self.remove(command);
        payload
    }

    /// Index of the stream currently shown.
    pub fn stream_index(&self) -> Result<usize, OptionsError> {
        let raw = self.get(OPT_STREAM).unwrap_or(DEFAULT_STREAM);
        raw.trim()
            .parse::<usize>()
            .map_err(|_| OptionsError::InvalidStreamIndex(raw.to_string()))
    }

    pub fn stream_paths(&self) -> Vec<String> {
        self.get(OPT_HPATH)
            .unwrap_or(DEFAULT_HPATH)
            .split(HPATH_SEPARATOR)
            .map(ToString::to_string)
            .collect()
    }

    /// Path of the currently selected stream, empty when the index is past
    /// the end of `hpath`.
    pub fn current_path(&self) -> Result<String, OptionsError> {
        let index = self.stream_index()?;
        Ok(self
            .stream_paths()
            .into_iter()
            .nth(index)
            .unwrap_or_default())
    }

    /// Replace the path of the selected stream inside `hpath`. Missing
    /// intermediate streams become empty segments.
    pub fn set_current_path(&mut self, path: &str) -> Result<(), OptionsError> {
        let index = self.stream_index()?;
        let mut paths = self.stream_paths();
        if paths.len() <= index {
            paths.resize(index + 1, String::new());
        }
        paths[index] = path.to_string();
        self.set(OPT_HPATH, paths.join(&HPATH_SEPARATOR.to_string()));
        Ok(())
    }

    /// `hpath` with `field` appended to the selected stream's path, the form
    /// the download links use.
    pub fn hpath_with_field(&self, field: &str) -> Result<String, OptionsError> {
        let index = self.stream_index()?;
        let mut paths = self.stream_paths();
        if paths.len() <= index {
            paths.resize(index + 1, String::new());
        }
        paths[index].push_str(field);
        Ok(paths.join(&HPATH_SEPARATOR.to_string()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ViewerOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = Self::new();
        for (name, value) in iter {
            options.set(name, value);
        }
        options
    }
}

#[must_use]
pub fn toggle_checkbox_id(name: &str) -> String {
    format!("check_{name}")
}

pub fn ensure_display_toggle(name: &str) -> Result<&'static str, OptionsError> {
    DISPLAY_TOGGLES
        .into_iter()
        .find(|toggle| *toggle == name)
        .ok_or_else(|| OptionsError::UnknownToggle(name.to_string()))
}

/// Strip one surrounding pair of double quotes, the way quoted cookie values
/// come back from some servers. `""` is left alone.
#[must_use]
pub fn strip_quotes(value: &str) -> &str {
    if value.len() > 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Decode a legacy `key=value&key=value` body the way the backend splits it.
/// Pairs without `=` map to an empty value; later duplicates win.
pub fn parse_form_body(body: &str) -> ViewerOptions {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => (name.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}
