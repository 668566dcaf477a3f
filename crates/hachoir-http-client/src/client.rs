use std::path::Path;
use std::time::Duration;

use hachoir_client_core::config::{ConfigError, DEFAULT_ENDPOINT_PATH, normalize_base_url};
use hachoir_client_core::options::{OPT_HPATH, OPT_STREAM, OptionsError, PayloadEncoding};
use hachoir_client_core::store::OptionStore;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, COOKIE, HeaderMap, SET_COOKIE};
use thiserror::Error;

pub const DEFAULT_REQUEST_ATTEMPTS: usize = 1;
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
/// Uploads past this size are truncated by the viewer.
pub const UPLOAD_LIMIT_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ViewerClientError {
    #[error("viewer_client_base_url_invalid:{0}")]
    BaseUrl(#[from] ConfigError),
    #[error("viewer_client_invalid_path")]
    InvalidPath,
    #[error("viewer_request_failed:{message}")]
    Request { message: String },
    #[error("viewer_read_failed:{message}")]
    Read { message: String },
    #[error("viewer_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("viewer_store_failed:{message}")]
    Store { message: String },
    #[error("viewer_options_invalid:{0}")]
    Options(#[from] OptionsError),
    #[error("viewer_checkbox_missing:{0}")]
    MissingCheckbox(String),
    #[error("viewer_file_read_failed:{path}:{message}")]
    File { path: String, message: String },
}

/// Mirrors the two ready states a page observes while a body streams in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Loading,
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Every arrival of new response bytes is delivered, then completion.
    #[default]
    Progressive,
    /// Only the completed HTTP 200 response is delivered.
    ///
    /// Deprecated: large responses show no progress under this policy. It
    /// is kept for pages written against the older update timing.
    CompleteOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct ResponseUpdate<'a> {
    /// Everything received so far, decoded as UTF-8 with replacement.
    pub text: &'a str,
    pub ready_state: ReadyState,
    pub status: StatusCode,
}

impl ResponseUpdate<'_> {
    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        self.ready_state == ReadyState::Done && self.status == StatusCode::OK
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedResponse {
    pub status: StatusCode,
    pub text: String,
    pub updates: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadKind {
    /// The field's bytes as stored in the stream.
    Raw,
    /// The decoded sub-stream the field carries.
    Substream,
}

impl DownloadKind {
    #[must_use]
    pub fn query_flag(self) -> &'static str {
        match self {
            Self::Raw => "save",
            Self::Substream => "savesub",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ViewerClientConfig {
    pub base_url: String,
    pub endpoint_path: String,
    /// No timeout when `None`.
    pub timeout_ms: Option<u64>,
    pub request_attempts: usize,
    pub update_policy: UpdatePolicy,
    pub payload_encoding: PayloadEncoding,
}

impl ViewerClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            endpoint_path: DEFAULT_ENDPOINT_PATH.to_string(),
            timeout_ms: None,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
            update_policy: UpdatePolicy::default(),
            payload_encoding: PayloadEncoding::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ViewerClient {
    base_url: String,
    endpoint_path: String,
    timeout: Option<Duration>,
    request_attempts: usize,
    update_policy: UpdatePolicy,
    payload_encoding: PayloadEncoding,
    http: reqwest::Client,
}

impl ViewerClient {
    pub fn new(config: ViewerClientConfig) -> Result<Self, ViewerClientError> {
        let base_url = normalize_base_url(&config.base_url)?;
        let endpoint_path = config.endpoint_path.trim();
        if endpoint_path.is_empty() {
            return Err(ViewerClientError::InvalidPath);
        }
        Ok(Self {
            base_url,
            endpoint_path: endpoint_path.to_string(),
            timeout: config.timeout_ms.map(Duration::from_millis),
            request_attempts: config.request_attempts.max(1),
            update_policy: config.update_policy,
            payload_encoding: config.payload_encoding,
            http: reqwest::Client::new(),
        })
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    /// Path of the viewer script every update is posted to.
    pub fn backend_path(&self) -> &str {
        &self.endpoint_path
    }

    pub fn payload_encoding(&self) -> PayloadEncoding {
        self.payload_encoding
    }

    pub fn update_policy(&self) -> UpdatePolicy {
        self.update_policy
    }

    /// POST a form body and stream the response into `on_update`.
    ///
    /// Cookies from `store` go out with the request and `Set-Cookie` lines
    /// are written back into it before any update is delivered. There is no
    /// recovery: a transport failure returns an error and `on_update` never
    /// sees a `Done` state.
    pub async fn send_request<S, F>(
        &self,
        endpoint_path: &str,
        body: String,
        store: &S,
        mut on_update: F,
    ) -> Result<CompletedResponse, ViewerClientError>
    where
        S: OptionStore + ?Sized,
        F: FnMut(&ResponseUpdate<'_>),
    {
        let url = self
            .endpoint(endpoint_path)
            .ok_or(ViewerClientError::InvalidPath)?;
        let cookie_header = store.cookie_header().map_err(store_error)?;
        tracing::debug!(url = %url, bytes = body.len(), "posting viewer request");

        let mut last_error: Option<String> = None;
        let mut response = None;
        for attempt in 0..self.request_attempts {
            let mut request = self
                .http
                .post(url.as_str())
                .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                .body(body.clone());
            if !cookie_header.is_empty() {
                request = request.header(COOKIE, cookie_header.as_str());
            }
            if let Some(timeout) = self.timeout {
                request = request.timeout(timeout);
            }

            match request.send().await {
                Ok(sent) => {
                    response = Some(sent);
                    break;
                }
                Err(error) => {
                    tracing::debug!(attempt, error = %error, "viewer request attempt failed");
                    last_error = Some(error.to_string());
                }
            }
        }
        let Some(mut response) = response else {
            return Err(ViewerClientError::Request {
                message: last_error.unwrap_or_else(|| "unknown".to_string()),
            });
        };

        let status = response.status();
        absorb_set_cookies(response.headers(), store)?;

        let mut text = Utf8Accumulator::default();
        let mut updates = 0;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    text.push(&chunk);
                    if self.update_policy == UpdatePolicy::Progressive && !text.is_empty() {
                        updates += 1;
                        on_update(&ResponseUpdate {
                            text: text.as_str(),
                            ready_state: ReadyState::Loading,
                            status,
                        });
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    return Err(ViewerClientError::Read {
                        message: error.to_string(),
                    });
                }
            }
        }

        let text = text.finish();
        let deliver_final = match self.update_policy {
            UpdatePolicy::Progressive => true,
            UpdatePolicy::CompleteOnly => status == StatusCode::OK,
        };
        if deliver_final {
            updates += 1;
            on_update(&ResponseUpdate {
                text: &text,
                ready_state: ReadyState::Done,
                status,
            });
        }
        tracing::debug!(status = %status, bytes = text.len(), updates, "viewer response complete");

        Ok(CompletedResponse {
            status,
            text,
            updates,
        })
    }

    /// Fetch a field (or the sub-stream it carries) by its path under the
    /// currently selected stream.
    pub async fn download<S>(
        &self,
        hpath: &str,
        stream: usize,
        kind: DownloadKind,
        store: &S,
    ) -> Result<Download, ViewerClientError>
    where
        S: OptionStore + ?Sized,
    {
        let url = self
            .endpoint(&self.endpoint_path)
            .ok_or(ViewerClientError::InvalidPath)?;
        let stream = stream.to_string();
        let mut request = self.http.get(url.as_str()).query(&[
            (OPT_HPATH, hpath),
            (OPT_STREAM, stream.as_str()),
            (kind.query_flag(), "1"),
        ]);
        let cookie_header = store.cookie_header().map_err(store_error)?;
        if !cookie_header.is_empty() {
            request = request.header(COOKIE, cookie_header);
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|error| ViewerClientError::Request {
                message: error.to_string(),
            })?;
        let status = response.status();
        absorb_set_cookies(response.headers(), store)?;
        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(disposition_filename);
        let bytes = response
            .bytes()
            .await
            .map_err(|error| ViewerClientError::Read {
                message: error.to_string(),
            })?;
        if !status.is_success() {
            return Err(format_http_error(status, &bytes));
        }

        Ok(Download {
            filename,
            bytes: bytes.to_vec(),
        })
    }

    /// Upload a file for the viewer to parse. The viewer answers with its
    /// framing page and a fresh session cookie.
    pub async fn upload<S>(&self, path: &Path, store: &S) -> Result<String, ViewerClientError>
    where
        S: OptionStore + ?Sized,
    {
        let file_error = |message: String| ViewerClientError::File {
            path: path.display().to_string(),
            message,
        };
        let data = tokio::fs::read(path)
            .await
            .map_err(|error| file_error(error.to_string()))?;
        if data.is_empty() {
            return Err(file_error("file is empty".to_string()));
        }
        if data.len() > UPLOAD_LIMIT_BYTES {
            tracing::warn!(
                path = %path.display(),
                bytes = data.len(),
                limit = UPLOAD_LIMIT_BYTES,
                "upload exceeds the viewer limit and will be truncated"
            );
        }
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());

        let url = self
            .endpoint(&self.endpoint_path)
            .ok_or(ViewerClientError::InvalidPath)?;
        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(data).file_name(file_name),
        );
        let mut request = self.http.post(url.as_str()).multipart(form);
        let cookie_header = store.cookie_header().map_err(store_error)?;
        if !cookie_header.is_empty() {
            request = request.header(COOKIE, cookie_header);
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|error| ViewerClientError::Request {
                message: error.to_string(),
            })?;
        let status = response.status();
        absorb_set_cookies(response.headers(), store)?;
        let bytes = response
            .bytes()
            .await
            .map_err(|error| ViewerClientError::Read {
                message: error.to_string(),
            })?;
        if !status.is_success() {
            return Err(format_http_error(status, &bytes));
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> ViewerClientError {
    let body = non_empty_string(String::from_utf8_lossy(body).to_string())
        .unwrap_or_else(|| "<empty>".to_string());
    ViewerClientError::Http { status, body }
}

pub(crate) fn store_error(error: impl std::fmt::Display) -> ViewerClientError {
    ViewerClientError::Store {
        message: error.to_string(),
    }
}

fn absorb_set_cookies<S>(headers: &HeaderMap, store: &S) -> Result<(), ViewerClientError>
where
    S: OptionStore + ?Sized,
{
    for value in headers.get_all(SET_COOKIE) {
        match value.to_str() {
            Ok(line) => store.absorb_set_cookie(line).map_err(store_error)?,
            Err(_) => tracing::debug!("skipping non-ASCII Set-Cookie header"),
        }
    }
    Ok(())
}

/// `filename=` parameter of a `Content-Disposition` value, quotes removed.
fn disposition_filename(value: &str) -> Option<String> {
    value
        .split(';')
        .filter_map(|part| part.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("filename"))
        .map(|(_, name)| name.trim().trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Incremental UTF-8 decoding that holds back a sequence split across
/// chunks instead of replacing it.
#[derive(Debug, Default)]
struct Utf8Accumulator {
    text: String,
    pending: Vec<u8>,
}

impl Utf8Accumulator {
    fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        let mut consumed = 0;
        loop {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    consumed = self.pending.len();
                    break;
                }
                Err(error) => {
                    let valid_up_to = consumed + error.valid_up_to();
                    self.text.push_str(&String::from_utf8_lossy(
                        &self.pending[consumed..valid_up_to],
                    ));
                    match error.error_len() {
                        Some(invalid) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            consumed = valid_up_to + invalid;
                        }
                        None => {
                            consumed = valid_up_to;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..consumed);
    }

    fn as_str(&self) -> &str {
        &self.text
    }

    fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn finish(mut self) -> String {
        if !self.pending.is_empty() {
            self.text.push_str(&String::from_utf8_lossy(&self.pending));
        }
        self.text
    }
}
