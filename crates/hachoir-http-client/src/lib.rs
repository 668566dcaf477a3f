//! HTTP side of the hachoir viewer client.
//!
//! [`ViewerClient`] talks to the viewer script: form-encoded POSTs whose HTML
//! answer is streamed back in pieces, plus field downloads and file uploads.
//! [`ViewerSession`] is the page controller built on top of it.

mod client;
mod session;

pub use client::{
    CompletedResponse, DEFAULT_REQUEST_ATTEMPTS, Download, DownloadKind, FORM_CONTENT_TYPE,
    ReadyState, ResponseUpdate, UPLOAD_LIMIT_BYTES, UpdatePolicy, ViewerClient,
    ViewerClientConfig, ViewerClientError, format_http_error,
};
pub use session::{UpdateOutcome, ViewerSession};
