#![allow(clippy::expect_used, clippy::print_stderr)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::routing::post;
use hachoir_client_core::cookie::CookieLookup;
use hachoir_client_core::options::{PayloadEncoding, parse_form_body};
use hachoir_client_core::store::{CookieJarStore, OptionStore};
use hachoir_client_core::view::{MemoryPage, StatusPlacement};
use hachoir_http_client::{
    DownloadKind, UpdatePolicy, ViewerClient, ViewerClientConfig, ViewerClientError, ViewerSession,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

const ENDPOINT: &str = "/cgi-bin/hachoir.py";

#[derive(Debug, Clone)]
struct RecordedRequest {
    method: &'static str,
    body: String,
    cookie: Option<String>,
    content_type: Option<String>,
}

#[derive(Clone, Default)]
struct MockViewerState {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockViewerState {
    fn record(&self, request: RecordedRequest) {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

struct MockViewerHandle {
    base_url: String,
    state: MockViewerState,
    _shutdown: oneshot::Sender<()>,
}

async fn start_mock_viewer() -> Result<MockViewerHandle> {
    let state = MockViewerState::default();
    let router = Router::new()
        .route(ENDPOINT, post(viewer_post).get(viewer_get))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind viewer listener")?;
    let addr = listener.local_addr().context("viewer local_addr")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        if let Err(err) = server.await {
            eprintln!("mock viewer failed: {err}");
        }
    });

    Ok(MockViewerHandle {
        base_url: format!("http://{addr}"),
        state,
        _shutdown: shutdown_tx,
    })
}

fn header_string(headers: &HeaderMap, name: axum::http::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

/// Minimal stand-in for the viewer script: echoes the path it was asked
/// for in three delayed chunks and answers stream commands with cookies.
async fn viewer_post(
    State(state): State<MockViewerState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = String::from_utf8_lossy(&body).into_owned();
    let content_type = header_string(&headers, CONTENT_TYPE);
    state.record(RecordedRequest {
        method: "POST",
        body: body.clone(),
        cookie: header_string(&headers, COOKIE),
        content_type: content_type.clone(),
    });

    if content_type
        .as_deref()
        .is_some_and(|value| value.starts_with("multipart/form-data"))
    {
        return (
            AppendHeaders([
                (SET_COOKIE, "sess=deadbeef"),
                (SET_COOKIE, "hpath=\"/\""),
                (SET_COOKIE, "stream=0"),
            ]),
            "<html><body onload=\"doInit();\"></body></html>",
        )
            .into_response();
    }

    let options = parse_form_body(&body);
    let hpath = options.get("hpath").unwrap_or("/").to_string();
    if hpath == "/boom/" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "<h3 class=\"error\">boom</h3>",
        )
            .into_response();
    }
    if hpath == "/empty/" {
        return (StatusCode::OK, "").into_response();
    }

    let mut paths = hpath.split(':').map(ToString::to_string).collect::<Vec<_>>();
    let mut cookies = Vec::new();
    if options.contains("addStream") {
        paths.push("/".to_string());
        cookies.push(format!("hpath=\"{}\"", paths.join(":")));
        cookies.push(format!("stream={}", paths.len() - 1));
    }
    if let Some(index) = options
        .get("delStream")
        .and_then(|raw| raw.parse::<usize>().ok())
        .filter(|index| *index < paths.len())
    {
        paths.remove(index);
        cookies.push(format!("hpath=\"{}\"", paths.join(":")));
        cookies.push("stream=0".to_string());
    }

    let delay = if hpath == "/slow/" {
        Duration::from_millis(300)
    } else {
        Duration::from_millis(15)
    };
    let chunks = vec![
        format!("<span class=\"path\">{}</span>", paths.join(":")),
        "<table id=\"maintable\">".to_string(),
        "</table>".to_string(),
    ];
    let stream = futures::stream::unfold(chunks.into_iter(), move |mut chunks| async move {
        let chunk = chunks.next()?;
        tokio::time::sleep(delay).await;
        Some((Ok::<_, Infallible>(chunk), chunks))
    });

    (
        AppendHeaders(cookies.into_iter().map(|cookie| (SET_COOKIE, cookie))),
        Body::from_stream(stream),
    )
        .into_response()
}

async fn viewer_get(
    State(state): State<MockViewerState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.record(RecordedRequest {
        method: "GET",
        body: String::new(),
        cookie: header_string(&headers, COOKIE),
        content_type: None,
    });
    let hpath = query.get("hpath").cloned().unwrap_or_default();
    let flag = if query.contains_key("savesub") {
        "savesub"
    } else if query.contains_key("save") {
        "save"
    } else {
        return (StatusCode::BAD_REQUEST, "missing download flag").into_response();
    };
    let name = hpath.rsplit('/').next().unwrap_or_default().to_string();
    (
        [(CONTENT_DISPOSITION, format!("attachment; filename={name}"))],
        format!("{hpath}|{flag}|{}", query.get("stream").cloned().unwrap_or_default()),
    )
        .into_response()
}

fn session_for(
    base_url: &str,
    configure: impl FnOnce(&mut ViewerClientConfig),
) -> Result<ViewerSession<CookieJarStore, MemoryPage>> {
    let mut config = ViewerClientConfig::new(base_url);
    configure(&mut config);
    let client = ViewerClient::new(config)?;
    Ok(ViewerSession::new(
        client,
        CookieJarStore::new(CookieLookup::Exact),
        MemoryPage::with_checkboxes(["check_raw", "check_hex", "check_rel"]),
    ))
}

#[tokio::test]
async fn init_restores_persisted_options_and_renders_progressively() -> Result<()> {
    let viewer = start_mock_viewer().await?;
    let session = session_for(&viewer.base_url, |_| {})?;
    session.store().absorb_set_cookie("hpath=\"/header/\"")?;
    session.store().set("raw", "1", None)?;
    session.store().set("sess", "abc123", None)?;

    let outcome = session.init().await?;

    assert!(outcome.completed());
    assert!(outcome.rendered_updates >= 2, "expected partial updates");
    let requests = viewer.state.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body, "hpath=/header/&raw=1&stream=0");
    assert_eq!(
        requests[0].content_type.as_deref(),
        Some("application/x-www-form-urlencoded")
    );
    let cookie = requests[0].cookie.clone().unwrap_or_default();
    assert!(cookie.contains("sess=abc123"), "cookie header was {cookie}");

    let page = session.view().snapshot();
    assert_eq!(
        page.content,
        "<span class=\"path\">/header/</span><table id=\"maintable\"></table>"
    );
    assert_eq!(page.content_updates, outcome.rendered_updates);
    assert!(!page.status_visible);
    assert_eq!(page.checkboxes.get("check_raw"), Some(&true));
    assert_eq!(page.checkboxes.get("check_hex"), Some(&false));
    Ok(())
}

#[tokio::test]
async fn set_option_reads_checkbox_and_persists_cookie() -> Result<()> {
    let viewer = start_mock_viewer().await?;
    let session = session_for(&viewer.base_url, |_| {})?;
    session.view().click("check_raw", true);

    let outcome = session.set_option("raw").await?;

    assert!(outcome.completed());
    assert_eq!(session.options().get("raw"), Some("1"));
    assert_eq!(session.store().get("raw")?, Some("1".to_string()));
    assert!(session.store().cookie_string().contains("raw=1"));
    assert_eq!(
        viewer.state.requests()[0].body,
        "hpath=/&raw=1&stream=0"
    );
    Ok(())
}

#[tokio::test]
async fn set_option_without_checkbox_is_an_error() -> Result<()> {
    let viewer = start_mock_viewer().await?;
    let session = session_for(&viewer.base_url, |_| {})?;

    let error = session.set_option("bold").await.expect_err("no checkbox");

    assert!(matches!(error, ViewerClientError::MissingCheckbox(id) if id == "check_bold"));
    assert!(viewer.state.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn add_stream_sends_command_once_and_drops_it() -> Result<()> {
    let viewer = start_mock_viewer().await?;
    let session = session_for(&viewer.base_url, |_| {})?;

    let outcome = session.add_stream("/foo").await?;

    assert!(outcome.completed());
    let requests = viewer.state.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        parse_form_body(&requests[0].body).get("addStream"),
        Some("/foo")
    );
    let options = session.options();
    assert!(!options.contains("addStream"));
    assert_eq!(options.get("hpath"), Some("/:/"));
    assert_eq!(options.get("stream"), Some("1"));
    assert_eq!(session.store().get("addStream")?, None);
    Ok(())
}

#[tokio::test]
async fn remove_stream_sends_index_and_restores_server_state() -> Result<()> {
    let viewer = start_mock_viewer().await?;
    let session = session_for(&viewer.base_url, |_| {})?;
    session.store().set("hpath", "/:/sub/", None)?;
    session.store().set("stream", "1", None)?;
    session.restore_options()?;

    session.remove_stream(1).await?;

    let requests = viewer.state.requests();
    assert_eq!(requests[0].body, "delStream=1&hpath=/:/sub/&stream=1");
    let options = session.options();
    assert!(!options.contains("delStream"));
    assert_eq!(options.get("hpath"), Some("/"));
    assert_eq!(options.get("stream"), Some("0"));
    Ok(())
}

#[tokio::test]
async fn navigate_to_updates_selected_stream_and_persists() -> Result<()> {
    let viewer = start_mock_viewer().await?;
    let session = session_for(&viewer.base_url, |_| {})?;
    session.store().set("hpath", "/:/", None)?;
    session.store().set("stream", "1", None)?;
    session.restore_options()?;

    session.navigate_to("/sub/header/").await?;

    assert_eq!(session.options().get("hpath"), Some("/:/sub/header/"));
    assert_eq!(
        session.store().get("hpath")?,
        Some("/:/sub/header/".to_string())
    );
    assert_eq!(
        viewer.state.requests()[0].body,
        "hpath=/:/sub/header/&stream=1"
    );
    Ok(())
}

#[tokio::test]
async fn form_encoding_escapes_payload_values() -> Result<()> {
    let viewer = start_mock_viewer().await?;
    let session = session_for(&viewer.base_url, |config| {
        config.payload_encoding = PayloadEncoding::Form;
    })?;

    session.navigate_to("/a b/").await?;

    assert_eq!(
        viewer.state.requests()[0].body,
        "hpath=%2Fa+b%2F&stream=0"
    );
    Ok(())
}

#[tokio::test]
async fn transport_failure_leaves_busy_indicator_on() -> Result<()> {
    let unused = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = unused.local_addr()?;
    drop(unused);
    let session = session_for(&format!("http://{addr}"), |config| {
        config.timeout_ms = Some(2_000);
    })?;

    let error = session.trigger_update().await.expect_err("nothing listening");

    assert!(matches!(error, ViewerClientError::Request { .. }));
    let page = session.view().snapshot();
    assert!(page.status_visible);
    assert_eq!(page.content_updates, 0);
    Ok(())
}

#[tokio::test]
async fn server_error_renders_body_but_keeps_busy() -> Result<()> {
    let viewer = start_mock_viewer().await?;
    let session = session_for(&viewer.base_url, |_| {})?;

    let outcome = session.navigate_to("/boom/").await?;

    assert_eq!(outcome.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!outcome.completed());
    let page = session.view().snapshot();
    assert_eq!(page.content, "<h3 class=\"error\">boom</h3>");
    assert!(page.status_visible);
    Ok(())
}

#[tokio::test]
async fn empty_ok_response_clears_content_and_busy() -> Result<()> {
    let viewer = start_mock_viewer().await?;
    let session = session_for(&viewer.base_url, |_| {})?;
    session.trigger_update().await?;
    assert!(!session.view().snapshot().content.is_empty());

    let outcome = session.navigate_to("/empty/").await?;

    assert!(outcome.completed());
    assert_eq!(outcome.rendered_updates, 1);
    let page = session.view().snapshot();
    assert_eq!(page.content, "");
    assert!(!page.status_visible);
    Ok(())
}

#[tokio::test]
async fn complete_only_policy_renders_once() -> Result<()> {
    let viewer = start_mock_viewer().await?;
    let session = session_for(&viewer.base_url, |config| {
        config.update_policy = UpdatePolicy::CompleteOnly;
    })?;

    let outcome = session.trigger_update().await?;
    assert_eq!(outcome.rendered_updates, 1);

    let failed = session.navigate_to("/boom/").await?;
    assert_eq!(failed.rendered_updates, 0);
    assert_eq!(
        session.view().snapshot().content,
        "<span class=\"path\">/</span><table id=\"maintable\"></table>"
    );
    Ok(())
}

#[tokio::test]
async fn newer_request_wins_over_slower_older_one() -> Result<()> {
    let viewer = start_mock_viewer().await?;
    let session = session_for(&viewer.base_url, |_| {})?;

    let (slow, fast) = tokio::join!(session.navigate_to("/slow/"), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.navigate_to("/fast/").await
    });
    let (slow, fast) = (slow?, fast?);

    assert!(slow.superseded);
    assert_eq!(slow.rendered_updates, 0);
    assert!(fast.completed());
    assert!(fast.ticket > slow.ticket);

    let page = session.view().snapshot();
    assert!(page.content.contains("/fast/"), "content was {}", page.content);
    assert!(!page.status_visible);
    let options = session.options();
    assert_eq!(options.get("hpath"), Some("/fast/"));
    assert_eq!(options.get("stream"), Some("0"));
    assert_eq!(viewer.state.requests().len(), 2);
    Ok(())
}

#[tokio::test]
async fn follow_scroll_moves_status_indicator() -> Result<()> {
    let viewer = start_mock_viewer().await?;
    let session = session_for(&viewer.base_url, |_| {})?
        .with_status_placement(StatusPlacement::FollowScroll);
    session.view().scroll_to(640);

    session.trigger_update().await?;

    assert_eq!(session.view().snapshot().status_top, Some(640));
    Ok(())
}

#[tokio::test]
async fn download_field_appends_to_current_path() -> Result<()> {
    let viewer = start_mock_viewer().await?;
    let session = session_for(&viewer.base_url, |_| {})?;
    session.store().set("hpath", "/:/header/", None)?;
    session.store().set("stream", "1", None)?;
    session.store().set("sess", "abc123", None)?;
    session.restore_options()?;

    let raw = session.download_field("magic", DownloadKind::Raw).await?;
    let sub = session
        .download_field("magic", DownloadKind::Substream)
        .await?;

    assert_eq!(raw.filename.as_deref(), Some("magic"));
    assert_eq!(raw.bytes, b"/:/header/magic|save|1".to_vec());
    assert_eq!(sub.bytes, b"/:/header/magic|savesub|1".to_vec());
    let requests = viewer.state.requests();
    assert!(requests.iter().all(|request| request.method == "GET"));
    assert!(
        requests
            .iter()
            .all(|request| request.cookie.as_deref().is_some_and(|c| c.contains("sess=abc123")))
    );
    Ok(())
}

#[tokio::test]
async fn upload_starts_a_session_and_resets_navigation() -> Result<()> {
    let viewer = start_mock_viewer().await?;
    let session = session_for(&viewer.base_url, |_| {})?;
    session.store().set("hpath", "/old/", None)?;
    session.restore_options()?;
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("sample.bin");
    std::fs::write(&file, b"\x89PNG\r\n\x1a\n")?;

    let page = session.upload_file(&file).await?;

    assert!(page.contains("doInit"));
    assert_eq!(session.store().get("sess")?, Some("deadbeef".to_string()));
    assert_eq!(session.options().get("hpath"), Some("/"));
    let requests = viewer.state.requests();
    assert!(
        requests[0]
            .content_type
            .as_deref()
            .is_some_and(|value| value.starts_with("multipart/form-data"))
    );
    assert!(requests[0].body.contains("filename=\"sample.bin\""));
    Ok(())
}

#[tokio::test]
async fn upload_of_missing_file_fails_before_sending() -> Result<()> {
    let viewer = start_mock_viewer().await?;
    let session = session_for(&viewer.base_url, |_| {})?;

    let error = session
        .upload_file(std::path::Path::new("/definitely/not/here.bin"))
        .await
        .expect_err("missing file");

    assert!(matches!(error, ViewerClientError::File { .. }));
    assert!(viewer.state.requests().is_empty());
    Ok(())
}
