//! HTTP surface: status pages, snapshot trigger, long-poll notifier.
//!
//! Runs on a dedicated single-threaded tokio runtime; the rest of the
//! daemon stays on plain threads and talks to it only through the state
//! atom and the version cell.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use serde::Deserialize;

use crate::model::{Dataset, DatasetName, Model, StepStatus, humanize_bytes};
use crate::{Error, Result};

use super::cancel::CancelToken;
use super::core::Daemon;

const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(300);
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

#[derive(Clone)]
struct AppState {
    daemon: Arc<Daemon>,
    cancel: CancelToken,
}

/// Serve the UI until cancellation. Blocks the calling thread.
pub fn run_server(daemon: Arc<Daemon>, cancel: CancelToken, addr: &str) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(Error::Io)?;

    let addr = addr.to_string();
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("status ui listening at http://{addr}");

        let state = AppState {
            daemon,
            cancel: cancel.clone(),
        };
        let app = Router::new()
            .route("/", get(|| async { Redirect::to("/global") }))
            .route("/global", get(global_page))
            .route("/poll", get(poll))
            .route("/snapshot", post(create_snapshot))
            .fallback(dataset_page)
            .with_state(state);

        axum::serve(listener, app)
            .with_graceful_shutdown(wait_for_cancel(cancel))
            .await?;
        Ok(())
    })
}

async fn wait_for_cancel(cancel: CancelToken) {
    while !cancel.is_cancelled() {
        tokio::time::sleep(SHUTDOWN_POLL).await;
    }
}

async fn global_page(State(state): State<AppState>) -> Html<String> {
    Html(render_page(&state.daemon, None))
}

async fn dataset_page(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    if method != Method::GET {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    // `/root` addresses the root dataset, whose model name is empty;
    // everything else is a dataset path as-is.
    let name = match uri.path() {
        "/root" => DatasetName::root(),
        path => DatasetName::new(path),
    };

    if state.daemon.state().get(&name).is_none() {
        return (StatusCode::NOT_FOUND, format!("no such dataset: {name}\n")).into_response();
    }
    Html(render_page(&state.daemon, Some(&name))).into_response()
}

/// Long-poll: answer `refresh` on the next state change, `204` on
/// timeout or disconnect.
async fn poll(State(state): State<AppState>) -> Response {
    let mut version = state.daemon.subscribe_version();
    match tokio::time::timeout(LONG_POLL_TIMEOUT, version.changed()).await {
        Ok(Ok(())) => (StatusCode::OK, "refresh").into_response(),
        _ => StatusCode::NO_CONTENT.into_response(),
    }
}

#[derive(Deserialize)]
struct SnapshotParams {
    periodicity: Option<String>,
}

async fn create_snapshot(
    State(state): State<AppState>,
    Query(params): Query<SnapshotParams>,
) -> Response {
    let Some(kind) = params.periodicity.filter(|kind| !kind.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            "missing periodicity parameter\n",
        )
            .into_response();
    };

    let daemon = Arc::clone(&state.daemon);
    let result = tokio::task::spawn_blocking(move || daemon.create_snapshot(&kind)).await;
    match result {
        Ok(Ok(name)) => (StatusCode::OK, format!("created snapshot {name}\n")).into_response(),
        Ok(Err(err)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("creating snapshot: {err}\n"),
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("snapshot task failed: {err}\n"),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------

fn render_page(daemon: &Daemon, selected: Option<&DatasetName>) -> String {
    let model = daemon.state();
    let mut body = String::new();

    body.push_str("<h1>backupd</h1>");
    if daemon.dryrun() {
        body.push_str("<p class=\"dryrun\">dry-run mode: no filesystem changes</p>");
    }

    render_dataset_table(&mut body, &model, selected);

    match selected {
        None => {
            body.push_str("<h2>global log</h2>");
            render_logs(&mut body, daemon.global_logs().entries());
        }
        Some(name) => {
            if let Some(ds) = model.get(name) {
                render_dataset_detail(&mut body, ds);
            }
            body.push_str("<h2>dataset log</h2>");
            render_logs(&mut body, daemon.dataset_logs(name).entries());
        }
    }

    page_shell(&body)
}

fn render_dataset_table(out: &mut String, model: &Model, selected: Option<&DatasetName>) {
    out.push_str("<table><tr><th>dataset</th><th>local</th><th>remote</th><th>used (L)</th><th>used (R)</th><th>plan</th><th></th></tr>");
    for name in model.names() {
        let Some(ds) = model.get(&name) else { continue };
        let marker = if Some(&name) == selected { " class=\"selected\"" } else { "" };
        let href = if name.is_root() {
            "/root".to_string()
        } else {
            name.path().to_string()
        };
        let plan_summary = match &ds.plan {
            Some(plan) if plan.is_empty() => "in sync".to_string(),
            Some(plan) => format!("{} steps", plan.len()),
            None => "-".to_string(),
        };
        let syncing = if ds.sync_in_progress { "syncing" } else { "" };
        out.push_str(&format!(
            "<tr{marker}><td><a href=\"{}\">{}</a></td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&href),
            escape(&name.to_string()),
            summarize_side(ds, true),
            summarize_side(ds, false),
            ds.metrics.local_used_string(),
            ds.metrics.remote_used_string(),
            plan_summary,
            syncing,
        ));
    }
    out.push_str("</table>");
}

fn summarize_side(ds: &Dataset, local: bool) -> String {
    let set = if local {
        &ds.current.local
    } else {
        &ds.current.remote
    };
    match set.newest() {
        Some(newest) => format!("{} ({})", set.len(), escape(&newest.name)),
        None => "0".to_string(),
    }
}

fn render_dataset_detail(out: &mut String, ds: &Dataset) {
    out.push_str(&format!("<h2>{}</h2>", escape(&ds.name.to_string())));

    if let Some(plan) = &ds.plan {
        out.push_str("<h3>plan</h3><ol>");
        for step in &plan.steps {
            let class = match step.status {
                StepStatus::Pending => "pending",
                StepStatus::InProgress => "inprogress",
                StepStatus::Completed => "completed",
                StepStatus::Failed => "failed",
            };
            let duration = step
                .duration()
                .map(|d| format!(" ({d})"))
                .unwrap_or_default();
            let error = step
                .error
                .as_deref()
                .map(|text| format!("<br><span class=\"error\">{}</span>", escape(text)))
                .unwrap_or_default();
            out.push_str(&format!(
                "<li class=\"{class}\">{} &middot; {}{duration}{error}</li>",
                escape(&step.op.to_string()),
                step.status,
            ));
        }
        out.push_str("</ol>");
    }

    out.push_str("<h3>snapshots</h3><table><tr><th>local</th><th>size</th><th>remote</th><th>size</th></tr>");
    let mut locals = ds.current.local.iter();
    let mut remotes = ds.current.remote.iter();
    loop {
        let (local, remote) = (locals.next(), remotes.next());
        if local.is_none() && remote.is_none() {
            break;
        }
        let cell = |snap: Option<&crate::model::Snapshot>| match snap {
            Some(snap) => (
                escape(&snap.name),
                snap.logical_referenced
                    .filter(|&bytes| bytes > 0)
                    .map(|bytes| humanize_bytes(bytes as u64))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            None => (String::new(), String::new()),
        };
        let (local_name, local_size) = cell(local);
        let (remote_name, remote_size) = cell(remote);
        out.push_str(&format!(
            "<tr><td>{local_name}</td><td>{local_size}</td><td>{remote_name}</td><td>{remote_size}</td></tr>"
        ));
    }
    out.push_str("</table>");
}

fn render_logs(out: &mut String, entries: Vec<crate::logs::LogEntry>) {
    out.push_str("<pre class=\"logs\">");
    for entry in entries.iter().rev().take(200) {
        out.push_str(&format!(
            "{} {}\n",
            entry
                .at
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
            escape(&entry.line)
        ));
    }
    out.push_str("</pre>");
}

fn page_shell(body: &str) -> String {
    format!(
        "<!doctype html><html><head><title>backupd</title><style>{STYLE}</style></head>\
         <body>{body}<script>{POLL_SCRIPT}</script></body></html>"
    )
}

const STYLE: &str = "body{font-family:monospace;margin:2em}table{border-collapse:collapse}\
td,th{border:1px solid #ccc;padding:0.3em 0.6em;text-align:left}\
.selected{background:#eef}.error{color:#a00}.dryrun{color:#a60}\
.failed{color:#a00}.completed{color:#070}pre.logs{background:#f6f6f6;padding:1em}";

const POLL_SCRIPT: &str = "(function poll(){fetch('/poll').then(function(r){\
if(r.status===200){location.reload();}else{poll();}}).catch(function(){\
setTimeout(poll,5000);});})();";

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
