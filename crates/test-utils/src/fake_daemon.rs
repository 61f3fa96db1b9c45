//! A scripted command daemon for remote channel tests.
//!
//! Serves `GET /info` with a fixed identity and answers `POST /execute` with
//! a scripted body streamed one line at a time.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// What the fake daemon says and streams.
#[derive(Debug, Clone)]
pub struct DaemonScript {
    /// `(version, owner)` reported on `/info`; `None` answers 404.
    pub identity: Option<(String, String)>,
    /// Body lines of the `/execute` response, newline appended to each.
    pub lines: Vec<String>,
    pub line_delay: Duration,
    /// Keep the execute response open after the last line.
    pub hold_open: bool,
}

impl DaemonScript {
    pub fn new(version: &str, owner: &str) -> Self {
        Self {
            identity: Some((version.to_string(), owner.to_string())),
            lines: Vec::new(),
            line_delay: Duration::ZERO,
            hold_open: false,
        }
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = delay;
        self
    }

    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    fn body(&self) -> BoxStream<'static, Result<String, Infallible>> {
        let delay = self.line_delay;
        let lines = stream::iter(self.lines.clone()).then(move |line| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, Infallible>(format!("{line}\n"))
        });
        if self.hold_open {
            lines.chain(stream::pending()).boxed()
        } else {
            lines.boxed()
        }
    }
}

struct DaemonState {
    script: DaemonScript,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl DaemonState {
    fn record(&self, method: Method, path: &str, body: String) {
        self.requests.lock().unwrap().push(RecordedRequest {
            method: method.to_string(),
            path: path.to_string(),
            body,
        });
    }
}

pub struct FakeDaemon {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl FakeDaemon {
    /// Serve `script` on an ephemeral localhost port.
    pub async fn start(script: DaemonScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake daemon");
        Self::serve(listener, script)
    }

    /// Serve `script` on an already-bound listener.
    pub fn serve(listener: TcpListener, script: DaemonScript) -> Self {
        let addr = listener.local_addr().expect("listener address");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = Arc::new(DaemonState {
            script,
            requests: requests.clone(),
        });

        let app = Router::new()
            .route("/info", get(info_handler))
            .route("/execute", post(execute_handler))
            .with_state(state);

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            addr,
            requests,
            handle,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn info_handler(State(daemon): State<Arc<DaemonState>>) -> Response {
    daemon.record(Method::GET, "/info", String::new());
    match &daemon.script.identity {
        Some((version, owner)) => {
            Json(json!({ "version": version, "owner": owner })).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn execute_handler(State(daemon): State<Arc<DaemonState>>, body: String) -> Response {
    daemon.record(Method::POST, "/execute", body);
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(daemon.script.body()),
    )
        .into_response()
}
