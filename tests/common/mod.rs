use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// In-process stand-in for the mining worker's HTTP API.
#[derive(Clone, Default)]
pub struct FakeWorker {
    inner: Arc<Mutex<WorkerState>>,
    stats_gate: Arc<Notify>,
    control_gate: Arc<Notify>,
}

pub struct WorkerState {
    pub total_blocks: u64,
    pub mining_rate: f64,
    pub is_mining: bool,
    /// Replaces the generated `/stats` body when set
    pub stats_body: Option<String>,
    pub stats_status: StatusCode,
    pub control_status: StatusCode,
    /// `/stats` waits for `release_stats` before answering
    pub hold_stats: bool,
    /// `/start` and `/stop` wait for `release_control` after recording the command
    pub hold_control: bool,
    pub stats_delay: Option<Duration>,
    pub commands: Vec<String>,
    pub stats_requests: u32,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self {
            total_blocks: 0,
            mining_rate: 0.0,
            is_mining: false,
            stats_body: None,
            stats_status: StatusCode::OK,
            control_status: StatusCode::OK,
            hold_stats: false,
            hold_control: false,
            stats_delay: None,
            commands: Vec::new(),
            stats_requests: 0,
        }
    }
}

#[allow(dead_code)]
impl FakeWorker {
    pub fn update(&self, f: impl FnOnce(&mut WorkerState)) {
        f(&mut self.inner.lock().unwrap());
    }

    pub fn commands(&self) -> Vec<String> {
        self.inner.lock().unwrap().commands.clone()
    }

    pub fn stats_requests(&self) -> u32 {
        self.inner.lock().unwrap().stats_requests
    }

    pub fn release_stats(&self) {
        self.update(|s| s.hold_stats = false);
        self.stats_gate.notify_one();
    }

    pub fn release_control(&self) {
        self.update(|s| s.hold_control = false);
        self.control_gate.notify_one();
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/", get(health))
            .route("/stats", get(stats))
            .route("/start", post(start))
            .route("/stop", post(stop))
            .with_state(self.clone())
    }

    /// Serve on an ephemeral port and return the API base URL.
    pub async fn serve(&self) -> String {
        self.serve_under("").await
    }

    /// Serve with every route nested under `prefix` (e.g. `/api`).
    pub async fn serve_under(&self, prefix: &str) -> String {
        let app = if prefix.is_empty() {
            self.router()
        } else {
            Router::new().nest(prefix, self.router())
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}{}", addr, prefix)
    }
}

/// A base URL nothing is listening on.
#[allow(dead_code)]
pub fn dead_api_base() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

async fn health() -> (StatusCode, String) {
    (StatusCode::OK, json!({ "status": "healthy" }).to_string())
}

async fn stats(State(worker): State<FakeWorker>) -> (StatusCode, String) {
    let (hold, delay) = {
        let mut state = worker.inner.lock().unwrap();
        state.stats_requests += 1;
        (state.hold_stats, state.stats_delay)
    };
    if hold {
        worker.stats_gate.notified().await;
    }
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let state = worker.inner.lock().unwrap();
    let body = state.stats_body.clone().unwrap_or_else(|| {
        json!({
            "total_blocks": state.total_blocks,
            "mining_rate": state.mining_rate,
            "is_mining": state.is_mining,
        })
        .to_string()
    });
    (state.stats_status, body)
}

async fn start(State(worker): State<FakeWorker>) -> (StatusCode, String) {
    control(&worker, "start", true).await
}

async fn stop(State(worker): State<FakeWorker>) -> (StatusCode, String) {
    control(&worker, "stop", false).await
}

async fn control(worker: &FakeWorker, name: &str, mining: bool) -> (StatusCode, String) {
    let hold = {
        let mut state = worker.inner.lock().unwrap();
        state.commands.push(name.to_string());
        state.hold_control
    };
    if hold {
        worker.control_gate.notified().await;
    }

    let mut state = worker.inner.lock().unwrap();
    if !state.control_status.is_success() {
        return (state.control_status, String::new());
    }

    let status = match (mining, state.is_mining) {
        (true, true) => "already_running",
        (true, false) => "started",
        (false, true) => "stopped",
        (false, false) => "not_running",
    };
    state.is_mining = mining;
    state.mining_rate = if mining { 2.5 } else { 0.0 };
    (StatusCode::OK, json!({ "status": status }).to_string())
}
