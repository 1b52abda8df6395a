//! Test helper utilities: a scripted mock of the generation service and a
//! recording generator for orchestrator tests.
#![allow(dead_code)]

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use flux_batch::models::job::JobSpec;
use flux_batch::services::generator::{GenerationError, ImageGenerator};
use flux_batch::services::poller::PollError;

pub const SUBMIT_PATH: &str = "/flux-kontext-pro";

/// Placeholder replaced with the mock's base URL in reply bodies.
const BASE: &str = "{base}";

/// One scripted HTTP reply.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Value::Null,
        }
    }

    /// Submission accepted, pointing at this mock's poll route.
    pub fn accepted() -> Self {
        Self::json(
            200,
            json!({ "id": "job-1", "polling_url": format!("{BASE}/results/job-1") }),
        )
    }

    pub fn poll_status(status: &str) -> Self {
        Self::json(200, json!({ "id": "job-1", "status": status }))
    }

    /// Ready, with the sample served by this mock.
    pub fn ready() -> Self {
        Self::json(
            200,
            json!({
                "id": "job-1",
                "status": "Ready",
                "result": { "sample": format!("{BASE}/images/sample.jpg") }
            }),
        )
    }
}

#[derive(Default)]
struct MockState {
    base_url: Mutex<String>,
    submit_script: Mutex<VecDeque<Reply>>,
    poll_script: Mutex<VecDeque<Reply>>,
    image: Mutex<Option<Vec<u8>>>,
    submitted: Mutex<Vec<Value>>,
    api_keys: Mutex<Vec<String>>,
    submits: AtomicUsize,
    polls: AtomicUsize,
    downloads: AtomicUsize,
}

impl MockState {
    /// Next reply; the last one repeats forever.
    fn next(script: &Mutex<VecDeque<Reply>>) -> Option<Reply> {
        let mut script = script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }

    fn render(&self, reply: Option<Reply>) -> Response {
        let Some(reply) = reply else {
            return StatusCode::NOT_FOUND.into_response();
        };
        let status = StatusCode::from_u16(reply.status).unwrap();
        if reply.body.is_null() {
            return status.into_response();
        }
        let body = reply
            .body
            .to_string()
            .replace(BASE, &self.base_url.lock().unwrap());
        (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}

/// Mock generation service on an ephemeral local port.
pub struct MockFlux {
    pub base_url: String,
    state: Arc<MockState>,
    server: JoinHandle<()>,
}

impl MockFlux {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        *state.image.lock().unwrap() = Some(crate::fixtures::SAMPLE_IMAGE.to_vec());

        let app = Router::new()
            .route(SUBMIT_PATH, post(submit))
            .route("/results/{id}", get(poll))
            .route("/images/sample.jpg", get(image))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        *state.base_url.lock().unwrap() = base_url.clone();

        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            state,
            server,
        }
    }

    pub fn submit_url(&self) -> String {
        format!("{}{}", self.base_url, SUBMIT_PATH)
    }

    pub fn script_submit(&self, replies: impl IntoIterator<Item = Reply>) {
        *self.state.submit_script.lock().unwrap() = replies.into_iter().collect();
    }

    pub fn script_poll(&self, replies: impl IntoIterator<Item = Reply>) {
        *self.state.poll_script.lock().unwrap() = replies.into_iter().collect();
    }

    /// Bytes served at the sample URL; `None` answers 404.
    pub fn serve_image(&self, bytes: Option<Vec<u8>>) {
        *self.state.image.lock().unwrap() = bytes;
    }

    pub fn submits(&self) -> usize {
        self.state.submits.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.state.polls.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.state.downloads.load(Ordering::SeqCst)
    }

    /// JSON bodies received by the submit route, in order.
    pub fn submitted(&self) -> Vec<Value> {
        self.state.submitted.lock().unwrap().clone()
    }

    /// `x-key` header values seen on every route.
    pub fn api_keys(&self) -> Vec<String> {
        self.state.api_keys.lock().unwrap().clone()
    }
}

impl Drop for MockFlux {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn record_key(state: &MockState, headers: &HeaderMap) {
    if let Some(key) = headers.get("x-key").and_then(|v| v.to_str().ok()) {
        state.api_keys.lock().unwrap().push(key.to_string());
    }
}

async fn submit(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.submits.fetch_add(1, Ordering::SeqCst);
    record_key(&state, &headers);
    state.submitted.lock().unwrap().push(body);
    let reply = MockState::next(&state.submit_script);
    state.render(reply)
}

async fn poll(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.polls.fetch_add(1, Ordering::SeqCst);
    record_key(&state, &headers);
    let reply = MockState::next(&state.poll_script);
    state.render(reply)
}

async fn image(State(state): State<Arc<MockState>>) -> Response {
    state.downloads.fetch_add(1, Ordering::SeqCst);
    match state.image.lock().unwrap().clone() {
        Some(bytes) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// URL on a port nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Generator that records every spec and fails the seeds `fails` selects.
pub struct RecordingGenerator {
    specs: Mutex<Vec<JobSpec>>,
    fails: fn(u64) -> bool,
}

impl RecordingGenerator {
    pub fn succeeding() -> Self {
        Self::failing_when(|_| false)
    }

    pub fn failing_when(fails: fn(u64) -> bool) -> Self {
        Self {
            specs: Mutex::new(Vec::new()),
            fails,
        }
    }

    pub fn specs(&self) -> Vec<JobSpec> {
        self.specs.lock().unwrap().clone()
    }

    pub fn seeds(&self) -> Vec<u64> {
        self.specs().iter().map(|s| s.seed).collect()
    }
}

impl ImageGenerator for RecordingGenerator {
    fn generate(&self, spec: JobSpec) -> impl Future<Output = Result<Vec<u8>, GenerationError>> {
        let seed = spec.seed;
        self.specs.lock().unwrap().push(spec);

        let result = if (self.fails)(seed) {
            Err(GenerationError::Poll(PollError::RemoteFailure {
                reason: format!("seed {seed} rejected"),
            }))
        } else {
            Ok(seed.to_be_bytes().to_vec())
        };
        std::future::ready(result)
    }
}
