#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn fixture(name: &str) -> String {
    let path = format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("fixture {}: {}", path, e))
}

/// A request the fixture server received.
#[derive(Debug, Clone)]
pub struct Hit {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub headers: HeaderMap,
    pub body: String,
}

impl Hit {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn param(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

#[derive(Clone)]
struct Canned {
    path: String,
    /// Must appear in the query string or the body for the route to match.
    needle: Option<String>,
    status: StatusCode,
    content_type: &'static str,
    body: String,
    delay: Option<Duration>,
}

#[derive(Default)]
struct Fixtures {
    routes: Vec<Canned>,
    hits: Vec<Hit>,
}

impl Fixtures {
    fn find(&self, path: &str, query: &str, body: &str) -> Option<Canned> {
        self.routes
            .iter()
            .rev()
            .find(|route| {
                route.path == path
                    && route
                        .needle
                        .as_deref()
                        .map_or(true, |needle| query.contains(needle) || body.contains(needle))
            })
            .cloned()
    }
}

/// In-process upstream on `127.0.0.1:0` serving canned bodies and recording every hit.
pub struct FixtureServer {
    addr: SocketAddr,
    state: Arc<Mutex<Fixtures>>,
}

impl FixtureServer {
    pub async fn start() -> Self {
        init_tracing();
        let state = Arc::new(Mutex::new(Fixtures::default()));
        let app = Router::new()
            .fallback(respond)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        FixtureServer { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn add(&self, path: &str, needle: Option<&str>, status: StatusCode, content_type: &'static str, body: String, delay: Option<Duration>) {
        self.state.lock().unwrap().routes.push(Canned {
            path: path.to_string(),
            needle: needle.map(str::to_string),
            status,
            content_type,
            body,
            delay,
        });
    }

    pub fn html(&self, path: &str, body: impl Into<String>) {
        self.add(path, None, StatusCode::OK, "text/html; charset=utf-8", body.into(), None);
    }

    pub fn json(&self, path: &str, body: Value) {
        self.add(path, None, StatusCode::OK, "application/json", body.to_string(), None);
    }

    /// JSON answered only when `needle` appears in the query or the body.
    pub fn json_when(&self, path: &str, needle: &str, body: Value) {
        self.add(path, Some(needle), StatusCode::OK, "application/json", body.to_string(), None);
    }

    pub fn status(&self, path: &str, status: u16) {
        let status = StatusCode::from_u16(status).unwrap();
        self.add(path, None, status, "text/plain", status.to_string(), None);
    }

    pub fn slow_html(&self, path: &str, body: impl Into<String>, delay: Duration) {
        self.add(path, None, StatusCode::OK, "text/html; charset=utf-8", body.into(), Some(delay));
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.state.lock().unwrap().hits.clone()
    }

    pub fn hits_for(&self, path: &str) -> Vec<Hit> {
        self.hits().into_iter().filter(|hit| hit.path == path).collect()
    }

    pub fn hit_count(&self) -> usize {
        self.state.lock().unwrap().hits.len()
    }
}

async fn respond(
    State(state): State<Arc<Mutex<Fixtures>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let query = uri.query().unwrap_or_default().to_string();
    let body = String::from_utf8_lossy(&body).into_owned();

    let canned = {
        let mut fixtures = state.lock().unwrap();
        let canned = fixtures.find(&path, &query, &body);
        fixtures.hits.push(Hit {
            method,
            path,
            query,
            headers,
            body,
        });
        canned
    };

    let Some(canned) = canned else {
        return (StatusCode::NOT_FOUND, "no fixture").into_response();
    };
    if let Some(delay) = canned.delay {
        tokio::time::sleep(delay).await;
    }
    (
        canned.status,
        [(header::CONTENT_TYPE, canned.content_type)],
        canned.body,
    )
        .into_response()
}
