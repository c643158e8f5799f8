//! Mock SPARQL endpoint for standalone runs and integration tests.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Router,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Behaviour of the mock endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockEndpointConfig {
    /// Port to listen on (0 for random)
    pub port: u16,
    /// Simulated latency per request in milliseconds
    pub latency_ms: u64,
    /// Bindings returned for every SELECT
    pub row_count: usize,
    /// Error rate (0.0 to 1.0)
    pub error_rate: f64,
}

impl Default for MockEndpointConfig {
    fn default() -> Self {
        Self {
            port: 0,
            latency_ms: 5,
            row_count: 10,
            error_rate: 0.0,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    queries: AtomicU64,
    updates: AtomicU64,
}

struct EndpointState {
    config: MockEndpointConfig,
    counters: Arc<Counters>,
}

/// Mock SPARQL server
pub struct MockSparqlServer {
    config: MockEndpointConfig,
    counters: Arc<Counters>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    port: u16,
}

impl MockSparqlServer {
    pub fn new(config: MockEndpointConfig) -> Self {
        Self {
            config,
            counters: Arc::new(Counters::default()),
            shutdown_tx: None,
            port: 0,
        }
    }

    /// Start the mock server and return the actual port
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("127.0.0.1:{}", self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        self.port = port;

        let state = Arc::new(EndpointState {
            config: self.config.clone(),
            counters: self.counters.clone(),
        });
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let app = Router::new()
            .route("/sparql", get(handle_query))
            .route("/update", post(handle_update))
            .with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        tracing::info!(port, "Mock SPARQL endpoint listening");
        Ok(port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Query endpoint URL
    pub fn sparql_url(&self) -> String {
        format!("http://127.0.0.1:{}/sparql", self.port)
    }

    /// Update endpoint URL
    pub fn update_url(&self) -> String {
        format!("http://127.0.0.1:{}/update", self.port)
    }

    /// Read requests served so far
    pub fn queries(&self) -> u64 {
        self.counters.queries.load(Ordering::Relaxed)
    }

    /// Update requests served so far
    pub fn updates(&self) -> u64 {
        self.counters.updates.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockSparqlServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn simulate(config: &MockEndpointConfig) -> Option<Response> {
    if config.latency_ms > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(config.latency_ms)).await;
    }
    let roll: f64 = rand::thread_rng().gen();
    if roll < config.error_rate {
        return Some((StatusCode::INTERNAL_SERVER_ERROR, "Simulated error").into_response());
    }
    None
}

async fn handle_query(
    State(state): State<Arc<EndpointState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(query) = params.get("query") else {
        return (StatusCode::BAD_REQUEST, "missing query parameter").into_response();
    };
    state.counters.queries.fetch_add(1, Ordering::Relaxed);
    if let Some(error) = simulate(&state.config).await {
        return error;
    }

    let keyword = query.split_whitespace().next().unwrap_or_default().to_uppercase();
    if keyword == "DESCRIBE" || keyword == "CONSTRUCT" {
        let body: String = (0..state.config.row_count)
            .map(|i| format!("<http://mock/s{}> <http://mock/p> \"{}\" .\n", i, i))
            .collect();
        return ([(header::CONTENT_TYPE, "text/turtle")], body).into_response();
    }

    let bindings: Vec<serde_json::Value> = (0..state.config.row_count)
        .map(|i| {
            serde_json::json!({
                "s": {"type": "uri", "value": format!("http://mock/s{}", i)},
                "label": {"type": "literal", "value": format!("row {}", i)}
            })
        })
        .collect();
    let body = serde_json::json!({
        "head": {"vars": ["s", "label"]},
        "results": {"bindings": bindings}
    });
    (
        [(header::CONTENT_TYPE, "application/sparql-results+json")],
        body.to_string(),
    )
        .into_response()
}

async fn handle_update(
    State(state): State<Arc<EndpointState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if form.is_empty() {
        return (StatusCode::BAD_REQUEST, "empty update").into_response();
    }
    state.counters.updates.fetch_add(1, Ordering::Relaxed);
    if let Some(error) = simulate(&state.config).await {
        return error;
    }
    StatusCode::OK.into_response()
}
