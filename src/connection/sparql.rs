// HTTP SPARQL protocol connection

use bytes::Bytes;
use reqwest::{header, Client};
use std::time::{Duration, Instant};

use super::{QueryOutcome, QueryResult, ServerConnection};
use crate::error::{ConnectionError, DriverError, Result};
use crate::query::BoundQuery;

const SELECT_ACCEPT: &str = "application/sparql-results+json";
const GRAPH_ACCEPT: &str = "application/rdf+xml, text/turtle;q=0.9, */*;q=0.1";

/// Endpoint description for a SPARQL connection
#[derive(Debug, Clone)]
pub struct SparqlConfig {
    /// Query endpoint URL
    pub endpoint: String,
    /// Update endpoint URL; updates go to `endpoint` when unset
    pub update_endpoint: Option<String>,
    /// Sent as `default-graph-uri` on reads
    pub default_graph: Option<String>,
    /// Form field carrying update requests
    pub update_param: String,
    /// Per-query timeout; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl Default for SparqlConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8890/sparql".to_string(),
            update_endpoint: None,
            default_graph: None,
            update_param: "update".to_string(),
            timeout: None,
        }
    }
}

/// SPARQL-over-HTTP connection
pub struct SparqlConnection {
    client: Client,
    config: SparqlConfig,
}

impl SparqlConnection {
    pub fn new(config: SparqlConfig) -> Result<Self> {
        let mut builder = Client::builder().pool_max_idle_per_host(1);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| DriverError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &SparqlConfig {
        &self.config
    }

    fn request(&self, query: &BoundQuery<'_>) -> reqwest::RequestBuilder {
        if query.query_type().is_update() {
            let url = self
                .config
                .update_endpoint
                .as_deref()
                .unwrap_or(self.config.endpoint.as_str());
            return self
                .client
                .post(url)
                .form(&[(self.config.update_param.as_str(), query.text())]);
        }

        let accept = if query.query_type().counts_rows() {
            SELECT_ACCEPT
        } else {
            GRAPH_ACCEPT
        };
        let mut request = self
            .client
            .get(&self.config.endpoint)
            .header(header::ACCEPT, accept)
            .query(&[("query", query.text())]);
        if let Some(graph) = &self.config.default_graph {
            request = request.query(&[("default-graph-uri", graph.as_str())]);
        }
        request
    }

    /// Send the request and read the whole body. `Ok(None)` means timed out.
    async fn fetch(
        &self,
        query: &BoundQuery<'_>,
    ) -> std::result::Result<Option<Bytes>, ConnectionError> {
        let response = match self.request(query).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Ok(None),
            Err(e) => return Err(ConnectionError::Transport(e.to_string())),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectionError::Http {
                status: status.as_u16(),
            });
        }

        match response.bytes().await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.is_timeout() => Ok(None),
            Err(e) => Err(ConnectionError::Transport(e.to_string())),
        }
    }

    fn timeout_elapsed(&self, start: Instant) -> Duration {
        self.config.timeout.unwrap_or_else(|| start.elapsed())
    }
}

/// Parse `results.bindings` out of a SPARQL JSON result document
fn parse_bindings(body: &[u8]) -> std::result::Result<Vec<serde_json::Value>, ConnectionError> {
    let json: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| ConnectionError::Decode(e.to_string()))?;
    json.get("results")
        .and_then(|r| r.get("bindings"))
        .and_then(|b| b.as_array())
        .cloned()
        .ok_or_else(|| ConnectionError::Decode("missing results.bindings".to_string()))
}

/// Project bindings onto the expected row names
fn project_rows(bindings: &[serde_json::Value], row_names: &[String]) -> Vec<Vec<String>> {
    bindings
        .iter()
        .map(|binding| {
            row_names
                .iter()
                .map(|name| {
                    binding
                        .get(name)
                        .and_then(|cell| cell.get("value"))
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string()
                })
                .collect()
        })
        .collect()
}

impl ServerConnection for SparqlConnection {
    async fn execute(
        &mut self,
        query: &BoundQuery<'_>,
    ) -> std::result::Result<QueryOutcome, ConnectionError> {
        let start = Instant::now();
        let Some(body) = self.fetch(query).await? else {
            tracing::debug!(ordinal = query.nr(), "Query timed out");
            return Ok(QueryOutcome::timed_out(self.timeout_elapsed(start)));
        };

        let results = if query.query_type().counts_rows() {
            parse_bindings(&body)?.len() as u64
        } else {
            body.len() as u64
        };
        let elapsed = start.elapsed();

        tracing::trace!(
            ordinal = query.nr(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            results = results,
            "Query answered"
        );
        Ok(QueryOutcome::answered(elapsed, results))
    }

    async fn execute_validation(
        &mut self,
        query: &BoundQuery<'_>,
    ) -> std::result::Result<Option<QueryResult>, ConnectionError> {
        let Some(body) = self.fetch(query).await? else {
            return Err(ConnectionError::Timeout);
        };
        if query.query_type().is_update() {
            return Ok(None);
        }

        let row_names = query.query().row_names().to_vec();
        let rows = if query.query_type().counts_rows() {
            project_rows(&parse_bindings(&body)?, &row_names)
        } else {
            vec![vec![String::from_utf8_lossy(&body).into_owned()]]
        };

        Ok(Some(QueryResult {
            query_nr: query.nr(),
            query_type: query.query_type(),
            run: 0,
            parameters: query.parameters().to_vec(),
            row_names,
            rows,
        }))
    }

    async fn close(&mut self) {
        tracing::debug!(endpoint = %self.config.endpoint, "Closing SPARQL connection");
    }
}
