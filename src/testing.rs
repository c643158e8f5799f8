//! Deterministic fakes for exercising the engine without an endpoint.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::connection::{QueryOutcome, QueryResult, ServerConnection};
use crate::error::{ConnectionError, Result};
use crate::pool::ParameterPool;
use crate::query::{BoundQuery, Query};

/// Connection that answers every query with a fixed duration and records
/// which ordinals it was asked to run.
#[derive(Debug, Clone)]
pub struct FakeConnection {
    /// Reported elapsed time per query
    pub elapsed: Duration,
    /// Reported result metric per query
    pub results: u64,
    /// Actually wait `elapsed` before answering
    pub sleep: bool,
    /// Ordinals that fail with a transport error
    pub failing: HashSet<usize>,
    /// Ordinals that report a timeout
    pub timing_out: HashSet<usize>,
    /// Ordinals whose execution panics
    pub panicking: HashSet<usize>,
    calls: Arc<AtomicUsize>,
    executed: Arc<Mutex<Vec<usize>>>,
    closed: Arc<AtomicUsize>,
}

impl FakeConnection {
    pub fn new(elapsed: Duration) -> Self {
        Self {
            elapsed,
            results: 1,
            sleep: false,
            failing: HashSet::new(),
            timing_out: HashSet::new(),
            panicking: HashSet::new(),
            calls: Arc::new(AtomicUsize::new(0)),
            executed: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn sleeping(mut self) -> Self {
        self.sleep = true;
        self
    }

    /// Number of `execute` / `execute_validation` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Ordinals sent to the endpoint, in order
    pub fn executed(&self) -> Vec<usize> {
        self.executed.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Number of `close` calls so far
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    async fn answer(&self, nr: usize) -> std::result::Result<QueryOutcome, ConnectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(nr);
        }
        if self.sleep {
            tokio::time::sleep(self.elapsed).await;
        }
        if self.panicking.contains(&nr) {
            panic!("query {} blew up", nr);
        }
        if self.failing.contains(&nr) {
            return Err(ConnectionError::Transport("connection reset".to_string()));
        }
        if self.timing_out.contains(&nr) {
            return Ok(QueryOutcome::timed_out(self.elapsed));
        }
        Ok(QueryOutcome::answered(self.elapsed, self.results))
    }
}

impl ServerConnection for FakeConnection {
    async fn execute(
        &mut self,
        query: &BoundQuery<'_>,
    ) -> std::result::Result<QueryOutcome, ConnectionError> {
        self.answer(query.nr()).await
    }

    async fn execute_validation(
        &mut self,
        query: &BoundQuery<'_>,
    ) -> std::result::Result<Option<QueryResult>, ConnectionError> {
        self.answer(query.nr()).await?;
        Ok(Some(QueryResult {
            query_nr: query.nr(),
            query_type: query.query_type(),
            run: 0,
            parameters: query.parameters().to_vec(),
            row_names: query.query().row_names().to_vec(),
            rows: vec![vec![query.text().to_string()]],
        }))
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Pool that numbers every value it hands out
#[derive(Debug, Clone, Default)]
pub struct CountingPool {
    issued: usize,
}

impl ParameterPool for CountingPool {
    fn parameters_for(&mut self, query: &Query) -> Result<Vec<String>> {
        Ok(query
            .slots()
            .iter()
            .map(|_| {
                self.issued += 1;
                format!("v{}", self.issued)
            })
            .collect())
    }

    fn scale_factor(&self) -> u64 {
        1
    }
}
