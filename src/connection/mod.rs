//! Connections execute bound queries against the system under test.

pub mod sparql;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::ConnectionError;
use crate::query::{BoundQuery, QueryType};

pub use sparql::{SparqlConfig, SparqlConnection};

/// Timing and result metric of one query execution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryOutcome {
    pub elapsed: Duration,
    /// Row count for SELECT queries, byte count for everything else
    pub results: u64,
    pub timed_out: bool,
}

impl QueryOutcome {
    pub fn answered(elapsed: Duration, results: u64) -> Self {
        Self {
            elapsed,
            results,
            timed_out: false,
        }
    }

    pub fn timed_out(elapsed: Duration) -> Self {
        Self {
            elapsed,
            results: 0,
            timed_out: true,
        }
    }
}

/// Full result of a query in qualification mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub query_nr: usize,
    pub query_type: QueryType,
    pub run: i64,
    pub parameters: Vec<String>,
    pub row_names: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// A connection to the endpoint under test. Never shared between clients.
pub trait ServerConnection: Send {
    /// Execute a query and report its timing and result metric
    fn execute(
        &mut self,
        query: &BoundQuery<'_>,
    ) -> impl Future<Output = Result<QueryOutcome, ConnectionError>> + Send;

    /// Execute a query and capture its full result (qualification mode).
    /// Returns `None` for queries without a comparable result set.
    fn execute_validation(
        &mut self,
        query: &BoundQuery<'_>,
    ) -> impl Future<Output = Result<Option<QueryResult>, ConnectionError>> + Send;

    /// Release any held transport resources
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
