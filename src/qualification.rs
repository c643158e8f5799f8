//! Qualification mode: capture full result sets for offline verification.
//!
//! Output is JSON lines: one [`QualificationHeader`] followed by one
//! [`QueryResult`] per answered query, in execution order.

use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use tokio_util::sync::CancellationToken;

use crate::connection::{QueryResult, ServerConnection};
use crate::error::{DriverError, Result};
use crate::pool::ParameterPool;
use crate::querymix::{QueryMix, RunKind};

/// Runs forced by qualification mode
pub const QUALIFICATION_RUNS: usize = 15;

/// First line of a qualification file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualificationHeader {
    pub query_count: usize,
    pub seed: u64,
    pub scale_factor: u64,
    pub runs: usize,
    pub run_sequence: Vec<usize>,
    pub ignore_mask: Vec<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QualificationSummary {
    pub runs: usize,
    /// Results written after the header
    pub results: usize,
    /// Queries that failed or timed out and have no result line
    pub failures: usize,
}

pub struct QualificationRunner {
    runs: usize,
    seed: u64,
    cancel: CancellationToken,
}

impl QualificationRunner {
    pub fn new(runs: usize, seed: u64) -> Self {
        Self {
            runs,
            seed,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the qualification and close the connection whatever the outcome
    pub async fn run<C, P, W>(
        &self,
        connection: &mut C,
        pool: &mut P,
        query_mix: &mut QueryMix,
        sink: &mut W,
    ) -> Result<QualificationSummary>
    where
        C: ServerConnection,
        P: ParameterPool,
        W: Write,
    {
        let result = self.qualify(connection, pool, query_mix, sink).await;
        connection.close().await;
        result
    }

    async fn qualify<C, P, W>(
        &self,
        connection: &mut C,
        pool: &mut P,
        query_mix: &mut QueryMix,
        sink: &mut W,
    ) -> Result<QualificationSummary>
    where
        C: ServerConnection,
        P: ParameterPool,
        W: Write,
    {
        let workload = query_mix.workload().clone();
        let header = QualificationHeader {
            query_count: workload.query_count(),
            seed: self.seed,
            scale_factor: pool.scale_factor(),
            runs: self.runs,
            run_sequence: workload.run_sequence().to_vec(),
            ignore_mask: workload.ignore_mask().to_vec(),
        };
        serde_json::to_writer(&mut *sink, &header)?;
        writeln!(sink)?;

        let mut summary = QualificationSummary {
            runs: self.runs,
            ..Default::default()
        };

        for run in 1..=self.runs as i64 {
            query_mix.begin_run(run, RunKind::Measured);
            while let Some(ordinal) = query_mix.next_ordinal() {
                if self.cancel.is_cancelled() {
                    sink.flush()?;
                    return Err(DriverError::Interrupted);
                }
                let Some(query) = workload.query(ordinal) else {
                    continue;
                };
                if workload.is_ignored(ordinal) {
                    continue;
                }

                let bound = query.bind(pool.parameters_for(query)?)?;
                let validated = tokio::select! {
                    result = connection.execute_validation(&bound) => result,
                    _ = self.cancel.cancelled() => {
                        sink.flush()?;
                        return Err(DriverError::Interrupted);
                    }
                };
                match validated {
                    Ok(Some(mut result)) => {
                        result.run = run;
                        serde_json::to_writer(&mut *sink, &result)?;
                        writeln!(sink)?;
                        summary.results += 1;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(run, ordinal, error = %e, "Qualification query failed");
                        summary.failures += 1;
                    }
                }
            }
            tracing::info!(run, "Qualification run finished");
        }

        sink.flush()?;
        Ok(summary)
    }
}

/// Read a qualification file back
pub fn read_qualification<R: BufRead>(reader: R) -> Result<(QualificationHeader, Vec<QueryResult>)> {
    let mut lines = reader.lines();
    let header_line = lines
        .next()
        .ok_or_else(|| DriverError::Config("qualification file is empty".to_string()))??;
    let header: QualificationHeader = serde_json::from_str(&header_line)?;

    let mut results = Vec::new();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        results.push(serde_json::from_str(&line)?);
    }
    Ok((header, results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryType;
    use crate::querymix::tests::workload;
    use crate::testing::{CountingPool, FakeConnection};
    use std::io::Cursor;
    use std::time::Duration;

    #[tokio::test]
    async fn test_writes_header_and_results() {
        let types = [QueryType::Select, QueryType::Select, QueryType::Describe];
        let mut mix = QueryMix::new(workload(&types, &[1, 2, 3, 1], &[2]));
        let mut conn = FakeConnection::new(Duration::from_millis(1));
        let mut pool = CountingPool::default();
        let mut out = Vec::new();

        let summary = QualificationRunner::new(2, 808080)
            .run(&mut conn, &mut pool, &mut mix, &mut out)
            .await
            .unwrap();

        assert_eq!(summary.results, 6);
        assert_eq!(summary.failures, 0);
        assert_eq!(conn.closed(), 1);

        let (header, results) = read_qualification(Cursor::new(out)).unwrap();
        assert_eq!(header.seed, 808080);
        assert_eq!(header.runs, 2);
        assert_eq!(header.run_sequence, vec![1, 2, 3, 1]);
        assert_eq!(header.ignore_mask, vec![false, true, false]);

        let order: Vec<(i64, usize)> = results.iter().map(|r| (r.run, r.query_nr)).collect();
        assert_eq!(order, vec![(1, 1), (1, 3), (1, 1), (2, 1), (2, 3), (2, 1)]);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_fatal() {
        let mut mix = QueryMix::new(workload(&[QueryType::Select; 2], &[1, 2], &[]));
        let mut conn = FakeConnection::new(Duration::from_millis(1));
        conn.failing.insert(2);
        let mut pool = CountingPool::default();
        let mut out = Vec::new();

        let summary = QualificationRunner::new(3, 1)
            .run(&mut conn, &mut pool, &mut mix, &mut out)
            .await
            .unwrap();

        assert_eq!(summary.results, 3);
        assert_eq!(summary.failures, 3);
    }

    #[tokio::test]
    async fn test_cancelled_qualification_keeps_written_results() {
        let mut mix = QueryMix::new(workload(&[QueryType::Select], &[1], &[]));
        let mut conn = FakeConnection::new(Duration::from_millis(40)).sleeping();
        let mut pool = CountingPool::default();
        let mut out = Vec::new();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = QualificationRunner::new(QUALIFICATION_RUNS, 7)
            .with_cancellation(cancel)
            .run(&mut conn, &mut pool, &mut mix, &mut out)
            .await;

        assert!(matches!(result, Err(DriverError::Interrupted)));
        assert_eq!(conn.closed(), 1);

        let (header, results) = read_qualification(Cursor::new(out)).unwrap();
        assert_eq!(header.runs, QUALIFICATION_RUNS);
        assert!(!results.is_empty());
        assert!(results.len() < QUALIFICATION_RUNS);
    }

    #[test]
    fn test_read_empty_file() {
        assert!(read_qualification(Cursor::new(Vec::new())).is_err());
    }
}
