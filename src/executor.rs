//! Run executor: one full traversal of a query mix.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::connection::ServerConnection;
use crate::error::{DriverError, Result};
use crate::pool::ParameterPool;
use crate::querymix::{QueryMix, RunKind, SkipReason, StepOutcome};

/// Drives a query mix through a connection, drawing parameters from a pool
pub struct RunExecutor<'a, C, P> {
    connection: &'a mut C,
    pool: &'a mut P,
    cancel: CancellationToken,
}

impl<'a, C, P> RunExecutor<'a, C, P>
where
    C: ServerConnection,
    P: ParameterPool,
{
    pub fn new(connection: &'a mut C, pool: &'a mut P) -> Self {
        Self {
            connection,
            pool,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop with [`DriverError::Interrupted`] once `cancel` fires. An
    /// in-flight query is abandoned and not recorded.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Visit every entry of the run sequence once, in order. `mix` must be
    /// positioned at the start of a run.
    ///
    /// Connection failures are recorded as timeout samples and never abort
    /// the traversal; parameter pool failures and cancellation do.
    pub async fn traverse(&mut self, mix: &mut QueryMix, suppress_updates: bool) -> Result<()> {
        let workload = mix.workload().clone();

        while let Some(ordinal) = mix.next_ordinal() {
            if self.cancel.is_cancelled() {
                return Err(DriverError::Interrupted);
            }
            let Some(query) = workload.query(ordinal) else {
                mix.record(ordinal, StepOutcome::Skipped(SkipReason::Ignored));
                continue;
            };

            if suppress_updates && query.query_type().is_update() {
                tracing::trace!(ordinal, "Update suppressed");
                mix.record(ordinal, StepOutcome::Skipped(SkipReason::UpdateSuppressed));
                continue;
            }
            if workload.is_ignored(ordinal) {
                tracing::trace!(ordinal, "Query ignored");
                mix.record(ordinal, StepOutcome::Skipped(SkipReason::Ignored));
                continue;
            }

            let values = self.pool.parameters_for(query)?;
            let bound = query.bind(values)?;

            let start = Instant::now();
            let executed = tokio::select! {
                result = self.connection.execute(&bound) => result,
                _ = self.cancel.cancelled() => {
                    tracing::debug!(ordinal, run = mix.current_run(), "Query abandoned on cancellation");
                    return Err(DriverError::Interrupted);
                }
            };
            let outcome = match executed {
                Ok(outcome) if outcome.timed_out => StepOutcome::TimedOut {
                    elapsed: outcome.elapsed.as_secs_f64(),
                },
                Ok(outcome) => StepOutcome::Executed {
                    elapsed: outcome.elapsed.as_secs_f64(),
                    results: outcome.results,
                },
                Err(e) => {
                    tracing::warn!(
                        ordinal,
                        run = mix.current_run(),
                        error = %e,
                        "Query failed, recording as timeout"
                    );
                    StepOutcome::TimedOut {
                        elapsed: start.elapsed().as_secs_f64(),
                    }
                }
            };
            mix.record(ordinal, outcome);
        }

        Ok(())
    }

    /// Begin run `run_nr`, traverse it, and return its runtime in seconds
    pub async fn run(
        &mut self,
        mix: &mut QueryMix,
        run_nr: i64,
        kind: RunKind,
        suppress_updates: bool,
    ) -> Result<f64> {
        mix.begin_run(run_nr, kind);
        self.traverse(mix, suppress_updates).await?;
        Ok(mix.finish_run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryType;
    use crate::querymix::tests::workload;
    use crate::querymix::RunStep;
    use crate::testing::{CountingPool, FakeConnection};
    use std::time::Duration;

    #[tokio::test]
    async fn test_visits_run_sequence_in_order() {
        let types = [QueryType::Select, QueryType::Select, QueryType::Update];
        let mut mix = QueryMix::new(workload(&types, &[2, 1, 3, 2, 1], &[]));
        let mut conn = FakeConnection::new(Duration::from_millis(10));
        let mut pool = CountingPool::default();

        RunExecutor::new(&mut conn, &mut pool)
            .run(&mut mix, 0, RunKind::Measured, false)
            .await
            .unwrap();

        let visited: Vec<usize> = mix.steps().iter().map(|s| s.ordinal).collect();
        assert_eq!(visited, vec![2, 1, 3, 2, 1]);
        assert_eq!(conn.executed(), vec![2, 1, 3, 2, 1]);
    }

    #[tokio::test]
    async fn test_skips_never_reach_connection() {
        let types = [QueryType::Select, QueryType::Update, QueryType::Select];
        let mut mix = QueryMix::new(workload(&types, &[1, 2, 3, 1], &[3]));
        let mut conn = FakeConnection::new(Duration::from_millis(10));
        let mut pool = CountingPool::default();

        let runtime = RunExecutor::new(&mut conn, &mut pool)
            .run(&mut mix, 0, RunKind::Measured, true)
            .await
            .unwrap();

        assert_eq!(conn.calls(), 2);
        assert_eq!(conn.executed(), vec![1, 1]);
        assert!((runtime - 0.02).abs() < 1e-9);
        assert_eq!(
            mix.steps()[1],
            RunStep {
                ordinal: 2,
                outcome: StepOutcome::Skipped(SkipReason::UpdateSuppressed)
            }
        );
        assert_eq!(mix.steps()[2].outcome, StepOutcome::Skipped(SkipReason::Ignored));
        assert_eq!(mix.steps()[2].outcome.elapsed(), 0.0);
    }

    #[tokio::test]
    async fn test_single_suppressed_update_runs_nothing() {
        let mut mix = QueryMix::new(workload(&[QueryType::Update], &[1], &[]));
        let mut conn = FakeConnection::new(Duration::from_millis(10));
        let mut pool = CountingPool::default();

        let runtime = RunExecutor::new(&mut conn, &mut pool)
            .run(&mut mix, 0, RunKind::Measured, true)
            .await
            .unwrap();

        assert_eq!(runtime, 0.0);
        assert_eq!(conn.calls(), 0);
        assert_eq!(mix.samples(1).unwrap().count(), 0);
        assert_eq!(mix.statistics().total_runtime, 0.0);
    }

    #[tokio::test]
    async fn test_connection_failure_does_not_abort_run() {
        let mut mix = QueryMix::new(workload(&[QueryType::Select; 3], &[1, 2, 3], &[]));
        let mut conn = FakeConnection::new(Duration::from_millis(5));
        conn.failing.insert(2);
        conn.timing_out.insert(3);
        let mut pool = CountingPool::default();

        RunExecutor::new(&mut conn, &mut pool)
            .run(&mut mix, 0, RunKind::Measured, false)
            .await
            .unwrap();

        assert_eq!(conn.calls(), 3);
        assert!(matches!(mix.steps()[1].outcome, StepOutcome::TimedOut { .. }));
        assert_eq!(mix.samples(2).unwrap().timeouts, 1);
        assert_eq!(mix.samples(3).unwrap().timeouts, 1);
        assert_eq!(mix.samples(3).unwrap().runtimes, vec![0.005]);
        assert_eq!(mix.samples(1).unwrap().results, vec![1]);
    }

    #[tokio::test]
    async fn test_cancellation_abandons_run() {
        let mut mix = QueryMix::new(workload(&[QueryType::Select; 2], &[1, 2, 1, 2], &[]));
        let mut conn = FakeConnection::new(Duration::from_millis(50)).sleeping();
        let mut pool = CountingPool::default();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(75)).await;
            trigger.cancel();
        });

        let result = RunExecutor::new(&mut conn, &mut pool)
            .with_cancellation(cancel)
            .run(&mut mix, 0, RunKind::Measured, false)
            .await;

        assert!(matches!(result, Err(DriverError::Interrupted)));
        assert_eq!(conn.calls(), 2);
        // the abandoned query leaves no step behind
        assert_eq!(mix.steps().len(), conn.calls() - 1);
    }

    #[tokio::test]
    async fn test_identical_runs_yield_identical_samples() {
        let types = [QueryType::Select, QueryType::Describe];
        let shared = workload(&types, &[1, 2, 1], &[]);

        let mut series = Vec::new();
        for _ in 0..2 {
            let mut mix = QueryMix::new(shared.clone());
            let mut conn = FakeConnection::new(Duration::from_millis(3));
            let mut pool = CountingPool::default();
            let mut executor = RunExecutor::new(&mut conn, &mut pool);
            for run in 0..3 {
                executor
                    .run(&mut mix, run, RunKind::Measured, false)
                    .await
                    .unwrap();
            }
            series.push((
                mix.samples(1).cloned(),
                mix.samples(2).cloned(),
                mix.run_runtimes().to_vec(),
            ));
        }

        assert_eq!(series[0], series[1]);
        assert_eq!(series[0].0.as_ref().unwrap().count(), 6);
    }
}
