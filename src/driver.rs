//! Single-client measured run loop and the client factory used for
//! multi-client runs against a SPARQL endpoint.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::connection::{ServerConnection, SparqlConfig, SparqlConnection};
use crate::error::Result;
use crate::executor::RunExecutor;
use crate::orchestrator::{ClientFactory, ClientParts};
use crate::pool::{ParameterPool, SeededParameterPool};
use crate::querymix::{QueryMix, RunKind, Workload};
use crate::rampup::{RampupController, RampupOutcome};

/// File the single-client run writes its period runtimes to
pub const STEADY_STATE_FILE: &str = "steadystate.tsv";

/// File the ramp-up writes its period runtimes to
pub const RAMPUP_FILE: &str = "rampup.tsv";

/// Shape of a single-client run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPlan {
    pub warmups: usize,
    pub runs: usize,
    /// Measured runs summed into one line of the steady-state stream
    pub querymixes_per_period: usize,
}

impl Default for RunPlan {
    fn default() -> Self {
        Self {
            warmups: 50,
            runs: 50,
            querymixes_per_period: 50,
        }
    }
}

/// What a single-client run measured
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub query_mix: QueryMix,
    /// Summed runtimes of every completed period
    pub periods: Vec<f64>,
    /// Wall-clock duration of the measured runs, in seconds
    pub wall_time: f64,
}

/// Drives one connection through warm-up and measured runs
pub struct SingleClientDriver {
    plan: RunPlan,
    cancel: CancellationToken,
}

impl SingleClientDriver {
    pub fn new(plan: RunPlan) -> Self {
        Self {
            plan,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort with [`crate::error::DriverError::Interrupted`] once `cancel`
    /// fires; the connection is still closed.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run warm-ups and measured runs, then close the connection whatever
    /// the outcome.
    pub async fn run<C, P, W>(
        &self,
        connection: &mut C,
        pool: &mut P,
        query_mix: QueryMix,
        steady_state: &mut W,
    ) -> Result<RunSummary>
    where
        C: ServerConnection,
        P: ParameterPool,
        W: Write,
    {
        let result = self
            .measure(connection, pool, query_mix, steady_state)
            .await;
        connection.close().await;
        result
    }

    async fn measure<C, P, W>(
        &self,
        connection: &mut C,
        pool: &mut P,
        mut query_mix: QueryMix,
        steady_state: &mut W,
    ) -> Result<RunSummary>
    where
        C: ServerConnection,
        P: ParameterPool,
        W: Write,
    {
        let mut executor = RunExecutor::new(connection, pool).with_cancellation(self.cancel.clone());

        for run in 0..self.plan.warmups {
            let run_nr = run as i64 - self.plan.warmups as i64;
            let runtime = executor
                .run(&mut query_mix, run_nr, RunKind::Warmup, true)
                .await?;
            tracing::info!(run = run_nr, runtime_ms = runtime * 1000.0, "Warm-up run finished");
        }

        let started = Instant::now();
        let mut periods = Vec::new();
        let mut period_runtime = 0.0;

        for run in 0..self.plan.runs {
            let runtime = executor
                .run(&mut query_mix, run as i64, RunKind::Measured, false)
                .await?;
            tracing::info!(run, runtime_ms = runtime * 1000.0, "Run finished");

            period_runtime += runtime;
            if self.plan.querymixes_per_period > 0 && (run + 1) % self.plan.querymixes_per_period == 0
            {
                periods.push(period_runtime);
                writeln!(steady_state, "{}\t{}", periods.len(), period_runtime)?;
                steady_state.flush()?;
                period_runtime = 0.0;
            }
        }

        Ok(RunSummary {
            query_mix,
            periods,
            wall_time: started.elapsed().as_secs_f64(),
        })
    }
}

/// Ramp up on one connection until steady or cancelled, then close it
/// whatever the outcome
pub async fn rampup<C, P, W>(
    controller: &mut RampupController,
    connection: &mut C,
    pool: &mut P,
    query_mix: &mut QueryMix,
    sink: &mut W,
    cancel: CancellationToken,
) -> Result<RampupOutcome>
where
    C: ServerConnection,
    P: ParameterPool,
    W: Write,
{
    let result = {
        let mut executor = RunExecutor::new(&mut *connection, pool).with_cancellation(cancel);
        controller.run(&mut executor, query_mix, sink).await
    };
    connection.close().await;
    result
}

/// Builds one SPARQL connection and one seeded pool per client
pub struct SparqlClients {
    workload: Arc<Workload>,
    pool: SeededParameterPool,
    sparql: SparqlConfig,
}

impl SparqlClients {
    pub fn new(workload: Arc<Workload>, pool: SeededParameterPool, sparql: SparqlConfig) -> Self {
        Self {
            workload,
            pool,
            sparql,
        }
    }
}

impl ClientFactory for SparqlClients {
    type Connection = SparqlConnection;
    type Pool = SeededParameterPool;

    fn create_client(&self, index: usize) -> Result<ClientParts<SparqlConnection, SeededParameterPool>> {
        Ok(ClientParts {
            connection: SparqlConnection::new(self.sparql.clone())?,
            pool: self.pool.for_client(index),
            query_mix: QueryMix::new(self.workload.clone()),
        })
    }
}
