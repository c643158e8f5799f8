//! Multi-client orchestration.
//!
//! Every client is one tokio task owning its own query mix, connection and
//! parameter pool. Clients never talk to each other while running; the
//! orchestrator joins all of them at the end of the warm-up phase and again
//! at the end of the measured phase, then aggregates single-threaded.
//!
//! Failure policy: a client that errors or panics aborts the whole run with
//! [`DriverError::ClientFailed`]. Its samples are never silently dropped
//! from an otherwise successful aggregate. The first failure cancels the
//! remaining clients of the phase, and every client's connection is closed
//! before the error is returned, including on external cancellation.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::connection::ServerConnection;
use crate::error::{DriverError, Result};
use crate::executor::RunExecutor;
use crate::pool::ParameterPool;
use crate::querymix::{QueryMix, RunKind};

/// Everything one client owns
pub struct ClientParts<C, P> {
    pub connection: C,
    pub pool: P,
    pub query_mix: QueryMix,
}

/// Builds independent client state, one call per client
pub trait ClientFactory {
    type Connection: ServerConnection + 'static;
    type Pool: ParameterPool + 'static;

    fn create_client(&self, index: usize) -> Result<ClientParts<Self::Connection, Self::Pool>>;
}

/// Run shape for the orchestrated clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub clients: usize,
    /// Warm-up runs per client
    pub warmups: usize,
    /// Measured runs per client
    pub runs: usize,
}

/// Aggregated measurements of a multi-client run
#[derive(Debug, Clone)]
pub struct OrchestratorOutcome {
    /// All clients' samples folded into one mix
    pub query_mix: QueryMix,
    pub clients: usize,
    /// Sum over clients of their own total runtimes, in seconds
    pub nominal_runtime: f64,
    /// Wall-clock duration of the measured phase, in seconds
    pub actual_runtime: f64,
}

impl OrchestratorOutcome {
    /// How much client work overlapped in time: nominal / actual
    pub fn overlap_ratio(&self) -> f64 {
        if self.actual_runtime == 0.0 {
            return 0.0;
        }
        self.nominal_runtime / self.actual_runtime
    }

    /// Query mixes per hour across all clients
    pub fn qmph(&self) -> f64 {
        self.query_mix.statistics().qmph(self.overlap_ratio())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Warmup,
    Measured,
}

struct ClientState<C, P> {
    index: usize,
    parts: ClientParts<C, P>,
}

impl<C, P> ClientState<C, P>
where
    C: ServerConnection,
    P: ParameterPool,
{
    async fn run_phase(&mut self, phase: Phase, runs: usize, cancel: CancellationToken) -> Result<()> {
        let parts = &mut self.parts;
        let mut executor =
            RunExecutor::new(&mut parts.connection, &mut parts.pool).with_cancellation(cancel);

        for run in 0..runs {
            let (run_nr, kind, suppress_updates) = match phase {
                Phase::Warmup => (run as i64 - runs as i64, RunKind::Warmup, true),
                Phase::Measured => (run as i64, RunKind::Measured, false),
            };
            let runtime = executor
                .run(&mut parts.query_mix, run_nr, kind, suppress_updates)
                .await?;
            tracing::debug!(
                client = self.index,
                run = run_nr,
                runtime_ms = runtime * 1000.0,
                "Client query mix finished"
            );
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.parts.connection.close().await;
    }
}

/// Runs N clients through warm-up and measurement
pub struct ClientOrchestrator {
    config: OrchestratorConfig,
    cancel: CancellationToken,
}

impl ClientOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop every client with [`DriverError::Interrupted`] once `cancel`
    /// fires; all connections are still closed.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run<F: ClientFactory>(&self, factory: &F) -> Result<OrchestratorOutcome> {
        if self.config.clients == 0 {
            return Err(DriverError::Config("at least one client is required".to_string()));
        }

        let mut clients = Vec::with_capacity(self.config.clients);
        for index in 0..self.config.clients {
            match factory.create_client(index) {
                Ok(parts) => clients.push(ClientState { index, parts }),
                Err(e) => {
                    close_all(&mut clients).await;
                    return Err(e);
                }
            }
        }
        tracing::info!(clients = clients.len(), "Clients created");

        tracing::info!(runs = self.config.warmups, "Starting warm-up phase");
        let clients = run_phase(clients, Phase::Warmup, self.config.warmups, &self.cancel).await?;

        tracing::info!(runs = self.config.runs, "Starting measured phase");
        let started = Instant::now();
        let mut clients = run_phase(clients, Phase::Measured, self.config.runs, &self.cancel).await?;
        let actual_runtime = started.elapsed().as_secs_f64();

        close_all(&mut clients).await;

        // All tasks have joined; aggregation is single-threaded from here.
        let mut nominal_runtime = 0.0;
        let mut aggregate: Option<QueryMix> = None;
        for client in clients {
            let mix = client.parts.query_mix;
            nominal_runtime += mix.run_runtimes().iter().sum::<f64>();
            match aggregate.as_mut() {
                Some(total) => total.absorb(mix)?,
                None => aggregate = Some(mix),
            }
        }
        let query_mix = aggregate
            .ok_or_else(|| DriverError::Config("no client completed the run".to_string()))?;

        tracing::info!(
            nominal_s = nominal_runtime,
            actual_s = actual_runtime,
            "Measured phase finished"
        );

        Ok(OrchestratorOutcome {
            query_mix,
            clients: self.config.clients,
            nominal_runtime,
            actual_runtime,
        })
    }
}

/// Spawn one task per client and wait for all of them (the phase barrier).
///
/// Each phase runs under a child of `cancel`, so a failing client can stop
/// its peers without cancelling the caller's token.
async fn run_phase<C, P>(
    clients: Vec<ClientState<C, P>>,
    phase: Phase,
    runs: usize,
    cancel: &CancellationToken,
) -> Result<Vec<ClientState<C, P>>>
where
    C: ServerConnection + 'static,
    P: ParameterPool + 'static,
{
    let phase_cancel = cancel.child_token();
    let mut pending: FuturesUnordered<_> = clients
        .into_iter()
        .map(|mut client| {
            let index = client.index;
            let client_cancel = phase_cancel.clone();
            let handle = tokio::spawn(async move {
                // The state outlives a panic so its connection can still be closed
                let result = AssertUnwindSafe(client.run_phase(phase, runs, client_cancel))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(DriverError::Internal(anyhow::anyhow!(
                            "panicked: {}",
                            panic_message(panic.as_ref())
                        )))
                    });
                (client, result)
            });
            async move { (index, handle.await) }
        })
        .collect();

    let mut survivors = Vec::with_capacity(pending.len());
    let mut failure: Option<DriverError> = None;

    while let Some((index, joined)) = pending.next().await {
        match joined {
            Ok((client, Ok(()))) => survivors.push(client),
            Ok((mut client, Err(DriverError::Interrupted))) => {
                tracing::debug!(client = index, phase = ?phase, "Client stopped");
                client.close().await;
                failure.get_or_insert(DriverError::Interrupted);
            }
            Ok((mut client, Err(e))) => {
                tracing::error!(client = index, phase = ?phase, error = %e, "Client failed");
                phase_cancel.cancel();
                client.close().await;
                record_failure(&mut failure, index, e.to_string());
            }
            Err(e) => {
                tracing::error!(client = index, phase = ?phase, error = %e, "Client task died");
                phase_cancel.cancel();
                record_failure(&mut failure, index, format!("task failed: {}", e));
            }
        }
    }

    if let Some(err) = failure {
        close_all(&mut survivors).await;
        return Err(err);
    }
    survivors.sort_by_key(|client| client.index);
    Ok(survivors)
}

/// A client failure outranks the cancellations it caused in its peers
fn record_failure(failure: &mut Option<DriverError>, client: usize, message: String) {
    if matches!(failure, None | Some(DriverError::Interrupted)) {
        *failure = Some(DriverError::ClientFailed { client, message });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn close_all<C, P>(clients: &mut [ClientState<C, P>])
where
    C: ServerConnection,
    P: ParameterPool,
{
    for client in clients.iter_mut() {
        client.close().await;
    }
}
