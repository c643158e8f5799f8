use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use querymix_driver::config::{DriverConfig, Mode};
use querymix_driver::connection::{SparqlConfig, SparqlConnection};
use querymix_driver::driver::{
    self, SingleClientDriver, SparqlClients, RAMPUP_FILE, STEADY_STATE_FILE,
};
use querymix_driver::error::DriverError;
use querymix_driver::mock_server::{MockEndpointConfig, MockSparqlServer};
use querymix_driver::orchestrator::ClientOrchestrator;
use querymix_driver::pool::{ParameterPool, SeededParameterPool};
use querymix_driver::qualification::QualificationRunner;
use querymix_driver::querymix::{MixStatistics, QueryMix, Workload};
use querymix_driver::rampup::RampupController;
use querymix_driver::report::{BenchmarkReport, ReportContext};
use querymix_driver::usecase::{load_workload, UseCase};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = DriverConfig::load()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    // Logs go to stderr so a JSON report on stdout stays parseable
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);
    if config.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    config.validate()?;
    tracing::info!(mode = %config.mode, "Test driver starting");

    // Keep the mock alive until the run is over
    let mut mock = None;
    let sparql = if config.mock_endpoint {
        let mut server = MockSparqlServer::new(MockEndpointConfig::default());
        server.start().await.context("Failed to start mock endpoint")?;
        let mut sparql = config.sparql_config(&server.sparql_url());
        if sparql.update_endpoint.is_none() {
            sparql.update_endpoint = Some(server.update_url());
        }
        mock = Some(server);
        sparql
    } else {
        let endpoint = config.endpoint.as_deref().context("No endpoint configured")?;
        config.sparql_config(endpoint)
    };

    let usecase = UseCase::load(&config.usecase_file)?;
    let loaded = load_workload(&usecase, config.load_options())?;
    tracing::debug!(
        directories = loaded.remap.directories(),
        ordinals = loaded.remap.total(),
        "Ordinal space laid out"
    );
    let workload = Arc::new(loaded.workload);

    let pool = SeededParameterPool::load(&config.resource_dir, config.seed)?;
    pool.validate(&workload)?;

    // Signals cancel the run in place so every connection still gets closed
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    let result = run(&config, workload, pool, sparql, cancel).await;

    if let Some(mut server) = mock {
        server.stop();
    }
    if let Err(e) = &result {
        if matches!(e.downcast_ref::<DriverError>(), Some(DriverError::Interrupted)) {
            tracing::warn!("Run interrupted, no report written");
        }
    }
    result
}

async fn run(
    config: &DriverConfig,
    workload: Arc<Workload>,
    mut pool: SeededParameterPool,
    sparql: SparqlConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let context = config.report_context(pool.scale_factor());

    match config.mode {
        Mode::Single => {
            let mut connection = SparqlConnection::new(sparql)?;
            let mut stream = BufWriter::new(
                File::create(STEADY_STATE_FILE)
                    .with_context(|| format!("Failed to create {}", STEADY_STATE_FILE))?,
            );
            let summary = SingleClientDriver::new(config.run_plan())
                .with_cancellation(cancel)
                .run(&mut connection, &mut pool, QueryMix::new(workload), &mut stream)
                .await?;
            tracing::info!(
                runs = config.runs,
                wall_time_s = summary.wall_time,
                "Benchmark run finished"
            );
            emit_report(config, &summary.query_mix.statistics(), context)?;
        }
        Mode::Rampup => {
            let mut connection = SparqlConnection::new(sparql)?;
            let mut stream = BufWriter::new(
                File::create(RAMPUP_FILE)
                    .with_context(|| format!("Failed to create {}", RAMPUP_FILE))?,
            );
            let mut query_mix = QueryMix::new(workload);
            let mut controller = RampupController::new(config.rampup);
            let outcome = driver::rampup(
                &mut controller,
                &mut connection,
                &mut pool,
                &mut query_mix,
                &mut stream,
                cancel,
            )
            .await?;
            println!(
                "Steady state reached after {} periods ({:.3}s of query mixes, {:.3}s wall clock)",
                outcome.periods, outcome.total_runtime, outcome.wall_time
            );
            emit_report(config, &query_mix.statistics(), context)?;
        }
        Mode::MultiClient { clients } => {
            let factory = SparqlClients::new(workload, pool, sparql);
            let outcome = ClientOrchestrator::new(config.orchestrator_config(clients))
                .with_cancellation(cancel)
                .run(&factory)
                .await?;
            let context = ReportContext {
                clients: Some(clients),
                actual_runtime: Some(outcome.actual_runtime),
                ..context
            };
            emit_report(config, &outcome.query_mix.statistics(), context)?;
        }
        Mode::Qualification => {
            let mut connection = SparqlConnection::new(sparql)?;
            let mut sink = BufWriter::new(File::create(&config.qualification_file).with_context(|| {
                format!("Failed to create {}", config.qualification_file.display())
            })?);
            let summary = QualificationRunner::new(config.runs, config.seed)
                .with_cancellation(cancel)
                .run(&mut connection, &mut pool, &mut QueryMix::new(workload), &mut sink)
                .await?;
            println!(
                "Qualification finished: {} results written to {} ({} failed)",
                summary.results,
                config.qualification_file.display(),
                summary.failures
            );
        }
    }
    Ok(())
}

/// Print the report and write the XML result file
fn emit_report(config: &DriverConfig, stats: &MixStatistics, context: ReportContext) -> Result<()> {
    let report = BenchmarkReport::new(stats, context);
    if config.json {
        println!("{}", report.to_json());
    } else {
        print!("{}", report.render_text());
    }
    std::fs::write(&config.output_file, report.render_xml())
        .with_context(|| format!("Failed to write {}", config.output_file.display()))?;
    tracing::info!(path = %config.output_file.display(), qmph = report.qmph, "Results written");
    Ok(())
}

/// Handle interrupt signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, stopping run...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, stopping run...");
        },
    }
}
