use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::SparqlConfig;
use crate::driver::RunPlan;
use crate::error::{DriverError, Result};
use crate::orchestrator::OrchestratorConfig;
use crate::qualification::QUALIFICATION_RUNS;
use crate::query::TemplateSyntax;
use crate::rampup::RampupConfig;
use crate::report::ReportContext;
use crate::usecase::LoadOptions;

/// Query mix benchmark test driver
#[derive(Parser, Debug)]
#[command(name = "testdriver", author, version, about, long_about = None)]
pub struct CliArgs {
    /// SPARQL endpoint URL
    #[arg(env = "SPARQL_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Number of measured query mix runs
    #[arg(long, env = "TD_RUNS", default_value = "50")]
    pub runs: usize,

    /// Resource directory (parameter pool)
    #[arg(long, env = "TD_IDIR", default_value = "td_data")]
    pub idir: String,

    /// Number of warm-up query mix runs
    #[arg(short = 'w', long, env = "TD_WARMUPS", default_value = "50")]
    pub warmups: usize,

    /// XML result file
    #[arg(short = 'o', long, env = "TD_OUTPUT", default_value = "benchmark_result.xml")]
    pub output: String,

    /// Default graph sent with every read query
    #[arg(long = "default-graph", env = "TD_DEFAULT_GRAPH")]
    pub default_graph: Option<String>,

    /// Run this many concurrent clients
    #[arg(long, visible_alias = "mt", env = "TD_CLIENTS", conflicts_with = "rampup")]
    pub clients: Option<usize>,

    /// Seed of the parameter pool
    #[arg(long, env = "TD_SEED", default_value = "808080")]
    pub seed: u64,

    /// Per-query timeout in milliseconds (0 waits indefinitely)
    #[arg(short = 't', long, env = "TD_TIMEOUT_MS", default_value = "0")]
    pub timeout: u64,

    /// SPARQL update endpoint URL
    #[arg(short = 'u', long = "update-endpoint", env = "TD_UPDATE_ENDPOINT")]
    pub update_endpoint: Option<String>,

    /// Use-case file listing the query mix directories
    #[arg(long, visible_alias = "ucf", env = "TD_USECASE", default_value = "usecase.txt")]
    pub usecase: String,

    /// Form parameter carrying update requests
    #[arg(long = "update-param", env = "TD_UPDATE_PARAM", default_value = "update")]
    pub update_param: String,

    /// Qualification mode: record full results instead of timings
    #[arg(short = 'q', long)]
    pub qualification: bool,

    /// Output file of qualification mode
    #[arg(long = "qualification-file", default_value = "run.qual")]
    pub qualification_file: String,

    /// Ramp up until the endpoint reaches steady state
    #[arg(long, conflicts_with = "qualification")]
    pub rampup: bool,

    /// Query mix runs per ramp-up period
    #[arg(long = "qms-per-period", default_value = "50")]
    pub qms_per_period: usize,

    /// Maximum relative spread of the ramp-up window
    #[arg(long = "percent-difference", default_value = "0.02")]
    pub percent_difference: f64,

    /// Number of periods in the ramp-up window
    #[arg(long, default_value = "5")]
    pub periods: usize,

    /// Templates use @name@ placeholders instead of %name%
    #[arg(long)]
    pub sql: bool,

    /// Start a local mock endpoint and benchmark it
    #[arg(long = "mock-endpoint")]
    pub mock_endpoint: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Print the report and emit logs as JSON
    #[arg(long)]
    pub json: bool,
}

/// What the driver does once the workload is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Single,
    Rampup,
    MultiClient { clients: usize },
    Qualification,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Single => write!(f, "single"),
            Mode::Rampup => write!(f, "rampup"),
            Mode::MultiClient { clients } => write!(f, "multi-client ({})", clients),
            Mode::Qualification => write!(f, "qualification"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DriverConfig {
    pub mode: Mode,

    // Endpoint
    /// `None` only when running against the mock endpoint
    pub endpoint: Option<String>,
    pub update_endpoint: Option<String>,
    pub default_graph: Option<String>,
    pub update_param: String,
    pub timeout: Option<Duration>,
    pub mock_endpoint: bool,

    // Files
    pub resource_dir: PathBuf,
    pub usecase_file: PathBuf,
    pub output_file: PathBuf,
    pub qualification_file: PathBuf,

    // Run shape
    pub runs: usize,
    pub warmups: usize,
    pub seed: u64,
    pub rampup: RampupConfig,
    pub syntax: TemplateSyntax,

    // Output
    pub log_level: String,
    pub json: bool,
}

impl DriverConfig {
    /// Load configuration with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        Ok(Self::from_args(args))
    }

    pub fn from_args(args: CliArgs) -> Self {
        let mode = if args.qualification {
            Mode::Qualification
        } else if args.rampup {
            Mode::Rampup
        } else if let Some(clients) = args.clients {
            Mode::MultiClient { clients }
        } else {
            Mode::Single
        };

        // Qualification always runs a fixed number of query mixes
        let runs = if mode == Mode::Qualification {
            QUALIFICATION_RUNS
        } else {
            args.runs
        };

        Self {
            mode,
            endpoint: args.endpoint,
            update_endpoint: args.update_endpoint,
            default_graph: args.default_graph,
            update_param: args.update_param,
            timeout: (args.timeout > 0).then(|| Duration::from_millis(args.timeout)),
            mock_endpoint: args.mock_endpoint,
            resource_dir: expand_tilde(&args.idir),
            usecase_file: expand_tilde(&args.usecase),
            output_file: expand_tilde(&args.output),
            qualification_file: expand_tilde(&args.qualification_file),
            runs,
            warmups: args.warmups,
            seed: args.seed,
            rampup: RampupConfig {
                querymixes_per_period: args.qms_per_period,
                window: args.periods,
                tolerance: args.percent_difference,
            },
            syntax: if args.sql {
                TemplateSyntax::Sql
            } else {
                TemplateSyntax::Sparql
            },
            log_level: args.log_level,
            json: args.json,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_none() && !self.mock_endpoint {
            return Err(DriverError::Config(
                "an endpoint URL is required (or --mock-endpoint)".to_string(),
            ));
        }
        if self.mode != Mode::Rampup && self.runs == 0 {
            return Err(DriverError::Config("--runs must be at least 1".to_string()));
        }
        if let Mode::MultiClient { clients: 0 } = self.mode {
            return Err(DriverError::Config("--clients must be at least 1".to_string()));
        }
        if self.rampup.window == 0 {
            return Err(DriverError::Config("--periods must be at least 1".to_string()));
        }
        if self.rampup.querymixes_per_period == 0 {
            return Err(DriverError::Config(
                "--qms-per-period must be at least 1".to_string(),
            ));
        }
        if self.rampup.tolerance.is_nan() || self.rampup.tolerance <= 0.0 {
            return Err(DriverError::Config(
                "--percent-difference must be positive".to_string(),
            ));
        }
        if !self.resource_dir.is_dir() {
            return Err(DriverError::Config(format!(
                "resource directory does not exist: {}",
                self.resource_dir.display()
            )));
        }
        if !self.usecase_file.is_file() {
            return Err(DriverError::Config(format!(
                "use-case file does not exist: {}",
                self.usecase_file.display()
            )));
        }
        Ok(())
    }

    /// Connection settings for the given endpoint
    pub fn sparql_config(&self, endpoint: &str) -> SparqlConfig {
        SparqlConfig {
            endpoint: endpoint.to_string(),
            update_endpoint: self.update_endpoint.clone(),
            default_graph: self.default_graph.clone(),
            update_param: self.update_param.clone(),
            timeout: self.timeout,
        }
    }

    pub fn run_plan(&self) -> RunPlan {
        RunPlan {
            warmups: self.warmups,
            runs: self.runs,
            querymixes_per_period: self.rampup.querymixes_per_period,
        }
    }

    pub fn orchestrator_config(&self, clients: usize) -> OrchestratorConfig {
        OrchestratorConfig {
            clients,
            warmups: self.warmups,
            runs: self.runs,
        }
    }

    /// Report header for this run; ramp-up runs no warm-up mixes
    pub fn report_context(&self, scale_factor: u64) -> ReportContext {
        ReportContext {
            scale_factor,
            seed: self.seed,
            warmups: if self.mode == Mode::Rampup { 0 } else { self.warmups },
            clients: None,
            actual_runtime: None,
        }
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            syntax: self.syntax,
            qualification: self.mode == Mode::Qualification,
        }
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    Path::new(path).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> DriverConfig {
        let mut argv = vec!["testdriver"];
        argv.extend_from_slice(args);
        DriverConfig::from_args(CliArgs::try_parse_from(argv).unwrap())
    }

    fn with_files(mut config: DriverConfig, dir: &Path) -> DriverConfig {
        let usecase = dir.join("usecase.txt");
        std::fs::write(&usecase, "querymix=explore\n").unwrap();
        config.resource_dir = dir.to_path_buf();
        config.usecase_file = usecase;
        config
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/file.txt");
        assert!(path.to_string_lossy().contains("test/file.txt"));
        assert!(!path.to_string_lossy().starts_with("~"));

        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_tilde_just_tilde() {
        // Just "~" without slash should not expand
        assert_eq!(expand_tilde("~"), PathBuf::from("~"));
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["http://localhost:8890/sparql"]);
        assert_eq!(config.mode, Mode::Single);
        assert_eq!(config.runs, 50);
        assert_eq!(config.warmups, 50);
        assert_eq!(config.seed, 808080);
        assert_eq!(config.timeout, None);
        assert_eq!(config.update_param, "update");
        assert_eq!(config.output_file, PathBuf::from("benchmark_result.xml"));
        assert_eq!(config.rampup, RampupConfig::default());
        assert_eq!(config.syntax, TemplateSyntax::Sparql);
    }

    #[test]
    fn test_modes() {
        assert_eq!(
            parse(&["--mt", "4", "http://x"]).mode,
            Mode::MultiClient { clients: 4 }
        );
        assert_eq!(parse(&["--rampup", "http://x"]).mode, Mode::Rampup);

        let qualification = parse(&["-q", "--runs", "3", "http://x"]);
        assert_eq!(qualification.mode, Mode::Qualification);
        assert_eq!(qualification.runs, QUALIFICATION_RUNS);
        assert!(qualification.load_options().qualification);
    }

    #[test]
    fn test_report_context_warmups() {
        let single = parse(&["-w", "7", "http://x"]).report_context(100);
        assert_eq!(single.warmups, 7);
        assert_eq!(single.scale_factor, 100);
        assert_eq!(single.seed, 808080);

        let rampup = parse(&["--rampup", "-w", "7", "http://x"]).report_context(100);
        assert_eq!(rampup.warmups, 0);
        assert_eq!(rampup.clients, None);
    }

    #[test]
    fn test_rampup_conflicts_with_clients() {
        assert!(CliArgs::try_parse_from(["testdriver", "--rampup", "--clients", "2", "http://x"]).is_err());
    }

    #[test]
    fn test_timeout_and_sparql_config() {
        let config = parse(&["-t", "2500", "-u", "http://x/update", "--default-graph", "http://g", "http://x"]);
        let sparql = config.sparql_config("http://x");
        assert_eq!(sparql.timeout, Some(Duration::from_millis(2500)));
        assert_eq!(sparql.update_endpoint.as_deref(), Some("http://x/update"));
        assert_eq!(sparql.default_graph.as_deref(), Some("http://g"));
    }

    #[test]
    fn test_validate() {
        let dir = tempfile::tempdir().unwrap();

        let config = with_files(parse(&["http://x"]), dir.path());
        assert!(config.validate().is_ok());

        let missing_endpoint = with_files(parse(&[]), dir.path());
        assert!(missing_endpoint.validate().is_err());
        let mock = with_files(parse(&["--mock-endpoint"]), dir.path());
        assert!(mock.validate().is_ok());

        let zero_clients = with_files(parse(&["--clients", "0", "http://x"]), dir.path());
        assert!(zero_clients.validate().is_err());

        let bad_tolerance = with_files(parse(&["--percent-difference", "0", "http://x"]), dir.path());
        assert!(bad_tolerance.validate().is_err());

        let mut no_usecase = with_files(parse(&["http://x"]), dir.path());
        no_usecase.usecase_file = dir.path().join("missing.txt");
        assert!(matches!(no_usecase.validate(), Err(DriverError::Config(_))));
    }
}
