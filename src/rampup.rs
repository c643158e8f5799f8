//! Ramp-up: run fixed-size periods until period runtimes settle.
//!
//! A period is `querymixes_per_period` consecutive query mix runs whose
//! runtimes are summed. The last `window` period runtimes are kept; once the
//! window has been filled, a period ends the ramp-up when the spread of the
//! window, `(max - min) / min`, is below the tolerance. A period that beats
//! every earlier period never ends the ramp-up, whatever the spread: the
//! system is still improving.

use std::collections::VecDeque;
use std::io::Write;
use std::time::Instant;

use crate::connection::ServerConnection;
use crate::error::Result;
use crate::executor::RunExecutor;
use crate::pool::ParameterPool;
use crate::querymix::{QueryMix, RunKind};

/// Tuning of the steady-state test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampupConfig {
    /// Query mix runs per period
    pub querymixes_per_period: usize,
    /// Number of trailing periods compared
    pub window: usize,
    /// Maximum relative spread of the window, e.g. 0.05 for 5%
    pub tolerance: f64,
}

impl Default for RampupConfig {
    fn default() -> Self {
        Self {
            querymixes_per_period: 50,
            window: 5,
            tolerance: 0.02,
        }
    }
}

/// Result of feeding one period runtime to the detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// The window is not full yet
    Accumulating,
    /// This period is the best so far; the spread test was not applied
    NewMinimum,
    /// The window spread is still above the tolerance
    Unsteady { spread: f64 },
    /// The window spread is below the tolerance
    Steady { spread: f64 },
}

impl Verdict {
    pub fn is_steady(&self) -> bool {
        matches!(self, Verdict::Steady { .. })
    }
}

/// Sliding-window steady-state test over period runtimes
#[derive(Debug, Clone)]
pub struct SteadyStateDetector {
    window_size: usize,
    tolerance: f64,
    window: VecDeque<f64>,
    periods: usize,
    best: f64,
}

impl SteadyStateDetector {
    pub fn new(window_size: usize, tolerance: f64) -> Self {
        Self {
            window_size,
            tolerance,
            window: VecDeque::with_capacity(window_size + 1),
            periods: 0,
            best: f64::INFINITY,
        }
    }

    /// Feed the runtime of the period just completed
    pub fn observe(&mut self, runtime: f64) -> Verdict {
        self.periods += 1;
        self.window.push_back(runtime);
        if self.window.len() > self.window_size {
            self.window.pop_front();
        }

        // Re-evaluated every period: ties with the best do not count as new minima.
        let new_minimum = runtime < self.best;
        if new_minimum {
            self.best = runtime;
        }

        if self.periods <= self.window_size {
            return Verdict::Accumulating;
        }
        if new_minimum {
            return Verdict::NewMinimum;
        }

        let spread = self.spread();
        if spread < self.tolerance {
            Verdict::Steady { spread }
        } else {
            Verdict::Unsteady { spread }
        }
    }

    /// `(max - min) / min` over the current window
    pub fn spread(&self) -> f64 {
        let min = self.window.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if self.window.is_empty() {
            return f64::INFINITY;
        }
        if min <= 0.0 {
            return if max <= 0.0 { 0.0 } else { f64::INFINITY };
        }
        (max - min) / min
    }

    pub fn periods(&self) -> usize {
        self.periods
    }

    /// Best period runtime observed so far
    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn window(&self) -> Vec<f64> {
        self.window.iter().copied().collect()
    }
}

/// Summary of a completed ramp-up
#[derive(Debug, Clone, PartialEq)]
pub struct RampupOutcome {
    pub periods: usize,
    /// Sum of all period runtimes, in seconds
    pub total_runtime: f64,
    /// Wall-clock time the ramp-up took, in seconds
    pub wall_time: f64,
    /// Period runtimes of the final window
    pub window: Vec<f64>,
}

/// Runs periods until the steady-state test passes.
///
/// There is no iteration bound: a system that never settles keeps the
/// controller running. Callers that need a bound impose it from outside
/// (e.g. with `tokio::time::timeout`).
pub struct RampupController {
    config: RampupConfig,
    detector: SteadyStateDetector,
}

impl RampupController {
    pub fn new(config: RampupConfig) -> Self {
        Self {
            detector: SteadyStateDetector::new(config.window, config.tolerance),
            config,
        }
    }

    /// Execute periods until steady, writing `period\truntime` lines to `sink`
    pub async fn run<C, P, W>(
        &mut self,
        executor: &mut RunExecutor<'_, C, P>,
        mix: &mut QueryMix,
        sink: &mut W,
    ) -> Result<RampupOutcome>
    where
        C: ServerConnection,
        P: ParameterPool,
        W: Write,
    {
        let started = Instant::now();
        let mut total_runtime = 0.0;

        loop {
            let period = self.detector.periods() + 1;
            let mut runtime = 0.0;
            for run in 1..=self.config.querymixes_per_period {
                let mix_runtime = executor
                    .run(mix, run as i64, RunKind::Measured, true)
                    .await?;
                tracing::debug!(
                    period,
                    run,
                    runtime_ms = mix_runtime * 1000.0,
                    "Ramp-up query mix finished"
                );
                runtime += mix_runtime;
            }

            writeln!(sink, "{}\t{}", period, runtime)?;
            sink.flush()?;
            total_runtime += runtime;

            let verdict = self.detector.observe(runtime);
            let window_total: f64 = self.detector.window().iter().sum();
            tracing::info!(
                period,
                runtime_ms = runtime * 1000.0,
                window_ms = window_total * 1000.0,
                verdict = ?verdict,
                "Ramp-up period finished"
            );

            if verdict.is_steady() {
                break;
            }
        }

        let outcome = RampupOutcome {
            periods: self.detector.periods(),
            total_runtime,
            wall_time: started.elapsed().as_secs_f64(),
            window: self.detector.window(),
        };
        tracing::info!(
            periods = outcome.periods,
            total_runtime_s = outcome.total_runtime,
            "Steady state reached"
        );
        Ok(outcome)
    }
}
