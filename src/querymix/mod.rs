//! Query mix: the cyclic run sequence, its cursor, and the sample series
//! recorded while traversing it.

pub mod stats;

use std::sync::Arc;

use crate::error::{DriverError, Result};
use crate::query::{Query, QueryType};

pub use stats::{MixStatistics, QuerySamples, QueryStatistics};

/// Immutable workload shared by every client: the queries by ordinal, the
/// run sequence, and the ignore mask.
#[derive(Debug)]
pub struct Workload {
    /// Indexed by ordinal - 1; `None` for ordinals no run references
    queries: Vec<Option<Query>>,
    /// Ordinals in execution order
    run_sequence: Vec<usize>,
    /// Indexed by ordinal - 1
    ignore_mask: Vec<bool>,
}

impl Workload {
    pub fn new(
        queries: Vec<Option<Query>>,
        run_sequence: Vec<usize>,
        ignore_mask: Vec<bool>,
    ) -> Result<Self> {
        if ignore_mask.len() != queries.len() {
            return Err(DriverError::Config(format!(
                "ignore mask covers {} ordinals but {} are defined",
                ignore_mask.len(),
                queries.len()
            )));
        }
        if run_sequence.is_empty() {
            return Err(DriverError::Config("run sequence is empty".to_string()));
        }
        for &ordinal in &run_sequence {
            let defined = ordinal >= 1
                && queries
                    .get(ordinal - 1)
                    .map(|q| q.is_some())
                    .unwrap_or(false);
            if !defined {
                return Err(DriverError::Config(format!(
                    "run sequence references undefined query {}",
                    ordinal
                )));
            }
        }

        Ok(Self {
            queries,
            run_sequence,
            ignore_mask,
        })
    }

    pub fn query(&self, ordinal: usize) -> Option<&Query> {
        self.queries.get(ordinal.checked_sub(1)?)?.as_ref()
    }

    pub fn queries(&self) -> &[Option<Query>] {
        &self.queries
    }

    /// Number of ordinals, gaps included
    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    pub fn run_sequence(&self) -> &[usize] {
        &self.run_sequence
    }

    pub fn ignore_mask(&self) -> &[bool] {
        &self.ignore_mask
    }

    pub fn is_ignored(&self, ordinal: usize) -> bool {
        ordinal
            .checked_sub(1)
            .and_then(|idx| self.ignore_mask.get(idx))
            .copied()
            .unwrap_or(false)
    }
}

/// Whether a run contributes to the statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// Samples are discarded when the run finishes
    Warmup,
    Measured,
}

/// Why a step of the run sequence was not sent to the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Ignored,
    UpdateSuppressed,
}

/// What happened at one step of a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    Executed { elapsed: f64, results: u64 },
    TimedOut { elapsed: f64 },
    Skipped(SkipReason),
}

impl StepOutcome {
    /// Seconds this step adds to the run runtime
    pub fn elapsed(&self) -> f64 {
        match self {
            StepOutcome::Executed { elapsed, .. } | StepOutcome::TimedOut { elapsed } => *elapsed,
            StepOutcome::Skipped(_) => 0.0,
        }
    }
}

/// One visited entry of the run sequence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunStep {
    pub ordinal: usize,
    pub outcome: StepOutcome,
}

/// Per-client query mix state. Each client owns its instance exclusively.
#[derive(Debug, Clone)]
pub struct QueryMix {
    workload: Arc<Workload>,
    cursor: usize,
    run_nr: i64,
    kind: RunKind,
    /// Steps of the current run, in visiting order
    steps: Vec<RunStep>,
    /// Runtime accumulated by the current run
    run_runtime: f64,
    /// Indexed by ordinal - 1
    samples: Vec<QuerySamples>,
    /// Runtimes of completed measured runs
    run_runtimes: Vec<f64>,
}

impl QueryMix {
    pub fn new(workload: Arc<Workload>) -> Self {
        let samples = vec![QuerySamples::default(); workload.query_count()];
        Self {
            workload,
            cursor: 0,
            run_nr: 0,
            kind: RunKind::Measured,
            steps: Vec::new(),
            run_runtime: 0.0,
            samples,
            run_runtimes: Vec::new(),
        }
    }

    pub fn workload(&self) -> &Arc<Workload> {
        &self.workload
    }

    /// Reset the cursor and start run `run_nr`
    pub fn begin_run(&mut self, run_nr: i64, kind: RunKind) {
        self.run_nr = run_nr;
        self.kind = kind;
        self.cursor = 0;
        self.steps.clear();
        self.run_runtime = 0.0;
    }

    pub fn current_run(&self) -> i64 {
        self.run_nr
    }

    pub fn has_next(&self) -> bool {
        self.cursor < self.workload.run_sequence.len()
    }

    /// Ordinal at the cursor; advances the cursor
    pub fn next_ordinal(&mut self) -> Option<usize> {
        let ordinal = *self.workload.run_sequence.get(self.cursor)?;
        self.cursor += 1;
        Some(ordinal)
    }

    /// Record the outcome of the step just taken
    pub fn record(&mut self, ordinal: usize, outcome: StepOutcome) {
        self.run_runtime += outcome.elapsed();
        self.steps.push(RunStep { ordinal, outcome });

        if self.kind == RunKind::Warmup {
            return;
        }
        let Some(series) = ordinal
            .checked_sub(1)
            .and_then(|idx| self.samples.get_mut(idx))
        else {
            return;
        };
        match outcome {
            StepOutcome::Executed { elapsed, results } => series.record_result(elapsed, results),
            StepOutcome::TimedOut { elapsed } => series.record_timeout(elapsed),
            StepOutcome::Skipped(_) => {}
        }
    }

    /// Close the current run and return its runtime in seconds
    pub fn finish_run(&mut self) -> f64 {
        if self.kind == RunKind::Measured {
            self.run_runtimes.push(self.run_runtime);
        }
        self.run_runtime
    }

    /// Runtime accumulated so far by the current (or just finished) run
    pub fn run_runtime(&self) -> f64 {
        self.run_runtime
    }

    pub fn steps(&self) -> &[RunStep] {
        &self.steps
    }

    pub fn samples(&self, ordinal: usize) -> Option<&QuerySamples> {
        self.samples.get(ordinal.checked_sub(1)?)
    }

    pub fn run_runtimes(&self) -> &[f64] {
        &self.run_runtimes
    }

    /// Fold another client's samples into this mix. Both mixes must cover
    /// the same ordinals.
    pub fn absorb(&mut self, other: QueryMix) -> Result<()> {
        if self.samples.len() != other.samples.len() {
            return Err(DriverError::Config(
                "cannot merge query mixes of different workloads".to_string(),
            ));
        }
        for (mine, theirs) in self.samples.iter_mut().zip(other.samples) {
            mine.extend(theirs);
        }
        self.run_runtimes.extend(other.run_runtimes);
        Ok(())
    }

    pub fn statistics(&self) -> MixStatistics {
        let query_types: Vec<Option<QueryType>> = self
            .workload
            .queries
            .iter()
            .map(|q| q.as_ref().map(|q| q.query_type()))
            .collect();
        MixStatistics::from_samples(&self.run_runtimes, &self.samples, &query_types)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::query::TemplateSyntax;

    /// Workload with the given types at ordinals 1..=n and the given run
    pub(crate) fn workload(types: &[QueryType], run: &[usize], ignored: &[usize]) -> Arc<Workload> {
        let queries = types
            .iter()
            .enumerate()
            .map(|(idx, qt)| {
                Some(Query::new(
                    idx + 1,
                    *qt,
                    format!("QUERY {}", idx + 1),
                    TemplateSyntax::Sparql,
                ))
            })
            .collect();
        let mut mask = vec![false; types.len()];
        for &ordinal in ignored {
            mask[ordinal - 1] = true;
        }
        Arc::new(Workload::new(queries, run.to_vec(), mask).unwrap())
    }

    #[test]
    fn test_workload_rejects_undefined_ordinal() {
        let queries = vec![
            Some(Query::new(1, QueryType::Select, "q", TemplateSyntax::Sparql)),
            None,
        ];
        let err = Workload::new(queries, vec![1, 2], vec![false, false]).unwrap_err();
        assert!(err.to_string().contains("undefined query 2"));
    }

    #[test]
    fn test_workload_rejects_mask_length() {
        let queries = vec![Some(Query::new(1, QueryType::Select, "q", TemplateSyntax::Sparql))];
        assert!(Workload::new(queries, vec![1], vec![]).is_err());
    }

    #[test]
    fn test_cursor_follows_run_sequence() {
        let mut mix = QueryMix::new(workload(&[QueryType::Select; 3], &[3, 1, 1, 2], &[]));
        mix.begin_run(0, RunKind::Measured);

        let mut visited = Vec::new();
        while let Some(ordinal) = mix.next_ordinal() {
            visited.push(ordinal);
        }
        assert_eq!(visited, vec![3, 1, 1, 2]);
        assert!(!mix.has_next());

        mix.begin_run(1, RunKind::Measured);
        assert!(mix.has_next());
        assert_eq!(mix.next_ordinal(), Some(3));
    }

    #[test]
    fn test_record_accumulates_run_runtime() {
        let mut mix = QueryMix::new(workload(&[QueryType::Select; 2], &[1, 2], &[2]));
        mix.begin_run(0, RunKind::Measured);
        mix.record(1, StepOutcome::Executed { elapsed: 0.25, results: 4 });
        mix.record(2, StepOutcome::Skipped(SkipReason::Ignored));

        assert_eq!(mix.finish_run(), 0.25);
        assert_eq!(mix.run_runtimes(), &[0.25]);
        assert_eq!(mix.samples(1).unwrap().count(), 1);
        assert_eq!(mix.samples(2).unwrap().count(), 0);
        assert_eq!(mix.steps().len(), 2);
    }

    #[test]
    fn test_warmup_samples_are_discarded() {
        let mut mix = QueryMix::new(workload(&[QueryType::Select], &[1], &[]));
        mix.begin_run(-1, RunKind::Warmup);
        mix.record(1, StepOutcome::Executed { elapsed: 0.5, results: 1 });

        assert_eq!(mix.finish_run(), 0.5);
        assert!(mix.run_runtimes().is_empty());
        assert_eq!(mix.samples(1).unwrap().count(), 0);
    }

    #[test]
    fn test_absorb_merges_clients() {
        let shared = workload(&[QueryType::Select], &[1], &[]);
        let mut a = QueryMix::new(shared.clone());
        let mut b = QueryMix::new(shared);
        for (mix, elapsed) in [(&mut a, 1.0), (&mut b, 3.0)] {
            mix.begin_run(0, RunKind::Measured);
            mix.record(1, StepOutcome::Executed { elapsed, results: 2 });
            mix.finish_run();
        }

        a.absorb(b).unwrap();
        let stats = a.statistics();
        assert_eq!(stats.runs, 2);
        assert_eq!(stats.total_runtime, 4.0);
        assert_eq!(stats.queries[0].as_ref().unwrap().count, 2);
    }

    #[test]
    fn test_absorb_rejects_foreign_workload() {
        let mut a = QueryMix::new(workload(&[QueryType::Select], &[1], &[]));
        let b = QueryMix::new(workload(&[QueryType::Select; 2], &[1], &[]));
        assert!(a.absorb(b).is_err());
    }
}
