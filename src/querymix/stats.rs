//! Statistics over recorded samples.
//!
//! Nothing here keeps state of its own: every figure is derived on demand
//! from the raw sample series held by [`super::QueryMix`]. Runtimes are in
//! seconds throughout.

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

use crate::query::QueryType;

/// Highest runtime the percentile histogram tracks (10 minutes in microseconds)
const HISTOGRAM_MAX_MICROS: u64 = 600_000_000;

/// Arithmetic mean, 0 for an empty series
pub fn arithmetic_mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Geometric mean accumulated in log space.
///
/// A literal running product of a few hundred sub-second runtimes underflows
/// to zero, so the logarithms are averaged instead. Any non-positive sample
/// makes the product (and therefore the mean) zero.
pub fn geometric_mean(samples: &[f64]) -> f64 {
    if samples.is_empty() || samples.iter().any(|s| *s <= 0.0) {
        return 0.0;
    }
    let log_sum: f64 = samples.iter().map(|s| s.ln()).sum();
    (log_sum / samples.len() as f64).exp()
}

/// Runtime percentile in seconds, resolved to microseconds by an HdrHistogram
pub fn percentile(samples: &[f64], quantile: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut hist = match Histogram::<u64>::new_with_bounds(1, HISTOGRAM_MAX_MICROS, 3) {
        Ok(hist) => hist,
        Err(_) => return 0.0,
    };
    for sample in samples {
        let micros = (sample * 1_000_000.0).round() as u64;
        hist.saturating_record(micros.clamp(1, HISTOGRAM_MAX_MICROS));
    }
    hist.value_at_percentile(quantile) as f64 / 1_000_000.0
}

fn min_max<T: PartialOrd + Copy>(values: &[T]) -> Option<(T, T)> {
    let first = *values.first()?;
    Some(values.iter().fold((first, first), |(lo, hi), v| {
        (
            if *v < lo { *v } else { lo },
            if *v > hi { *v } else { hi },
        )
    }))
}

/// Raw sample series for one query ordinal
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySamples {
    /// Runtime of every execution, timed-out ones included
    pub runtimes: Vec<f64>,
    /// Result metric of every execution that answered (rows or bytes)
    pub results: Vec<u64>,
    /// Number of executions that timed out
    pub timeouts: usize,
}

impl QuerySamples {
    pub fn record_result(&mut self, runtime: f64, results: u64) {
        self.runtimes.push(runtime);
        self.results.push(results);
    }

    pub fn record_timeout(&mut self, runtime: f64) {
        self.runtimes.push(runtime);
        self.timeouts += 1;
    }

    /// Append another client's samples for the same ordinal
    pub fn extend(&mut self, other: QuerySamples) {
        self.runtimes.extend(other.runtimes);
        self.results.extend(other.results);
        self.timeouts += other.timeouts;
    }

    pub fn count(&self) -> usize {
        self.runtimes.len()
    }

    pub fn statistics(&self, ordinal: usize, query_type: QueryType) -> QueryStatistics {
        let (min_qet, max_qet) = min_max(&self.runtimes).unwrap_or((0.0, 0.0));
        let (min_results, max_results) = min_max(&self.results).unwrap_or((0, 0));
        let avg_results = if self.results.is_empty() {
            0.0
        } else {
            self.results.iter().sum::<u64>() as f64 / self.results.len() as f64
        };

        QueryStatistics {
            ordinal,
            query_type,
            count: self.count(),
            aqet: arithmetic_mean(&self.runtimes),
            aqet_geometric: geometric_mean(&self.runtimes),
            min_qet,
            max_qet,
            qet_p50: percentile(&self.runtimes, 50.0),
            qet_p95: percentile(&self.runtimes, 95.0),
            qet_p99: percentile(&self.runtimes, 99.0),
            avg_results,
            min_results,
            max_results,
            timeouts: self.timeouts,
        }
    }
}

/// Report-ready figures for one query ordinal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryStatistics {
    pub ordinal: usize,
    pub query_type: QueryType,
    pub count: usize,
    pub aqet: f64,
    pub aqet_geometric: f64,
    pub min_qet: f64,
    pub max_qet: f64,
    pub qet_p50: f64,
    pub qet_p95: f64,
    pub qet_p99: f64,
    pub avg_results: f64,
    pub min_results: u64,
    pub max_results: u64,
    pub timeouts: usize,
}

impl QueryStatistics {
    /// Queries per second, scaled by the multi-client overlap ratio
    pub fn qps(&self, overlap_ratio: f64) -> f64 {
        if self.aqet == 0.0 {
            return 0.0;
        }
        overlap_ratio / self.aqet
    }
}

/// Report-ready figures for the whole query mix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixStatistics {
    /// Completed measured runs
    pub runs: usize,
    pub min_runtime: f64,
    pub max_runtime: f64,
    /// Sum of all run runtimes (the nominal runtime in multi-client mode)
    pub total_runtime: f64,
    /// Arithmetic mean run runtime
    pub cqet: f64,
    /// Geometric mean run runtime
    pub cqet_geometric: f64,
    /// Indexed by ordinal - 1; `None` where no query owns the ordinal
    pub queries: Vec<Option<QueryStatistics>>,
}

impl MixStatistics {
    pub fn from_samples(
        run_runtimes: &[f64],
        samples: &[QuerySamples],
        query_types: &[Option<QueryType>],
    ) -> Self {
        let (min_runtime, max_runtime) = min_max(run_runtimes).unwrap_or((0.0, 0.0));

        let queries = samples
            .iter()
            .zip(query_types)
            .enumerate()
            .map(|(idx, (series, query_type))| {
                query_type.map(|qt| series.statistics(idx + 1, qt))
            })
            .collect();

        Self {
            runs: run_runtimes.len(),
            min_runtime,
            max_runtime,
            total_runtime: run_runtimes.iter().sum(),
            cqet: arithmetic_mean(run_runtimes),
            cqet_geometric: geometric_mean(run_runtimes),
            queries,
        }
    }

    /// Query mixes per hour. `overlap_ratio` is nominal / actual runtime in
    /// multi-client mode and 1 for a single client.
    pub fn qmph(&self, overlap_ratio: f64) -> f64 {
        if self.cqet == 0.0 {
            return 0.0;
        }
        3600.0 / self.cqet * overlap_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_geometric_mean_small_sample() {
        let gm = geometric_mean(&[0.1, 0.2, 0.4]);
        assert!((gm - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_geometric_mean_does_not_underflow() {
        // 500 samples of 1ms: the direct product is 1e-1500, far below f64 range
        let samples = vec![0.001; 500];
        let direct: f64 = samples.iter().product();
        assert_eq!(direct, 0.0);
        assert!((geometric_mean(&samples) - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_geometric_mean_edge_cases() {
        assert_eq!(geometric_mean(&[]), 0.0);
        assert_eq!(geometric_mean(&[0.5, 0.0]), 0.0);
    }

    #[test]
    fn test_arithmetic_mean() {
        assert_eq!(arithmetic_mean(&[]), 0.0);
        assert!((arithmetic_mean(&[1.0, 2.0, 6.0]) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_percentile_resolution() {
        let samples: Vec<f64> = (1..=100).map(|ms| ms as f64 / 1000.0).collect();
        let p50 = percentile(&samples, 50.0);
        let p99 = percentile(&samples, 99.0);
        assert!((p50 - 0.050).abs() < 0.0005);
        assert!((p99 - 0.099).abs() < 0.0005);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_query_statistics() {
        let mut samples = QuerySamples::default();
        samples.record_result(0.1, 10);
        samples.record_result(0.3, 30);
        samples.record_timeout(2.0);

        let stats = samples.statistics(4, QueryType::Select);
        assert_eq!(stats.ordinal, 4);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.timeouts, 1);
        assert!((stats.aqet - 0.8).abs() < 1e-12);
        assert_eq!(stats.min_qet, 0.1);
        assert_eq!(stats.max_qet, 2.0);
        assert!((stats.avg_results - 20.0).abs() < 1e-12);
        assert_eq!((stats.min_results, stats.max_results), (10, 30));
        assert!((stats.qps(1.0) - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_mix_statistics() {
        let mut first = QuerySamples::default();
        first.record_result(0.5, 1);
        first.record_result(1.5, 3);

        let stats = MixStatistics::from_samples(
            &[1.0, 4.0],
            &[first, QuerySamples::default()],
            &[Some(QueryType::Select), None],
        );

        assert_eq!(stats.runs, 2);
        assert_eq!(stats.min_runtime, 1.0);
        assert_eq!(stats.max_runtime, 4.0);
        assert_eq!(stats.total_runtime, 5.0);
        assert!((stats.cqet - 2.5).abs() < 1e-12);
        assert!((stats.cqet_geometric - 2.0).abs() < 1e-12);
        assert!((stats.qmph(1.0) - 1440.0).abs() < 1e-9);
        assert!((stats.qmph(4.0) - 5760.0).abs() < 1e-9);
        assert!(stats.queries[0].is_some());
        assert!(stats.queries[1].is_none());
    }

    #[test]
    fn test_empty_mix_statistics() {
        let stats = MixStatistics::from_samples(&[], &[], &[]);
        assert_eq!(stats.runs, 0);
        assert_eq!(stats.qmph(1.0), 0.0);
    }

    proptest! {
        #[test]
        fn prop_geometric_mean_matches_product(samples in prop::collection::vec(0.01f64..10.0, 1..8)) {
            let direct = samples.iter().product::<f64>().powf(1.0 / samples.len() as f64);
            let logspace = geometric_mean(&samples);
            prop_assert!((direct - logspace).abs() <= 1e-9 * direct.max(1.0));
        }

        #[test]
        fn prop_geometric_mean_bounded_by_arithmetic(samples in prop::collection::vec(0.001f64..100.0, 1..32)) {
            let gm = geometric_mean(&samples);
            let am = arithmetic_mean(&samples);
            prop_assert!(gm <= am * (1.0 + 1e-12));
        }
    }
}
