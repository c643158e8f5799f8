//! Report generation for benchmark results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::query::QueryType;
use crate::querymix::{MixStatistics, QueryStatistics};

/// Run facts that the statistics themselves do not carry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportContext {
    pub scale_factor: u64,
    pub seed: u64,
    pub warmups: usize,
    /// Client count in multi-client mode
    pub clients: Option<usize>,
    /// Wall-clock runtime of the measured phase in multi-client mode
    pub actual_runtime: Option<f64>,
}

impl ReportContext {
    /// nominal / actual in multi-client mode, 1 otherwise
    pub fn overlap_ratio(&self, nominal_runtime: f64) -> f64 {
        match self.actual_runtime {
            Some(actual) if actual > 0.0 => nominal_runtime / actual,
            _ => 1.0,
        }
    }
}

/// Complete benchmark report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub generated_at: DateTime<Utc>,
    pub scale_factor: u64,
    pub warmups: usize,
    pub clients: Option<usize>,
    pub seed: u64,
    pub runs: usize,
    pub min_runtime: f64,
    pub max_runtime: f64,
    /// Sum of run runtimes (nominal runtime with several clients)
    pub total_runtime: f64,
    pub actual_runtime: Option<f64>,
    pub overlap_ratio: f64,
    pub qmph: f64,
    pub cqet: f64,
    pub cqet_geometric: f64,
    /// Indexed by ordinal - 1; `None` for ordinals without a query
    pub queries: Vec<Option<QueryReport>>,
}

/// Figures for a single query ordinal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryReport {
    #[serde(flatten)]
    pub stats: QueryStatistics,
    pub qps: f64,
}

impl BenchmarkReport {
    /// Create a report from aggregated statistics
    pub fn new(stats: &MixStatistics, context: ReportContext) -> Self {
        let overlap_ratio = context.overlap_ratio(stats.total_runtime);
        let queries = stats
            .queries
            .iter()
            .map(|q| {
                q.as_ref().map(|q| QueryReport {
                    qps: q.qps(overlap_ratio),
                    stats: q.clone(),
                })
            })
            .collect();

        Self {
            generated_at: Utc::now(),
            scale_factor: context.scale_factor,
            warmups: context.warmups,
            clients: context.clients,
            seed: context.seed,
            runs: stats.runs,
            min_runtime: stats.min_runtime,
            max_runtime: stats.max_runtime,
            total_runtime: stats.total_runtime,
            actual_runtime: context.actual_runtime,
            overlap_ratio,
            qmph: stats.qmph(overlap_ratio),
            cqet: stats.cqet,
            cqet_geometric: stats.cqet_geometric,
            queries,
        }
    }

    /// Human-readable summary; ordinals without a query are left out
    pub fn render_text(&self) -> String {
        let mut out = String::with_capacity(1024);
        out.push_str(&format!("Scale factor:           {}\n", self.scale_factor));
        out.push_str(&format!("Number of warmup runs:  {}\n", self.warmups));
        if let Some(clients) = self.clients {
            out.push_str(&format!("Number of clients:      {}\n", clients));
        }
        out.push_str(&format!("Seed:                   {}\n", self.seed));
        out.push_str(&format!(
            "Number of query mix runs (without warmups): {} times\n",
            self.runs
        ));
        out.push_str(&format!(
            "min/max Querymix runtime: {:.4}s / {:.4}s\n",
            self.min_runtime, self.max_runtime
        ));
        match self.actual_runtime {
            Some(actual) => {
                out.push_str(&format!("Total runtime (sum):    {:.3} seconds\n", self.total_runtime));
                out.push_str(&format!("Total actual runtime:   {:.3} seconds\n", actual));
            }
            None => {
                out.push_str(&format!("Total runtime:          {:.3} seconds\n", self.total_runtime));
            }
        }
        out.push_str(&format!("QMpH:                   {:.2} query mixes per hour\n", self.qmph));
        out.push_str(&format!(
            "CQET:                   {:.5} seconds average runtime of query mix\n",
            self.cqet
        ));
        out.push_str(&format!(
            "CQET (geom.):           {:.5} seconds geometric mean runtime of query mix\n",
            self.cqet_geometric
        ));
        out.push_str(&format!(
            "Generated:              {}\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        out.push('\n');

        for query in self.queries.iter().flatten() {
            let q = &query.stats;
            out.push_str(&format!("Metrics for Query:      {}\n", q.ordinal));
            out.push_str(&format!("Count:                  {} times executed in whole run\n", q.count));
            out.push_str(&format!("AQET:                   {:.6} seconds (arithmetic mean)\n", q.aqet));
            out.push_str(&format!(
                "AQET(geom.):            {:.6} seconds (geometric mean)\n",
                q.aqet_geometric
            ));
            out.push_str(&format!("QPS:                    {:.2} Queries per second\n", query.qps));
            out.push_str(&format!(
                "minQET/maxQET:          {:.8}s / {:.8}s\n",
                q.min_qet, q.max_qet
            ));
            out.push_str(&format!(
                "p50/p95/p99 QET:        {:.6}s / {:.6}s / {:.6}s\n",
                q.qet_p50, q.qet_p95, q.qet_p99
            ));
            let unit = result_label(q.query_type);
            out.push_str(&format!("Average result {:<9}{:.2}\n", format!("{}:", unit), q.avg_results));
            out.push_str(&format!(
                "min/max result {:<9}{} / {}\n",
                format!("{}:", unit),
                q.min_results,
                q.max_results
            ));
            out.push_str(&format!("Number of timeouts:     {}\n\n", q.timeouts));
        }
        out
    }

    /// XML result document; ordinals without a query get an empty stub
    pub fn render_xml(&self) -> String {
        let mut out = String::with_capacity(2048);
        out.push_str("<?xml version=\"1.0\"?>\n<bsbm>\n  <querymix>\n");
        out.push_str(&format!("     <scalefactor>{}</scalefactor>\n", self.scale_factor));
        out.push_str(&format!("     <warmups>{}</warmups>\n", self.warmups));
        if let Some(clients) = self.clients {
            out.push_str(&format!("     <nrthreads>{}</nrthreads>\n", clients));
        }
        out.push_str(&format!("     <seed>{}</seed>\n", self.seed));
        out.push_str(&format!("     <querymixruns>{}</querymixruns>\n", self.runs));
        out.push_str(&format!("     <minquerymixruntime>{:.4}</minquerymixruntime>\n", self.min_runtime));
        out.push_str(&format!("     <maxquerymixruntime>{:.4}</maxquerymixruntime>\n", self.max_runtime));
        out.push_str(&format!("     <totalruntime>{:.3}</totalruntime>\n", self.total_runtime));
        if let Some(actual) = self.actual_runtime {
            out.push_str(&format!("     <actualtotalruntime>{:.3}</actualtotalruntime>\n", actual));
        }
        out.push_str(&format!("     <qmph>{:.2}</qmph>\n", self.qmph));
        out.push_str(&format!("     <cqet>{:.5}</cqet>\n", self.cqet));
        out.push_str(&format!("     <cqetg>{:.5}</cqetg>\n", self.cqet_geometric));
        out.push_str("  </querymix>\n  <queries>\n");

        for (idx, query) in self.queries.iter().enumerate() {
            out.push_str(&format!("    <query nr=\"{}\">\n", idx + 1));
            match query {
                Some(query) => {
                    let q = &query.stats;
                    out.push_str(&format!("      <executecount>{}</executecount>\n", q.count));
                    out.push_str(&format!("      <aqet>{:.6}</aqet>\n", q.aqet));
                    out.push_str(&format!("      <aqetg>{:.6}</aqetg>\n", q.aqet_geometric));
                    out.push_str(&format!("      <qps>{:.2}</qps>\n", query.qps));
                    out.push_str(&format!("      <minqet>{:.8}</minqet>\n", q.min_qet));
                    out.push_str(&format!("      <maxqet>{:.8}</maxqet>\n", q.max_qet));
                    out.push_str(&format!("      <p50qet>{:.6}</p50qet>\n", q.qet_p50));
                    out.push_str(&format!("      <p95qet>{:.6}</p95qet>\n", q.qet_p95));
                    out.push_str(&format!("      <p99qet>{:.6}</p99qet>\n", q.qet_p99));
                    out.push_str(&format!("      <avgresults>{:.2}</avgresults>\n", q.avg_results));
                    out.push_str(&format!("      <minresults>{}</minresults>\n", q.min_results));
                    out.push_str(&format!("      <maxresults>{}</maxresults>\n", q.max_results));
                    out.push_str(&format!("      <timeoutcount>{}</timeoutcount>\n", q.timeouts));
                }
                None => {
                    out.push_str("      <executecount>0</executecount>\n");
                    out.push_str("      <aqet>0.0</aqet>\n");
                }
            }
            out.push_str("    </query>\n");
        }
        out.push_str("  </queries>\n</bsbm>\n");
        out
    }

    /// Export the report as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

fn result_label(query_type: QueryType) -> &'static str {
    if query_type.counts_rows() {
        "count"
    } else {
        "(Bytes)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::querymix::QuerySamples;

    fn stats() -> MixStatistics {
        let mut select = QuerySamples::default();
        select.record_result(0.5, 10);
        select.record_result(1.5, 30);
        let mut describe = QuerySamples::default();
        describe.record_result(0.25, 2048);
        describe.record_timeout(0.75);

        MixStatistics::from_samples(
            &[2.0, 1.0],
            &[select, QuerySamples::default(), describe],
            &[Some(QueryType::Select), None, Some(QueryType::Describe)],
        )
    }

    fn single() -> ReportContext {
        ReportContext {
            scale_factor: 284826,
            seed: 808080,
            warmups: 50,
            clients: None,
            actual_runtime: None,
        }
    }

    #[test]
    fn test_single_client_report() {
        let report = BenchmarkReport::new(&stats(), single());

        assert_eq!(report.overlap_ratio, 1.0);
        assert!((report.qmph - 2400.0).abs() < 1e-9);
        assert!((report.queries[0].as_ref().unwrap().qps - 1.0).abs() < 1e-12);
        assert!(report.queries[1].is_none());
    }

    #[test]
    fn test_multi_client_ratio() {
        let report = BenchmarkReport::new(
            &stats(),
            ReportContext {
                clients: Some(4),
                actual_runtime: Some(1.5),
                ..single()
            },
        );

        assert!((report.overlap_ratio - 2.0).abs() < 1e-12);
        assert!((report.qmph - 4800.0).abs() < 1e-9);
        assert!((report.queries[0].as_ref().unwrap().qps - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_text_skips_missing_ordinals() {
        let text = BenchmarkReport::new(&stats(), single()).render_text();

        assert!(text.contains("Scale factor:           284826"));
        assert!(text.contains("Total runtime:          3.000 seconds"));
        assert!(text.contains("Metrics for Query:      1"));
        assert!(!text.contains("Metrics for Query:      2"));
        assert!(text.contains("Metrics for Query:      3"));
        assert!(text.contains("min/max result count:   10 / 30"));
        assert!(text.contains("Average result (Bytes): 2048.00"));
        assert!(!text.contains("Number of clients"));
    }

    #[test]
    fn test_xml_keeps_stub_for_missing_ordinal() {
        let xml = BenchmarkReport::new(
            &stats(),
            ReportContext {
                clients: Some(2),
                actual_runtime: Some(3.0),
                ..single()
            },
        )
        .render_xml();

        assert!(xml.starts_with("<?xml version=\"1.0\"?>"));
        assert!(xml.contains("<nrthreads>2</nrthreads>"));
        assert!(xml.contains("<actualtotalruntime>3.000</actualtotalruntime>"));
        assert!(xml.contains(
            "<query nr=\"2\">\n      <executecount>0</executecount>\n      <aqet>0.0</aqet>\n    </query>"
        ));
        assert!(xml.contains("<timeoutcount>1</timeoutcount>"));
        assert_eq!(xml.matches("<query nr=").count(), 3);
    }

    #[test]
    fn test_json_round_trip() {
        let report = BenchmarkReport::new(&stats(), single());
        let parsed: BenchmarkReport = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(parsed.generated_at, report.generated_at);
        assert_eq!(parsed.runs, 2);
        assert_eq!(parsed.queries.len(), 3);
        assert_eq!(parsed.queries[2].as_ref().unwrap().stats.timeouts, 1);
    }
}
