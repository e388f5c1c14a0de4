use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::io::Write;

use super::collector::EndpointStats;
use super::counters::CumulativeCounts;
use super::error::MetricsResult;

/// Scope used for process-wide totals.
pub const TOTAL_SCOPE: &str = "Total";

/// Flattened `"{scope}/{metric}" → value` document.
///
/// Counters are written first and keep their slot: an endpoint named
/// `Total` or after a transport label (`http`, `rpc`, ...) cannot
/// overwrite them, and the colliding endpoint metric is dropped with a
/// warning.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FlatReport(BTreeMap<String, f64>);

/// Destination for a report.  The concrete backends live outside the
/// pipeline; a failed write is retried by the caller's own schedule.
pub trait ReportSink {
    fn write(&mut self, report: &FlatReport) -> MetricsResult<()>;
}

impl FlatReport {
    pub fn build(
        stats: &BTreeMap<String, EndpointStats>,
        counts: &CumulativeCounts,
        in_flight: usize,
    ) -> Self {
        let mut r = Self::default();

        // ── Cumulative counters ─────────────────────────────────
        r.put(TOTAL_SCOPE, "count", counts.total as f64);
        r.put(TOTAL_SCOPE, "evicted", counts.evicted as f64);
        r.put(TOTAL_SCOPE, "in_flight", in_flight as f64);
        for (transport, n) in &counts.by_transport {
            r.put(transport.label(), "count", *n as f64);
        }
        for (key, kc) in &counts.by_key {
            r.put(key, "requests", kc.total as f64);
            for (status, n) in &kc.by_status {
                r.put(key, &format!("status/{status}"), *n as f64);
            }
            for (class, n) in &kc.by_class {
                r.put(key, &format!("status/{class}"), *n as f64);
            }
        }

        // ── Latency snapshot ────────────────────────────────────
        for (key, s) in stats {
            r.put(key, "count", s.count as f64);
            r.put(key, "sum", s.sum_ms as f64);
            r.put(key, "min", s.min_ms as f64);
            r.put(key, "max", s.max_ms as f64);
            r.put(key, "avg", s.avg_ms);
            r.put(key, "errors", s.errors as f64);
            r.put(key, "partial", s.partial as f64);
            r.put(key, "ttfb_avg", s.ttfb_avg_ms);
            r.put(key, "in_throughput", s.in_throughput as f64);
            r.put(key, "out_throughput", s.out_throughput as f64);
            r.put(key, "prev_routes", s.prev_routes.len() as f64);
            for (label, v) in s.percentiles.labelled() {
                r.put(key, label, v as f64);
            }
        }

        r
    }

    fn put(&mut self, scope: &str, metric: &str, value: f64) {
        match self.0.entry(format!("{scope}/{metric}")) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(slot) => {
                tracing::warn!(key = %slot.key(), "report key already taken, endpoint metric dropped");
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn into_inner(self) -> BTreeMap<String, f64> {
        self.0
    }
}

// ─── Sinks ───────────────────────────────────────────────────────

/// Collect into an in-memory map (replacing earlier values).
impl ReportSink for BTreeMap<String, f64> {
    fn write(&mut self, report: &FlatReport) -> MetricsResult<()> {
        self.extend(report.iter().map(|(k, v)| (k.to_owned(), v)));
        Ok(())
    }
}

/// Writes each report as one JSON object per line.
pub struct JsonSink<W: Write> {
    out: W,
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReportSink for JsonSink<W> {
    fn write(&mut self, report: &FlatReport) -> MetricsResult<()> {
        serde_json::to_writer(&mut self.out, report)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

/// Emits a one-line summary of the "all" scope through `tracing`.
#[derive(Debug, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn write(&mut self, report: &FlatReport) -> MetricsResult<()> {
        let g = |k: &str| report.get(k).unwrap_or(0.0);
        tracing::info!(
            total = g("Total/count"),
            in_flight = g("Total/in_flight"),
            evicted = g("Total/evicted"),
            count = g("all/count"),
            avg_ms = g("all/avg"),
            p50_ms = g("all/p50"),
            p99_ms = g("all/p99"),
            errors = g("all/errors"),
            "metrics report"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::collector::{aggregate, ALL_KEY};
    use crate::metrics::event::Transport;
    use crate::metrics::record::TransactionRecord;
    use chrono::{Duration, Utc};

    #[test]
    fn test_empty_report_has_zero_all_entry() {
        let stats = aggregate(std::iter::empty()).unwrap();
        let report = FlatReport::build(&stats, &CumulativeCounts::default(), 0);

        assert_eq!(report.get("Total/count"), Some(0.0));
        assert_eq!(report.get("all/count"), Some(0.0));
        assert_eq!(report.get("all/p99.99"), Some(0.0));
        assert!(report.iter().all(|(_, v)| v == 0.0));
    }

    #[test]
    fn test_flat_keys() {
        let t = Utc::now();
        let rec = TransactionRecord {
            key: "GET /x".into(),
            begin_time: Some(t),
            end_time: Some(t + Duration::milliseconds(8)),
            ..Default::default()
        };
        let stats = aggregate(&[rec]).unwrap();
        let mut counts = CumulativeCounts::default();
        counts.increment(Some(Transport::Https), "GET /x", Some(201));

        let report = FlatReport::build(&stats, &counts, 3);
        assert_eq!(report.get("Total/in_flight"), Some(3.0));
        assert_eq!(report.get("https/count"), Some(1.0));
        assert_eq!(report.get("GET /x/requests"), Some(1.0));
        assert_eq!(report.get("GET /x/status/201"), Some(1.0));
        assert_eq!(report.get("GET /x/status/2xx"), Some(1.0));
        assert_eq!(report.get("GET /x/p50"), Some(8.0));
        assert_eq!(report.get(&format!("{ALL_KEY}/sum")), Some(8.0));
    }

    #[test]
    fn test_counters_keep_their_keys() {
        let t = Utc::now();
        let rec = |key: &str| TransactionRecord {
            key: key.into(),
            begin_time: Some(t),
            end_time: Some(t + Duration::milliseconds(4)),
            ..Default::default()
        };
        let stats = aggregate(&[rec(TOTAL_SCOPE), rec("http")]).unwrap();
        let mut counts = CumulativeCounts::default();
        for _ in 0..5 {
            counts.increment(Some(Transport::Http), "GET /y", Some(200));
        }

        let report = FlatReport::build(&stats, &counts, 0);
        assert_eq!(report.get("Total/count"), Some(5.0));
        assert_eq!(report.get("http/count"), Some(5.0));
        // Non-colliding metrics of those endpoints survive
        assert_eq!(report.get("Total/sum"), Some(4.0));
        assert_eq!(report.get("http/p50"), Some(4.0));
    }

    #[test]
    fn test_json_sink_writes_line() {
        let stats = aggregate(std::iter::empty()).unwrap();
        let report = FlatReport::build(&stats, &CumulativeCounts::default(), 0);

        let mut sink = JsonSink::new(Vec::new());
        sink.write(&report).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();

        assert!(out.ends_with('\n'));
        let parsed: BTreeMap<String, f64> = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(parsed.len(), report.len());
        assert_eq!(parsed["all/count"], 0.0);
    }

    #[test]
    fn test_map_sink() {
        let stats = aggregate(std::iter::empty()).unwrap();
        let report = FlatReport::build(&stats, &CumulativeCounts::default(), 0);
        let mut sink: BTreeMap<String, f64> = BTreeMap::new();
        sink.write(&report).unwrap();
        assert_eq!(sink, report.clone().into_inner());
        assert!(LogSink.write(&report).is_ok());
    }
}
