use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::MetricsConfig;

use super::bus::Observer;
use super::correlator::Correlator;
use super::counters::{Counters, CumulativeCounts};
use super::error::{MetricsError, MetricsResult};
use super::event::MetricsEvent;
use super::percentiles::PercentileLadder;
use super::record::TransactionRecord;
use super::reporter::{FlatReport, ReportSink};

// ─── Public types ────────────────────────────────────────────────

/// Synthetic key holding the aggregate over every endpoint.
pub const ALL_KEY: &str = "all";

/// Derived statistics for one endpoint, computed from the cache.
/// Never stored; rebuilt on every snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EndpointStats {
    /// Records with a measurable latency
    pub count: u64,
    pub sum_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub avg_ms: f64,
    pub percentiles: PercentileLadder,

    pub errors: u64,
    /// Records missing a begin or end timestamp
    pub partial: u64,
    pub ttfb_avg_ms: f64,

    /// Bytes per second, summed bytes over summed whole seconds
    pub in_throughput: u64,
    pub out_throughput: u64,

    pub prev_routes: BTreeSet<String>,
}

/// Thread-safe metrics engine.
/// The bus calls `observe()`, reporters and HTTP handlers read snapshots.
pub struct MetricsCollector {
    correlator: Correlator,
    counters: Arc<Counters>,
}

// ─── Internal state ──────────────────────────────────────────────

/// Running inputs for one key, gathered while the cache lock is held.
#[derive(Debug, Default)]
struct Accumulator {
    count: u64,
    sum: u64,
    min: u64,
    max: u64,
    errors: u64,
    partial: u64,
    samples: Vec<u64>,

    ttfb_sum: u64,
    ttfb_count: u64,

    in_bytes: u64,
    in_secs: u64,
    out_bytes: u64,
    out_secs: u64,

    prev_routes: BTreeSet<String>,
}

impl Accumulator {
    fn add(&mut self, r: &TransactionRecord) {
        if r.is_error() {
            self.errors += 1;
        }
        if !r.prev_route.is_empty() && !self.prev_routes.contains(&r.prev_route) {
            self.prev_routes.insert(r.prev_route.clone());
        }

        match r.latency_ms() {
            Some(ms) => self.push_latency(ms),
            None => self.partial += 1,
        }

        if let Some(ms) = r.ttfb_ms() {
            self.ttfb_sum += ms;
            self.ttfb_count += 1;
        }

        // Sub-second windows contribute nothing
        if let Some(secs) = r.in_window_secs().filter(|s| *s > 0) {
            self.in_bytes += r.in_wire_length;
            self.in_secs += secs;
        }
        if let Some(secs) = r.out_window_secs().filter(|s| *s > 0) {
            self.out_bytes += r.out_wire_length;
            self.out_secs += secs;
        }
    }

    fn push_latency(&mut self, ms: u64) {
        if self.count == 0 {
            self.min = ms;
            self.max = ms;
        } else {
            self.min = self.min.min(ms);
            self.max = self.max.max(ms);
        }
        self.count += 1;
        self.sum += ms;
        self.samples.push(ms);
    }

    /// Fold another key's inputs in; sample lists are concatenated.
    fn merge(&mut self, other: &Accumulator) {
        if other.count > 0 {
            if self.count == 0 {
                self.min = other.min;
                self.max = other.max;
            } else {
                self.min = self.min.min(other.min);
                self.max = self.max.max(other.max);
            }
        }
        self.count += other.count;
        self.sum += other.sum;
        self.errors += other.errors;
        self.partial += other.partial;
        self.samples.extend_from_slice(&other.samples);
        self.ttfb_sum += other.ttfb_sum;
        self.ttfb_count += other.ttfb_count;
        self.in_bytes += other.in_bytes;
        self.in_secs += other.in_secs;
        self.out_bytes += other.out_bytes;
        self.out_secs += other.out_secs;
        self.prev_routes.extend(other.prev_routes.iter().cloned());
    }

    fn finish(mut self, key: &str) -> MetricsResult<EndpointStats> {
        let percentiles = if self.count > 0 {
            PercentileLadder::from_samples(&mut self.samples).map_err(|source| {
                MetricsError::Percentile {
                    key: key.to_owned(),
                    source,
                }
            })?
        } else {
            PercentileLadder::default()
        };

        Ok(EndpointStats {
            count: self.count,
            sum_ms: self.sum,
            min_ms: self.min,
            max_ms: self.max,
            avg_ms: ratio(self.sum, self.count),
            percentiles,
            errors: self.errors,
            partial: self.partial,
            ttfb_avg_ms: ratio(self.ttfb_sum, self.ttfb_count),
            in_throughput: per_sec(self.in_bytes, self.in_secs),
            out_throughput: per_sec(self.out_bytes, self.out_secs),
            prev_routes: self.prev_routes,
        })
    }
}

fn ratio(sum: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

fn per_sec(bytes: u64, secs: u64) -> u64 {
    if secs == 0 {
        0
    } else {
        bytes / secs
    }
}

/// Compute per-key stats plus the synthetic [`ALL_KEY`] entry.
///
/// Percentiles for "all" come from the concatenated samples of every key,
/// never from averaging per-key percentiles.
pub fn aggregate<'a>(
    records: impl IntoIterator<Item = &'a TransactionRecord>,
) -> MetricsResult<BTreeMap<String, EndpointStats>> {
    let buckets = collect(records);
    finalize(buckets)
}

fn collect<'a>(
    records: impl IntoIterator<Item = &'a TransactionRecord>,
) -> BTreeMap<String, Accumulator> {
    let mut buckets: BTreeMap<String, Accumulator> = BTreeMap::new();
    for r in records {
        match buckets.get_mut(r.bucket()) {
            Some(acc) => acc.add(r),
            None => buckets.entry(r.bucket().to_owned()).or_default().add(r),
        }
    }
    buckets
}

fn finalize(buckets: BTreeMap<String, Accumulator>) -> MetricsResult<BTreeMap<String, EndpointStats>> {
    let mut all = Accumulator::default();
    for acc in buckets.values() {
        all.merge(acc);
    }

    let mut stats = BTreeMap::new();
    for (key, acc) in buckets {
        if key == ALL_KEY {
            tracing::warn!(key = ALL_KEY, "endpoint is shadowed by the aggregate entry");
            continue;
        }
        let s = acc.finish(&key)?;
        stats.insert(key, s);
    }
    stats.insert(ALL_KEY.to_owned(), all.finish(ALL_KEY)?);
    Ok(stats)
}

// ─── MetricsCollector impl ───────────────────────────────────────

impl MetricsCollector {
    pub fn new(config: &MetricsConfig) -> MetricsResult<Self> {
        Self::with_capacity(config.cache_capacity)
    }

    pub fn with_capacity(cache_capacity: usize) -> MetricsResult<Self> {
        let counters = Arc::new(Counters::new());
        Ok(Self {
            correlator: Correlator::new(cache_capacity, counters.clone())?,
            counters,
        })
    }

    /// Feed one event.  Returns `true` if a transaction completed.
    pub fn observe(&self, event: &MetricsEvent) -> bool {
        self.correlator.observe(event)
    }

    /// Per-endpoint statistics over everything currently cached.
    ///
    /// The cache lock is held only while bucketing records; sorting and
    /// percentile work happen after it is released.
    pub fn get_latency_stats(&self) -> MetricsResult<BTreeMap<String, EndpointStats>> {
        let buckets = self.correlator.with_cache(|ring| collect(ring.traverse()));
        finalize(buckets)
    }

    pub fn get_cumulative_counts(&self) -> CumulativeCounts {
        self.counters.copy()
    }

    /// Build one flat report and hand it to `sink`.
    pub fn report(&self, sink: &mut dyn ReportSink) -> MetricsResult<()> {
        let report = self.flat_report()?;
        sink.write(&report)
    }

    /// Cache, counters and in-flight count are read under one lock, so
    /// `Total/count` always equals cached plus evicted within a report.
    pub fn flat_report(&self) -> MetricsResult<FlatReport> {
        let (buckets, counts, in_flight) = self.correlator.inspect(|ring, in_flight| {
            (collect(ring.traverse()), self.counters.copy(), in_flight)
        });
        let stats = finalize(buckets)?;
        Ok(FlatReport::build(&stats, &counts, in_flight))
    }

    pub fn in_flight(&self) -> usize {
        self.correlator.in_flight()
    }

    pub fn cached(&self) -> usize {
        self.correlator.cached()
    }

    /// Forget unfinished transactions; they are never flushed.
    pub fn discard_in_flight(&self) -> usize {
        self.correlator.discard_in_flight()
    }
}

impl Observer for MetricsCollector {
    fn observe(&self, event: &MetricsEvent) {
        if MetricsCollector::observe(self, event) {
            tracing::trace!(request_id = %event.request_id, "transaction complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::event::{EventType, Transport};
    use chrono::{DateTime, Duration, Utc};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-19T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn record(key: &str, latency_ms: i64) -> TransactionRecord {
        TransactionRecord {
            key: key.into(),
            begin_time: Some(t0()),
            end_time: Some(t0() + Duration::milliseconds(latency_ms)),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_has_zero_all_entry() {
        let stats = aggregate(std::iter::empty()).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[ALL_KEY], EndpointStats::default());
    }

    #[test]
    fn test_per_key_and_all() {
        let records = vec![
            record("a", 10),
            record("a", 30),
            record("b", 5),
            record("b", 100),
            record("b", 50),
        ];
        let stats = aggregate(&records).unwrap();

        let a = &stats["a"];
        assert_eq!((a.count, a.sum_ms, a.min_ms, a.max_ms), (2, 40, 10, 30));
        assert_eq!(a.avg_ms, 20.0);

        let b = &stats["b"];
        assert_eq!((b.count, b.sum_ms, b.min_ms, b.max_ms), (3, 155, 5, 100));
        assert_eq!(b.percentiles.p50, 50);

        let all = &stats[ALL_KEY];
        assert_eq!(all.count, a.count + b.count);
        assert_eq!(all.sum_ms, a.sum_ms + b.sum_ms);
        assert_eq!(all.min_ms, 5);
        assert_eq!(all.max_ms, 100);
        // Concatenated samples: 5 10 30 50 100 → ⌈2.5⌉ = 3rd
        assert_eq!(all.percentiles.p50, 30);
    }

    #[test]
    fn test_partial_and_errors() {
        let mut failed = record("a", 12);
        failed.error = Some("reset by peer".into());
        let orphan = TransactionRecord {
            key: "a".into(),
            end_time: Some(t0()),
            error: Some("timeout".into()),
            ..Default::default()
        };
        let stats = aggregate(&[failed, orphan]).unwrap();

        let a = &stats["a"];
        assert_eq!(a.count, 1);
        assert_eq!(a.partial, 1);
        assert_eq!(a.errors, 2);
        assert_eq!(stats[ALL_KEY].errors, 2);
    }

    #[test]
    fn test_partial_only_key_reports_zeroes() {
        let orphan = TransactionRecord {
            key: "lonely".into(),
            ..Default::default()
        };
        let stats = aggregate(&[orphan]).unwrap();
        let s = &stats["lonely"];
        assert_eq!(s.count, 0);
        assert_eq!(s.partial, 1);
        assert_eq!(s.percentiles, PercentileLadder::default());
        assert_eq!(stats[ALL_KEY].min_ms, 0);
    }

    #[test]
    fn test_ttfb_and_prev_routes() {
        let mut r1 = record("a", 40);
        r1.first_byte_time = Some(t0() + Duration::milliseconds(10));
        r1.prev_route = "/home".into();
        let mut r2 = record("a", 40);
        r2.first_byte_time = Some(t0() + Duration::milliseconds(30));
        r2.prev_route = "/home".into();
        let mut r3 = record("b", 40);
        r3.prev_route = "/cart".into();

        let stats = aggregate(&[r1, r2, r3]).unwrap();
        assert_eq!(stats["a"].ttfb_avg_ms, 20.0);
        assert_eq!(stats["a"].prev_routes.len(), 1);
        let all_routes: Vec<&str> = stats[ALL_KEY].prev_routes.iter().map(|s| s.as_str()).collect();
        assert_eq!(all_routes, vec!["/cart", "/home"]);
    }

    #[test]
    fn test_p999_of_a_thousand_is_the_999th() {
        let records: Vec<_> = (1..=1_000).map(|ms| record("a", ms)).collect();
        let stats = aggregate(&records).unwrap();
        let p = &stats["a"].percentiles;
        assert_eq!(p.p50, 500);
        assert_eq!(p.p99, 990);
        assert_eq!(p.p999, 999);
        assert_eq!(p.p9999, 1_000);
        assert_eq!(stats[ALL_KEY].percentiles.p999, 999);
    }

    #[test]
    fn test_all_key_is_shadowed() {
        let stats = aggregate(&[record("all", 1), record("x", 9)]).unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[ALL_KEY].count, 2);
    }

    #[test]
    fn test_collector_end_to_end() {
        let collector = MetricsCollector::with_capacity(16).unwrap();
        let t = t0();
        let ev = |kind, ms| MetricsEvent::new(kind, Transport::Http, "r1", t + Duration::milliseconds(ms));

        collector.observe(&ev(EventType::HeaderReceived, 0).with_key("GET /x"));
        collector.observe(&ev(EventType::Begin, 0));
        assert_eq!(collector.in_flight(), 1);
        assert!(collector.observe(&ev(EventType::End, 25).with_status(200)));

        let stats = collector.get_latency_stats().unwrap();
        assert_eq!(stats["GET /x"].sum_ms, 25);
        assert_eq!(collector.get_cumulative_counts().by_transport[&Transport::Http], 1);
        assert_eq!(collector.cached(), 1);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            MetricsCollector::with_capacity(0),
            Err(MetricsError::InvalidCapacity(0))
        ));
    }
}
