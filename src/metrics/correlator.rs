use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::counters::Counters;
use super::error::MetricsResult;
use super::event::{EventType, MetricsEvent};
use super::record::{RecordBuilder, TransactionRecord};
use super::ring::RingBuffer;

/// Everything guarded by the correlator's single lock.
struct State {
    in_flight: HashMap<String, RecordBuilder>,
    cache: RingBuffer<TransactionRecord>,
    warned_full: bool,
}

/// Folds partial events into completed transactions and retires them
/// into the ring buffer.
///
/// Writes come from the bus's single dispatch task; readers (the
/// aggregator) take the same lock for the length of one traversal.
pub struct Correlator {
    state: Mutex<State>,
    counters: Arc<Counters>,
}

impl Correlator {
    pub fn new(cache_capacity: usize, counters: Arc<Counters>) -> MetricsResult<Self> {
        Ok(Self {
            state: Mutex::new(State {
                in_flight: HashMap::new(),
                cache: RingBuffer::new(cache_capacity)?,
                warned_full: false,
            }),
            counters,
        })
    }

    /// Apply one event.  Returns `true` if it completed a transaction.
    pub fn observe(&self, event: &MetricsEvent) -> bool {
        if event.event_type == EventType::Unknown {
            return false;
        }
        let mut state = self.state.lock();

        let done = state
            .in_flight
            .entry(event.request_id.clone())
            .or_default()
            .apply(event);
        if !done {
            return false;
        }

        // Terminal: retire the builder.  A later event with the same id
        // starts a brand-new transaction.
        let Some(builder) = state.in_flight.remove(&event.request_id) else {
            return false;
        };
        let record = builder.finish();

        self.counters
            .increment(record.transport, record.bucket(), record.http_status);

        if state.cache.store(record).is_some() {
            self.counters.record_eviction();
            if !state.warned_full {
                state.warned_full = true;
                tracing::debug!(
                    capacity = state.cache.capacity(),
                    "transaction cache full, evicting oldest records"
                );
            }
        }
        true
    }

    /// Run `f` over the cache while holding the lock.
    pub fn with_cache<R>(&self, f: impl FnOnce(&RingBuffer<TransactionRecord>) -> R) -> R {
        self.inspect(|cache, _| f(cache))
    }

    /// Like [`with_cache`](Self::with_cache), also passing the in-flight
    /// count.  `f` may lock the shared counters: `observe` takes them in
    /// the same order.
    pub fn inspect<R>(&self, f: impl FnOnce(&RingBuffer<TransactionRecord>, usize) -> R) -> R {
        let state = self.state.lock();
        f(&state.cache, state.in_flight.len())
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn cached(&self) -> usize {
        self.state.lock().cache.size()
    }

    /// Drop every unfinished transaction (used on shutdown).
    pub fn discard_in_flight(&self) -> usize {
        let mut state = self.state.lock();
        let n = state.in_flight.len();
        state.in_flight.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::event::Transport;
    use chrono::{Duration, Utc};

    fn correlator(cap: usize) -> (Correlator, Arc<Counters>) {
        let counters = Arc::new(Counters::new());
        (Correlator::new(cap, counters.clone()).unwrap(), counters)
    }

    fn txn(c: &Correlator, id: &str, key: &str) {
        let t = Utc::now();
        c.observe(
            &MetricsEvent::new(EventType::HeaderReceived, Transport::Rpc, id, t).with_key(key),
        );
        c.observe(&MetricsEvent::new(EventType::Begin, Transport::Rpc, id, t));
        c.observe(&MetricsEvent::new(
            EventType::End,
            Transport::Rpc,
            id,
            t + Duration::milliseconds(5),
        ));
    }

    #[test]
    fn test_completion_moves_record() {
        let (c, counters) = correlator(8);
        let t = Utc::now();

        assert!(!c.observe(&MetricsEvent::new(EventType::Begin, Transport::Http, "a", t)));
        assert_eq!(c.in_flight(), 1);
        assert_eq!(c.cached(), 0);

        assert!(c.observe(&MetricsEvent::new(EventType::End, Transport::Http, "a", t).with_status(404)));
        assert_eq!(c.in_flight(), 0);
        assert_eq!(c.cached(), 1);

        let counts = counters.copy();
        assert_eq!(counts.total, 1);
        assert_eq!(counts.by_key["unknown"].by_status[&404], 1);
    }

    #[test]
    fn test_interleaved_requests() {
        let (c, _) = correlator(8);
        let t = Utc::now();

        c.observe(&MetricsEvent::new(EventType::Begin, Transport::Http, "a", t));
        c.observe(&MetricsEvent::new(EventType::Begin, Transport::Http, "b", t));
        c.observe(&MetricsEvent::new(EventType::InPayload, Transport::Http, "a", t).with_bytes(7));
        c.observe(&MetricsEvent::new(EventType::End, Transport::Http, "b", t));
        assert_eq!(c.in_flight(), 1);

        c.observe(&MetricsEvent::new(EventType::End, Transport::Http, "a", t));
        let lengths: Vec<u64> = c.with_cache(|ring| ring.traverse().map(|r| r.in_wire_length).collect());
        assert_eq!(lengths, vec![0, 7]);
    }

    #[test]
    fn test_request_id_reuse_starts_fresh() {
        let (c, counters) = correlator(8);
        txn(&c, "same", "first");
        txn(&c, "same", "second");

        let keys: Vec<String> = c.with_cache(|ring| ring.traverse().map(|r| r.key.clone()).collect());
        assert_eq!(keys, vec!["first", "second"]);
        assert_eq!(counters.copy().total, 2);
    }

    #[test]
    fn test_evictions_counted() {
        let (c, counters) = correlator(2);
        for i in 0..5 {
            txn(&c, &format!("r{i}"), "k");
        }
        assert_eq!(c.cached(), 2);

        let counts = counters.copy();
        assert_eq!(counts.total, 5);
        assert_eq!(counts.evicted, 3);
    }

    #[test]
    fn test_unknown_event_creates_no_record() {
        let (c, _) = correlator(2);
        let done = c.observe(&MetricsEvent::new(EventType::Unknown, Transport::Rpc, "x", Utc::now()));
        assert!(!done);
        assert_eq!(c.cached(), 0);
        assert_eq!(c.in_flight(), 0);
    }

    #[test]
    fn test_inspect_sees_cache_and_in_flight_together() {
        let (c, counters) = correlator(2);
        txn(&c, "done", "k");
        c.observe(&MetricsEvent::new(EventType::Begin, Transport::Rpc, "open", Utc::now()));

        let (cached, in_flight, total) =
            c.inspect(|ring, in_flight| (ring.size(), in_flight, counters.copy().total));
        assert_eq!((cached, in_flight, total), (1, 1, 1));
    }

    #[test]
    fn test_discard_in_flight() {
        let (c, _) = correlator(2);
        let t = Utc::now();
        c.observe(&MetricsEvent::new(EventType::Begin, Transport::Rpc, "p", t));
        c.observe(&MetricsEvent::new(EventType::Begin, Transport::Rpc, "q", t));
        assert_eq!(c.discard_in_flight(), 2);
        assert_eq!(c.in_flight(), 0);
        assert_eq!(c.cached(), 0);
    }
}
