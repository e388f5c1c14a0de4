use chrono::{DateTime, Utc};
use serde::Serialize;

use super::event::{EventType, MetricsEvent, Payload, Transport};

/// Bucket for records that never learned their endpoint.
pub const UNKNOWN_KEY: &str = "unknown";

/// A completed transaction, as retained in the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransactionRecord {
    pub key: String,
    pub transport: Option<Transport>,
    pub http_status: Option<u16>,
    pub prev_route: String,
    pub error: Option<String>,

    pub begin_time: Option<DateTime<Utc>>,
    /// Moment the transaction finished (the terminal "end" event).
    pub end_time: Option<DateTime<Utc>>,
    /// First outbound payload; drives time-to-first-byte.
    pub first_byte_time: Option<DateTime<Utc>>,
    /// Latest inbound payload/trailer capture.
    pub in_capture_time: Option<DateTime<Utc>>,
    /// Latest outbound payload/trailer capture.
    pub out_capture_time: Option<DateTime<Utc>>,

    pub in_wire_length: u64,
    pub out_wire_length: u64,
}

impl TransactionRecord {
    /// Key used for bucketing statistics and counters.
    pub fn bucket(&self) -> &str {
        if self.key.is_empty() {
            UNKNOWN_KEY
        } else {
            &self.key
        }
    }

    /// End-to-end latency in whole milliseconds, clamped at zero.
    pub fn latency_ms(&self) -> Option<u64> {
        elapsed_ms(self.begin_time?, self.end_time?)
    }

    pub fn ttfb_ms(&self) -> Option<u64> {
        elapsed_ms(self.begin_time?, self.first_byte_time?)
    }

    /// Whole seconds between begin and the last inbound capture.
    pub fn in_window_secs(&self) -> Option<u64> {
        elapsed_secs(self.begin_time?, self.in_capture_time?)
    }

    pub fn out_window_secs(&self) -> Option<u64> {
        elapsed_secs(self.begin_time?, self.out_capture_time?)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> Option<u64> {
    Some((to - from).num_milliseconds().max(0) as u64)
}

fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> Option<u64> {
    Some((to - from).num_seconds().max(0) as u64)
}

// ─── In-flight builder ───────────────────────────────────────────

/// Partial state for a request that has not seen its "end" event yet.
///
/// Exists only in the correlator's in-flight map; `finish` turns it into
/// an immutable [`TransactionRecord`].
#[derive(Debug, Default)]
pub struct RecordBuilder {
    record: TransactionRecord,
    events_seen: u32,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event in.  Returns `true` when the event was terminal.
    pub fn apply(&mut self, event: &MetricsEvent) -> bool {
        let r = &mut self.record;
        let ts = event.timestamp;

        match event.event_type {
            EventType::HeaderReceived => {
                if !event.key.is_empty() {
                    r.key = event.key.clone();
                }
                if !event.prev_route.is_empty() {
                    r.prev_route = event.prev_route.clone();
                }
                r.transport = Some(event.transport);
                r.in_wire_length += event.value.bytes();
            }
            EventType::Begin => {
                r.begin_time = Some(ts);
                r.transport.get_or_insert(event.transport);
            }
            EventType::InPayload | EventType::InTrailer => {
                r.in_wire_length += event.value.bytes();
                r.in_capture_time = Some(ts);
            }
            EventType::OutPayload => {
                r.out_wire_length += event.value.bytes();
                r.first_byte_time.get_or_insert(ts);
                r.out_capture_time = Some(ts);
            }
            EventType::OutTrailer => {
                r.out_wire_length += event.value.bytes();
                r.out_capture_time = Some(ts);
            }
            EventType::End => {
                r.end_time = Some(ts);
                r.transport.get_or_insert(event.transport);
                if event.status.is_some() {
                    r.http_status = event.status;
                }
                if let Payload::Error(e) = &event.value {
                    r.error = Some(e.clone());
                }
                self.events_seen += 1;
                return true;
            }
            EventType::Unknown => return false,
        }

        self.events_seen += 1;
        false
    }

    pub fn events_seen(&self) -> u32 {
        self.events_seen
    }

    pub fn finish(self) -> TransactionRecord {
        self.record
    }
}
