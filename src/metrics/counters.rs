use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;

use super::event::Transport;

/// Running totals that survive cache eviction.  Only ever grow.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CumulativeCounts {
    /// Completed transactions since process start
    pub total: u64,
    /// Records overwritten by the ring buffer
    pub evicted: u64,
    pub by_transport: BTreeMap<Transport, u64>,
    pub by_key: BTreeMap<String, KeyCounts>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KeyCounts {
    pub total: u64,
    /// Keyed by HTTP status; 0 means no status was reported
    pub by_status: BTreeMap<u16, u64>,
    /// "2xx", "4xx", ... or "other"
    pub by_class: BTreeMap<String, u64>,
}

/// Bucket label for an HTTP status code.
pub fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

impl CumulativeCounts {
    pub fn increment(&mut self, transport: Option<Transport>, key: &str, http_status: Option<u16>) {
        self.total += 1;
        if let Some(t) = transport {
            *self.by_transport.entry(t).or_default() += 1;
        }

        let status = http_status.unwrap_or(0);
        let entry = self.by_key.entry(key.to_owned()).or_default();
        entry.total += 1;
        *entry.by_status.entry(status).or_default() += 1;
        *entry
            .by_class
            .entry(status_class(status).to_owned())
            .or_default() += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evicted += 1;
    }
}

/// Thread-safe wrapper handed to both the correlator and the reporter.
#[derive(Debug, Default)]
pub struct Counters {
    inner: Mutex<CumulativeCounts>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, transport: Option<Transport>, key: &str, http_status: Option<u16>) {
        self.inner.lock().increment(transport, key, http_status);
    }

    pub fn record_eviction(&self) {
        self.inner.lock().record_eviction();
    }

    /// Deep copy; later increments never show through.
    pub fn copy(&self) -> CumulativeCounts {
        self.inner.lock().clone()
    }
}
