use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Event vocabulary ────────────────────────────────────────────

/// Lifecycle stage a transport reports for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    HeaderReceived,
    Begin,
    InPayload,
    InTrailer,
    OutPayload,
    OutTrailer,
    End,
    /// A stage this build does not know about. Ignored by the correlator.
    #[serde(other)]
    Unknown,
}

/// Wire family the event was observed on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    Rpc,
    RpcTls,
    Http,
    Https,
}

impl Transport {
    pub fn label(&self) -> &'static str {
        match self {
            Transport::Rpc => "rpc",
            Transport::RpcTls => "rpc-tls",
            Transport::Http => "http",
            Transport::Https => "https",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Stage-specific value attached to an event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum Payload {
    #[default]
    None,
    /// Bytes seen on the wire for this stage.
    Bytes(u64),
    /// Terminal error reported with the end event.
    Error(String),
}

impl Payload {
    pub fn bytes(&self) -> u64 {
        match self {
            Payload::Bytes(n) => *n,
            _ => 0,
        }
    }
}

// ─── MetricsEvent ────────────────────────────────────────────────

/// One immutable lifecycle event emitted by transport instrumentation.
///
/// Every event of one logical transaction carries the same `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsEvent {
    pub event_type: EventType,
    pub transport: Transport,
    pub request_id: String,
    /// Logical endpoint, e.g. "GET /api/users/:id" or "/pkg.Service/Method"
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub prev_route: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub value: Payload,
    /// HTTP status reported on the end event; absent for plain RPC.
    #[serde(default)]
    pub status: Option<u16>,
}

impl MetricsEvent {
    pub fn new(
        event_type: EventType,
        transport: Transport,
        request_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type,
            transport,
            request_id: request_id.into(),
            key: String::new(),
            prev_route: String::new(),
            timestamp,
            value: Payload::None,
            status: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_prev_route(mut self, prev_route: impl Into<String>) -> Self {
        self.prev_route = prev_route.into();
        self
    }

    pub fn with_bytes(mut self, n: u64) -> Self {
        self.value = Payload::Bytes(n);
        self
    }

    pub fn with_error(mut self, err: impl Into<String>) -> Self {
        self.value = Payload::Error(err.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}
