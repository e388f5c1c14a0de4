pub mod bus;
pub mod collector;
pub mod correlator;
pub mod counters;
pub mod error;
pub mod event;
pub mod percentiles;
pub mod record;
pub mod reporter;
pub mod ring;

pub use bus::{BusHandle, EventBus, EventSender, Observer};
pub use collector::{EndpointStats, MetricsCollector, ALL_KEY};
pub use counters::{CumulativeCounts, KeyCounts};
pub use error::{MetricsError, MetricsResult, PercentileError};
pub use event::{EventType, MetricsEvent, Payload, Transport};
pub use percentiles::PercentileLadder;
pub use record::TransactionRecord;
pub use reporter::{FlatReport, JsonSink, LogSink, ReportSink};
pub use ring::RingBuffer;
