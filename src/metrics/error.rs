use thiserror::Error;

/// Failures a percentile computation can report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PercentileError {
    #[error("cannot take a percentile of an empty sample set")]
    Empty,

    #[error("percentile rank {0} is outside 1..=10000 hundredths of a percent")]
    InvalidRank(u32),
}

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Invalid cache capacity: {0} (must be at least 1)")]
    InvalidCapacity(usize),

    #[error("Invalid queue capacity: {0} (must be at least 1)")]
    InvalidQueueCapacity(usize),

    #[error("Percentile computation failed for '{key}': {source}")]
    Percentile {
        key: String,
        #[source]
        source: PercentileError,
    },

    #[error("Event queue is full (capacity: {0})")]
    QueueFull(usize),

    #[error("Event bus is closed")]
    BusClosed,

    #[error("Report sink failed: {0}")]
    Sink(String),
}

impl From<std::io::Error> for MetricsError {
    fn from(e: std::io::Error) -> Self {
        Self::Sink(e.to_string())
    }
}

impl From<serde_json::Error> for MetricsError {
    fn from(e: serde_json::Error) -> Self {
        Self::Sink(e.to_string())
    }
}

pub type MetricsResult<T> = Result<T, MetricsError>;
