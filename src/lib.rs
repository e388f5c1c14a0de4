//! Transport metrics pipeline.
//!
//! Lifecycle events from RPC/HTTP transports flow through an [`EventBus`]
//! into the [`MetricsCollector`], which correlates them into completed
//! transactions, keeps the most recent ones in a fixed-size ring buffer,
//! and derives per-endpoint latency percentiles and throughput on demand.
//!
//! [`EventBus`]: metrics::EventBus
//! [`MetricsCollector`]: metrics::MetricsCollector

pub mod config;
pub mod metrics;
