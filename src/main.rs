use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use transport_metrics::config::Config;
use transport_metrics::metrics::{EventBus, EventSender, LogSink, MetricsCollector};

mod handlers;
mod load_generator;
mod server;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Central metrics engine. The bus feeds it, handlers read snapshots.
    pub metrics: Arc<MetricsCollector>,

    /// Producer side of the event bus, cloned into every load worker.
    pub events: EventSender,

    /// Flag checked by every load-generator worker on each iteration.
    pub load_running: Arc<AtomicBool>,

    /// Handle to the spawned load-generator task so we can await clean shutdown.
    pub load_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── 1. Configuration & logging ───────────────────────────────
    let config = Config::load()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_filter));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(filter)
        .init();

    // ── 2. Metrics pipeline ──────────────────────────────────────
    let metrics = Arc::new(MetricsCollector::new(&config.metrics)?);
    let mut bus = EventBus::new(config.metrics.queue_capacity)?;
    bus.register(metrics.clone());
    let (events, bus_handle) = bus.start();
    tracing::info!(
        cache_capacity = config.metrics.cache_capacity,
        queue_capacity = config.metrics.queue_capacity,
        "metrics pipeline ready"
    );

    // ── 3. Periodic report ───────────────────────────────────────
    let reporter = {
        let metrics = metrics.clone();
        let every = config.metrics.report_interval();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            let mut sink = LogSink;
            tick.tick().await;
            loop {
                tick.tick().await;
                if let Err(e) = metrics.report(&mut sink) {
                    tracing::warn!("report failed: {e}");
                }
            }
        })
    };

    // ── 4. Build shared state & router ───────────────────────────
    let state = Arc::new(AppState {
        metrics: metrics.clone(),
        events,
        load_running: Arc::new(AtomicBool::new(false)),
        load_handle: tokio::sync::Mutex::new(None),
    });
    let app = server::create_router(state.clone());

    // ── 5. Bind & serve ──────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(config.server.listen_addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    tracing::info!("flat report     → GET /api/metrics");
    tracing::info!("report stream   → GET /api/metrics/stream");
    tracing::info!("synthetic load  → POST /api/load/start");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // ── 6. Wind down ─────────────────────────────────────────────
    handlers::load::stop_load(&state).await;
    reporter.abort();
    let dispatched = bus_handle.shutdown().await;
    let discarded = metrics.discard_in_flight();
    tracing::info!(dispatched, discarded, "shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("cannot listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
