use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use transport_metrics::metrics::{EventSender, EventType, MetricsError, MetricsEvent, Transport};

// ─── Simulated endpoints ─────────────────────────────────────────

struct Endpoint {
    key: &'static str,
    transport: Transport,
    /// Median service time in ms
    base_ms: u64,
    /// Typical response body size
    body_bytes: u64,
}

const ENDPOINTS: &[Endpoint] = &[
    Endpoint { key: "GET /api/users/:id", transport: Transport::Https, base_ms: 4, body_bytes: 820 },
    Endpoint { key: "POST /api/users", transport: Transport::Https, base_ms: 9, body_bytes: 240 },
    Endpoint { key: "GET /api/products/:id", transport: Transport::Http, base_ms: 3, body_bytes: 1_600 },
    Endpoint { key: "/catalog.Search/Query", transport: Transport::RpcTls, base_ms: 12, body_bytes: 12_000 },
    Endpoint { key: "/session.Store/Touch", transport: Transport::Rpc, base_ms: 1, body_bytes: 64 },
];

const PREV_ROUTES: &[&str] = &["/", "/home", "/search", "/cart", ""];

// ─── Public entry point ──────────────────────────────────────────

/// Spawns `workers` Tokio tasks that emit transaction events until
/// the deadline or the `running` flag is set to false.
pub async fn run(
    running: Arc<AtomicBool>,
    events: EventSender,
    workers: u32,
    duration_secs: u64,
    error_pct: u8,
) {
    let deadline = Instant::now() + Duration::from_secs(duration_secs);

    let mut handles = Vec::with_capacity(workers as usize);

    for worker_id in 0..workers {
        let running = running.clone();
        let events = events.clone();

        handles.push(tokio::spawn(async move {
            worker(worker_id, running, events, deadline, error_pct).await
        }));
    }

    let mut completed = 0u64;
    for h in handles {
        completed += h.await.unwrap_or(0);
    }

    // Mark run as finished
    running.store(false, Ordering::SeqCst);
    tracing::info!(completed, "synthetic load finished");
}

// ─── Worker loop ─────────────────────────────────────────────────

async fn worker(
    id: u32,
    running: Arc<AtomicBool>,
    events: EventSender,
    deadline: Instant,
    error_pct: u8,
) -> u64 {
    // Each worker gets its own deterministic RNG seeded uniquely.
    let mut rng = StdRng::seed_from_u64(1000 + id as u64);
    let mut done = 0u64;

    while running.load(Ordering::Relaxed) && Instant::now() < deadline {
        match transaction(&mut rng, &events, error_pct).await {
            Ok(()) => done += 1,
            Err(e) => {
                tracing::debug!(worker = id, "stopping: {e}");
                break;
            }
        }
    }
    done
}

// ─── One transaction ─────────────────────────────────────────────

/// Emits the full event sequence for one simulated request.
async fn transaction(
    rng: &mut StdRng,
    events: &EventSender,
    error_pct: u8,
) -> Result<(), MetricsError> {
    let ep = &ENDPOINTS[rng.gen_range(0..ENDPOINTS.len())];
    let prev_route = PREV_ROUTES.choose(rng).copied().unwrap_or_default();
    let request_id = uuid::Uuid::new_v4().to_string();
    let failed = rng.gen_range(0u8..100) < error_pct;

    let ev = |kind| MetricsEvent::new(kind, ep.transport, request_id.clone(), Utc::now());

    events
        .send(
            ev(EventType::HeaderReceived)
                .with_key(ep.key)
                .with_prev_route(prev_route)
                .with_bytes(rng.gen_range(120..480)),
        )
        .await?;
    events.send(ev(EventType::Begin)).await?;
    events
        .send(ev(EventType::InPayload).with_bytes(rng.gen_range(0..2_048)))
        .await?;

    // ── Simulated service time ──────────────────────────────────
    let jitter = rng.gen_range(0..=ep.base_ms * 2);
    let tail = if rng.gen_bool(0.01) { ep.base_ms * 20 } else { 0 };
    tokio::time::sleep(Duration::from_millis(ep.base_ms + jitter + tail)).await;

    let body = ep.body_bytes / 2 + rng.gen_range(0..=ep.body_bytes);
    events
        .send(ev(EventType::OutPayload).with_bytes(body))
        .await?;
    events
        .send(ev(EventType::OutTrailer).with_bytes(rng.gen_range(16..64)))
        .await?;

    let end = ev(EventType::End);
    let end = match (failed, ep.transport) {
        (true, Transport::Http | Transport::Https) => end.with_status(503).with_error("upstream unavailable"),
        (true, _) => end.with_error("deadline exceeded"),
        (false, Transport::Http | Transport::Https) => end.with_status(200),
        (false, _) => end,
    };
    events.send(end).await
}
