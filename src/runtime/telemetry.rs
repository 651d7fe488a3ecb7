use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(60);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Counters shared by the data server, its trackers, the fetcher, the chain
/// client, and the miner.
#[derive(Default, Debug)]
pub struct Telemetry {
    cycles_completed: AtomicU64,
    tracker_failures: AtomicU64,
    store_writes: AtomicU64,
    fetch_retries: AtomicU64,
    fetch_timeouts: AtomicU64,
    submissions: AtomicU64,
    rpc_calls: AtomicU64,
    rpc_failures: AtomicU64,
    rpc_timeouts: AtomicU64,
    rpc_latency_us: AtomicU64,
}

impl Telemetry {
    pub fn record_cycle(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tracker_failure(&self) {
        self.tracker_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_write(&self) {
        self.store_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_retry(&self) {
        self.fetch_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_timeout(&self) {
        self.fetch_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submission(&self) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one answered chain RPC call.
    pub fn record_rpc_success(&self, latency: Duration) {
        self.rpc_calls.fetch_add(1, Ordering::Relaxed);
        self.add_rpc_latency(latency);
    }

    /// Counts one failed chain RPC call; a timeout counts as a failure too.
    pub fn record_rpc_failure(&self, latency: Duration, timed_out: bool) {
        self.rpc_calls.fetch_add(1, Ordering::Relaxed);
        self.rpc_failures.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.rpc_timeouts.fetch_add(1, Ordering::Relaxed);
        }
        self.add_rpc_latency(latency);
    }

    fn add_rpc_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.rpc_latency_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn tracker_failures(&self) -> u64 {
        self.tracker_failures.load(Ordering::Relaxed)
    }

    pub fn store_writes(&self) -> u64 {
        self.store_writes.load(Ordering::Relaxed)
    }

    pub fn submissions(&self) -> u64 {
        self.submissions.load(Ordering::Relaxed)
    }

    pub fn rpc_calls(&self) -> u64 {
        self.rpc_calls.load(Ordering::Relaxed)
    }

    pub fn rpc_failures(&self) -> u64 {
        self.rpc_failures.load(Ordering::Relaxed)
    }

    pub fn rpc_timeouts(&self) -> u64 {
        self.rpc_timeouts.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            tracker_failures: self.tracker_failures.load(Ordering::Relaxed),
            store_writes: self.store_writes.load(Ordering::Relaxed),
            fetch_retries: self.fetch_retries.load(Ordering::Relaxed),
            fetch_timeouts: self.fetch_timeouts.load(Ordering::Relaxed),
            submissions: self.submissions.load(Ordering::Relaxed),
            rpc_calls: self.rpc_calls.load(Ordering::Relaxed),
            rpc_failures: self.rpc_failures.load(Ordering::Relaxed),
            rpc_timeouts: self.rpc_timeouts.load(Ordering::Relaxed),
            rpc_latency_us: self.rpc_latency_us.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub cycles_completed: u64,
    pub tracker_failures: u64,
    pub store_writes: u64,
    pub fetch_retries: u64,
    pub fetch_timeouts: u64,
    pub submissions: u64,
    pub rpc_calls: u64,
    pub rpc_failures: u64,
    pub rpc_timeouts: u64,
    /// Summed latency of every counted RPC call.
    pub rpc_latency_us: u64,
}

impl TelemetrySnapshot {
    /// Mean RPC latency of the calls counted after `earlier`, in milliseconds.
    pub fn rpc_latency_ms_since(&self, earlier: &TelemetrySnapshot) -> f64 {
        let calls = self.rpc_calls.saturating_sub(earlier.rpc_calls);
        if calls == 0 {
            return 0.0;
        }
        let micros = self.rpc_latency_us.saturating_sub(earlier.rpc_latency_us);
        micros as f64 / calls as f64 / 1_000.0
    }
}

/// Spawns a background task that periodically logs cycle rate, tracker and
/// feed health, and chain RPC latency.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of `interval` completes immediately.
        ticker.tick().await;

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "oracled::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let cycles_delta = current
                        .cycles_completed
                        .saturating_sub(last_snapshot.cycles_completed);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let cycles_per_min = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        cycles_delta as f64 * 60.0 / elapsed
                    };

                    tracing::info!(
                        target: "oracled::metrics",
                        cycles_per_min = format!("{cycles_per_min:.2}"),
                        cycles = current.cycles_completed,
                        tracker_failures = current.tracker_failures,
                        store_writes = current.store_writes,
                        fetch_retries = current.fetch_retries,
                        fetch_timeouts = current.fetch_timeouts,
                        submissions = current.submissions,
                        rpc_calls = current.rpc_calls,
                        rpc_failures = current.rpc_failures,
                        rpc_timeouts = current.rpc_timeouts,
                        rpc_avg_latency_ms = format!(
                            "{:.2}",
                            current.rpc_latency_ms_since(&last_snapshot)
                        ),
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
