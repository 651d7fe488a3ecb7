use std::{
    future::Future,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use oracled::store::keys;
use oracled::{
    NodeConfigBuilder, SubmitFuture, Submitter, Tracker, TrackerContext, TrackerFuture,
    TrackerRegistry, WorkSnapshot,
};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

pub const CHALLENGE_TRACKER: &str = "challenge";

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Config builder with short intervals and a store under `dir`.
pub fn test_config(node_url: &str, dir: &Path) -> NodeConfigBuilder {
    oracled::NodeConfig::builder()
        .node_url(node_url)
        .db_path(dir.join("store"))
        .tracker_cycle(Duration::from_millis(100))
        .trackers([CHALLENGE_TRACKER])
        .data_server_addr("127.0.0.1:0".parse().expect("static address"))
        .mining_interval(Duration::from_millis(20))
        .metrics_interval(Duration::from_secs(60))
        .shutdown_patience(Duration::from_millis(200))
        .remote_open_timeout(Duration::from_secs(2))
}

/// What a [`ChallengeTracker`] has done so far.
#[derive(Default)]
pub struct ChallengeCounter {
    started: AtomicUsize,
    finished: AtomicUsize,
    completions: Mutex<Vec<Instant>>,
}

impl ChallengeCounter {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn first_completion(&self) -> Option<Instant> {
        self.completions.lock().expect("counter poisoned").first().copied()
    }
}

/// Writes a fresh challenge (and the keys that go with it) on every run,
/// optionally holding each run for `delay` first.
pub struct ChallengeTracker {
    counter: Arc<ChallengeCounter>,
    delay: Duration,
}

impl ChallengeTracker {
    pub fn new(counter: Arc<ChallengeCounter>, delay: Duration) -> Self {
        Self { counter, delay }
    }
}

pub fn challenge_for(round: usize) -> String {
    format!("0x{round:064x}")
}

impl Tracker for ChallengeTracker {
    fn name(&self) -> &str {
        CHALLENGE_TRACKER
    }

    fn exec<'a>(&'a self, ctx: &'a TrackerContext) -> TrackerFuture<'a> {
        Box::pin(async move {
            let round = self.counter.started.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }

            for (key, value) in [
                (keys::REQUEST_ID, format!("{round:#x}")),
                (keys::DIFFICULTY, "0x3e8".to_owned()),
                (keys::QUERY_STRING, "json(https://api.example.com/price).last".to_owned()),
                (keys::GRANULARITY, "0x3e8".to_owned()),
                (keys::TOTAL_TIP, "0x0".to_owned()),
                (keys::CURRENT_CHALLENGE, challenge_for(round)),
            ] {
                ctx.store(key, value.into_bytes()).await?;
            }

            self.counter
                .completions
                .lock()
                .expect("counter poisoned")
                .push(Instant::now());
            self.counter.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Default registry plus the `challenge` tracker reporting to `counter`.
pub fn registry_with_challenge(counter: Arc<ChallengeCounter>, delay: Duration) -> TrackerRegistry {
    let mut registry = TrackerRegistry::with_defaults();
    registry.register(CHALLENGE_TRACKER, move |_| {
        Ok(Box::new(ChallengeTracker::new(counter.clone(), delay)) as Box<dyn Tracker>)
    });
    registry
}

#[derive(Default)]
pub struct RecordingSubmitter {
    submitted: Mutex<Vec<(Instant, WorkSnapshot)>>,
}

impl RecordingSubmitter {
    pub fn submitted(&self) -> Vec<WorkSnapshot> {
        self.submitted
            .lock()
            .expect("submitter poisoned")
            .iter()
            .map(|(_, work)| work.clone())
            .collect()
    }

    pub fn first_submission(&self) -> Option<Instant> {
        self.submitted
            .lock()
            .expect("submitter poisoned")
            .first()
            .map(|(at, _)| *at)
    }

    pub fn count(&self) -> usize {
        self.submitted.lock().expect("submitter poisoned").len()
    }
}

impl Submitter for RecordingSubmitter {
    fn submit<'a>(&'a self, work: &'a WorkSnapshot) -> SubmitFuture<'a> {
        Box::pin(async move {
            self.submitted
                .lock()
                .expect("submitter poisoned")
                .push((Instant::now(), work.clone()));
            Ok(())
        })
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, what: &str, mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            bail!("timed out after {timeout:?} waiting for {what}");
        }
        sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// Awaits `future`, failing the test if it takes longer than `timeout`.
pub async fn within<T>(timeout: Duration, what: &str, future: impl Future<Output = T>) -> Result<T> {
    match tokio::time::timeout(timeout, future).await {
        Ok(value) => Ok(value),
        Err(_) => bail!("timed out after {timeout:?} waiting for {what}"),
    }
}
