//! Ticking loop that runs every configured tracker once per cycle.

use crate::runtime::status::ReadySignal;
use crate::tracker::{Tracker, TrackerContext};
use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Created,
    Running,
    Stopped,
}

/// Runs trackers sequentially in configured order, one cycle per tick.
///
/// A cycle is never started while the previous one is in flight; late ticks are
/// delayed rather than bunched. Cancellation is checked between trackers so the
/// tracker currently executing always runs to completion. Once stopped the
/// scheduler cannot be restarted.
pub struct TrackerScheduler {
    interval: Duration,
    trackers: Arc<Vec<Box<dyn Tracker>>>,
    context: TrackerContext,
    ready: ReadySignal,
    state: Arc<watch::Sender<SchedulerState>>,
}

impl TrackerScheduler {
    pub fn new(interval: Duration, trackers: Vec<Box<dyn Tracker>>, context: TrackerContext) -> Self {
        let (state, _) = watch::channel(SchedulerState::Created);
        Self {
            interval,
            trackers: Arc::new(trackers),
            context,
            ready: ReadySignal::new(),
            state: Arc::new(state),
        }
    }

    /// Fires `ready` after the first complete cycle instead of a private signal.
    pub fn with_ready_signal(mut self, ready: ReadySignal) -> Self {
        self.ready = ready;
        self
    }

    pub fn ready(&self) -> ReadySignal {
        self.ready.clone()
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn tracker_names(&self) -> Vec<String> {
        self.trackers.iter().map(|t| t.name().to_owned()).collect()
    }

    pub fn context(&self) -> &TrackerContext {
        &self.context
    }

    /// Spawns the loop; it exits once `exit` is cancelled.
    pub fn start(&self, exit: CancellationToken) -> Result<JoinHandle<()>> {
        let mut previous = SchedulerState::Created;
        self.state.send_if_modified(|state| {
            previous = *state;
            if *state == SchedulerState::Created {
                *state = SchedulerState::Running;
                true
            } else {
                false
            }
        });
        match previous {
            SchedulerState::Created => {}
            SchedulerState::Running => bail!("tracker scheduler is already running"),
            SchedulerState::Stopped => bail!("tracker scheduler has stopped and cannot restart"),
        }

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            trackers = ?self.tracker_names(),
            "starting tracker scheduler"
        );

        let interval = self.interval;
        let trackers = self.trackers.clone();
        let context = self.context.clone();
        let ready = self.ready.clone();
        let state = self.state.clone();

        Ok(tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut cycle: u64 = 0;

            loop {
                tokio::select! {
                    biased;
                    _ = exit.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                cycle += 1;
                if !run_cycle(&trackers, &context, &exit, cycle).await {
                    tracing::info!(cycle, "tracker cycle interrupted by shutdown");
                    break;
                }

                context.telemetry.record_cycle();
                if ready.fire() {
                    tracing::info!(cycle, "first tracker cycle complete; data is ready");
                }
            }

            state.send_replace(SchedulerState::Stopped);
            tracing::info!(cycles = cycle, "tracker scheduler stopped");
        }))
    }
}

/// Returns `false` if `exit` fired before every tracker ran.
async fn run_cycle(
    trackers: &[Box<dyn Tracker>],
    context: &TrackerContext,
    exit: &CancellationToken,
    cycle: u64,
) -> bool {
    tracing::debug!(cycle, "running tracker cycle");

    for tracker in trackers {
        if exit.is_cancelled() {
            return false;
        }
        if let Err(err) = tracker.exec(context).await {
            context.telemetry.record_tracker_failure();
            tracing::warn!(tracker = tracker.name(), cycle, error = %err, "tracker failed");
        }
    }
    true
}
