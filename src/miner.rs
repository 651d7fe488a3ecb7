//! The submission subsystem shell. Proof-of-work and transaction signing live
//! behind [`Submitter`]; this module decides when there is new work.

pub mod work;

use crate::runtime::status::RunningFlag;
use crate::runtime::telemetry::Telemetry;
use crate::store::DataProxy;
use anyhow::{bail, Result};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub use work::WorkSnapshot;

pub type SubmitFuture<'a> = BoxFuture<'a, Result<()>>;

/// Receives each new challenge once. Implemented outside this crate.
pub trait Submitter: Send + Sync {
    fn submit<'a>(&'a self, work: &'a WorkSnapshot) -> SubmitFuture<'a>;
}

pub struct MiningManager {
    proxy: Arc<dyn DataProxy>,
    submitter: Arc<dyn Submitter>,
    interval: Duration,
    telemetry: Arc<Telemetry>,
    running: RunningFlag,
    exit: CancellationToken,
    handle: Option<JoinHandle<()>>,
    started: bool,
}

impl MiningManager {
    pub fn new(
        proxy: Arc<dyn DataProxy>,
        submitter: Arc<dyn Submitter>,
        interval: Duration,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            proxy,
            submitter,
            interval,
            telemetry,
            running: RunningFlag::new(),
            exit: CancellationToken::new(),
            handle: None,
            started: false,
        }
    }

    pub fn running(&self) -> RunningFlag {
        self.running.clone()
    }

    pub fn exit_token(&self) -> CancellationToken {
        self.exit.clone()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.started {
            bail!("mining manager already started");
        }
        self.started = true;
        self.running.mark_started();
        tracing::info!(
            proxy = ?self.proxy.kind(),
            interval_ms = self.interval.as_millis() as u64,
            "starting mining manager"
        );

        let proxy = self.proxy.clone();
        let submitter = self.submitter.clone();
        let interval = self.interval;
        let telemetry = self.telemetry.clone();
        let running = self.running.clone();
        let exit = self.exit.clone();

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_challenge: Option<String> = None;

            loop {
                tokio::select! {
                    biased;
                    _ = exit.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let work = match WorkSnapshot::read(proxy.as_ref()).await {
                    Ok(Some(work)) => work,
                    Ok(None) => {
                        tracing::debug!("no challenge in the store yet");
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to read work from the store");
                        continue;
                    }
                };

                if last_challenge.as_deref() == Some(work.challenge.as_str()) {
                    continue;
                }

                match submitter.submit(&work).await {
                    Ok(()) => {
                        telemetry.record_submission();
                        tracing::info!(
                            challenge = %work.challenge,
                            request_id = work.request_id,
                            "submitted work for new challenge"
                        );
                        last_challenge = Some(work.challenge);
                    }
                    Err(err) => {
                        tracing::warn!(
                            challenge = %work.challenge,
                            error = %err,
                            "submission failed; will retry next tick"
                        );
                    }
                }
            }

            if let Err(err) = proxy.close().await {
                tracing::warn!(error = %err, "failed to close miner proxy");
            }
            running.mark_stopped();
            tracing::info!("mining manager stopped");
        }));

        Ok(())
    }

    pub fn stop(&self) {
        self.exit.cancel();
    }

    pub async fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "mining manager task panicked");
                self.running.mark_stopped();
            }
        }
    }
}
