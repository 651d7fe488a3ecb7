//! The data-collection subsystem.
//!
//! `DataServer` owns the tracker scheduler, the telemetry reporter and, in
//! remote proxy mode, the JSON-RPC store server used by miners in other
//! processes. It exposes the one-shot Ready signal (first full cycle done) and
//! a Running flag that clears only after every task it spawned has exited.

use crate::runtime::config::{NodeConfig, ProxyMode};
use crate::runtime::status::{ReadySignal, RunningFlag};
use crate::runtime::telemetry::{self, Telemetry};
use crate::store::{Db, RemoteStoreServer};
use crate::tracker::{TrackerContext, TrackerRegistry, TrackerScheduler};
use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct DataServerParams<'a> {
    pub config: &'a NodeConfig,
    pub registry: &'a TrackerRegistry,
    pub context: TrackerContext,
    /// Store served to remote miners; required when the proxy mode is remote.
    pub db: Option<Db>,
}

pub struct DataServer {
    scheduler: TrackerScheduler,
    remote_store: Option<(Db, SocketAddr)>,
    remote_addr: Option<SocketAddr>,
    telemetry: Arc<Telemetry>,
    metrics_interval: Duration,
    ready: ReadySignal,
    running: RunningFlag,
    exit: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
    started: bool,
}

impl DataServer {
    pub fn new(params: DataServerParams<'_>) -> Result<Self> {
        let DataServerParams {
            config,
            registry,
            context,
            db,
        } = params;

        let built = registry.build(config);
        let telemetry = context.telemetry.clone();
        let ready = ReadySignal::new();
        let scheduler = TrackerScheduler::new(config.tracker_cycle(), built.trackers, context)
            .with_ready_signal(ready.clone());

        let remote_store = match config.proxy_mode() {
            ProxyMode::Local => None,
            ProxyMode::Remote => {
                let db = db.context("remote proxy mode needs the data server's store")?;
                Some((db, config.data_server_addr()))
            }
        };

        Ok(Self {
            scheduler,
            remote_store,
            remote_addr: None,
            telemetry,
            metrics_interval: config.metrics_interval(),
            ready,
            running: RunningFlag::new(),
            exit: CancellationToken::new(),
            supervisor: None,
            started: false,
        })
    }

    pub fn ready(&self) -> ReadySignal {
        self.ready.clone()
    }

    pub fn running(&self) -> RunningFlag {
        self.running.clone()
    }

    /// Cancelling this token asks the data server to stop.
    pub fn exit_token(&self) -> CancellationToken {
        self.exit.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn scheduler(&self) -> &TrackerScheduler {
        &self.scheduler
    }

    /// Address the remote store server actually bound, once started.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Binds the remote store server (if configured) and spawns the scheduler.
    ///
    /// A bind failure is returned before anything else starts.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            bail!("data server already started");
        }
        self.started = true;

        let remote = match &self.remote_store {
            Some((db, addr)) => {
                let server = RemoteStoreServer::start(db.clone(), *addr)
                    .await
                    .context("failed to start remote store server")?;
                self.remote_addr = Some(server.local_addr());
                Some(server)
            }
            None => None,
        };

        self.running.mark_started();
        tracing::info!(remote = ?self.remote_addr, "starting data server");

        let scheduler = match self.scheduler.start(self.exit.clone()) {
            Ok(handle) => handle,
            Err(err) => {
                if let Some(server) = remote {
                    server.stop().await;
                }
                self.running.mark_stopped();
                return Err(err);
            }
        };
        let metrics = telemetry::spawn_metrics_reporter(
            self.telemetry.clone(),
            self.exit.clone(),
            self.metrics_interval,
        );

        let running = self.running.clone();
        self.supervisor = Some(tokio::spawn(async move {
            if let Err(err) = scheduler.await {
                tracing::error!(error = %err, "tracker scheduler task panicked");
            }
            if let Some(server) = remote {
                server.stop().await;
            }
            if let Err(err) = metrics.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
            running.mark_stopped();
            tracing::info!("data server stopped");
        }));

        Ok(())
    }

    /// Requests shutdown without waiting for it.
    pub fn stop(&self) {
        self.exit.cancel();
    }

    /// Waits for every task spawned by [`DataServer::start`] to finish.
    pub async fn join(&mut self) {
        if let Some(handle) = self.supervisor.take() {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "data server supervisor panicked");
                self.running.mark_stopped();
            }
        }
    }
}
