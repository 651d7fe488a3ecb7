use crate::dataserver::{DataServer, DataServerParams};
use crate::fetch::HttpFetcher;
use crate::miner::{MiningManager, Submitter};
use crate::rpc::{ChainClient, OracleContract};
use crate::runtime::config::{NodeConfig, ProxyMode};
use crate::runtime::status::RunningFlag;
use crate::runtime::telemetry::Telemetry;
use crate::store::{DataProxy, Db, LocalProxy, RemoteProxy};
use crate::tracker::{TrackerContext, TrackerRegistry};
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Starts the data server and the miner, gates the miner on the data server's
/// first cycle, and fans out shutdown to both.
///
/// A runner runs once: after [`Runner::stop`] its subsystems cannot restart.
pub struct Runner {
    config: NodeConfig,
    client: Arc<dyn ChainClient>,
    contract: Option<Arc<dyn OracleContract>>,
    submitter: Option<Arc<dyn Submitter>>,
    registry: TrackerRegistry,
    fetcher: HttpFetcher,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    db: Option<Db>,
    data_server: Option<DataServer>,
    miner: Option<MiningManager>,
    started: bool,
    stopped: bool,
}

impl Runner {
    pub fn new(config: NodeConfig, client: Arc<dyn ChainClient>) -> Self {
        let telemetry = Arc::new(Telemetry::default());
        Self {
            config,
            client,
            contract: None,
            submitter: None,
            registry: TrackerRegistry::with_defaults(),
            fetcher: HttpFetcher::default().with_telemetry(telemetry.clone()),
            telemetry,
            shutdown: CancellationToken::new(),
            db: None,
            data_server: None,
            miner: None,
            started: false,
            stopped: false,
        }
    }

    pub fn with_contract(mut self, contract: Arc<dyn OracleContract>) -> Self {
        self.contract = Some(contract);
        self
    }

    /// Required when the miner is enabled.
    pub fn with_submitter(mut self, submitter: Arc<dyn Submitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    pub fn with_registry(mut self, registry: TrackerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_fetcher(mut self, fetcher: HttpFetcher) -> Self {
        self.fetcher = fetcher.with_telemetry(self.telemetry.clone());
        self
    }

    /// Shares `telemetry` with the subsystems, e.g. the one already handed to
    /// an [`crate::rpc::EthRpcClient`], so a single reporter logs everything.
    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.fetcher = self.fetcher.with_telemetry(telemetry.clone());
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Cancelling this token stops the runner, the same as Ctrl-C.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Running flag of the data server, once started.
    pub fn data_server_running(&self) -> Option<RunningFlag> {
        self.data_server.as_ref().map(DataServer::running)
    }

    /// Address of the remote store server hosted by the data server, if any.
    pub fn data_server_addr(&self) -> Option<std::net::SocketAddr> {
        self.data_server.as_ref().and_then(DataServer::remote_addr)
    }

    /// Running flag of the miner, once started.
    pub fn miner_running(&self) -> Option<RunningFlag> {
        self.miner.as_ref().map(MiningManager::running)
    }

    /// Starts the enabled subsystems. With both enabled, returns only after the
    /// data server's first full cycle and the miner's start, or early if the
    /// runner is cancelled while waiting.
    pub async fn start(&mut self) -> Result<()> {
        if self.stopped {
            bail!("runner has already stopped");
        }
        if self.started {
            return Ok(());
        }
        if self.config.enable_miner() && self.submitter.is_none() {
            bail!("miner is enabled but no submitter was provided");
        }
        self.started = true;

        if let Err(err) = self.start_subsystems().await {
            self.stop().await;
            return Err(err);
        }
        Ok(())
    }

    async fn start_subsystems(&mut self) -> Result<()> {
        let needs_local_db = self.config.enable_data_server()
            || self.config.proxy_mode() == ProxyMode::Local;
        if needs_local_db {
            self.db = Some(Db::open(self.config.db_path())?);
        }

        if self.config.enable_data_server() {
            let db = self
                .db
                .clone()
                .context("data server needs a local store")?;
            let mut context = TrackerContext::new(
                self.client.clone(),
                Arc::new(LocalProxy::new(db.clone())),
            )
            .with_fetcher(self.fetcher.clone())
            .with_telemetry(self.telemetry.clone());
            if let Some(contract) = &self.contract {
                context = context.with_contract(contract.clone());
            }

            let mut data_server = DataServer::new(DataServerParams {
                config: &self.config,
                registry: &self.registry,
                context,
                db: Some(db),
            })?;
            data_server.start().await?;
            let ready = data_server.ready();
            self.data_server = Some(data_server);

            if self.config.enable_miner() {
                tracing::info!("waiting for the first tracker cycle before starting the miner");
                tokio::select! {
                    _ = ready.wait() => {}
                    _ = self.shutdown.cancelled() => {
                        tracing::info!("shutdown requested before the data server was ready");
                        return Ok(());
                    }
                }
            }
        }

        if self.config.enable_miner() {
            let proxy = self.miner_proxy().await?;
            let submitter = self
                .submitter
                .clone()
                .context("miner is enabled but no submitter was provided")?;
            let mut miner = MiningManager::new(
                proxy,
                submitter,
                self.config.mining_interval(),
                self.telemetry.clone(),
            );
            miner.start()?;
            self.miner = Some(miner);
        }

        Ok(())
    }

    async fn miner_proxy(&self) -> Result<Arc<dyn DataProxy>> {
        match self.config.proxy_mode() {
            ProxyMode::Local => {
                let db = self.db.clone().context("local proxy needs a local store")?;
                Ok(Arc::new(LocalProxy::new(db)))
            }
            ProxyMode::Remote => {
                let endpoint = match self
                    .data_server
                    .as_ref()
                    .and_then(DataServer::remote_addr)
                {
                    Some(addr) => format!("http://{addr}"),
                    None => self.config.data_server_url(),
                };
                let proxy = RemoteProxy::connect(endpoint, self.config.remote_open_timeout())
                    .await
                    .context("failed to open remote store proxy for the miner")?;
                Ok(Arc::new(proxy))
            }
        }
    }

    /// Cancels every started subsystem and waits until each Running flag has
    /// cleared, warning once per patience period while any is still up.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.shutdown.cancel();

        let mut subsystems = Vec::new();
        if let Some(data_server) = &self.data_server {
            data_server.stop();
            subsystems.push(("data server", data_server.running()));
        }
        if let Some(miner) = &self.miner {
            miner.stop();
            subsystems.push(("miner", miner.running()));
        }

        join_with_patience(&subsystems, self.config.shutdown_patience()).await;

        if let Some(data_server) = self.data_server.as_mut() {
            data_server.join().await;
        }
        if let Some(miner) = self.miner.as_mut() {
            miner.join().await;
        }
        if let Some(db) = &self.db {
            if let Err(err) = db.close() {
                tracing::warn!(error = %err, "failed to close store");
            }
        }
        tracing::info!("runner stopped");
    }

    /// Starts, then runs until the cancellation token fires.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        self.shutdown.cancelled().await;
        self.stop().await;
        Ok(())
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is cancelled elsewhere.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.stop().await;
        Ok(())
    }
}

/// Waits for every flag to clear. Never gives up; returns how many patience
/// warnings were logged.
pub async fn join_with_patience(subsystems: &[(&str, RunningFlag)], patience: Duration) -> u32 {
    let all_stopped = async {
        for (_, flag) in subsystems {
            flag.wait_stopped().await;
        }
    };
    tokio::pin!(all_stopped);

    let started = Instant::now();
    let mut ticker = time::interval_at(started + patience, patience);
    let mut warnings = 0;

    loop {
        tokio::select! {
            _ = &mut all_stopped => break,
            _ = ticker.tick() => {
                warnings += 1;
                let waiting_on: Vec<&str> = subsystems
                    .iter()
                    .filter(|(_, flag)| flag.is_running())
                    .map(|(name, _)| *name)
                    .collect();
                tracing::warn!(
                    waiting_on = ?waiting_on,
                    elapsed_secs = started.elapsed().as_secs(),
                    "still waiting for subsystems to stop"
                );
            }
        }
    }
    warnings
}
