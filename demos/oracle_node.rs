use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use oracled::{
    EthRpcClient, NodeConfig, Runner, SubmitFuture, Submitter, Telemetry, WorkSnapshot,
};

const DEFAULT_NODE_URL: &str = "http://localhost:8545";
const DEFAULT_LOG_DIRECTIVE: &str = "info";

#[tokio::main]
async fn main() -> Result<()> {
    init_example_tracing();

    let config = load_config()?;
    tracing::info!(
        node_url = config.node_url(),
        trackers = ?config.trackers(),
        proxy_mode = ?config.proxy_mode(),
        data_server = config.enable_data_server(),
        miner = config.enable_miner(),
        "starting oracle node"
    );

    let telemetry = Arc::new(Telemetry::default());
    let client = Arc::new(EthRpcClient::new(config.node_url())?.with_telemetry(telemetry.clone()));
    let mut runner = Runner::new(config, client)
        .with_telemetry(telemetry)
        .with_submitter(Arc::new(LoggingSubmitter));
    runner.run_until_ctrl_c().await
}

fn init_example_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    oracled::init_tracing();
}

/// Reads `ORACLED_CONFIG` when set; otherwise runs the default trackers
/// (minus `balance`, which needs an address) against `ORACLED_NODE_URL`.
fn load_config() -> Result<NodeConfig> {
    if let Some(path) = env::var_os("ORACLED_CONFIG") {
        return NodeConfig::from_json_file(&path)
            .with_context(|| format!("failed to load config from {}", path.to_string_lossy()));
    }

    let node_url = env::var("ORACLED_NODE_URL").unwrap_or_else(|_| DEFAULT_NODE_URL.to_owned());
    NodeConfig::builder()
        .node_url(node_url)
        .trackers(["gas", "current_variables"])
        .build()
}

/// Stands in for proof-of-work and transaction signing.
struct LoggingSubmitter;

impl Submitter for LoggingSubmitter {
    fn submit<'a>(&'a self, work: &'a WorkSnapshot) -> SubmitFuture<'a> {
        Box::pin(async move {
            tracing::info!(
                challenge = %work.challenge,
                request_id = work.request_id,
                difficulty = work.difficulty,
                query = %work.query_string,
                gas_price = ?work.gas_price,
                "new work available"
            );
            Ok(())
        })
    }
}
