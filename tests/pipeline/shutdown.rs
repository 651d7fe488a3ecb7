use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use oracled::rpc::encode_quantity;
use oracled::store::keys;
use oracled::{
    DataServer, DataServerParams, Db, EthRpcClient, LocalProxy, NodeConfig, TrackerContext,
};
use tempfile::tempdir;

use crate::support::helpers::{
    init_tracing, registry_with_challenge, test_config, wait_until, within, ChallengeCounter,
};
use crate::support::mock_feed::{FeedBehavior, MockFeedServer};
use crate::support::mock_rpc::{MockNode, MockRpcServer};

const GWEI: u128 = 1_000_000_000;

fn data_server(
    config: &NodeConfig,
    counter: Arc<ChallengeCounter>,
    delay: Duration,
    db: &Db,
) -> Result<DataServer> {
    let registry = registry_with_challenge(counter, delay);
    let context = TrackerContext::new(
        Arc::new(EthRpcClient::new(config.node_url())?),
        Arc::new(LocalProxy::new(db.clone())),
    );
    DataServer::new(DataServerParams {
        config,
        registry: &registry,
        context,
        db: None,
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn running_stays_set_until_the_in_flight_tracker_returns() -> Result<()> {
    init_tracing();
    let rpc = MockRpcServer::start(MockNode::new(5, GWEI)).await?;
    let dir = tempdir()?;
    let db = Db::temporary()?;
    let config = test_config(rpc.url(), dir.path()).enable_miner(false).build()?;
    let counter = Arc::new(ChallengeCounter::default());
    let mut server = data_server(&config, counter.clone(), Duration::from_millis(400), &db)?;

    server.start().await?;
    wait_until(Duration::from_secs(2), "tracker to start", || counter.started() == 1).await?;

    // Record how many runs had finished at the moment Running cleared.
    let finished_when_stopped = Arc::new(AtomicUsize::new(usize::MAX));
    let watcher = {
        let running = server.running();
        let counter = counter.clone();
        let finished_when_stopped = finished_when_stopped.clone();
        tokio::spawn(async move {
            running.wait_stopped().await;
            finished_when_stopped.store(counter.finished(), Ordering::SeqCst);
        })
    };

    server.stop();
    assert!(server.running().is_running(), "stop does not wait for the tracker");
    within(Duration::from_secs(3), "running to clear", watcher).await??;
    server.join().await;

    assert_eq!(counter.started(), 1);
    assert_eq!(finished_when_stopped.load(Ordering::SeqCst), 1);
    assert!(db.has(keys::CURRENT_CHALLENGE)?);

    rpc.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_lets_an_in_flight_feed_fetch_finish_and_persist() -> Result<()> {
    init_tracing();
    let node = MockNode::new(1, 3 * GWEI);
    let rpc = MockRpcServer::start(node.clone()).await?;
    let feed = FeedBehavior::gas_station(150);
    feed.set_delay(Duration::from_millis(400));
    let feed_server = MockFeedServer::start(feed.clone()).await?;
    let dir = tempdir()?;
    let db = Db::temporary()?;
    let config = test_config(rpc.url(), dir.path())
        .trackers(["gas"])
        .gas_feed_url(feed_server.url())
        .enable_miner(false)
        .build()?;
    let mut server = data_server(
        &config,
        Arc::new(ChallengeCounter::default()),
        Duration::ZERO,
        &db,
    )?;

    server.start().await?;
    wait_until(Duration::from_secs(2), "feed request", || feed.hits() == 1).await?;
    server.stop();
    within(Duration::from_secs(3), "running to clear", server.running().wait_stopped()).await?;
    server.join().await;

    assert_eq!(feed.completed(), 1);
    assert_eq!(feed.hits(), 1, "no cycle starts after stop");
    assert_eq!(db.get(keys::GAS_PRICE)?, encode_quantity(15 * GWEI).into_bytes());
    assert_eq!(node.calls("eth_gasPrice"), 0);

    feed_server.shutdown().await;
    rpc.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stopping_mid_cycle_skips_remaining_trackers_and_never_signals_ready() -> Result<()> {
    init_tracing();
    let node = MockNode::new(5, GWEI);
    let rpc = MockRpcServer::start(node.clone()).await?;
    let dir = tempdir()?;
    let db = Db::temporary()?;
    let config = test_config(rpc.url(), dir.path())
        .trackers(["challenge", "gas"])
        .enable_miner(false)
        .build()?;
    let counter = Arc::new(ChallengeCounter::default());
    let mut server = data_server(&config, counter.clone(), Duration::from_millis(300), &db)?;
    let ready = server.ready();

    server.start().await?;
    wait_until(Duration::from_secs(2), "tracker to start", || counter.started() == 1).await?;
    server.stop();
    within(Duration::from_secs(3), "running to clear", server.running().wait_stopped()).await?;
    server.join().await;

    assert_eq!(counter.finished(), 1);
    assert_eq!(node.calls("net_version"), 0, "gas tracker never ran");
    assert!(!ready.is_ready());
    assert_eq!(server.telemetry().cycles_completed(), 0);

    rpc.shutdown().await;
    Ok(())
}
