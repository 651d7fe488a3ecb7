use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use oracled::rpc::encode_quantity;
use oracled::store::{keys, RemoteProxy, RemoteStoreServer};
use oracled::tracker::{BalanceTracker, GasTracker};
use oracled::{
    DataProxy, DataServer, DataServerParams, Db, EthRpcClient, LocalProxy, NodeConfig, Tracker,
    TrackerContext, TrackerRegistry,
};
use tempfile::tempdir;

use crate::support::helpers::{
    init_tracing, registry_with_challenge, test_config, wait_until, within, ChallengeCounter,
};
use crate::support::mock_feed::{FeedBehavior, MockFeedServer};
use crate::support::mock_rpc::{MockNode, MockRpcServer};

const GWEI: u128 = 1_000_000_000;

fn context(node_url: &str, db: &Db) -> Result<TrackerContext> {
    let client = EthRpcClient::new(node_url)?;
    Ok(TrackerContext::new(
        Arc::new(client),
        Arc::new(LocalProxy::new(db.clone())),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_second_cycle_runs_three_or_four_times_in_three_and_a_half_seconds() -> Result<()> {
    init_tracing();
    let node = MockNode::new(5, GWEI);
    let server = MockRpcServer::start(node).await?;
    let dir = tempdir()?;
    let db = Db::temporary()?;

    let config = test_config(server.url(), dir.path())
        .tracker_cycle(Duration::from_secs(1))
        .enable_miner(false)
        .build()?;
    let counter = Arc::new(ChallengeCounter::default());
    let registry = registry_with_challenge(counter.clone(), Duration::ZERO);
    let mut data_server = DataServer::new(DataServerParams {
        config: &config,
        registry: &registry,
        context: context(server.url(), &db)?,
        db: None,
    })?;

    data_server.start().await?;
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    data_server.stop();
    within(Duration::from_secs(2), "data server stop", data_server.running().wait_stopped())
        .await?;
    data_server.join().await;

    let runs = counter.finished();
    assert!((3..=4).contains(&runs), "expected 3 or 4 cycles, saw {runs}");
    assert_eq!(data_server.telemetry().cycles_completed(), runs as u64);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn malformed_feed_falls_back_to_node_with_a_single_write() -> Result<()> {
    init_tracing();
    let node = MockNode::new(1, 3 * GWEI);
    let rpc = MockRpcServer::start(node.clone()).await?;
    let feed = FeedBehavior::new("<html>rate limited</html>");
    let feed_server = MockFeedServer::start(feed.clone()).await?;
    let db = Db::temporary()?;
    let ctx = context(rpc.url(), &db)?;

    GasTracker::new(feed_server.url()).exec(&ctx).await?;

    assert_eq!(feed.hits(), 1, "a decodable response is not retried");
    assert_eq!(node.calls("eth_gasPrice"), 1);
    assert_eq!(ctx.telemetry.store_writes(), 1);
    assert_eq!(
        db.get(keys::GAS_PRICE)?,
        encode_quantity(3 * GWEI).into_bytes()
    );

    feed_server.shutdown().await;
    rpc.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_feed_is_retried_before_falling_back() -> Result<()> {
    init_tracing();
    let node = MockNode::new(1, 4 * GWEI);
    let rpc = MockRpcServer::start(node.clone()).await?;
    let feed = FeedBehavior::gas_station(300);
    feed.set_status(503);
    let feed_server = MockFeedServer::start(feed.clone()).await?;
    let db = Db::temporary()?;
    let ctx = context(rpc.url(), &db)?;

    GasTracker::new(feed_server.url()).exec(&ctx).await?;

    assert_eq!(feed.hits(), 3, "every attempt of the retry budget is used");
    assert_eq!(node.calls("eth_gasPrice"), 1);
    assert_eq!(db.get(keys::GAS_PRICE)?, encode_quantity(4 * GWEI).into_bytes());

    feed_server.shutdown().await;
    rpc.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mainnet_prefers_the_gas_feed() -> Result<()> {
    init_tracing();
    let node = MockNode::new(1, 3 * GWEI);
    let rpc = MockRpcServer::start(node.clone()).await?;
    let feed = FeedBehavior::gas_station(205);
    let feed_server = MockFeedServer::start(feed.clone()).await?;
    let db = Db::temporary()?;
    let ctx = context(rpc.url(), &db)?;

    GasTracker::new(feed_server.url()).exec(&ctx).await?;

    assert_eq!(db.get(keys::GAS_PRICE)?, encode_quantity(20 * GWEI).into_bytes());
    assert_eq!(node.calls("eth_gasPrice"), 0);

    feed.set_body(r#"{"fast": 99.0, "fastest": 120.0, "average": 40.0}"#);
    GasTracker::new(feed_server.url()).exec(&ctx).await?;
    assert_eq!(db.get(keys::GAS_PRICE)?, encode_quantity(9 * GWEI).into_bytes());

    feed_server.shutdown().await;
    rpc.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn other_networks_never_touch_the_feed() -> Result<()> {
    init_tracing();
    let node = MockNode::new(4, 2 * GWEI);
    let rpc = MockRpcServer::start(node.clone()).await?;
    let feed = FeedBehavior::gas_station(500);
    let feed_server = MockFeedServer::start(feed.clone()).await?;
    let db = Db::temporary()?;
    let ctx = context(rpc.url(), &db)?;

    GasTracker::new(feed_server.url()).exec(&ctx).await?;

    assert_eq!(feed.hits(), 0);
    assert_eq!(db.get(keys::GAS_PRICE)?, encode_quantity(2 * GWEI).into_bytes());

    feed_server.shutdown().await;
    rpc.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn balance_is_read_for_the_configured_address() -> Result<()> {
    init_tracing();
    let address = "0xE037EC8EC9ec423826750853899394dE7F024fee";
    let node = MockNode::new(5, GWEI);
    node.set_balance(address, 42 * GWEI);
    let rpc = MockRpcServer::start(node.clone()).await?;
    let db = Db::temporary()?;
    let ctx = context(rpc.url(), &db)?;

    BalanceTracker::new(address)?.exec(&ctx).await?;

    assert_eq!(db.get(keys::BALANCE)?, encode_quantity(42 * GWEI).into_bytes());
    assert_eq!(node.calls("eth_getBalance"), 1);

    rpc.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_feed_gives_up_within_its_deadline() -> Result<()> {
    init_tracing();
    let node = MockNode::new(1, 3 * GWEI);
    let rpc = MockRpcServer::start(node.clone()).await?;
    let db = Db::temporary()?;
    let ctx = context(rpc.url(), &db)?;

    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let dead_url = format!("http://{}/gas", listener.local_addr()?);
    drop(listener);

    let started = Instant::now();
    GasTracker::new(dead_url)
        .with_feed_timeout(Duration::from_secs(2))
        .exec(&ctx)
        .await?;

    assert!(started.elapsed() < Duration::from_millis(2_500));
    assert_eq!(node.calls("eth_gasPrice"), 1);
    assert_eq!(db.get(keys::GAS_PRICE)?, encode_quantity(3 * GWEI).into_bytes());

    rpc.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn remote_proxy_tells_missing_keys_from_outages() -> Result<()> {
    init_tracing();
    let db = Db::temporary()?;
    let server = RemoteStoreServer::start(db.clone(), "127.0.0.1:0".parse()?).await?;
    let proxy = RemoteProxy::connect(server.url(), Duration::from_secs(2)).await?;

    let missing = proxy.get(keys::CURRENT_CHALLENGE).await.unwrap_err();
    assert!(missing.is_not_found(), "got {missing}");
    assert!(!proxy.has(keys::CURRENT_CHALLENGE).await?);

    proxy.put(keys::CURRENT_CHALLENGE, b"0xabc".to_vec()).await?;
    assert_eq!(db.get(keys::CURRENT_CHALLENGE)?, b"0xabc");
    assert_eq!(proxy.get(keys::CURRENT_CHALLENGE).await?, b"0xabc");

    server.stop().await;
    let outage = proxy.get(keys::CURRENT_CHALLENGE).await.unwrap_err();
    assert!(outage.is_unreachable(), "got {outage}");
    assert!(!outage.is_not_found());
    Ok(())
}

#[test]
fn unknown_tracker_names_are_reported_and_skipped() -> Result<()> {
    let config = NodeConfig::builder()
        .node_url("http://127.0.0.1:8545")
        .trackers(["gas", "psr", "current_variables", "disputes"])
        .build()?;

    let built = TrackerRegistry::with_defaults().build(&config);

    let names: Vec<_> = built.trackers.iter().map(|t| t.name().to_owned()).collect();
    assert_eq!(names, ["gas", "current_variables"]);
    assert_eq!(built.unknown, ["psr", "disputes"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn data_server_keeps_cycling_when_a_tracker_fails() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let db = Db::temporary()?;
    // Nothing listens here, so the gas tracker fails every cycle.
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let dead_node = format!("http://{}", listener.local_addr()?);
    drop(listener);

    let config = test_config(&dead_node, dir.path())
        .trackers(["gas", "challenge"])
        .enable_miner(false)
        .build()?;
    let counter = Arc::new(ChallengeCounter::default());
    let registry = registry_with_challenge(counter.clone(), Duration::ZERO);
    let mut data_server = DataServer::new(DataServerParams {
        config: &config,
        registry: &registry,
        context: context(&dead_node, &db)?,
        db: None,
    })?;

    data_server.start().await?;
    within(Duration::from_secs(10), "first cycle", data_server.ready().wait()).await?;
    wait_until(Duration::from_secs(10), "a second cycle", || counter.finished() >= 2).await?;
    data_server.stop();
    data_server.join().await;

    let telemetry = data_server.telemetry();
    assert!(telemetry.tracker_failures() >= 1);
    assert!(!db.has(keys::GAS_PRICE)?);
    assert!(db.has(keys::CURRENT_CHALLENGE)?);
    Ok(())
}
