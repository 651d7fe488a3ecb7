use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use oracled::{EthRpcClient, ProxyMode, Runner, Telemetry};
use tempfile::tempdir;

use crate::support::helpers::{
    challenge_for, init_tracing, registry_with_challenge, test_config, wait_until, within,
    ChallengeCounter, RecordingSubmitter,
};
use crate::support::mock_rpc::{MockNode, MockRpcServer};

const GWEI: u128 = 1_000_000_000;
const PUBLIC_ADDRESS: &str = "0xE037EC8EC9ec423826750853899394dE7F024fee";

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn miner_waits_for_the_first_tracker_cycle() -> Result<()> {
    init_tracing();
    let rpc = MockRpcServer::start(MockNode::new(5, GWEI)).await?;
    let dir = tempdir()?;
    let config = test_config(rpc.url(), dir.path()).build()?;
    let counter = Arc::new(ChallengeCounter::default());
    let submitter = Arc::new(RecordingSubmitter::default());

    let mut runner = Runner::new(config, Arc::new(EthRpcClient::new(rpc.url())?))
        .with_registry(registry_with_challenge(counter.clone(), Duration::from_millis(250)))
        .with_submitter(submitter.clone());

    runner.start().await?;
    assert!(runner.telemetry().cycles_completed() >= 1);
    assert!(counter.finished() >= 1, "start returns after a full cycle");
    assert!(runner.miner_running().is_some_and(|flag| flag.is_running()));

    wait_until(Duration::from_secs(3), "first submission", || submitter.count() >= 1).await?;
    let first_cycle = counter.first_completion().expect("cycle completed");
    let first_submission = submitter.first_submission().expect("submitted");
    assert!(first_submission >= first_cycle);
    assert_eq!(submitter.submitted()[0].challenge, challenge_for(1));

    runner.stop().await;
    assert!(runner.data_server_running().is_some_and(|flag| !flag.is_running()));
    assert!(runner.miner_running().is_some_and(|flag| !flag.is_running()));

    rpc.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn end_to_end_against_a_mock_node() -> Result<()> {
    init_tracing();
    let node = MockNode::new(5, 7 * GWEI);
    node.set_balance(PUBLIC_ADDRESS, 3 * GWEI);
    let rpc = MockRpcServer::start(node.clone()).await?;
    let dir = tempdir()?;
    let config = test_config(rpc.url(), dir.path())
        .trackers(["gas", "balance", "challenge"])
        .public_address(PUBLIC_ADDRESS)
        .build()?;
    let counter = Arc::new(ChallengeCounter::default());
    let submitter = Arc::new(RecordingSubmitter::default());
    let telemetry = Arc::new(Telemetry::default());
    let client = EthRpcClient::new(rpc.url())?.with_telemetry(telemetry.clone());

    let mut runner = Runner::new(config, Arc::new(client))
        .with_telemetry(telemetry.clone())
        .with_registry(registry_with_challenge(counter.clone(), Duration::ZERO))
        .with_submitter(submitter.clone());

    runner.start().await?;
    wait_until(Duration::from_secs(3), "two challenges", || submitter.count() >= 2).await?;
    runner.stop().await;

    let submitted = submitter.submitted();
    assert_eq!(submitted[0].gas_price, Some(7 * GWEI));
    assert_ne!(submitted[0].challenge, submitted[1].challenge, "each challenge once");
    assert!(node.calls("eth_getBalance") >= 1);
    assert_eq!(runner.telemetry().tracker_failures(), 0);
    assert_eq!(runner.telemetry().submissions(), submitted.len() as u64);
    let calls = node.calls("net_version") + node.calls("eth_gasPrice") + node.calls("eth_getBalance");
    assert_eq!(telemetry.rpc_calls(), calls, "every node call is counted once");
    assert_eq!(telemetry.rpc_failures(), 0);

    rpc.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn miner_in_another_process_reads_over_the_remote_store() -> Result<()> {
    init_tracing();
    let rpc = MockRpcServer::start(MockNode::new(5, GWEI)).await?;
    let data_dir = tempdir()?;
    let miner_dir = tempdir()?;
    let counter = Arc::new(ChallengeCounter::default());

    let data_config = test_config(rpc.url(), data_dir.path())
        .proxy_mode(ProxyMode::Remote)
        .enable_miner(false)
        .build()?;
    let mut data_node = Runner::new(data_config, Arc::new(EthRpcClient::new(rpc.url())?))
        .with_registry(registry_with_challenge(counter.clone(), Duration::ZERO));
    data_node.start().await?;
    let store_addr = data_node.data_server_addr().expect("remote store bound");

    let submitter = Arc::new(RecordingSubmitter::default());
    let miner_config = test_config(rpc.url(), miner_dir.path())
        .proxy_mode(ProxyMode::Remote)
        .data_server_addr(store_addr)
        .enable_data_server(false)
        .build()?;
    let mut miner_node = Runner::new(miner_config, Arc::new(EthRpcClient::new(rpc.url())?))
        .with_submitter(submitter.clone());
    miner_node.start().await?;

    wait_until(Duration::from_secs(3), "remote submission", || submitter.count() >= 1).await?;
    assert!(!miner_dir.path().join("store").exists(), "miner opens no local store");

    miner_node.stop().await;
    data_node.stop().await;
    assert!(counter.finished() >= 1);

    rpc.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_waits_for_the_in_flight_tracker() -> Result<()> {
    init_tracing();
    let rpc = MockRpcServer::start(MockNode::new(5, GWEI)).await?;
    let dir = tempdir()?;
    let config = test_config(rpc.url(), dir.path())
        .enable_miner(false)
        .shutdown_patience(Duration::from_millis(50))
        .build()?;
    let counter = Arc::new(ChallengeCounter::default());

    let mut runner = Runner::new(config, Arc::new(EthRpcClient::new(rpc.url())?))
        .with_registry(registry_with_challenge(counter.clone(), Duration::from_millis(300)));
    runner.start().await?;
    wait_until(Duration::from_secs(2), "tracker to start", || counter.started() == 1).await?;

    within(Duration::from_secs(3), "runner stop", runner.stop()).await?;

    assert_eq!(counter.finished(), 1);
    assert!(runner.data_server_running().is_some_and(|flag| !flag.is_running()));
    assert!(runner.start().await.is_err(), "a stopped runner cannot restart");

    rpc.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_token_ends_run() -> Result<()> {
    init_tracing();
    let rpc = MockRpcServer::start(MockNode::new(5, GWEI)).await?;
    let dir = tempdir()?;
    let config = test_config(rpc.url(), dir.path()).build()?;
    let counter = Arc::new(ChallengeCounter::default());
    let submitter = Arc::new(RecordingSubmitter::default());

    let mut runner = Runner::new(config, Arc::new(EthRpcClient::new(rpc.url())?))
        .with_registry(registry_with_challenge(counter.clone(), Duration::ZERO))
        .with_submitter(submitter.clone());
    let token = runner.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        token.cancel();
    });

    within(Duration::from_secs(5), "run to return", runner.run()).await??;

    assert!(counter.finished() >= 1);
    assert!(runner.miner_running().is_some_and(|flag| !flag.is_running()));
    rpc.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn enabled_miner_needs_a_submitter() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let config = test_config("http://127.0.0.1:8545", dir.path()).build()?;
    let mut runner = Runner::new(config, Arc::new(EthRpcClient::new("http://127.0.0.1:8545")?));

    let err = runner.start().await.unwrap_err();
    assert!(err.to_string().contains("submitter"));
    assert!(runner.data_server_running().is_none());
    Ok(())
}
