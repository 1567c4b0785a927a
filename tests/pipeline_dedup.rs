mod common;

use bsc_wallet_watcher::blockchain::{HeightEvent, HeightSource};
use bsc_wallet_watcher::orchestrator::{HeightOutcome, Orchestrator};
use common::{eventually, test_config, tx_json, ChainStub, RecordingSink, OTHER, WATCHED};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use wiremock::MockServer;

const ONE_BNB: u128 = 1_000_000_000_000_000_000;

async fn setup(head: u64) -> (MockServer, ChainStub, Arc<RecordingSink>, Arc<Orchestrator>) {
    let server = MockServer::start().await;
    let stub = ChainStub::new(head);
    stub.mount(&server).await;

    let sink = Arc::new(RecordingSink::default());
    let config = test_config(&[server.uri()], &[WATCHED]);
    let orchestrator = Orchestrator::with_sink(config, sink.clone()).expect("orchestrator");

    (server, stub, sink, Arc::new(orchestrator))
}

fn event(height: u64, source: HeightSource) -> HeightEvent {
    HeightEvent { height, source }
}

#[tokio::test]
async fn test_concurrent_sources_fetch_block_once() {
    let (_server, stub, sink, orchestrator) = setup(200).await;
    stub.insert_block(200, vec![tx_json("0x01", WATCHED, Some(OTHER), ONE_BNB)]);
    orchestrator.reset_watermark(199);

    let (a, b) = tokio::join!(
        orchestrator.on_candidate_height(event(200, HeightSource::Subscription)),
        orchestrator.on_candidate_height(event(200, HeightSource::Poller)),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|o| **o == HeightOutcome::Duplicate).count(), 1);
    assert!(outcomes.contains(&HeightOutcome::Processed { matches: 1, alerts: 1 }));
    assert_eq!(stub.fetch_count(200), 1);

    assert!(orchestrator.dispatcher().drain(Duration::from_secs(2)).await);
    assert_eq!(sink.count(), 1);
    assert_eq!(orchestrator.last_confirmed_height(), 200);
}

#[tokio::test]
async fn test_outgoing_transfer_alert() {
    let (_server, stub, sink, orchestrator) = setup(100).await;
    stub.insert_block(100, vec![
        tx_json("0x01", WATCHED, Some(OTHER), ONE_BNB),
        tx_json("0x02", OTHER, Some(OTHER), ONE_BNB),
    ]);
    orchestrator.reset_watermark(99);

    let outcome = orchestrator.on_candidate_height(event(100, HeightSource::Subscription)).await;
    assert_eq!(outcome, HeightOutcome::Processed { matches: 1, alerts: 1 });

    assert!(orchestrator.dispatcher().drain(Duration::from_secs(2)).await);
    let alerts = sink.alerts.lock().unwrap().clone();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].tx_hash.as_deref(), Some("0x01"));
    assert!(alerts[0].text.contains("1.0 BNB"));
    assert!(alerts[0].text.contains("outgoing"));

    let status = orchestrator.status();
    assert_eq!(status.stats.blocks_processed, 1);
    assert_eq!(status.stats.transactions_scanned, 2);
    assert_eq!(status.stats.matches_found, 1);
}

#[tokio::test]
async fn test_confirmed_height_is_not_refetched() {
    let (_server, stub, sink, orchestrator) = setup(300).await;
    stub.insert_block(300, vec![tx_json("0x03", OTHER, Some(WATCHED), ONE_BNB)]);
    orchestrator.reset_watermark(299);

    orchestrator.on_candidate_height(event(300, HeightSource::Subscription)).await;
    let again = orchestrator.on_candidate_height(event(300, HeightSource::GapScanner)).await;

    assert_eq!(again, HeightOutcome::Duplicate);
    assert_eq!(stub.fetch_count(300), 1);
    assert!(orchestrator.dispatcher().drain(Duration::from_secs(2)).await);
    assert_eq!(sink.count(), 1);
}

#[tokio::test]
async fn test_failed_fetch_releases_height() {
    let (_server, stub, sink, orchestrator) = setup(201).await;
    stub.insert_block(201, vec![tx_json("0x04", OTHER, Some(WATCHED), ONE_BNB)]);
    stub.fail_height(201);
    orchestrator.reset_watermark(200);

    let first = orchestrator.on_candidate_height(event(201, HeightSource::Poller)).await;
    assert_eq!(first, HeightOutcome::Failed);
    assert!(!orchestrator.deduplicator().has_height(201));
    assert_eq!(orchestrator.last_confirmed_height(), 200);
    assert_eq!(orchestrator.stats().snapshot().fetch_failures, 1);

    stub.clear_failure(201);
    let retried = orchestrator.on_candidate_height(event(201, HeightSource::GapScanner)).await;
    assert_eq!(retried, HeightOutcome::Processed { matches: 1, alerts: 1 });
    assert_eq!(orchestrator.last_confirmed_height(), 201);

    assert!(orchestrator.dispatcher().drain(Duration::from_secs(2)).await);
    assert_eq!(sink.count(), 1);
}

#[tokio::test]
async fn test_missing_block_is_retried_later() {
    let (_server, stub, _sink, orchestrator) = setup(400).await;
    orchestrator.reset_watermark(400);

    // Announced before the node serves it
    let outcome = orchestrator.on_candidate_height(event(401, HeightSource::Subscription)).await;
    assert_eq!(outcome, HeightOutcome::Failed);
    assert!(!orchestrator.deduplicator().has_height(401));

    stub.set_head(401);
    let outcome = orchestrator.on_candidate_height(event(401, HeightSource::GapScanner)).await;
    assert_eq!(outcome, HeightOutcome::Processed { matches: 0, alerts: 0 });
}

#[tokio::test]
async fn test_gap_scanner_backfills_missed_heights() {
    let (_server, stub, sink, orchestrator) = setup(105).await;
    stub.insert_block(103, vec![tx_json("0x05", OTHER, Some(WATCHED), ONE_BNB)]);
    orchestrator.reset_watermark(99);

    // 101 arrived through the subscription; the rest were missed
    orchestrator.on_candidate_height(event(101, HeightSource::Subscription)).await;
    assert_eq!(orchestrator.last_confirmed_height(), 99);

    let (sender, mut receiver) = mpsc::channel(64);
    let submitted = orchestrator.gap_scanner(sender).scan_once().await.unwrap();
    assert_eq!(submitted, 5);

    while let Ok(event) = receiver.try_recv() {
        assert_eq!(event.source, HeightSource::GapScanner);
        orchestrator.on_candidate_height(event).await;
    }

    assert_eq!(orchestrator.last_confirmed_height(), 105);
    assert_eq!(stub.fetch_count(101), 1);
    assert!(orchestrator.dispatcher().drain(Duration::from_secs(2)).await);
    assert_eq!(sink.count(), 1);
}

#[tokio::test]
async fn test_poller_skips_beyond_backfill_cap() {
    let (_server, stub, _sink, orchestrator) = setup(150).await;
    orchestrator.reset_watermark(100);

    let (sender, mut receiver) = mpsc::channel(64);
    let mut poller = orchestrator.block_poller(sender, 100);
    let submitted = poller.poll_once().await.unwrap();

    // Cap is 20: 101..=130 are skipped and counted, 131..=150 processed
    assert_eq!(submitted, 20);
    assert_eq!(poller.last_seen(), 150);
    assert_eq!(orchestrator.stats().snapshot().heights_skipped, 30);
    assert_eq!(orchestrator.last_confirmed_height(), 130);

    while let Ok(event) = receiver.try_recv() {
        orchestrator.on_candidate_height(event).await;
    }
    assert_eq!(orchestrator.last_confirmed_height(), 150);
    assert_eq!(stub.fetch_count(120), 0);

    // Nothing new at the head
    assert_eq!(poller.poll_once().await.unwrap(), 0);
}

#[tokio::test]
async fn test_pipeline_run_and_shutdown() {
    let (_server, stub, sink, orchestrator) = setup(500).await;
    stub.insert_block(501, vec![tx_json("0x06", WATCHED, Some(WATCHED), ONE_BNB)]);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(orchestrator.clone().run(shutdown_rx));

    assert!(eventually(Duration::from_secs(5), || orchestrator.last_confirmed_height() >= 500).await);
    stub.set_head(501);
    assert!(eventually(Duration::from_secs(5), || sink.count() == 1).await);
    assert!(sink.alerts.lock().unwrap()[0].text.contains("internal"));

    shutdown_tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(10), handle).await;
    assert!(matches!(result, Ok(Ok(Ok(())))));
    assert_eq!(orchestrator.last_confirmed_height(), 501);
    assert_eq!(stub.fetch_count(501), 1);
}

#[tokio::test]
async fn test_replayed_height_does_not_realert() {
    let (_server, stub, sink, orchestrator) = setup(600).await;
    stub.insert_block(600, vec![tx_json("0x07", OTHER, Some(WATCHED), ONE_BNB)]);
    orchestrator.reset_watermark(599);

    let first = orchestrator.on_candidate_height(event(600, HeightSource::Subscription)).await;
    assert_eq!(first, HeightOutcome::Processed { matches: 1, alerts: 1 });
    assert!(orchestrator.deduplicator().has_tx("0x07", 600));

    // Height tracking forgets 600 but the transaction set still holds it
    orchestrator.reset_watermark(599);
    orchestrator.deduplicator().release_height(600);

    let replay = orchestrator.on_candidate_height(event(600, HeightSource::GapScanner)).await;
    assert_eq!(replay, HeightOutcome::Processed { matches: 1, alerts: 0 });
    assert_eq!(stub.fetch_count(600), 2);

    assert!(orchestrator.dispatcher().drain(Duration::from_secs(2)).await);
    assert_eq!(sink.count(), 1);
    assert_eq!(orchestrator.stats().snapshot().matches_found, 1);
}

#[tokio::test]
async fn test_poller_resumes_above_confirmed_heights() {
    let (_server, _stub, _sink, orchestrator) = setup(150).await;
    orchestrator.reset_watermark(100);

    let (sender, mut receiver) = mpsc::channel(64);
    let mut poller = orchestrator.block_poller(sender, 100);

    // The subscription kept up while the poller was not looking
    for height in 101..=140 {
        orchestrator.on_candidate_height(event(height, HeightSource::Subscription)).await;
    }
    assert_eq!(orchestrator.last_confirmed_height(), 140);

    assert_eq!(poller.poll_once().await.unwrap(), 10);
    assert_eq!(orchestrator.stats().snapshot().heights_skipped, 0);
    assert_eq!(receiver.try_recv().unwrap().height, 141);
    assert_eq!(poller.last_seen(), 150);
}

#[tokio::test]
async fn test_shutdown_stays_within_grace_with_slow_blocks() {
    let server = MockServer::start().await;
    let stub = ChainStub::new(500);
    stub.set_block_delay(Duration::from_secs(8));
    stub.mount(&server).await;

    let mut config = test_config(&[server.uri()], &[WATCHED]);
    config.rpc.timeout_seconds = 30;
    config.processing.worker_count = 1;
    let orchestrator = Arc::new(
        Orchestrator::with_sink(config, Arc::new(RecordingSink::default())).expect("orchestrator"),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(orchestrator.clone().run(shutdown_rx));

    // 500 occupies the only worker; 501..=505 queue behind it
    assert!(eventually(Duration::from_secs(5), || stub.fetch_count(500) == 1).await);
    stub.set_head(505);
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let started = std::time::Instant::now();
    shutdown_tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), handle).await;

    assert!(matches!(result, Ok(Ok(Ok(())))));
    assert!(started.elapsed() < Duration::from_secs(3), "shutdown took {:?}", started.elapsed());
    for height in 501..=505 {
        assert_eq!(stub.fetch_count(height), 0, "height {} started after shutdown", height);
    }
    assert_eq!(orchestrator.last_confirmed_height(), 499);
}
