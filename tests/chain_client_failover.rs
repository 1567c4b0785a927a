mod common;

use bsc_wallet_watcher::blockchain::{ChainClient, TokenMetadataCache};
use bsc_wallet_watcher::error::{RpcError, WatcherError};
use common::{test_config, tx_json, ChainStub, OTHER, WATCHED};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(servers: &[&MockServer]) -> ChainClient {
    let urls: Vec<String> = servers.iter().map(|s| s.uri()).collect();
    ChainClient::new(&test_config(&urls, &[]).rpc).expect("client")
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.map(|r| r.len()).unwrap_or(0)
}

fn abi_string(value: &str) -> String {
    let mut data = vec![0u8; 64];
    data[31] = 0x20;
    data[63] = value.len() as u8;
    let mut padded = value.as_bytes().to_vec();
    padded.resize(((value.len() + 31) / 32) * 32, 0);
    data.extend(padded);
    format!("0x{}", hex::encode(data))
}

#[tokio::test]
async fn test_timeout_moves_calls_to_next_endpoint() {
    let slow = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": "0x1"}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&slow)
        .await;

    let healthy = MockServer::start().await;
    ChainStub::new(500).mount(&healthy).await;

    let client = client_for(&[&slow, &healthy]);
    assert_eq!(client.active_endpoint().name, "node-0");

    assert_eq!(client.get_chain_height().await.unwrap(), 500);
    assert_eq!(client.active_endpoint().name, "node-1");

    // Later calls go straight to the healthy node
    assert_eq!(client.get_chain_height().await.unwrap(), 500);
    assert_eq!(request_count(&slow).await, 1);
    assert_eq!(request_count(&healthy).await, 2);
}

#[tokio::test]
async fn test_server_error_and_rate_limit_rotate() {
    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&failing)
        .await;

    let throttled = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32005, "message": "limit exceeded"}
        })))
        .mount(&throttled)
        .await;

    let healthy = MockServer::start().await;
    ChainStub::new(42).mount(&healthy).await;

    let client = client_for(&[&failing, &throttled, &healthy]);
    assert_eq!(client.get_chain_height().await.unwrap(), 42);
    assert_eq!(client.active_endpoint().name, "node-2");
}

#[tokio::test]
async fn test_method_error_does_not_rotate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32602, "message": "invalid argument"}
        })))
        .mount(&server)
        .await;
    let backup = MockServer::start().await;
    ChainStub::new(1).mount(&backup).await;

    let client = client_for(&[&server, &backup]);
    let result = client.get_chain_height().await;

    assert!(matches!(result, Err(WatcherError::Rpc(RpcError::Method { code: -32602, .. }))));
    assert_eq!(client.active_endpoint().name, "node-0");
    assert_eq!(request_count(&server).await, 1);
    assert_eq!(request_count(&backup).await, 0);
}

#[tokio::test]
async fn test_garbage_responses_rotate_after_threshold() {
    let broken = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&broken)
        .await;
    let healthy = MockServer::start().await;
    ChainStub::new(77).mount(&healthy).await;

    let client = client_for(&[&broken, &healthy]);

    // Each bad answer fails its own call; the third in a row moves the pool on
    for _ in 0..3 {
        let error = client.get_chain_height().await.unwrap_err();
        assert!(matches!(error, WatcherError::Rpc(RpcError::Json(_))));
    }
    assert_eq!(client.active_endpoint().name, "node-1");

    let mut answered = 0;
    for _ in 0..17 {
        if client.get_chain_height().await.unwrap() == 77 {
            answered += 1;
        }
    }
    assert_eq!(answered, 17);
    assert_eq!(request_count(&broken).await, 3);
    assert_eq!(request_count(&healthy).await, 17);
    assert_eq!(client.request_count(), 20);
}

#[tokio::test]
async fn test_success_resets_failure_streak() {
    let flaky = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1})))
        .up_to_n_times(2)
        .mount(&flaky)
        .await;
    ChainStub::new(9).mount(&flaky).await;
    let backup = MockServer::start().await;
    ChainStub::new(9).mount(&backup).await;

    let client = client_for(&[&flaky, &backup]);
    assert!(client.get_chain_height().await.is_err());
    assert!(client.get_chain_height().await.is_err());
    assert_eq!(client.get_chain_height().await.unwrap(), 9);

    // Two failures, a success, then nothing: still on the first node
    assert_eq!(client.active_endpoint().name, "node-0");
    assert_eq!(request_count(&backup).await, 0);
}

#[tokio::test]
async fn test_requests_are_throttled() {
    let server = MockServer::start().await;
    ChainStub::new(3).mount(&server).await;

    let mut config = test_config(&[server.uri()], &[]);
    config.rpc.requests_per_second = 10;
    let client = ChainClient::new(&config.rpc).unwrap();

    let started = Instant::now();
    for _ in 0..6 {
        client.get_chain_height().await.unwrap();
    }

    // First request goes out at once, the next five wait 100ms each
    assert!(started.elapsed() >= Duration::from_millis(450), "took {:?}", started.elapsed());
    assert_eq!(client.request_count(), 6);
}

#[tokio::test]
async fn test_exhausted_pool_surfaces_transient_error() {
    let a = MockServer::start().await;
    let b = MockServer::start().await;
    for server in [&a, &b] {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(server)
            .await;
    }

    let client = client_for(&[&a, &b]);
    let error = client.get_chain_height().await.unwrap_err();

    assert!(error.is_transport());
    assert_eq!(request_count(&a).await + request_count(&b).await, 2);
}

#[tokio::test]
async fn test_block_and_transaction_lookup() {
    let server = MockServer::start().await;
    let stub = ChainStub::new(100);
    stub.insert_block(100, vec![tx_json("0xab01", "0xD196A0E08BFD8B2B41A0A1DDBE1E5E4E4E4E8308", Some(OTHER), 1_000_000_000_000_000_000)]);
    stub.mount(&server).await;

    let client = client_for(&[&server]);

    let block = client.get_block(100).await.unwrap().expect("block 100");
    assert_eq!(block.height, 100);
    assert_eq!(block.transactions.len(), 1);
    assert_eq!(block.transactions[0].from, WATCHED);

    // Beyond the head the node answers null
    assert!(client.get_block(101).await.unwrap().is_none());

    stub.insert_block(99, vec![tx_json("0xcd02", OTHER, None, 5)]);
    let tx = client.get_transaction_by_hash("0xCD02").await.unwrap().expect("tx");
    assert_eq!(tx.hash, "0xcd02");
    assert!(tx.to.is_none());
    assert!(client.get_transaction_by_hash("0xee03").await.unwrap().is_none());
}

#[tokio::test]
async fn test_token_metadata_lookup_is_cached() {
    let server = MockServer::start().await;
    let stub = ChainStub::new(1);
    stub.set_call_result("0x06fdde03", &abi_string("PancakeSwap Token"));
    stub.set_call_result("0x95d89b41", &abi_string("Cake"));
    stub.set_call_result("0x313ce567", &format!("0x{:064x}", 18));
    stub.mount(&server).await;

    let client = Arc::new(client_for(&[&server]));
    let raw = client.eth_call(OTHER, &[0x31, 0x3c, 0xe5, 0x67]).await.unwrap();
    assert_eq!(raw.len(), 32);
    assert_eq!(raw[31], 18);

    let cache = TokenMetadataCache::new(client, Duration::from_secs(60));
    let token = cache.get(OTHER).await;
    assert_eq!(token.symbol, "Cake");
    assert_eq!(token.name, "PancakeSwap Token");
    assert_eq!(token.decimals, 18);

    let before = request_count(&server).await;
    assert_eq!(cache.get(OTHER).await, token);
    assert_eq!(request_count(&server).await, before);
}

#[tokio::test]
async fn test_reverted_token_calls_fall_back() {
    let server = MockServer::start().await;
    ChainStub::new(1).mount(&server).await;

    let cache = TokenMetadataCache::new(Arc::new(client_for(&[&server])), Duration::from_secs(60));
    let token = cache.get(OTHER).await;

    assert_eq!(token.address, OTHER);
    assert_eq!(token.name, "Unknown");
    assert_eq!(token.symbol, "UNKNOWN");
    assert_eq!(token.decimals, 18);
    // Nothing resolved, so the next alert asks again
    assert!(cache.cached(OTHER).is_none());
}

#[tokio::test]
async fn test_partial_token_metadata_is_cached() {
    let server = MockServer::start().await;
    let stub = ChainStub::new(1);
    stub.set_call_result("0x95d89b41", &abi_string("MEME"));
    stub.mount(&server).await;

    let cache = TokenMetadataCache::new(Arc::new(client_for(&[&server])), Duration::from_secs(60));
    let token = cache.get(OTHER).await;

    assert_eq!(token.symbol, "MEME");
    assert_eq!(token.name, "Unknown");
    assert_eq!(token.decimals, 18);
    assert_eq!(cache.cached(OTHER), Some(token));
}
