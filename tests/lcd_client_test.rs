//! Integration tests for the LCD client against a mock HTTP server
//!
//! This test validates:
//! - account, balance and smart query decoding
//! - block-mode broadcast parsing, failed transactions included
//! - status classification (transient vs. rejection)
//! - executor reads retried, broadcasts never
//! - the settle delay follows every broadcast
//! - latest block decoding, retried as a read

use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

use perp_deployer::chain::retry::RetryPolicy;
use perp_deployer::chain::tx::{Fee, Msg, StdTx};
use perp_deployer::chain::{AccountInfo, ChainClient, ChainEndpoint, ClientConfig, LcdClient};
use perp_deployer::fees::{FeePolicy, NetworkFees};
use perp_deployer::types::Coin;
use perp_deployer::{HarnessError, Secp256k1Wallet, TxExecutor};

const ADDRESS: &str = "terra1x46rqay4d3cssq8gxxvqz8xt6nwlz4td20k38v";

fn client(url: &str, retry: RetryPolicy) -> LcdClient {
    let config = ClientConfig {
        settle_delay: Duration::ZERO,
        request_timeout: Duration::from_secs(5),
        retry,
        ..ClientConfig::default()
    };
    LcdClient::new(ChainEndpoint::new("localterra", url, "terra"), config).unwrap()
}

fn client_with_settle(url: &str, settle_delay: Duration) -> LcdClient {
    let config = ClientConfig {
        settle_delay,
        request_timeout: Duration::from_secs(5),
        retry: RetryPolicy::none(),
        ..ClientConfig::default()
    };
    LcdClient::new(ChainEndpoint::new("localterra", url, "terra"), config).unwrap()
}

fn confirmed_tx_body() -> String {
    json!({
        "height": "130",
        "txhash": "5E77",
        "raw_log": "[]",
        "gas_wanted": "200000",
        "gas_used": "75000",
        "logs": []
    })
    .to_string()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 5,
        jitter_factor: 0.0,
    }
}

fn send_tx() -> StdTx {
    StdTx::unsigned(
        vec![Msg::Send {
            from_address: ADDRESS.to_string(),
            to_address: "terra1dest".to_string(),
            amount: vec![Coin::new(1_000, "uusd")],
        }],
        Fee::new(200_000, Vec::new()),
        "",
    )
}

#[tokio::test]
async fn test_account_decoding() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", format!("/cosmos/auth/v1beta1/accounts/{}", ADDRESS).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "account": {
                    "@type": "/cosmos.auth.v1beta1.BaseAccount",
                    "address": ADDRESS,
                    "account_number": "42",
                    "sequence": "7"
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let lcd = client(&server.url(), RetryPolicy::none());
    let account = lcd.account(ADDRESS).await.unwrap();

    assert_eq!(
        account,
        AccountInfo {
            account_number: 42,
            sequence: 7
        }
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_broadcast_parses_events() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/txs")
        .match_body(Matcher::PartialJson(json!({ "mode": "block" })))
        .with_status(200)
        .with_body(
            json!({
                "height": "120",
                "txhash": "9A1F",
                "raw_log": "[]",
                "gas_wanted": "200000",
                "gas_used": "81234",
                "logs": [{
                    "msg_index": 0,
                    "events": [{
                        "type": "store_code",
                        "attributes": [{ "key": "code_id", "value": "7" }]
                    }]
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let lcd = client(&server.url(), RetryPolicy::none());
    let result = lcd.broadcast(&send_tx()).await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.height, 120);
    assert_eq!(result.gas_used, 81_234);
    assert_eq!(result.first_attribute("store_code", "code_id"), Some("7"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_broadcast_keeps_failed_tx_verbatim() {
    let mut server = Server::new_async().await;
    let raw_log = "failed to execute message; message index: 0: amm is closed: execute wasm contract failed";
    server
        .mock("POST", "/txs")
        .with_status(200)
        .with_body(
            json!({
                "height": "121",
                "txhash": "77B0",
                "raw_log": raw_log,
                "gas_wanted": "200000",
                "gas_used": "90000",
                "code": 5,
                "codespace": "wasm"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let lcd = client(&server.url(), RetryPolicy::none());
    let result = lcd.broadcast(&send_tx()).await.unwrap();
    assert!(!result.is_success());

    match result.into_result().unwrap_err() {
        HarnessError::Chain { code, codespace, raw_log: log } => {
            assert_eq!(code, 5);
            assert_eq!(codespace.as_deref(), Some("wasm"));
            assert_eq!(log, raw_log);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_smart_query_and_balance() {
    let mut server = Server::new_async().await;
    server
        .mock(
            "GET",
            Matcher::Regex(r"^/cosmwasm/wasm/v1/contract/terra1vamm/smart/.+$".to_string()),
        )
        .with_status(200)
        .with_body(json!({ "data": { "open": true, "total_position_size": "-25000000" } }).to_string())
        .create_async()
        .await;
    server
        .mock("GET", format!("/cosmos/bank/v1beta1/balances/{}/by_denom", ADDRESS).as_str())
        .match_query(Matcher::UrlEncoded("denom".to_string(), "uusd".to_string()))
        .with_status(200)
        .with_body(json!({ "balance": { "denom": "uusd", "amount": "950000000" } }).to_string())
        .create_async()
        .await;

    let lcd = client(&server.url(), RetryPolicy::none());
    let state = lcd.query_smart("terra1vamm", &json!({ "state": {} })).await.unwrap();
    assert_eq!(state["open"], json!(true));
    assert_eq!(lcd.balance(ADDRESS, "uusd").await.unwrap(), 950_000_000);
}

#[tokio::test]
async fn test_latest_block() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/cosmos/base/tendermint/v1beta1/blocks/latest")
        .with_status(200)
        .with_body(
            json!({
                "block_id": { "hash": "3Q5Y" },
                "block": {
                    "header": {
                        "chain_id": "localterra",
                        "height": "4521",
                        "time": "2021-11-03T10:15:30.123456789Z"
                    },
                    "data": { "txs": [] }
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let block = client(&server.url(), RetryPolicy::none()).latest_block().await.unwrap();
    assert_eq!(block.height, 4521);
    assert_eq!(block.time.to_rfc3339(), "2021-11-03T10:15:30.123456789+00:00");

    let mut busy = Server::new_async().await;
    let mock = busy
        .mock("GET", "/cosmos/base/tendermint/v1beta1/blocks/latest")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;
    let executor = TxExecutor::new(
        Arc::new(client(&busy.url(), fast_retry())),
        Arc::new(Secp256k1Wallet::random("terra").unwrap()),
        Arc::new(FeePolicy::new().with_network("localterra", NetworkFees::fee_less())),
        "localterra",
    );
    let err = executor.latest_block().await.unwrap_err();
    assert!(matches!(err, HarnessError::Network { status: Some(503), .. }));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_status_classification() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", Matcher::Regex(r"^/cosmwasm/wasm/v1/contract/terra1busy/".to_string()))
        .with_status(503)
        .with_body("upstream unavailable")
        .create_async()
        .await;
    server
        .mock("GET", Matcher::Regex(r"^/cosmwasm/wasm/v1/contract/terra1vamm/".to_string()))
        .with_status(400)
        .with_body(json!({ "code": 3, "message": "Error parsing into type: unknown variant `foo`" }).to_string())
        .create_async()
        .await;
    server
        .mock("GET", Matcher::Regex(r"^/cosmwasm/wasm/v1/contract/terra1junk/".to_string()))
        .with_status(200)
        .with_body("<html>")
        .create_async()
        .await;

    let lcd = client(&server.url(), RetryPolicy::none());

    let busy = lcd.query_smart("terra1busy", &json!({ "state": {} })).await.unwrap_err();
    assert!(busy.is_retryable());
    assert!(matches!(busy, HarnessError::Network { status: Some(503), .. }));

    let rejected = lcd.query_smart("terra1vamm", &json!({ "foo": {} })).await.unwrap_err();
    assert!(!rejected.is_retryable());
    assert_eq!(rejected.raw_log(), Some("Error parsing into type: unknown variant `foo`"));

    let junk = lcd.query_smart("terra1junk", &json!({ "state": {} })).await.unwrap_err();
    assert!(matches!(junk, HarnessError::Decode { .. }));
}

#[tokio::test]
async fn test_executor_retries_reads_but_not_broadcasts() {
    let mut server = Server::new_async().await;
    let query = server
        .mock("GET", Matcher::Regex(r"^/cosmwasm/wasm/v1/contract/".to_string()))
        .with_status(502)
        .expect(3)
        .create_async()
        .await;
    server
        .mock("GET", Matcher::Regex(r"^/cosmos/auth/v1beta1/accounts/".to_string()))
        .with_status(200)
        .with_body(json!({ "account": { "account_number": "1", "sequence": "0" } }).to_string())
        .create_async()
        .await;
    server
        .mock("POST", "/txs/estimate_fee")
        .with_status(200)
        .with_body(json!({ "result": { "fee": { "amount": [], "gas": "75000" } } }).to_string())
        .create_async()
        .await;
    let broadcast = server
        .mock("POST", "/txs")
        .with_status(504)
        .expect(1)
        .create_async()
        .await;

    let lcd: Arc<dyn ChainClient> = Arc::new(client(&server.url(), fast_retry()));
    let executor = TxExecutor::new(
        lcd,
        Arc::new(Secp256k1Wallet::random("terra").unwrap()),
        Arc::new(FeePolicy::new().with_network("localterra", NetworkFees::fee_less())),
        "localterra",
    );

    let err = executor.query("terra1vamm", &json!({ "state": {} })).await.unwrap_err();
    assert!(err.is_retryable());
    query.assert_async().await;

    let err = executor
        .transfer("terra1dest", vec![Coin::new(1, "uusd")])
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Network { status: Some(504), .. }));
    broadcast.assert_async().await;
}

#[tokio::test]
async fn test_broadcast_waits_for_settle_delay() {
    const SETTLE: Duration = Duration::from_millis(400);

    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/txs")
        .with_status(200)
        .with_body(confirmed_tx_body())
        .expect(2)
        .create_async()
        .await;

    let settling = client_with_settle(&server.url(), SETTLE);
    let start = Instant::now();
    let result = settling.broadcast(&send_tx()).await.unwrap();
    assert!(result.is_success());
    assert!(start.elapsed() >= SETTLE, "returned after {:?}", start.elapsed());

    let immediate = client_with_settle(&server.url(), Duration::ZERO);
    let start = Instant::now();
    immediate.broadcast(&send_tx()).await.unwrap();
    assert!(start.elapsed() < SETTLE, "zero delay still waited {:?}", start.elapsed());

    mock.assert_async().await;
}
