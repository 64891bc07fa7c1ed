//! `ChainClient` over a Cosmos LCD (REST) endpoint

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::tx::{BroadcastResponse, StdTx, TxResult};
use super::{AccountInfo, BlockInfo, ChainClient, ChainEndpoint, ClientConfig};
use crate::errors::{HarnessError, Result};
use crate::metrics::{metrics, Timer};
use crate::types::{u64_from_str_or_num, Uint128};

/// LCD REST client
#[derive(Debug, Clone)]
pub struct LcdClient {
    http: Client,
    endpoint: ChainEndpoint,
    config: ClientConfig,
}

#[derive(Serialize)]
struct BroadcastRequest<'a> {
    tx: &'a StdTx,
    mode: &'static str,
}

#[derive(Serialize)]
struct EstimateFeeRequest<'a> {
    tx: &'a StdTx,
    gas_adjustment: &'static str,
}

#[derive(Deserialize)]
struct AccountResponse {
    account: Value,
}

#[derive(Deserialize)]
struct RawAccount {
    #[serde(default, deserialize_with = "u64_from_str_or_num")]
    account_number: u64,
    #[serde(default, deserialize_with = "u64_from_str_or_num")]
    sequence: u64,
}

#[derive(Deserialize)]
struct EstimateFeeResponse {
    result: EstimateFeeResult,
}

#[derive(Deserialize)]
struct EstimateFeeResult {
    fee: EstimatedFee,
}

#[derive(Deserialize)]
struct EstimatedFee {
    #[serde(deserialize_with = "u64_from_str_or_num")]
    gas: u64,
}

#[derive(Deserialize)]
struct SmartQueryResponse {
    data: Value,
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance: Option<BalanceCoin>,
}

#[derive(Deserialize)]
struct BalanceCoin {
    amount: Uint128,
}

#[derive(Deserialize)]
struct LatestBlockResponse {
    block: RawBlock,
}

#[derive(Deserialize)]
struct RawBlock {
    header: RawHeader,
}

#[derive(Deserialize)]
struct RawHeader {
    #[serde(deserialize_with = "u64_from_str_or_num")]
    height: u64,
    time: chrono::DateTime<chrono::Utc>,
}

impl LcdClient {
    pub fn new(endpoint: ChainEndpoint, config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| HarnessError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!(url = %url, "LCD GET");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| network_failure(HarnessError::from_reqwest(e, &url)))?;
        decode_response(resp, &url).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.url(path);
        debug!(url = %url, "LCD POST");
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| network_failure(HarnessError::from_reqwest(e, &url)))?;
        decode_response(resp, &url).await
    }
}

fn network_failure(err: HarnessError) -> HarnessError {
    metrics().network_failures.inc();
    err
}

/// Classify an HTTP response and decode its JSON body
///
/// 429 and 5xx gateway errors are transient. Other non-success statuses
/// mean the node processed and refused the request.
async fn decode_response<T: DeserializeOwned>(resp: Response, url: &str) -> Result<T> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| network_failure(HarnessError::from_reqwest(e, url)))?;

    if is_transient_status(status) {
        return Err(network_failure(HarnessError::Network {
            endpoint: url.to_string(),
            message: format!("HTTP {}: {}", status, body),
            status: Some(status.as_u16()),
        }));
    }

    if !status.is_success() {
        return Err(rejection_from_body(status, &body));
    }

    serde_json::from_str(&body).map_err(|e| HarnessError::Decode {
        endpoint: url.to_string(),
        message: e.to_string(),
    })
}

fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Map an error body (`{"code": n, "message": ..}` or `{"error": ..}`) to a chain rejection
fn rejection_from_body(status: StatusCode, body: &str) -> HarnessError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    let code = parsed
        .as_ref()
        .and_then(|v| v.get("code"))
        .and_then(Value::as_u64)
        .filter(|c| *c != 0)
        .unwrap_or(status.as_u16() as u64) as u32;

    let codespace = parsed
        .as_ref()
        .and_then(|v| v.get("codespace"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let raw_log = parsed
        .as_ref()
        .and_then(|v| v.get("message").or_else(|| v.get("error")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());

    HarnessError::Chain {
        code,
        codespace,
        raw_log,
    }
}

fn parse_account(account: &Value) -> Option<AccountInfo> {
    // Vesting and module accounts nest the base account
    let base = account
        .get("base_vesting_account")
        .and_then(|v| v.get("base_account"))
        .or_else(|| account.get("base_account"))
        .unwrap_or(account);

    let raw: RawAccount = serde_json::from_value(base.clone()).ok()?;
    Some(AccountInfo {
        account_number: raw.account_number,
        sequence: raw.sequence,
    })
}

#[async_trait]
impl ChainClient for LcdClient {
    fn endpoint(&self) -> &ChainEndpoint {
        &self.endpoint
    }

    fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn account(&self, address: &str) -> Result<AccountInfo> {
        let path = format!("/cosmos/auth/v1beta1/accounts/{}", address);
        let resp: AccountResponse = self.get_json(&path).await?;
        parse_account(&resp.account).ok_or_else(|| HarnessError::Decode {
            endpoint: self.url(&path),
            message: "account payload has no account_number/sequence".to_string(),
        })
    }

    async fn simulate(&self, tx: &StdTx) -> Result<u64> {
        let req = EstimateFeeRequest {
            tx,
            gas_adjustment: "1",
        };
        let resp: EstimateFeeResponse = self.post_json("/txs/estimate_fee", &req).await?;
        debug!(gas = resp.result.fee.gas, "Simulated transaction");
        Ok(resp.result.fee.gas)
    }

    async fn broadcast(&self, tx: &StdTx) -> Result<TxResult> {
        let req = BroadcastRequest { tx, mode: "block" };
        let timer = Timer::start();
        metrics().tx_submitted.inc();
        for msg in &tx.msg {
            metrics().tx_messages.with_label_values(&[msg.kind()]).inc();
        }

        let resp: BroadcastResponse = match self.post_json("/txs", &req).await {
            Ok(resp) => resp,
            Err(e) => {
                metrics().tx_rejected.inc();
                warn!(error = %e, "Broadcast failed before a result was returned");
                return Err(e);
            }
        };
        let result = TxResult::from(resp);

        if !self.config.settle_delay.is_zero() {
            sleep(self.config.settle_delay).await;
        }
        timer.observe_duration(&metrics().broadcast_latency);

        if result.is_success() {
            metrics().tx_confirmed.inc();
            metrics().gas_used.observe(result.gas_used as f64);
            info!(
                tx_hash = %result.tx_hash,
                height = result.height,
                gas_used = result.gas_used,
                "Transaction confirmed"
            );
        } else {
            metrics().tx_rejected.inc();
            warn!(
                tx_hash = %result.tx_hash,
                code = result.code,
                codespace = ?result.codespace,
                raw_log = %result.raw_log,
                "Transaction rejected by chain"
            );
        }

        Ok(result)
    }

    async fn query_smart(&self, contract: &str, query: &Value) -> Result<Value> {
        metrics().queries.inc();
        let encoded = BASE64.encode(query.to_string());
        // base64 standard alphabet must be escaped in a path segment
        let encoded = encoded.replace('+', "%2B").replace('/', "%2F").replace('=', "%3D");
        let path = format!("/cosmwasm/wasm/v1/contract/{}/smart/{}", contract, encoded);
        let resp: SmartQueryResponse = self.get_json(&path).await?;
        Ok(resp.data)
    }

    async fn balance(&self, address: &str, denom: &str) -> Result<u128> {
        let path = format!(
            "/cosmos/bank/v1beta1/balances/{}/by_denom?denom={}",
            address, denom
        );
        let resp: BalanceResponse = self.get_json(&path).await?;
        Ok(resp.balance.map(|c| c.amount.u128()).unwrap_or(0))
    }

    async fn latest_block(&self) -> Result<BlockInfo> {
        let resp: LatestBlockResponse = self
            .get_json("/cosmos/base/tendermint/v1beta1/blocks/latest")
            .await?;
        Ok(BlockInfo {
            height: resp.block.header.height,
            time: resp.block.header.time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_base_account() {
        let acct = json!({
            "@type": "/cosmos.auth.v1beta1.BaseAccount",
            "address": "terra1abc",
            "account_number": "12",
            "sequence": "4"
        });
        assert_eq!(
            parse_account(&acct),
            Some(AccountInfo {
                account_number: 12,
                sequence: 4
            })
        );
    }

    #[test]
    fn test_parse_vesting_account() {
        let acct = json!({
            "@type": "/cosmos.vesting.v1beta1.ContinuousVestingAccount",
            "base_vesting_account": {
                "base_account": { "account_number": "3", "sequence": "9" }
            }
        });
        assert_eq!(parse_account(&acct).map(|a| a.sequence), Some(9));
    }

    #[test]
    fn test_rejection_from_grpc_gateway_body() {
        let err = rejection_from_body(
            StatusCode::BAD_REQUEST,
            r#"{"code": 3, "message": "query wasm contract failed: unknown variant", "details": []}"#,
        );
        match err {
            HarnessError::Chain { code, raw_log, .. } => {
                assert_eq!(code, 3);
                assert!(raw_log.contains("unknown variant"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_rejection_from_plain_body_uses_status() {
        let err = rejection_from_body(StatusCode::NOT_FOUND, "not found");
        match err {
            HarnessError::Chain { code, raw_log, .. } => {
                assert_eq!(code, 404);
                assert_eq!(raw_log, "not found");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::GATEWAY_TIMEOUT));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
    }
}
