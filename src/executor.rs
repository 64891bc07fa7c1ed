//! Transaction executor
//!
//! Turns one logical operation into a signed transaction, submits it and
//! classifies the outcome. Every mutating call fetches a fresh sequence
//! first; calls from one executor must be awaited one at a time.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::chain::retry::retry_with_backoff;
use crate::chain::tx::{Fee, Msg, PubKey, StdSignDoc, StdSignature, StdTx, TxResult};
use crate::chain::{BlockInfo, ChainClient};
use crate::deploy::DeployedContract;
use crate::errors::{HarnessError, Result};
use crate::fees::{FeePolicy, OperationKind};
use crate::gas_log::GasLogger;
use crate::types::{Coin, Uint128};
use crate::wallet::Signer;

const PUBKEY_TYPE: &str = "tendermint/PubKeySecp256k1";

/// Executes chain operations on behalf of one signing identity
#[derive(Debug, Clone)]
pub struct TxExecutor {
    client: Arc<dyn ChainClient>,
    signer: Arc<dyn Signer>,
    fees: Arc<FeePolicy>,
    network: String,
    gas_log: Option<GasLogger>,
    memo: String,
}

impl TxExecutor {
    pub fn new(
        client: Arc<dyn ChainClient>,
        signer: Arc<dyn Signer>,
        fees: Arc<FeePolicy>,
        network: impl Into<String>,
    ) -> Self {
        Self {
            client,
            signer,
            fees,
            network: network.into(),
            gas_log: None,
            memo: String::new(),
        }
    }

    /// Record gas of every `execute` into `log`
    pub fn with_gas_log(mut self, log: GasLogger) -> Self {
        self.gas_log = Some(log);
        self
    }

    /// Memo attached to every transaction this executor signs
    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }

    /// Same client, fees and gas log, different identity
    pub fn with_signer(&self, signer: Arc<dyn Signer>) -> Self {
        Self {
            signer,
            ..self.clone()
        }
    }

    pub fn address(&self) -> &str {
        self.signer.address()
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn gas_log(&self) -> Option<&GasLogger> {
        self.gas_log.as_ref()
    }

    /// Upload bytecode from a file; returns the code id
    pub async fn upload_file(&self, path: impl AsRef<Path>) -> Result<(u64, TxResult)> {
        let path = path.as_ref();
        let bytecode = tokio::fs::read(path).await.map_err(|e| HarnessError::Artifact {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.upload(&bytecode).await
    }

    /// Upload bytecode; returns the code id
    pub async fn upload(&self, bytecode: &[u8]) -> Result<(u64, TxResult)> {
        let msg = Msg::store_code(self.address(), bytecode);
        let result = self.submit(vec![msg], OperationKind::Upload).await?;

        let raw = result.require_attribute("store_code", "code_id")?;
        let code_id = raw.parse::<u64>().map_err(|e| HarnessError::Decode {
            endpoint: self.client.endpoint().url.clone(),
            message: format!("code_id '{}' is not a number: {}", raw, e),
        })?;

        info!(code_id, tx_hash = %result.tx_hash, size = bytecode.len(), "Code uploaded");
        Ok((code_id, result))
    }

    /// Instantiate a contract; `admin` defaults to the signer
    pub async fn instantiate(
        &self,
        code_id: u64,
        init_msg: &Value,
        label: &str,
        admin: Option<&str>,
        funds: Vec<Coin>,
    ) -> Result<(String, TxResult)> {
        let msg = Msg::InstantiateContract {
            sender: self.address().to_string(),
            admin: admin.unwrap_or(self.address()).to_string(),
            code_id: Uint128::from(code_id),
            label: label.to_string(),
            msg: init_msg.clone(),
            funds,
        };
        let result = self.submit(vec![msg], OperationKind::Instantiate).await?;

        let address = result
            .last_attribute("instantiate", "_contract_address")
            .or_else(|| result.last_attribute("instantiate_contract", "contract_address"))
            .map(str::to_string)
            .ok_or_else(|| HarnessError::MissingAttribute {
                event: "instantiate".to_string(),
                key: "_contract_address".to_string(),
                tx_hash: result.tx_hash.clone(),
            })?;

        info!(code_id, label, address = %address, tx_hash = %result.tx_hash, "Contract instantiated");
        Ok((address, result))
    }

    /// Upload then instantiate
    pub async fn deploy(
        &self,
        bytecode: &[u8],
        init_msg: &Value,
        label: &str,
        admin: Option<&str>,
    ) -> Result<DeployedContract> {
        let (code_id, _) = self.upload(bytecode).await?;
        let (address, _) = self
            .instantiate(code_id, init_msg, label, admin, Vec::new())
            .await?;
        Ok(DeployedContract {
            code_id,
            address,
            label: label.to_string(),
        })
    }

    /// Execute a contract call, optionally attaching funds
    pub async fn execute(&self, contract: &str, msg: &Value, funds: Vec<Coin>) -> Result<TxResult> {
        let chain_msg = Msg::ExecuteContract {
            sender: self.address().to_string(),
            contract: contract.to_string(),
            msg: msg.clone(),
            funds,
        };
        let result = self.submit(vec![chain_msg], OperationKind::Execute).await?;

        if let Some(log) = &self.gas_log {
            log.record(msg, result.gas_used);
        }
        Ok(result)
    }

    /// Smart query, retried on transient failures
    pub async fn query(&self, contract: &str, msg: &Value) -> Result<Value> {
        let client = &self.client;
        retry_with_backoff("query_smart", &client.config().retry, move || {
            client.query_smart(contract, msg)
        })
        .await
    }

    /// Native balance, retried on transient failures
    pub async fn balance(&self, address: &str, denom: &str) -> Result<u128> {
        let client = &self.client;
        retry_with_backoff("balance", &client.config().retry, move || {
            client.balance(address, denom)
        })
        .await
    }

    /// Latest block, retried on transient failures
    pub async fn latest_block(&self) -> Result<BlockInfo> {
        let client = &self.client;
        retry_with_backoff("latest_block", &client.config().retry, move || {
            client.latest_block()
        })
        .await
    }

    /// Poll until the chain reaches `target`, backing off between polls
    pub async fn wait_for_height(&self, target: u64) -> Result<BlockInfo> {
        let policy = &self.client.config().block_wait;
        let mut attempt: u32 = 0;

        loop {
            let block = self.latest_block().await?;
            if block.height >= target {
                debug!(target_height = target, height = block.height, attempt, "Reached block height");
                return Ok(block);
            }

            match policy.calculate_delay(attempt) {
                Some(delay) => {
                    debug!(
                        target_height = target,
                        height = block.height,
                        delay_ms = delay.as_millis() as u64,
                        "Waiting for block height"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    return Err(HarnessError::BlockTimeout {
                        target,
                        current: block.height,
                    })
                }
            }
        }
    }

    /// Wait until `blocks` more blocks are committed
    pub async fn wait_blocks(&self, blocks: u64) -> Result<BlockInfo> {
        let start = self.latest_block().await?;
        let target = start.height.saturating_add(blocks);
        info!(from = start.height, target_height = target, "Waiting for blocks");
        self.wait_for_height(target).await
    }

    /// Bank transfer from the signer
    pub async fn transfer(&self, to: &str, amount: Vec<Coin>) -> Result<TxResult> {
        let msg = Msg::Send {
            from_address: self.address().to_string(),
            to_address: to.to_string(),
            amount,
        };
        self.submit(vec![msg], OperationKind::Transfer).await
    }

    /// Migrate `contract` to `new_code_id`; the signer must be its admin
    pub async fn migrate(&self, contract: &str, new_code_id: u64, msg: &Value) -> Result<TxResult> {
        let chain_msg = Msg::MigrateContract {
            sender: self.address().to_string(),
            contract: contract.to_string(),
            code_id: Uint128::from(new_code_id),
            msg: msg.clone(),
        };
        self.submit(vec![chain_msg], OperationKind::Migrate).await
    }

    pub async fn update_admin(&self, contract: &str, new_admin: &str) -> Result<TxResult> {
        let msg = Msg::UpdateAdmin {
            sender: self.address().to_string(),
            new_admin: new_admin.to_string(),
            contract: contract.to_string(),
        };
        self.submit(vec![msg], OperationKind::Admin).await
    }

    /// Remove the admin, making the contract immutable
    pub async fn clear_admin(&self, contract: &str) -> Result<TxResult> {
        let msg = Msg::ClearAdmin {
            sender: self.address().to_string(),
            contract: contract.to_string(),
        };
        self.submit(vec![msg], OperationKind::Admin).await
    }

    /// Sign, broadcast and classify one transaction
    ///
    /// Never retried: a lost broadcast response leaves the outcome unknown.
    async fn submit(&self, msgs: Vec<Msg>, kind: OperationKind) -> Result<TxResult> {
        let address = self.address();
        let client = &self.client;
        let account = retry_with_backoff("account", &client.config().retry, move || {
            client.account(address)
        })
        .await?;

        let fee = self.resolve_fee(&msgs, kind).await?;

        let sign_doc = StdSignDoc {
            account_number: account.account_number,
            chain_id: &self.client.endpoint().chain_id,
            fee: &fee,
            memo: &self.memo,
            msgs: &msgs,
            sequence: account.sequence,
        };
        let sign_bytes = sign_doc.sign_bytes()?;
        let signature = self.signer.sign(&sign_bytes)?;

        let tx = StdTx {
            msg: msgs,
            fee,
            signatures: vec![StdSignature {
                pub_key: PubKey {
                    key_type: PUBKEY_TYPE.to_string(),
                    value: BASE64.encode(self.signer.public_key()),
                },
                signature: BASE64.encode(signature),
            }],
            memo: self.memo.clone(),
        };

        debug!(
            operation = %kind,
            sender = address,
            sequence = account.sequence,
            gas = tx.fee.gas,
            "Broadcasting transaction"
        );

        let result = self.client.broadcast(&tx).await?.into_result()?;
        info!(
            operation = %kind,
            tx_hash = %result.tx_hash,
            gas_used = result.gas_used,
            "Transaction succeeded"
        );
        Ok(result)
    }

    /// Fixed bid from the policy, or simulated gas for fee-less networks
    async fn resolve_fee(&self, msgs: &[Msg], kind: OperationKind) -> Result<Fee> {
        let bid = self.fees.bid(&self.network, kind)?;
        if !bid.is_free() {
            return Ok(Fee::new(bid.gas_limit, bid.coins()));
        }

        let unsigned = StdTx::unsigned(msgs.to_vec(), Fee::new(0, Vec::new()), &self.memo);
        let unsigned = &unsigned;
        let client = &self.client;
        let simulated = retry_with_backoff("simulate", &client.config().retry, move || {
            client.simulate(unsigned)
        })
        .await?;
        let gas = self.client.config().adjusted_gas(simulated);
        debug!(operation = %kind, simulated, gas, "Gas estimated");
        Ok(Fee::new(gas, Vec::new()))
    }
}
