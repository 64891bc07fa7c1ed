//! Test Utilities Module
//!
//! `MockChain` is an in-memory `ChainClient` that behaves like an LCD in
//! block mode: signatures and sequences are verified against the rebuilt
//! sign document, failed executions are included with a non-zero code and
//! still consume the sequence, and every transaction is atomic. Contract
//! behavior comes from `ContractHandler`s registered per bytecode;
//! `mock_contracts` has handlers for the protocol's contracts.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::chain::retry::RetryPolicy;
use crate::chain::tx::{canonical_json, Attribute, Event, Msg, StdSignDoc, StdTx, TxResult};
use crate::chain::{AccountInfo, BlockInfo, ChainClient, ChainEndpoint, ClientConfig};
use crate::deploy::topology::{ENGINE, FEE_POOL, INSURANCE_FUND, PRICEFEED, TOKEN, VAMM};
use crate::deploy::ArtifactNames;
use crate::errors::{HarnessError, Result};
use crate::executor::TxExecutor;
use crate::fees::{FeePolicy, NetworkFees};
use crate::types::Coin;
use crate::wallet::{account_address, verify_signature, Secp256k1Wallet, Signer};

pub const MOCK_CHAIN_ID: &str = "localterra";
pub const MOCK_NETWORK: &str = "localterra";
/// Spacing between mock block timestamps
pub const MOCK_BLOCK_TIME_SECS: i64 = 6;

/// Gas charged per message kind
pub const STORE_CODE_GAS: u64 = 1_200_000;
pub const INSTANTIATE_GAS: u64 = 250_000;
pub const EXECUTE_GAS: u64 = 180_000;
pub const MIGRATE_GAS: u64 = 200_000;
pub const ADMIN_GAS: u64 = 60_000;
pub const SEND_GAS: u64 = 75_000;

pub fn gas_for(msg: &Msg) -> u64 {
    match msg {
        Msg::StoreCode { .. } => STORE_CODE_GAS,
        Msg::InstantiateContract { .. } => INSTANTIATE_GAS,
        Msg::ExecuteContract { .. } => EXECUTE_GAS,
        Msg::MigrateContract { .. } => MIGRATE_GAS,
        Msg::UpdateAdmin { .. } | Msg::ClearAdmin { .. } => ADMIN_GAS,
        Msg::Send { .. } => SEND_GAS,
    }
}

/// Deterministic wallet for a name, so tests can predict its address
pub fn mock_wallet(name: &str) -> Secp256k1Wallet {
    let secret = Sha256::digest(format!("mock wallet/{}", name).as_bytes());
    Secp256k1Wallet::from_bytes(&secret, "terra").expect("hashed secret is a valid key")
}

/// Address of `mock_wallet(name)`
pub fn mock_address(name: &str) -> String {
    mock_wallet(name).address().to_string()
}

/// Outcome of a contract entry point; `Err` carries the contract's error string
pub type ContractResult<T> = std::result::Result<T, String>;

/// Behavior of one stored code
pub trait ContractHandler: Send + Sync + std::fmt::Debug {
    /// Returns the initial contract state
    fn instantiate(&self, ctx: &mut CallContext<'_>, msg: &Value) -> ContractResult<Value>;

    /// Returns attributes for the `wasm` event
    fn execute(&self, ctx: &mut CallContext<'_>, state: &mut Value, msg: &Value) -> ContractResult<Vec<Attribute>>;

    fn query(&self, ctx: &QueryContext<'_>, state: &Value, msg: &Value) -> ContractResult<Value>;
}

#[derive(Debug, Clone)]
struct Instance {
    code_id: u64,
    admin: Option<String>,
    state: Value,
}

/// Execution environment handed to a contract
///
/// Other contracts' state is reachable through `peer`/`peer_mut`, which
/// stands in for submessages. The calling contract itself is not a peer.
pub struct CallContext<'a> {
    pub sender: &'a str,
    pub contract: &'a str,
    pub funds: &'a [Coin],
    peers: &'a mut BTreeMap<String, Instance>,
}

impl CallContext<'_> {
    pub fn peer(&self, address: &str) -> Option<&Value> {
        self.peers.get(address).map(|i| &i.state)
    }

    pub fn peer_mut(&mut self, address: &str) -> Option<&mut Value> {
        self.peers.get_mut(address).map(|i| &mut i.state)
    }
}

pub struct QueryContext<'a> {
    pub contract: &'a str,
    peers: &'a BTreeMap<String, Instance>,
}

impl QueryContext<'_> {
    pub fn peer(&self, address: &str) -> Option<&Value> {
        self.peers.get(address).map(|i| &i.state)
    }
}

/// A transaction-level failure as the chain reports it
struct TxFailure {
    code: u32,
    codespace: &'static str,
    log: String,
}

impl TxFailure {
    fn wasm(index: usize, reason: impl std::fmt::Display, op: &str) -> Self {
        Self {
            code: 5,
            codespace: "wasm",
            log: format!(
                "failed to execute message; message index: {}: {}: {} wasm contract failed",
                index, reason, op
            ),
        }
    }

    fn sdk(code: u32, log: String) -> Self {
        Self {
            code,
            codespace: "sdk",
            log,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Ledger {
    accounts: HashMap<String, AccountInfo>,
    /// (address, denom) -> amount
    balances: HashMap<(String, String), u128>,
    handlers: HashMap<Vec<u8>, Arc<dyn ContractHandler>>,
    codes: BTreeMap<u64, Arc<dyn ContractHandler>>,
    contracts: BTreeMap<String, Instance>,
    height: u64,
    instances: u64,
}

impl Ledger {
    fn account(&mut self, address: &str) -> AccountInfo {
        let next = self.accounts.len() as u64 + 1;
        *self
            .accounts
            .entry(address.to_string())
            .or_insert(AccountInfo {
                account_number: next,
                sequence: 0,
            })
    }

    fn bump_sequence(&mut self, address: &str) {
        if let Some(account) = self.accounts.get_mut(address) {
            account.sequence += 1;
        }
    }

    fn balance(&self, address: &str, denom: &str) -> u128 {
        self.balances
            .get(&(address.to_string(), denom.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn move_funds(&mut self, from: &str, to: &str, coins: &[Coin]) -> std::result::Result<(), TxFailure> {
        for coin in coins {
            let amount = coin.amount.u128();
            let available = self.balance(from, &coin.denom);
            if available < amount {
                return Err(TxFailure::sdk(
                    5,
                    format!("{}{} is smaller than {}: insufficient funds", available, coin.denom, coin),
                ));
            }
            self.balances
                .insert((from.to_string(), coin.denom.clone()), available - amount);
            *self
                .balances
                .entry((to.to_string(), coin.denom.clone()))
                .or_insert(0) += amount;
        }
        Ok(())
    }

    fn apply(&mut self, index: usize, msg: &Msg) -> std::result::Result<Vec<Event>, TxFailure> {
        match msg {
            Msg::StoreCode { sender, wasm_byte_code } => {
                let bytes = BASE64
                    .decode(wasm_byte_code)
                    .map_err(|e| TxFailure::wasm(index, e, "create"))?;
                let handler = self
                    .handlers
                    .get(&bytes)
                    .cloned()
                    .ok_or_else(|| TxFailure::wasm(index, "Error during static Wasm validation", "create"))?;
                let code_id = self.codes.len() as u64 + 1;
                self.codes.insert(code_id, handler);
                Ok(vec![event(
                    "store_code",
                    &[("sender", sender.as_str()), ("code_id", &code_id.to_string())],
                )])
            }
            Msg::InstantiateContract {
                sender,
                admin,
                code_id,
                msg,
                funds,
                ..
            } => {
                let code_id = code_id.u128() as u64;
                let handler = self
                    .codes
                    .get(&code_id)
                    .cloned()
                    .ok_or_else(|| TxFailure::wasm(index, format!("code {} not found", code_id), "instantiate"))?;

                self.instances += 1;
                let digest = Sha256::digest(format!("contract/{}/{}", code_id, self.instances).as_bytes());
                let address = format!("terra1{}", &hex::encode(digest)[..58]);

                self.move_funds(sender, &address, funds)?;
                let mut ctx = CallContext {
                    sender,
                    contract: &address,
                    funds,
                    peers: &mut self.contracts,
                };
                let state = handler
                    .instantiate(&mut ctx, msg)
                    .map_err(|e| TxFailure::wasm(index, e, "instantiate"))?;

                self.contracts.insert(
                    address.clone(),
                    Instance {
                        code_id,
                        admin: Some(admin.clone()).filter(|a| !a.is_empty()),
                        state,
                    },
                );
                Ok(vec![event(
                    "instantiate",
                    &[("_contract_address", address.as_str()), ("code_id", &code_id.to_string())],
                )])
            }
            Msg::ExecuteContract {
                sender,
                contract,
                msg,
                funds,
            } => {
                self.move_funds(sender, contract, funds)?;
                let mut instance = self
                    .contracts
                    .remove(contract)
                    .ok_or_else(|| TxFailure::wasm(index, format!("contract {} not found", contract), "execute"))?;
                let result = match self.codes.get(&instance.code_id).cloned() {
                    Some(handler) => {
                        let mut ctx = CallContext {
                            sender,
                            contract,
                            funds,
                            peers: &mut self.contracts,
                        };
                        handler.execute(&mut ctx, &mut instance.state, msg)
                    }
                    None => Err(format!("code {} not found", instance.code_id)),
                };
                self.contracts.insert(contract.clone(), instance);

                let attributes = result.map_err(|e| TxFailure::wasm(index, e, "execute"))?;
                let mut wasm = vec![Attribute {
                    key: "_contract_address".to_string(),
                    value: contract.clone(),
                }];
                wasm.extend(attributes);
                Ok(vec![
                    event("execute", &[("_contract_address", contract.as_str())]),
                    Event {
                        event_type: "wasm".to_string(),
                        attributes: wasm,
                    },
                ])
            }
            Msg::MigrateContract {
                sender,
                contract,
                code_id,
                ..
            } => {
                let code_id = code_id.u128() as u64;
                if !self.codes.contains_key(&code_id) {
                    return Err(TxFailure::wasm(index, format!("code {} not found", code_id), "migrate"));
                }
                let instance = self.admin_checked(index, sender, contract, "migrate")?;
                instance.code_id = code_id;
                Ok(vec![event(
                    "migrate",
                    &[("_contract_address", contract.as_str()), ("code_id", &code_id.to_string())],
                )])
            }
            Msg::UpdateAdmin {
                sender,
                new_admin,
                contract,
            } => {
                let instance = self.admin_checked(index, sender, contract, "update admin")?;
                instance.admin = Some(new_admin.clone());
                Ok(vec![event(
                    "update_contract_admin",
                    &[("_contract_address", contract.as_str()), ("new_admin_address", new_admin.as_str())],
                )])
            }
            Msg::ClearAdmin { sender, contract } => {
                let instance = self.admin_checked(index, sender, contract, "clear admin")?;
                instance.admin = None;
                Ok(vec![event("clear_contract_admin", &[("_contract_address", contract.as_str())])])
            }
            Msg::Send {
                from_address,
                to_address,
                amount,
            } => {
                self.move_funds(from_address, to_address, amount)?;
                let amount = amount.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(",");
                Ok(vec![event(
                    "transfer",
                    &[
                        ("recipient", to_address.as_str()),
                        ("sender", from_address.as_str()),
                        ("amount", amount.as_str()),
                    ],
                )])
            }
        }
    }

    fn admin_checked(
        &mut self,
        index: usize,
        sender: &str,
        contract: &str,
        op: &str,
    ) -> std::result::Result<&mut Instance, TxFailure> {
        let instance = self
            .contracts
            .get_mut(contract)
            .ok_or_else(|| TxFailure::wasm(index, format!("contract {} not found", contract), op))?;
        if instance.admin.as_deref() != Some(sender) {
            return Err(TxFailure::wasm(index, "unauthorized: caller is not the contract admin", op));
        }
        Ok(instance)
    }
}

fn event(event_type: &str, attributes: &[(&str, &str)]) -> Event {
    Event {
        event_type: event_type.to_string(),
        attributes: attributes
            .iter()
            .map(|(k, v)| Attribute {
                key: k.to_string(),
                value: v.to_string(),
            })
            .collect(),
    }
}

/// In-memory chain
#[derive(Debug)]
pub struct MockChain {
    endpoint: ChainEndpoint,
    config: ClientConfig,
    ledger: Mutex<Ledger>,
    submitted: Mutex<Vec<StdTx>>,
    fail_reads: AtomicUsize,
    fail_broadcast: AtomicBool,
    halted: AtomicBool,
    requests: AtomicUsize,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    /// No settle delay and millisecond read backoff
    pub fn new() -> Self {
        Self::with_config(ClientConfig {
            settle_delay: Duration::ZERO,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 5,
                jitter_factor: 0.0,
            },
            block_wait: RetryPolicy {
                max_attempts: 5,
                base_delay_ms: 1,
                max_delay_ms: 5,
                jitter_factor: 0.0,
            },
            ..ClientConfig::default()
        })
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            endpoint: ChainEndpoint::new(MOCK_CHAIN_ID, "http://mock.localterra", "terra"),
            config,
            ledger: Mutex::new(Ledger::default()),
            submitted: Mutex::new(Vec::new()),
            fail_reads: AtomicUsize::new(0),
            fail_broadcast: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
        }
    }

    /// Chain with every protocol contract's bytecode registered
    pub fn with_protocol_contracts() -> Self {
        let chain = Self::new();
        chain.register_code(&protocol_bytecode(FEE_POOL), mock_contracts::FeePool);
        chain.register_code(&protocol_bytecode(INSURANCE_FUND), mock_contracts::InsuranceFund);
        chain.register_code(&protocol_bytecode(PRICEFEED), mock_contracts::Pricefeed);
        chain.register_code(&protocol_bytecode(TOKEN), mock_contracts::Cw20);
        chain.register_code(&protocol_bytecode(VAMM), mock_contracts::Vamm);
        chain.register_code(&protocol_bytecode(ENGINE), mock_contracts::Engine);
        chain
    }

    /// Uploads of `bytecode` will run `handler`
    pub fn register_code(&self, bytecode: &[u8], handler: impl ContractHandler + 'static) {
        self.ledger
            .lock()
            .handlers
            .insert(bytecode.to_vec(), Arc::new(handler));
    }

    pub fn fund(&self, address: &str, coin: Coin) {
        *self
            .ledger
            .lock()
            .balances
            .entry((address.to_string(), coin.denom))
            .or_insert(0) += coin.amount.u128();
    }

    /// The next `n` reads fail with a network error
    pub fn fail_next_reads(&self, n: usize) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    /// The next broadcast fails with a network error without reaching the ledger
    pub fn fail_next_broadcast(&self) {
        self.fail_broadcast.store(true, Ordering::SeqCst);
    }

    /// Stop producing empty blocks; only broadcasts advance the height
    pub fn halt_blocks(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn height(&self) -> u64 {
        self.ledger.lock().height
    }

    /// Requests of any kind received so far
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Every transaction that reached the ledger, in order
    pub fn submitted(&self) -> Vec<StdTx> {
        self.submitted.lock().clone()
    }

    pub fn contract_state(&self, address: &str) -> Option<Value> {
        self.ledger.lock().contracts.get(address).map(|i| i.state.clone())
    }

    pub fn contract_admin(&self, address: &str) -> Option<String> {
        self.ledger
            .lock()
            .contracts
            .get(address)
            .and_then(|i| i.admin.clone())
    }

    pub fn contract_code_id(&self, address: &str) -> Option<u64> {
        self.ledger.lock().contracts.get(address).map(|i| i.code_id)
    }

    pub fn contract_count(&self) -> usize {
        self.ledger.lock().contracts.len()
    }

    pub fn sequence(&self, address: &str) -> u64 {
        self.ledger
            .lock()
            .accounts
            .get(address)
            .map_or(0, |a| a.sequence)
    }

    fn read(&self, what: &str) -> Result<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .fail_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(HarnessError::Network {
                endpoint: self.endpoint.url.clone(),
                message: format!("connection reset during {}", what),
                status: None,
            });
        }
        Ok(())
    }

    fn verify(&self, tx: &StdTx, account: AccountInfo) -> bool {
        let [signature] = tx.signatures.as_slice() else {
            return false;
        };
        let doc = StdSignDoc {
            account_number: account.account_number,
            chain_id: &self.endpoint.chain_id,
            fee: &tx.fee,
            memo: &tx.memo,
            msgs: &tx.msg,
            sequence: account.sequence,
        };
        let (Ok(bytes), Ok(public_key), Ok(sig)) = (
            doc.sign_bytes(),
            BASE64.decode(&signature.pub_key.value),
            BASE64.decode(&signature.signature),
        ) else {
            return false;
        };
        verify_signature(&public_key, &bytes, &sig)
    }

    /// Every message must be sent by the account the public key derives to
    fn signer_mismatch(&self, tx: &StdTx) -> Option<String> {
        let [signature] = tx.signatures.as_slice() else {
            return None;
        };
        let derived = BASE64
            .decode(&signature.pub_key.value)
            .ok()
            .and_then(|key| account_address(&key, &self.endpoint.address_prefix).ok())
            .unwrap_or_default();
        tx.msg
            .iter()
            .map(Msg::sender)
            .find(|sender| *sender != derived)
            .map(str::to_string)
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn endpoint(&self) -> &ChainEndpoint {
        &self.endpoint
    }

    fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn account(&self, address: &str) -> Result<AccountInfo> {
        self.read("account")?;
        Ok(self.ledger.lock().account(address))
    }

    async fn simulate(&self, tx: &StdTx) -> Result<u64> {
        self.read("simulate")?;
        Ok(tx.msg.iter().map(gas_for).sum())
    }

    async fn broadcast(&self, tx: &StdTx) -> Result<TxResult> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.fail_broadcast.swap(false, Ordering::SeqCst) {
            return Err(HarnessError::Network {
                endpoint: self.endpoint.url.clone(),
                message: "connection reset during broadcast".to_string(),
                status: None,
            });
        }

        let mut ledger = self.ledger.lock();
        self.submitted.lock().push(tx.clone());
        ledger.height += 1;

        let encoded = serde_json::to_value(tx).map(|v| canonical_json(&v)).unwrap_or_default();
        let tx_hash = hex::encode_upper(Sha256::digest(format!("{}/{}", ledger.height, encoded).as_bytes()));
        let gas_needed: u64 = tx.msg.iter().map(gas_for).sum();
        let mut result = TxResult {
            tx_hash,
            height: ledger.height,
            gas_wanted: tx.fee.gas,
            gas_used: 0,
            code: 0,
            codespace: None,
            raw_log: String::new(),
            events: Vec::new(),
        };

        let Some(signer) = tx.msg.first().map(|m| m.sender().to_string()) else {
            result.code = 2;
            result.codespace = Some("sdk".to_string());
            result.raw_log = "must contain at least one message: invalid request".to_string();
            return Ok(result);
        };
        if let Some(sender) = self.signer_mismatch(tx) {
            result.code = 8;
            result.codespace = Some("sdk".to_string());
            result.raw_log = format!(
                "pubKey does not match signer address {} with signer index: 0: invalid pubkey",
                sender
            );
            return Ok(result);
        }

        let account = ledger.account(&signer);
        if !self.verify(tx, account) {
            result.code = 4;
            result.codespace = Some("sdk".to_string());
            result.raw_log = format!(
                "signature verification failed; please verify account number ({}), sequence ({}) and chain-id ({}): unauthorized",
                account.account_number, account.sequence, self.endpoint.chain_id
            );
            return Ok(result);
        }

        let outcome = if tx.fee.gas < gas_needed {
            Err(TxFailure::sdk(
                11,
                format!(
                    "out of gas in location: wasm contract; gasWanted: {}, gasUsed: {}: out of gas",
                    tx.fee.gas, gas_needed
                ),
            ))
        } else {
            let snapshot = (*ledger).clone();
            let mut events = Vec::new();
            let mut failure = None;
            for (index, msg) in tx.msg.iter().enumerate() {
                match ledger.apply(index, msg) {
                    Ok(emitted) => events.extend(emitted),
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
            match failure {
                Some(err) => {
                    *ledger = snapshot;
                    Err(err)
                }
                None => Ok(events),
            }
        };

        ledger.bump_sequence(&signer);
        result.gas_used = gas_needed.min(tx.fee.gas);
        match outcome {
            Ok(events) => {
                result.raw_log = "[]".to_string();
                result.events = events;
            }
            Err(failure) => {
                result.code = failure.code;
                result.codespace = Some(failure.codespace.to_string());
                result.raw_log = failure.log;
            }
        }
        Ok(result)
    }

    async fn query_smart(&self, contract: &str, query: &Value) -> Result<Value> {
        self.read("query")?;
        let ledger = self.ledger.lock();
        let rejected = |reason: String| HarnessError::Chain {
            code: 5,
            codespace: Some("wasm".to_string()),
            raw_log: format!("{}: query wasm contract failed", reason),
        };

        let instance = ledger
            .contracts
            .get(contract)
            .ok_or_else(|| rejected(format!("contract {} not found", contract)))?;
        let handler = ledger
            .codes
            .get(&instance.code_id)
            .ok_or_else(|| rejected(format!("code {} not found", instance.code_id)))?;
        let ctx = QueryContext {
            contract,
            peers: &ledger.contracts,
        };
        handler.query(&ctx, &instance.state, query).map_err(rejected)
    }

    async fn balance(&self, address: &str, denom: &str) -> Result<u128> {
        self.read("balance")?;
        Ok(self.ledger.lock().balance(address, denom))
    }

    /// Reports the current height, then commits an empty block unless halted
    async fn latest_block(&self) -> Result<BlockInfo> {
        self.read("latest block")?;
        let mut ledger = self.ledger.lock();
        let block = BlockInfo {
            height: ledger.height,
            time: block_time(ledger.height),
        };
        if !self.halted.load(Ordering::SeqCst) {
            ledger.height += 1;
        }
        Ok(block)
    }
}

fn block_time(height: u64) -> DateTime<Utc> {
    let genesis = Utc.timestamp_opt(1_600_000_000, 0).single().unwrap_or_default();
    genesis + chrono::Duration::seconds(height as i64 * MOCK_BLOCK_TIME_SECS)
}

/// Bytecode the mock chain maps to the protocol contract `id`
pub fn protocol_bytecode(id: &str) -> Vec<u8> {
    format!("\0asm mock {}", id).into_bytes()
}

/// Write the protocol bytecode under `dir` using the configured file names
pub fn write_protocol_artifacts(dir: &Path, names: &ArtifactNames) -> std::io::Result<()> {
    for (id, file) in [
        (FEE_POOL, &names.fee_pool),
        (INSURANCE_FUND, &names.insurance_fund),
        (PRICEFEED, &names.pricefeed),
        (TOKEN, &names.token),
        (VAMM, &names.vamm),
        (ENGINE, &names.engine),
    ] {
        std::fs::write(dir.join(file), protocol_bytecode(id))?;
    }
    Ok(())
}

/// Executor for `mock_wallet(name)` on a fee-less mock network
pub fn mock_executor(chain: &Arc<MockChain>, name: &str) -> TxExecutor {
    executor_with_fees(chain, name, NetworkFees::fee_less())
}

pub fn executor_with_fees(chain: &Arc<MockChain>, name: &str, fees: NetworkFees) -> TxExecutor {
    let client: Arc<dyn ChainClient> = chain.clone();
    TxExecutor::new(
        client,
        Arc::new(mock_wallet(name)),
        Arc::new(FeePolicy::new().with_network(MOCK_NETWORK, fees)),
        MOCK_NETWORK,
    )
}

/// Mock protocol contracts
///
/// Keep just enough state to wire a market and open positions. Error
/// strings follow the real contracts where tests match on them.
pub mod mock_contracts {
    use super::*;
    use crate::amm::Direction;
    use crate::types::Uint128;
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    pub const UNAUTHORIZED: &str = "Unauthorized";
    pub const AMM_CLOSED: &str = "amm is closed";

    fn load<T: DeserializeOwned>(state: &Value) -> ContractResult<T> {
        serde_json::from_value(state.clone()).map_err(|e| format!("corrupt state: {}", e))
    }

    fn save<T: Serialize>(state: &mut Value, value: &T) -> ContractResult<()> {
        *state = to_json(value)?;
        Ok(())
    }

    fn to_json<T: Serialize>(value: &T) -> ContractResult<Value> {
        serde_json::to_value(value).map_err(|e| e.to_string())
    }

    /// Split `{"variant": {..}}`
    fn variant(msg: &Value) -> ContractResult<(&str, &Value)> {
        match msg.as_object() {
            Some(map) if map.len() == 1 => map
                .iter()
                .next()
                .map(|(k, v)| (k.as_str(), v))
                .ok_or_else(|| "Error parsing into type: empty message".to_string()),
            _ => Err(format!("Error parsing into type: expected one variant, got {}", msg)),
        }
    }

    fn unknown(name: &str) -> String {
        format!("Error parsing into type: unknown variant `{}`", name)
    }

    fn string_field(args: &Value, key: &str) -> ContractResult<String> {
        args.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| format!("Error parsing into type: missing field `{}`", key))
    }

    fn opt_string(args: &Value, key: &str) -> Option<String> {
        args.get(key).and_then(Value::as_str).map(str::to_string)
    }

    fn uint_field(args: &Value, key: &str) -> ContractResult<u128> {
        let value = args
            .get(key)
            .ok_or_else(|| format!("Error parsing into type: missing field `{}`", key))?;
        serde_json::from_value::<Uint128>(value.clone())
            .map(|u| u.u128())
            .map_err(|e| format!("Error parsing into type: {}: {}", key, e))
    }

    fn opt_uint(args: &Value, key: &str) -> ContractResult<Option<u128>> {
        match args.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => uint_field(args, key).map(Some),
        }
    }

    fn u64_field(args: &Value, key: &str) -> ContractResult<u64> {
        match args.get(key) {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
        .ok_or_else(|| format!("Error parsing into type: invalid `{}`", key))
    }

    fn attrs(pairs: &[(&str, String)]) -> Vec<Attribute> {
        pairs
            .iter()
            .map(|(k, v)| Attribute {
                key: k.to_string(),
                value: v.clone(),
            })
            .collect()
    }

    #[derive(Debug, Clone, Copy, Default)]
    pub struct FeePool;

    #[derive(Serialize, Deserialize)]
    struct FeePoolState {
        owner: String,
        tokens: Vec<String>,
    }

    impl ContractHandler for FeePool {
        fn instantiate(&self, ctx: &mut CallContext<'_>, _msg: &Value) -> ContractResult<Value> {
            to_json(&FeePoolState {
                owner: ctx.sender.to_string(),
                tokens: Vec::new(),
            })
        }

        fn execute(&self, ctx: &mut CallContext<'_>, state: &mut Value, msg: &Value) -> ContractResult<Vec<Attribute>> {
            let mut s: FeePoolState = load(state)?;
            if ctx.sender != s.owner {
                return Err(UNAUTHORIZED.to_string());
            }
            let (name, args) = variant(msg)?;
            let token = string_field(args, "token")?;
            match name {
                "add_token" => {
                    if s.tokens.contains(&token) {
                        return Err("This token is already added".to_string());
                    }
                    s.tokens.push(token.clone());
                }
                "remove_token" => {
                    if !s.tokens.contains(&token) {
                        return Err("This token has not been added".to_string());
                    }
                    s.tokens.retain(|t| t != &token);
                }
                "send_token" => {
                    if !s.tokens.contains(&token) {
                        return Err("This token is not supported".to_string());
                    }
                }
                other => return Err(unknown(other)),
            }
            save(state, &s)?;
            Ok(attrs(&[("action", name.to_string()), ("token", token)]))
        }

        fn query(&self, _ctx: &QueryContext<'_>, state: &Value, msg: &Value) -> ContractResult<Value> {
            let s: FeePoolState = load(state)?;
            match variant(msg)? {
                ("config", _) => Ok(json!({ "owner": s.owner })),
                ("is_token", args) => Ok(json!({ "is_token": s.tokens.contains(&string_field(args, "token")?) })),
                ("get_token_list", _) => Ok(json!({ "token_list": s.tokens })),
                (other, _) => Err(unknown(other)),
            }
        }
    }

    #[derive(Debug, Clone, Copy, Default)]
    pub struct InsuranceFund;

    #[derive(Serialize, Deserialize)]
    struct InsuranceFundState {
        owner: String,
        beneficiary: Option<String>,
        vamms: Vec<String>,
    }

    impl ContractHandler for InsuranceFund {
        fn instantiate(&self, ctx: &mut CallContext<'_>, msg: &Value) -> ContractResult<Value> {
            to_json(&InsuranceFundState {
                owner: ctx.sender.to_string(),
                beneficiary: opt_string(msg, "engine"),
                vamms: Vec::new(),
            })
        }

        fn execute(&self, ctx: &mut CallContext<'_>, state: &mut Value, msg: &Value) -> ContractResult<Vec<Attribute>> {
            let mut s: InsuranceFundState = load(state)?;
            let (name, args) = variant(msg)?;
            let is_owner = ctx.sender == s.owner;
            match name {
                "update_config" if is_owner => s.beneficiary = opt_string(args, "beneficiary").or(s.beneficiary),
                "update_owner" if is_owner => s.owner = string_field(args, "owner")?,
                "add_vamm" if is_owner => {
                    let vamm = string_field(args, "vamm")?;
                    if s.vamms.contains(&vamm) {
                        return Err("This vAMM is already added".to_string());
                    }
                    s.vamms.push(vamm);
                }
                "remove_vamm" if is_owner => {
                    let vamm = string_field(args, "vamm")?;
                    if !s.vamms.contains(&vamm) {
                        return Err("This vAMM has not been added".to_string());
                    }
                    s.vamms.retain(|v| v != &vamm);
                }
                "shutdown_vamms" if is_owner || s.beneficiary.as_deref() == Some(ctx.sender) => {
                    for vamm in &s.vamms {
                        if let Some(v) = ctx.peer_mut(vamm) {
                            v["open"] = Value::Bool(false);
                        }
                    }
                }
                "update_config" | "update_owner" | "add_vamm" | "remove_vamm" | "shutdown_vamms" => {
                    return Err(UNAUTHORIZED.to_string())
                }
                other => return Err(unknown(other)),
            }
            save(state, &s)?;
            Ok(attrs(&[("action", name.to_string())]))
        }

        fn query(&self, _ctx: &QueryContext<'_>, state: &Value, msg: &Value) -> ContractResult<Value> {
            let s: InsuranceFundState = load(state)?;
            match variant(msg)? {
                ("config", _) => Ok(json!({ "owner": s.owner, "beneficiary": s.beneficiary })),
                ("is_vamm", args) => Ok(json!({ "is_vamm": s.vamms.contains(&string_field(args, "vamm")?) })),
                ("get_all_vamm", _) => Ok(json!({ "vamm_list": s.vamms })),
                (other, _) => Err(unknown(other)),
            }
        }
    }

    #[derive(Debug, Clone, Copy, Default)]
    pub struct Pricefeed;

    #[derive(Serialize, Deserialize)]
    struct PriceEntry {
        price: Uint128,
        timestamp: u64,
    }

    #[derive(Serialize, Deserialize)]
    struct PricefeedState {
        owner: String,
        oracle_hub_contract: String,
        decimals: u8,
        prices: BTreeMap<String, Vec<PriceEntry>>,
    }

    impl ContractHandler for Pricefeed {
        fn instantiate(&self, ctx: &mut CallContext<'_>, msg: &Value) -> ContractResult<Value> {
            let decimals = msg.get("decimals").and_then(Value::as_u64).unwrap_or(6);
            to_json(&PricefeedState {
                owner: ctx.sender.to_string(),
                oracle_hub_contract: opt_string(msg, "oracle_hub_contract").unwrap_or_default(),
                decimals: u8::try_from(decimals).map_err(|e| e.to_string())?,
                prices: BTreeMap::new(),
            })
        }

        fn execute(&self, ctx: &mut CallContext<'_>, state: &mut Value, msg: &Value) -> ContractResult<Vec<Attribute>> {
            let mut s: PricefeedState = load(state)?;
            if ctx.sender != s.owner {
                return Err(UNAUTHORIZED.to_string());
            }
            let (name, args) = variant(msg)?;
            let key = string_field(args, "key")?;
            let entries = match name {
                "append_price" => vec![PriceEntry {
                    price: Uint128(uint_field(args, "price")?),
                    timestamp: u64_field(args, "timestamp")?,
                }],
                "append_multiple_price" => {
                    let prices: Vec<Uint128> = serde_json::from_value(args["prices"].clone()).map_err(|e| e.to_string())?;
                    let timestamps: Vec<u64> =
                        serde_json::from_value(args["timestamps"].clone()).map_err(|e| e.to_string())?;
                    if prices.len() != timestamps.len() {
                        return Err("Prices and timestamps are not the same length".to_string());
                    }
                    prices
                        .into_iter()
                        .zip(timestamps)
                        .map(|(price, timestamp)| PriceEntry { price, timestamp })
                        .collect()
                }
                other => return Err(unknown(other)),
            };
            s.prices.entry(key.clone()).or_default().extend(entries);
            save(state, &s)?;
            Ok(attrs(&[("action", name.to_string()), ("key", key)]))
        }

        fn query(&self, _ctx: &QueryContext<'_>, state: &Value, msg: &Value) -> ContractResult<Value> {
            let s: PricefeedState = load(state)?;
            match variant(msg)? {
                ("config", _) => Ok(json!({
                    "owner": s.owner,
                    "oracle_hub_contract": s.oracle_hub_contract,
                    "decimals": s.decimals,
                })),
                ("get_price", args) => {
                    let key = string_field(args, "key")?;
                    s.prices
                        .get(&key)
                        .and_then(|p| p.last())
                        .map(|p| json!(p.price))
                        .ok_or_else(|| format!("No price data for {}", key))
                }
                (other, _) => Err(unknown(other)),
            }
        }
    }

    #[derive(Debug, Clone, Copy, Default)]
    pub struct Cw20;

    #[derive(Serialize, Deserialize)]
    struct Cw20State {
        name: String,
        symbol: String,
        decimals: u8,
        total_supply: Uint128,
        minter: Option<String>,
        balances: BTreeMap<String, Uint128>,
        /// keyed `owner/spender`
        allowances: BTreeMap<String, Uint128>,
    }

    impl Cw20State {
        fn balance(&self, address: &str) -> u128 {
            self.balances.get(address).map_or(0, |b| b.u128())
        }

        fn transfer(&mut self, from: &str, to: &str, amount: u128) -> ContractResult<()> {
            let available = self.balance(from);
            if available < amount {
                return Err(format!("Cannot Sub with {} and {}", available, amount));
            }
            self.balances.insert(from.to_string(), Uint128(available - amount));
            let to_balance = self.balance(to);
            self.balances.insert(to.to_string(), Uint128(to_balance + amount));
            Ok(())
        }
    }

    /// Move `amount` from `owner` to `recipient` against `spender`'s allowance
    pub fn cw20_transfer_from(
        state: &mut Value,
        owner: &str,
        spender: &str,
        recipient: &str,
        amount: u128,
    ) -> ContractResult<()> {
        let mut s: Cw20State = load(state)?;
        let key = format!("{}/{}", owner, spender);
        let allowance = s.allowances.get(&key).map_or(0, |a| a.u128());
        if allowance < amount {
            return Err("No allowance for this account".to_string());
        }
        s.allowances.insert(key, Uint128(allowance - amount));
        s.transfer(owner, recipient, amount)?;
        save(state, &s)
    }

    impl ContractHandler for Cw20 {
        fn instantiate(&self, _ctx: &mut CallContext<'_>, msg: &Value) -> ContractResult<Value> {
            let mut balances = BTreeMap::new();
            let mut total = 0u128;
            for entry in msg["initial_balances"].as_array().into_iter().flatten() {
                let amount = uint_field(entry, "amount")?;
                total += amount;
                balances.insert(string_field(entry, "address")?, Uint128(amount));
            }
            let decimals = msg.get("decimals").and_then(Value::as_u64).unwrap_or(6);
            to_json(&Cw20State {
                name: string_field(msg, "name")?,
                symbol: string_field(msg, "symbol")?,
                decimals: u8::try_from(decimals).map_err(|e| e.to_string())?,
                total_supply: Uint128(total),
                minter: msg.get("mint").and_then(|m| opt_string(m, "minter")),
                balances,
                allowances: BTreeMap::new(),
            })
        }

        fn execute(&self, ctx: &mut CallContext<'_>, state: &mut Value, msg: &Value) -> ContractResult<Vec<Attribute>> {
            let (name, args) = variant(msg)?;
            if name == "transfer_from" {
                cw20_transfer_from(
                    state,
                    &string_field(args, "owner")?,
                    ctx.sender,
                    &string_field(args, "recipient")?,
                    uint_field(args, "amount")?,
                )?;
                return Ok(attrs(&[("action", name.to_string())]));
            }

            let mut s: Cw20State = load(state)?;
            let amount = uint_field(args, "amount")?;
            match name {
                "transfer" => s.transfer(ctx.sender, &string_field(args, "recipient")?, amount)?,
                "mint" => {
                    if s.minter.as_deref() != Some(ctx.sender) {
                        return Err(UNAUTHORIZED.to_string());
                    }
                    let recipient = string_field(args, "recipient")?;
                    let balance = s.balance(&recipient);
                    s.balances.insert(recipient, Uint128(balance + amount));
                    s.total_supply = Uint128(s.total_supply.u128() + amount);
                }
                "increase_allowance" => {
                    let key = format!("{}/{}", ctx.sender, string_field(args, "spender")?);
                    let current = s.allowances.get(&key).map_or(0, |a| a.u128());
                    s.allowances.insert(key, Uint128(current + amount));
                }
                other => return Err(unknown(other)),
            }
            save(state, &s)?;
            Ok(attrs(&[("action", name.to_string()), ("amount", amount.to_string())]))
        }

        fn query(&self, _ctx: &QueryContext<'_>, state: &Value, msg: &Value) -> ContractResult<Value> {
            let s: Cw20State = load(state)?;
            match variant(msg)? {
                ("balance", args) => Ok(json!({ "balance": s.balance(&string_field(args, "address")?).to_string() })),
                ("token_info", _) => Ok(json!({
                    "name": s.name,
                    "symbol": s.symbol,
                    "decimals": s.decimals,
                    "total_supply": s.total_supply,
                })),
                (other, _) => Err(unknown(other)),
            }
        }
    }

    #[derive(Debug, Clone, Copy, Default)]
    pub struct Vamm;

    #[derive(Serialize, Deserialize)]
    struct VammState {
        owner: String,
        margin_engine: Option<String>,
        insurance_fund: Option<String>,
        pricefeed: String,
        decimals: u8,
        quote_asset: String,
        base_asset: String,
        quote_asset_reserve: Uint128,
        base_asset_reserve: Uint128,
        /// Signed, decimal string
        total_position_size: String,
        funding_period: u64,
        toll_ratio: Uint128,
        spread_ratio: Uint128,
        fluctuation_limit_ratio: Uint128,
        open: bool,
    }

    impl VammState {
        fn total_position_size(&self) -> ContractResult<i128> {
            self.total_position_size
                .parse()
                .map_err(|e| format!("corrupt state: {}", e))
        }

        /// Base asset for `quote_amount`, computed the way the vAMM contract does
        fn input_price(&self, direction: Direction, quote_amount: u128) -> ContractResult<u128> {
            let overflow = || "Overflow".to_string();
            let decimals = 10u128.pow(self.decimals as u32);
            let quote_reserve = self.quote_asset_reserve.u128();
            let base_reserve = self.base_asset_reserve.u128();

            let invariant_k = quote_reserve.checked_mul(base_reserve).ok_or_else(overflow)? / decimals;
            let quote_after = match direction {
                Direction::AddToAmm => quote_reserve.checked_add(quote_amount),
                Direction::RemoveFromAmm => quote_reserve.checked_sub(quote_amount),
            }
            .filter(|q| *q > 0)
            .ok_or_else(|| "Insufficient reserves".to_string())?;
            let base_after = invariant_k.checked_mul(decimals).ok_or_else(overflow)? / quote_after;

            let mut bought = if base_after > base_reserve {
                base_after - base_reserve
            } else {
                base_reserve - base_after
            };
            let scaled_k = invariant_k.checked_mul(1_000_000_000).ok_or_else(overflow)?;
            if scaled_k - quote_after * (scaled_k / quote_after) != 0 {
                bought = match direction {
                    Direction::AddToAmm => bought.checked_sub(1).ok_or_else(overflow)?,
                    Direction::RemoveFromAmm => bought + 1,
                };
            }
            Ok(bought)
        }
    }

    /// Swap `quote_amount` through the pool on behalf of the engine; returns the signed base size
    pub fn vamm_swap_input(state: &mut Value, caller: &str, side: &str, quote_amount: u128) -> ContractResult<i128> {
        let mut s: VammState = load(state)?;
        if s.margin_engine.as_deref() != Some(caller) {
            return Err(UNAUTHORIZED.to_string());
        }
        if !s.open {
            return Err(AMM_CLOSED.to_string());
        }
        let direction = match side {
            "buy" => Direction::AddToAmm,
            "sell" => Direction::RemoveFromAmm,
            other => return Err(unknown(other)),
        };

        let quote = s.quote_asset_reserve.u128();
        let base = s.base_asset_reserve.u128();
        let amount = s.input_price(direction, quote_amount)?;
        let signed = i128::try_from(amount).map_err(|e| e.to_string())?;
        let (quote, base, size) = match direction {
            Direction::AddToAmm => (quote + quote_amount, base - amount, signed),
            Direction::RemoveFromAmm => (quote - quote_amount, base + amount, -signed),
        };

        s.quote_asset_reserve = Uint128(quote);
        s.base_asset_reserve = Uint128(base);
        s.total_position_size = (s.total_position_size()? + size).to_string();
        save(state, &s)?;
        Ok(size)
    }

    impl ContractHandler for Vamm {
        fn instantiate(&self, ctx: &mut CallContext<'_>, msg: &Value) -> ContractResult<Value> {
            let decimals = msg.get("decimals").and_then(Value::as_u64).unwrap_or(6);
            to_json(&VammState {
                owner: ctx.sender.to_string(),
                margin_engine: opt_string(msg, "margin_engine"),
                insurance_fund: opt_string(msg, "insurance_fund"),
                pricefeed: string_field(msg, "pricefeed")?,
                decimals: u8::try_from(decimals).map_err(|e| e.to_string())?,
                quote_asset: string_field(msg, "quote_asset")?,
                base_asset: string_field(msg, "base_asset")?,
                quote_asset_reserve: Uint128(uint_field(msg, "quote_asset_reserve")?),
                base_asset_reserve: Uint128(uint_field(msg, "base_asset_reserve")?),
                total_position_size: "0".to_string(),
                funding_period: u64_field(msg, "funding_period")?,
                toll_ratio: Uint128(opt_uint(msg, "toll_ratio")?.unwrap_or(0)),
                spread_ratio: Uint128(opt_uint(msg, "spread_ratio")?.unwrap_or(0)),
                fluctuation_limit_ratio: Uint128(opt_uint(msg, "fluctuation_limit_ratio")?.unwrap_or(0)),
                open: false,
            })
        }

        fn execute(&self, ctx: &mut CallContext<'_>, state: &mut Value, msg: &Value) -> ContractResult<Vec<Attribute>> {
            let mut s: VammState = load(state)?;
            let (name, args) = variant(msg)?;
            if ctx.sender != s.owner {
                return Err(UNAUTHORIZED.to_string());
            }
            match name {
                "update_config" => {
                    s.margin_engine = opt_string(args, "margin_engine").or(s.margin_engine);
                    s.insurance_fund = opt_string(args, "insurance_fund").or(s.insurance_fund);
                    s.pricefeed = opt_string(args, "pricefeed").unwrap_or(s.pricefeed);
                    s.toll_ratio = opt_uint(args, "toll_ratio")?.map_or(s.toll_ratio, Uint128);
                    s.spread_ratio = opt_uint(args, "spread_ratio")?.map_or(s.spread_ratio, Uint128);
                    s.fluctuation_limit_ratio = opt_uint(args, "fluctuation_limit_ratio")?
                        .map_or(s.fluctuation_limit_ratio, Uint128);
                }
                "update_owner" => s.owner = string_field(args, "owner")?,
                "set_open" => {
                    s.open = args
                        .get("open")
                        .and_then(Value::as_bool)
                        .ok_or_else(|| "Error parsing into type: missing field `open`".to_string())?;
                }
                "settle_funding" => {
                    if !s.open {
                        return Err(AMM_CLOSED.to_string());
                    }
                }
                other => return Err(unknown(other)),
            }
            save(state, &s)?;
            Ok(attrs(&[("action", name.to_string())]))
        }

        fn query(&self, _ctx: &QueryContext<'_>, state: &Value, msg: &Value) -> ContractResult<Value> {
            let s: VammState = load(state)?;
            match variant(msg)? {
                ("config", _) => Ok(json!({
                    "owner": s.owner,
                    "margin_engine": s.margin_engine,
                    "insurance_fund": s.insurance_fund,
                    "pricefeed": s.pricefeed,
                    "decimals": s.decimals,
                    "quote_asset": s.quote_asset,
                    "base_asset": s.base_asset,
                    "funding_period": s.funding_period,
                    "toll_ratio": s.toll_ratio,
                    "spread_ratio": s.spread_ratio,
                    "fluctuation_limit_ratio": s.fluctuation_limit_ratio,
                })),
                ("state", _) => Ok(json!({
                    "open": s.open,
                    "quote_asset_reserve": s.quote_asset_reserve,
                    "base_asset_reserve": s.base_asset_reserve,
                    "total_position_size": s.total_position_size,
                    "funding_rate": "0",
                    "next_funding_time": 0,
                })),
                ("spot_price", _) => {
                    let base = s.base_asset_reserve.u128();
                    if base == 0 {
                        return Err("Empty base reserve".to_string());
                    }
                    let scale = 10u128.pow(u32::from(s.decimals));
                    Ok(json!(Uint128(s.quote_asset_reserve.u128() * scale / base)))
                }
                (other, _) => Err(unknown(other)),
            }
        }
    }

    #[derive(Debug, Clone, Copy, Default)]
    pub struct Engine;

    #[derive(Serialize, Deserialize)]
    struct PositionRecord {
        position_id: u64,
        vamm: String,
        trader: String,
        side: String,
        /// Signed, decimal string
        size: String,
        margin: Uint128,
        notional: Uint128,
    }

    #[derive(Serialize, Deserialize)]
    struct EngineState {
        owner: String,
        pauser: Option<String>,
        insurance_fund: Option<String>,
        fee_pool: String,
        eligible_collateral: String,
        decimals: u8,
        initial_margin_ratio: Uint128,
        maintenance_margin_ratio: Uint128,
        liquidation_fee: Uint128,
        vamms: Vec<String>,
        pause: bool,
        last_position_id: u64,
        positions: Vec<PositionRecord>,
    }

    impl Engine {
        fn open_position(
            &self,
            ctx: &mut CallContext<'_>,
            s: &mut EngineState,
            args: &Value,
        ) -> ContractResult<Vec<Attribute>> {
            if s.pause {
                return Err("Margin engine is paused".to_string());
            }
            let vamm = string_field(args, "vamm")?;
            if !s.vamms.contains(&vamm) {
                return Err("vAMM is not registered".to_string());
            }
            let side = string_field(args, "side")?;
            let margin = uint_field(args, "margin_amount")?;
            let leverage = uint_field(args, "leverage")?;
            if margin == 0 || leverage == 0 {
                return Err("Margin and leverage must be non-zero".to_string());
            }

            let scale = 10u128.pow(u32::from(s.decimals));
            let notional = margin
                .checked_mul(leverage)
                .ok_or_else(|| "Overflow computing notional".to_string())?
                / scale;
            if margin * scale < s.initial_margin_ratio.u128() * notional {
                return Err("Position is undercollateralized".to_string());
            }

            let engine = ctx.contract.to_string();
            let trader = ctx.sender.to_string();
            if ctx.peer(&s.eligible_collateral).is_some() {
                let token = s.eligible_collateral.clone();
                let token_state = ctx
                    .peer_mut(&token)
                    .ok_or_else(|| "Collateral token not found".to_string())?;
                cw20_transfer_from(token_state, &trader, &engine, &engine, margin)?;
            } else {
                let sent = ctx
                    .funds
                    .iter()
                    .find(|c| c.denom == s.eligible_collateral)
                    .map_or(0, |c| c.amount.u128());
                if sent != margin {
                    return Err(format!(
                        "Native token balance mismatch between the argument and the transferred: {} vs {}",
                        margin, sent
                    ));
                }
            }

            let vamm_state = ctx
                .peer_mut(&vamm)
                .ok_or_else(|| format!("vAMM {} not found", vamm))?;
            let size = vamm_swap_input(vamm_state, &engine, &side, notional)?;

            s.last_position_id += 1;
            s.positions.push(PositionRecord {
                position_id: s.last_position_id,
                vamm,
                trader,
                side,
                size: size.to_string(),
                margin: Uint128(margin),
                notional: Uint128(notional),
            });
            Ok(attrs(&[
                ("action", "open_position".to_string()),
                ("position_id", s.last_position_id.to_string()),
                ("position_size", size.to_string()),
                ("margin_amount", margin.to_string()),
            ]))
        }
    }

    impl ContractHandler for Engine {
        fn instantiate(&self, ctx: &mut CallContext<'_>, msg: &Value) -> ContractResult<Value> {
            let decimals = msg.get("decimals").and_then(Value::as_u64).unwrap_or(6);
            let vamms = msg["vamm"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            to_json(&EngineState {
                owner: ctx.sender.to_string(),
                pauser: opt_string(msg, "pauser"),
                insurance_fund: opt_string(msg, "insurance_fund"),
                fee_pool: string_field(msg, "fee_pool")?,
                eligible_collateral: string_field(msg, "eligible_collateral")?,
                decimals: u8::try_from(decimals).map_err(|e| e.to_string())?,
                initial_margin_ratio: Uint128(uint_field(msg, "initial_margin_ratio")?),
                maintenance_margin_ratio: Uint128(uint_field(msg, "maintenance_margin_ratio")?),
                liquidation_fee: Uint128(uint_field(msg, "liquidation_fee")?),
                vamms,
                pause: false,
                last_position_id: 0,
                positions: Vec::new(),
            })
        }

        fn execute(&self, ctx: &mut CallContext<'_>, state: &mut Value, msg: &Value) -> ContractResult<Vec<Attribute>> {
            let mut s: EngineState = load(state)?;
            let (name, args) = variant(msg)?;
            let attributes = match name {
                "open_position" => self.open_position(ctx, &mut s, args)?,
                "update_config" => {
                    if ctx.sender != s.owner {
                        return Err(UNAUTHORIZED.to_string());
                    }
                    s.owner = opt_string(args, "owner").unwrap_or(s.owner);
                    s.insurance_fund = opt_string(args, "insurance_fund").or(s.insurance_fund);
                    s.fee_pool = opt_string(args, "fee_pool").unwrap_or(s.fee_pool);
                    s.eligible_collateral = opt_string(args, "eligible_collateral").unwrap_or(s.eligible_collateral);
                    s.initial_margin_ratio = opt_uint(args, "initial_margin_ratio")?.map_or(s.initial_margin_ratio, Uint128);
                    s.maintenance_margin_ratio =
                        opt_uint(args, "maintenance_margin_ratio")?.map_or(s.maintenance_margin_ratio, Uint128);
                    s.liquidation_fee = opt_uint(args, "liquidation_fee")?.map_or(s.liquidation_fee, Uint128);
                    attrs(&[("action", name.to_string())])
                }
                "set_pause" => {
                    if ctx.sender != s.owner && s.pauser.as_deref() != Some(ctx.sender) {
                        return Err(UNAUTHORIZED.to_string());
                    }
                    s.pause = args.get("pause").and_then(Value::as_bool).unwrap_or(s.pause);
                    attrs(&[("action", name.to_string())])
                }
                other => return Err(unknown(other)),
            };
            save(state, &s)?;
            Ok(attributes)
        }

        fn query(&self, _ctx: &QueryContext<'_>, state: &Value, msg: &Value) -> ContractResult<Value> {
            let s: EngineState = load(state)?;
            match variant(msg)? {
                ("config", _) => Ok(json!({
                    "owner": s.owner,
                    "insurance_fund": s.insurance_fund,
                    "fee_pool": s.fee_pool,
                    "eligible_collateral": s.eligible_collateral,
                    "decimals": s.decimals,
                    "initial_margin_ratio": s.initial_margin_ratio,
                    "maintenance_margin_ratio": s.maintenance_margin_ratio,
                    "liquidation_fee": s.liquidation_fee,
                })),
                ("state", _) => Ok(json!({ "pause": s.pause, "open_interest_notional": "0", "bad_debt": "0" })),
                ("position", args) => {
                    let vamm = string_field(args, "vamm")?;
                    let id = u64_field(args, "position_id")?;
                    s.positions
                        .iter()
                        .find(|p| p.position_id == id && p.vamm == vamm)
                        .map(to_json)
                        .unwrap_or_else(|| Err(format!("Position {} not found", id)))
                }
                ("last_position_id", _) => Ok(json!({ "last_order_id": s.last_position_id })),
                (other, _) => Err(unknown(other)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_chain_store_and_instantiate() {
        let chain = Arc::new(MockChain::with_protocol_contracts());
        let owner = mock_executor(&chain, "owner");

        let (code_id, _) = owner.upload(&protocol_bytecode(FEE_POOL)).await.unwrap();
        assert_eq!(code_id, 1);
        let (address, result) = owner
            .instantiate(code_id, &json!({}), "fee pool", None, Vec::new())
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(chain.contract_admin(&address).as_deref(), Some(owner.address()));
        assert_eq!(chain.sequence(owner.address()), 2);
    }

    #[tokio::test]
    async fn test_mock_chain_rejects_unknown_bytecode() {
        let chain = Arc::new(MockChain::new());
        let owner = mock_executor(&chain, "owner");

        let err = owner.upload(b"not wasm").await.unwrap_err();
        match err {
            HarnessError::Chain { code, codespace, raw_log } => {
                assert_eq!(code, 5);
                assert_eq!(codespace.as_deref(), Some("wasm"));
                assert!(raw_log.contains("static Wasm validation"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // included, so the sequence moved
        assert_eq!(chain.sequence(owner.address()), 1);
    }

    #[tokio::test]
    async fn test_mock_chain_detects_tampered_tx() {
        let chain = Arc::new(MockChain::with_protocol_contracts());
        let owner = mock_executor(&chain, "owner");
        owner.upload(&protocol_bytecode(FEE_POOL)).await.unwrap();

        let mut tx = chain.submitted().pop().unwrap();
        tx.msg = vec![Msg::store_code(owner.address(), &protocol_bytecode(VAMM))];
        let result = chain.broadcast(&tx).await.unwrap();

        assert_eq!(result.code, 4);
        assert!(result.raw_log.contains("signature verification failed"));
        assert_eq!(chain.sequence(owner.address()), 1);
    }

    /// Signs with its own key but claims another account
    #[derive(Debug)]
    struct ClaimsOtherAddress {
        key: Secp256k1Wallet,
        claimed: String,
    }

    impl Signer for ClaimsOtherAddress {
        fn address(&self) -> &str {
            &self.claimed
        }

        fn public_key(&self) -> Vec<u8> {
            self.key.public_key()
        }

        fn sign(&self, sign_bytes: &[u8]) -> Result<Vec<u8>> {
            self.key.sign(sign_bytes)
        }
    }

    #[tokio::test]
    async fn test_mock_chain_binds_sender_to_public_key() {
        let chain = Arc::new(MockChain::with_protocol_contracts());
        let victim = mock_address("victim");
        let impostor = mock_executor(&chain, "owner").with_signer(Arc::new(ClaimsOtherAddress {
            key: mock_wallet("mallory"),
            claimed: victim.clone(),
        }));
        assert_ne!(mock_wallet("mallory").address(), victim);

        let err = impostor.upload(&protocol_bytecode(FEE_POOL)).await.unwrap_err();
        match err {
            HarnessError::Chain { code, raw_log, .. } => {
                assert_eq!(code, 8);
                assert!(raw_log.contains(&victim));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(chain.sequence(&victim), 0);
    }

    #[test]
    fn test_mock_wallets_are_deterministic() {
        assert_eq!(mock_address("owner"), mock_wallet("owner").address());
        assert_eq!(mock_address("owner"), mock_address("owner"));
        assert_ne!(mock_address("owner"), mock_address("alice"));
        assert!(mock_address("owner").starts_with("terra1"));
    }

    #[tokio::test]
    async fn test_failed_execution_rolls_back_funds() {
        let chain = Arc::new(MockChain::with_protocol_contracts());
        let owner = mock_executor(&chain, "owner");
        chain.fund(owner.address(), Coin::new(1_000, "uusd"));

        let (code_id, _) = owner.upload(&protocol_bytecode(FEE_POOL)).await.unwrap();
        let (pool, _) = owner
            .instantiate(code_id, &json!({}), "fee pool", None, Vec::new())
            .await
            .unwrap();

        let err = owner
            .execute(&pool, &json!({ "unknown": {} }), vec![Coin::new(400, "uusd")])
            .await
            .unwrap_err();
        assert!(err.is_chain_rejection());
        assert_eq!(chain.balance(owner.address(), "uusd").await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn test_injected_read_failures() {
        let chain = MockChain::new();
        chain.fail_next_reads(1);
        assert!(chain.balance("terra1x", "uusd").await.unwrap_err().is_retryable());
        assert_eq!(chain.balance("terra1x", "uusd").await.unwrap(), 0);
        assert_eq!(chain.request_count(), 2);
    }

    #[tokio::test]
    async fn test_blocks_advance_until_halted() {
        let chain = MockChain::new();
        let first = chain.latest_block().await.unwrap();
        let second = chain.latest_block().await.unwrap();
        assert_eq!(second.height, first.height + 1);
        assert_eq!(second.time - first.time, chrono::Duration::seconds(MOCK_BLOCK_TIME_SECS));

        chain.halt_blocks();
        let stuck = chain.latest_block().await.unwrap();
        assert_eq!(chain.latest_block().await.unwrap(), stuck);
    }

    fn open_vamm_state(quote: u128, base: u128) -> Value {
        json!({
            "owner": "terra1owner",
            "margin_engine": "terra1engine",
            "insurance_fund": null,
            "pricefeed": "terra1pricefeed",
            "decimals": 6,
            "quote_asset": "ETH",
            "base_asset": "UST",
            "quote_asset_reserve": quote.to_string(),
            "base_asset_reserve": base.to_string(),
            "total_position_size": "0",
            "funding_period": 3600,
            "toll_ratio": "0",
            "spread_ratio": "0",
            "fluctuation_limit_ratio": "0",
            "open": true,
        })
    }

    #[test]
    fn test_mock_vamm_swap_vectors() {
        use mock_contracts::vamm_swap_input;

        let mut state = open_vamm_state(1_500_000, 2_500_001);
        assert_eq!(vamm_swap_input(&mut state, "terra1engine", "buy", 500_000), Ok(625_001));
        assert_eq!(state["base_asset_reserve"], json!("1875000"));

        let mut state = open_vamm_state(4_000_000, 1_000_000);
        assert_eq!(vamm_swap_input(&mut state, "terra1engine", "sell", 1_000_000), Ok(-333_334));
        assert_eq!(state["total_position_size"], json!("-333334"));

        let mut state = open_vamm_state(2_000_000, 1_000_000);
        assert_eq!(vamm_swap_input(&mut state, "terra1engine", "buy", 1_000_000), Ok(333_333));

        let mut state = open_vamm_state(1_000_000_000, 100_000_000);
        assert_eq!(
            vamm_swap_input(&mut state, "terra1engine", "sell", 1_000_000_000 - 244_140_625),
            Ok(-309_600_000)
        );
    }
}
