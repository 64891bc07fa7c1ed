//! Transaction model: amino-JSON messages, sign documents, signed
//! transactions and the result of an included transaction

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{HarnessError, Result};
use crate::types::{u64_from_str_or_num, Coin, Uint128};

/// Chain messages supported by the harness
///
/// Serialized in the legacy amino JSON shape `{"type": ..., "value": {...}}`.
/// `code_id` is a string there, like every other u64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Msg {
    #[serde(rename = "wasm/MsgStoreCode")]
    StoreCode {
        sender: String,
        /// base64-encoded bytecode
        wasm_byte_code: String,
    },

    #[serde(rename = "wasm/MsgInstantiateContract")]
    InstantiateContract {
        sender: String,
        admin: String,
        code_id: Uint128,
        label: String,
        msg: Value,
        funds: Vec<Coin>,
    },

    #[serde(rename = "wasm/MsgExecuteContract")]
    ExecuteContract {
        sender: String,
        contract: String,
        msg: Value,
        funds: Vec<Coin>,
    },

    #[serde(rename = "wasm/MsgMigrateContract")]
    MigrateContract {
        sender: String,
        contract: String,
        code_id: Uint128,
        msg: Value,
    },

    #[serde(rename = "wasm/MsgUpdateAdmin")]
    UpdateAdmin {
        sender: String,
        new_admin: String,
        contract: String,
    },

    #[serde(rename = "wasm/MsgClearAdmin")]
    ClearAdmin { sender: String, contract: String },

    #[serde(rename = "cosmos-sdk/MsgSend")]
    Send {
        from_address: String,
        to_address: String,
        amount: Vec<Coin>,
    },
}

impl Msg {
    pub fn store_code(sender: &str, bytecode: &[u8]) -> Self {
        Msg::StoreCode {
            sender: sender.to_string(),
            wasm_byte_code: BASE64.encode(bytecode),
        }
    }

    /// Short name for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::StoreCode { .. } => "store_code",
            Msg::InstantiateContract { .. } => "instantiate",
            Msg::ExecuteContract { .. } => "execute",
            Msg::MigrateContract { .. } => "migrate",
            Msg::UpdateAdmin { .. } => "update_admin",
            Msg::ClearAdmin { .. } => "clear_admin",
            Msg::Send { .. } => "send",
        }
    }

    pub fn sender(&self) -> &str {
        match self {
            Msg::StoreCode { sender, .. }
            | Msg::InstantiateContract { sender, .. }
            | Msg::ExecuteContract { sender, .. }
            | Msg::MigrateContract { sender, .. }
            | Msg::UpdateAdmin { sender, .. }
            | Msg::ClearAdmin { sender, .. } => sender,
            Msg::Send { from_address, .. } => from_address,
        }
    }
}

/// Transaction fee: gas limit plus the amount bid for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    pub amount: Vec<Coin>,
    #[serde(with = "u64_string")]
    pub gas: u64,
}

impl Fee {
    pub fn new(gas: u64, amount: Vec<Coin>) -> Self {
        Self { amount, gas }
    }
}

/// Document whose canonical JSON encoding is signed
#[derive(Debug, Clone, Serialize)]
pub struct StdSignDoc<'a> {
    #[serde(with = "u64_string")]
    pub account_number: u64,
    pub chain_id: &'a str,
    pub fee: &'a Fee,
    pub memo: &'a str,
    pub msgs: &'a [Msg],
    #[serde(with = "u64_string")]
    pub sequence: u64,
}

impl StdSignDoc<'_> {
    /// Bytes to sign: sorted keys, no whitespace, HTML-sensitive characters escaped
    pub fn sign_bytes(&self) -> Result<Vec<u8>> {
        let value = serde_json::to_value(self).map_err(|e| HarnessError::Signing(e.to_string()))?;
        Ok(canonical_json(&value).into_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubKey {
    #[serde(rename = "type")]
    pub key_type: String,
    /// base64 compressed secp256k1 point
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StdSignature {
    pub pub_key: PubKey,
    /// base64 64-byte r||s
    pub signature: String,
}

/// Signed transaction ready for broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StdTx {
    pub msg: Vec<Msg>,
    pub fee: Fee,
    pub signatures: Vec<StdSignature>,
    pub memo: String,
}

impl StdTx {
    /// Unsigned transaction used for gas simulation
    pub fn unsigned(msgs: Vec<Msg>, fee: Fee, memo: &str) -> Self {
        Self {
            msg: msgs,
            fee,
            signatures: Vec::new(),
            memo: memo.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, Deserialize)]
struct MsgLog {
    #[serde(default)]
    events: Vec<Event>,
}

/// Raw block-mode broadcast response as returned by the LCD
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BroadcastResponse {
    #[serde(default, deserialize_with = "u64_from_str_or_num")]
    height: u64,
    #[serde(default)]
    txhash: String,
    #[serde(default)]
    raw_log: String,
    #[serde(default)]
    logs: Option<Vec<MsgLog>>,
    #[serde(default, deserialize_with = "u64_from_str_or_num")]
    gas_wanted: u64,
    #[serde(default, deserialize_with = "u64_from_str_or_num")]
    gas_used: u64,
    #[serde(default)]
    code: Option<u32>,
    #[serde(default)]
    codespace: Option<String>,
}

impl From<BroadcastResponse> for TxResult {
    fn from(resp: BroadcastResponse) -> Self {
        let events = resp
            .logs
            .unwrap_or_default()
            .into_iter()
            .flat_map(|log| log.events)
            .collect();

        TxResult {
            tx_hash: resp.txhash,
            height: resp.height,
            gas_wanted: resp.gas_wanted,
            gas_used: resp.gas_used,
            code: resp.code.unwrap_or(0),
            codespace: resp.codespace.filter(|c| !c.is_empty()),
            raw_log: resp.raw_log,
            events,
        }
    }
}

/// Outcome of one included transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TxResult {
    pub tx_hash: String,
    pub height: u64,
    pub gas_wanted: u64,
    pub gas_used: u64,
    /// 0 on success
    pub code: u32,
    pub codespace: Option<String>,
    pub raw_log: String,
    pub events: Vec<Event>,
}

impl TxResult {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Convert an on-chain failure into `HarnessError::Chain`, keeping the raw log verbatim
    pub fn into_result(self) -> Result<TxResult> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(HarnessError::Chain {
                code: self.code,
                codespace: self.codespace,
                raw_log: self.raw_log,
            })
        }
    }

    /// All values of `key` across events of `event_type`, in emission order
    pub fn attributes<'s: 'a, 'a>(&'s self, event_type: &'a str, key: &'a str) -> impl Iterator<Item = &'s str> + 'a {
        self.events
            .iter()
            .filter(move |e| e.event_type == event_type)
            .flat_map(|e| e.attributes.iter())
            .filter(move |a| a.key == key)
            .map(|a| a.value.as_str())
    }

    pub fn first_attribute(&self, event_type: &str, key: &str) -> Option<&str> {
        self.attributes(event_type, key).next()
    }

    pub fn last_attribute(&self, event_type: &str, key: &str) -> Option<&str> {
        self.attributes(event_type, key).last()
    }

    pub(crate) fn require_attribute(&self, event_type: &str, key: &str) -> Result<&str> {
        self.first_attribute(event_type, key)
            .ok_or_else(|| HarnessError::MissingAttribute {
                event: event_type.to_string(),
                key: key.to_string(),
                tx_hash: self.tx_hash.clone(),
            })
    }
}

/// Canonical JSON: object keys sorted, compact, `<`, `>` and `&` escaped
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                push_escaped_string(key, out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => push_escaped_string(s, out),
        other => out.push_str(&other.to_string()),
    }
}

fn push_escaped_string(s: &str, out: &mut String) {
    let encoded = Value::String(s.to_string()).to_string();
    out.push_str(
        &encoded
            .replace('<', "\\u003c")
            .replace('>', "\\u003e")
            .replace('&', "\\u0026"),
    );
}

mod u64_string {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        crate::types::u64_from_str_or_num(deserializer)
    }
}
