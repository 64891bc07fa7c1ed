//! Price feed messages

use serde::Serialize;

use crate::types::Uint128;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstantiateMsg {
    pub oracle_hub_contract: String,
    /// Accepted by the mock feed only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteMsg {
    AppendPrice {
        key: String,
        price: Uint128,
        timestamp: u64,
    },
    AppendMultiplePrice {
        key: String,
        prices: Vec<Uint128>,
        timestamps: Vec<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMsg {
    Config {},
    GetPrice { key: String },
}
