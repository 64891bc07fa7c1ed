//! CW20 collateral token messages

use serde::Serialize;

use super::refs::AddrRef;
use crate::types::Uint128;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitialBalance {
    pub address: AddrRef,
    pub amount: Uint128,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MinterResponse {
    pub minter: AddrRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cap: Option<Uint128>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstantiateMsg {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub initial_balances: Vec<InitialBalance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mint: Option<MinterResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteMsg {
    Transfer { recipient: AddrRef, amount: Uint128 },
    Mint { recipient: AddrRef, amount: Uint128 },
    IncreaseAllowance { spender: AddrRef, amount: Uint128 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMsg {
    Balance { address: AddrRef },
    TokenInfo {},
}
