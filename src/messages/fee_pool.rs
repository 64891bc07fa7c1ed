use serde::Serialize;

use super::refs::AddrRef;
use crate::types::Uint128;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstantiateMsg {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteMsg {
    AddToken {
        token: AddrRef,
    },
    RemoveToken {
        token: AddrRef,
    },
    SendToken {
        token: AddrRef,
        amount: Uint128,
        recipient: AddrRef,
    },
}
