//! Typed contract messages
//!
//! Each protocol contract gets its own module with the message shapes the
//! harness sends. `InitMsg`, `ExecMsg` and `QueryMsg` wrap them so plans and
//! scenarios can carry any of them, with an `Opaque` variant for contracts
//! that are not modeled. Serialization yields the exact JSON the contract
//! expects, placeholders included; optional fields are omitted, never `null`.

pub mod cw20;
pub mod engine;
pub mod fee_pool;
pub mod insurance_fund;
pub mod pricefeed;
pub mod refs;
pub mod vamm;

use serde::Serialize;
use serde_json::Value;

use crate::errors::{HarnessError, Result};

pub use refs::{contract_ref, var_ref, wallet_ref, AddrRef};

macro_rules! contract_union {
    ($(#[$meta:meta])* $name:ident, $ty:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize)]
        #[serde(untagged)]
        pub enum $name {
            InsuranceFund(insurance_fund::$ty),
            Pricefeed(pricefeed::$ty),
            Vamm(vamm::$ty),
            Engine(engine::$ty),
            FeePool(fee_pool::$ty),
            Cw20(cw20::$ty),
            Opaque(Value),
        }

        impl $name {
            pub fn to_json(&self) -> Result<Value> {
                serde_json::to_value(self)
                    .map_err(|e| HarnessError::Config(format!("unserializable message: {}", e)))
            }
        }

        impl From<insurance_fund::$ty> for $name {
            fn from(msg: insurance_fund::$ty) -> Self {
                $name::InsuranceFund(msg)
            }
        }

        impl From<pricefeed::$ty> for $name {
            fn from(msg: pricefeed::$ty) -> Self {
                $name::Pricefeed(msg)
            }
        }

        impl From<vamm::$ty> for $name {
            fn from(msg: vamm::$ty) -> Self {
                $name::Vamm(msg)
            }
        }

        impl From<engine::$ty> for $name {
            fn from(msg: engine::$ty) -> Self {
                $name::Engine(msg)
            }
        }

        impl From<fee_pool::$ty> for $name {
            fn from(msg: fee_pool::$ty) -> Self {
                $name::FeePool(msg)
            }
        }

        impl From<cw20::$ty> for $name {
            fn from(msg: cw20::$ty) -> Self {
                $name::Cw20(msg)
            }
        }

        impl From<Value> for $name {
            fn from(msg: Value) -> Self {
                $name::Opaque(msg)
            }
        }
    };
}

contract_union!(
    /// Instantiate message for any protocol contract
    InitMsg,
    InstantiateMsg
);

contract_union!(
    /// Execute message for any protocol contract
    ExecMsg,
    ExecuteMsg
);

/// Query message for contracts the harness reads from
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryMsg {
    InsuranceFund(insurance_fund::QueryMsg),
    Pricefeed(pricefeed::QueryMsg),
    Vamm(vamm::QueryMsg),
    Engine(engine::QueryMsg),
    Cw20(cw20::QueryMsg),
    Opaque(Value),
}

impl QueryMsg {
    pub fn to_json(&self) -> Result<Value> {
        serde_json::to_value(self)
            .map_err(|e| HarnessError::Config(format!("unserializable query: {}", e)))
    }
}

impl From<vamm::QueryMsg> for QueryMsg {
    fn from(msg: vamm::QueryMsg) -> Self {
        QueryMsg::Vamm(msg)
    }
}

impl From<engine::QueryMsg> for QueryMsg {
    fn from(msg: engine::QueryMsg) -> Self {
        QueryMsg::Engine(msg)
    }
}

impl From<cw20::QueryMsg> for QueryMsg {
    fn from(msg: cw20::QueryMsg) -> Self {
        QueryMsg::Cw20(msg)
    }
}

impl From<insurance_fund::QueryMsg> for QueryMsg {
    fn from(msg: insurance_fund::QueryMsg) -> Self {
        QueryMsg::InsuranceFund(msg)
    }
}

impl From<pricefeed::QueryMsg> for QueryMsg {
    fn from(msg: pricefeed::QueryMsg) -> Self {
        QueryMsg::Pricefeed(msg)
    }
}

impl From<Value> for QueryMsg {
    fn from(msg: Value) -> Self {
        QueryMsg::Opaque(msg)
    }
}
