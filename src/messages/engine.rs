//! Margin engine messages

use serde::{Deserialize, Serialize};

use super::refs::AddrRef;
use crate::types::Uint128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstantiateMsg {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pauser: Option<AddrRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insurance_fund: Option<AddrRef>,
    pub fee_pool: AddrRef,
    /// Native denom or CW20 token address
    pub eligible_collateral: AddrRef,
    pub initial_margin_ratio: Uint128,
    pub maintenance_margin_ratio: Uint128,
    pub liquidation_fee: Uint128,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vamm: Vec<AddrRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<AddrRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insurance_fund: Option<AddrRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_pool: Option<AddrRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eligible_collateral: Option<AddrRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_margin_ratio: Option<Uint128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintenance_margin_ratio: Option<Uint128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_liquidation_ratio: Option<Uint128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liquidation_fee: Option<Uint128>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteMsg {
    UpdateConfig(UpdateConfig),
    OpenPosition {
        vamm: AddrRef,
        side: Side,
        margin_amount: Uint128,
        leverage: Uint128,
        take_profit: Uint128,
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_loss: Option<Uint128>,
        base_asset_limit: Uint128,
    },
    ClosePosition {
        vamm: AddrRef,
        position_id: u64,
        quote_asset_limit: Uint128,
    },
    Liquidate {
        vamm: AddrRef,
        position_id: u64,
        trader: AddrRef,
        quote_asset_limit: Uint128,
    },
    PayFunding {
        vamm: AddrRef,
    },
    DepositMargin {
        vamm: AddrRef,
        position_id: u64,
        amount: Uint128,
    },
    WithdrawMargin {
        vamm: AddrRef,
        position_id: u64,
        amount: Uint128,
    },
    SetPause {
        pause: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMsg {
    Config {},
    State {},
    Position { vamm: AddrRef, position_id: u64 },
    LastPositionId {},
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_instantiate_skips_empty_vamm_list_and_unset_options() {
        let msg = InstantiateMsg {
            pauser: None,
            decimals: Some(6),
            insurance_fund: Some(AddrRef::contract("insurance_fund")),
            fee_pool: AddrRef::contract("fee_pool"),
            eligible_collateral: AddrRef::from("uusd"),
            initial_margin_ratio: Uint128(50_000),
            maintenance_margin_ratio: Uint128(50_000),
            liquidation_fee: Uint128(50_000),
            vamm: vec![],
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert!(v.get("vamm").is_none());
        assert!(v.get("pauser").is_none());
        assert_eq!(v["eligible_collateral"], json!("uusd"));
        assert_eq!(v["initial_margin_ratio"], json!("50000"));
    }

    #[test]
    fn test_open_position_shape() {
        let msg = ExecuteMsg::OpenPosition {
            vamm: AddrRef::contract("vamm"),
            side: Side::Sell,
            margin_amount: Uint128(50_000_000),
            leverage: Uint128(4_000_000),
            take_profit: Uint128(0),
            stop_loss: None,
            base_asset_limit: Uint128(0),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["open_position"]["side"], json!("sell"));
        assert_eq!(v["open_position"]["leverage"], json!("4000000"));
        assert!(v["open_position"].get("stop_loss").is_none());
    }
}
