//! Virtual AMM messages

use serde::Serialize;

use super::refs::AddrRef;
use crate::types::Uint128;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstantiateMsg {
    pub decimals: u8,
    pub pricefeed: AddrRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin_engine: Option<AddrRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insurance_fund: Option<AddrRef>,
    pub quote_asset: String,
    pub base_asset: String,
    pub quote_asset_reserve: Uint128,
    pub base_asset_reserve: Uint128,
    pub funding_period: u64,
    pub toll_ratio: Uint128,
    pub spread_ratio: Uint128,
    pub fluctuation_limit_ratio: Uint128,
}

/// Partial config update; unset fields are left untouched on chain
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_asset_holding_cap: Option<Uint128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_interest_notional_cap: Option<Uint128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toll_ratio: Option<Uint128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread_ratio: Option<Uint128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fluctuation_limit_ratio: Option<Uint128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin_engine: Option<AddrRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insurance_fund: Option<AddrRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricefeed: Option<AddrRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spot_price_twap_interval: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteMsg {
    UpdateConfig(UpdateConfig),
    UpdateOwner { owner: AddrRef },
    SettleFunding {},
    SetOpen { open: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMsg {
    Config {},
    State {},
    SpotPrice {},
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_config_omits_unset_fields() {
        let msg = ExecuteMsg::UpdateConfig(UpdateConfig {
            margin_engine: Some(AddrRef::contract("engine")),
            ..UpdateConfig::default()
        });
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "update_config": { "margin_engine": { "$contract": "engine" } } })
        );
    }

    #[test]
    fn test_set_open_shape() {
        let v = serde_json::to_value(ExecuteMsg::SetOpen { open: true }).unwrap();
        assert_eq!(v, json!({ "set_open": { "open": true } }));
        let q = serde_json::to_value(QueryMsg::State {}).unwrap();
        assert_eq!(q, json!({ "state": {} }));
    }
}
