//! The protocol's standard contract topology
//!
//! Contracts are instantiated with whatever peer addresses already exist.
//! References that point forward (vAMM to engine, insurance fund to engine,
//! engine to a collateral token) are closed afterwards by configure steps,
//! and the vAMM is opened last.

use serde::{Deserialize, Serialize};

use super::plan::DeploymentPlan;
use crate::errors::Result;
use crate::messages::cw20::{self, InitialBalance};
use crate::messages::{engine, fee_pool, insurance_fund, pricefeed, vamm, AddrRef};
use crate::types::Uint128;

pub const FEE_POOL: &str = "fee_pool";
pub const INSURANCE_FUND: &str = "insurance_fund";
pub const PRICEFEED: &str = "pricefeed";
pub const TOKEN: &str = "token";
pub const VAMM: &str = "vamm";
pub const ENGINE: &str = "engine";

/// Per-network initialization parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolParams {
    #[serde(default = "default_decimals")]
    pub decimals: u8,

    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,

    #[serde(default = "default_base_asset")]
    pub base_asset: String,

    #[serde(default = "default_quote_asset_reserve")]
    pub quote_asset_reserve: Uint128,

    #[serde(default = "default_base_asset_reserve")]
    pub base_asset_reserve: Uint128,

    /// Seconds
    #[serde(default = "default_funding_period")]
    pub funding_period: u64,

    #[serde(default)]
    pub toll_ratio: Uint128,

    #[serde(default)]
    pub spread_ratio: Uint128,

    #[serde(default)]
    pub fluctuation_limit_ratio: Uint128,

    #[serde(default = "default_margin_ratio")]
    pub initial_margin_ratio: Uint128,

    #[serde(default = "default_margin_ratio")]
    pub maintenance_margin_ratio: Uint128,

    #[serde(default = "default_margin_ratio")]
    pub liquidation_fee: Uint128,

    /// Native collateral denom; also the engine's placeholder when a token is deployed
    #[serde(default = "default_collateral_denom")]
    pub collateral_denom: String,

    #[serde(default)]
    pub oracle_hub_contract: String,

    /// Deploy a CW20 collateral token and make it the eligible collateral
    #[serde(default)]
    pub token: Option<TokenParams>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenParams {
    pub name: String,
    pub symbol: String,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
    #[serde(default)]
    pub initial_balances: Vec<TokenBalance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub address: String,
    pub amount: Uint128,
}

fn default_decimals() -> u8 {
    6
}

fn default_quote_asset() -> String {
    "ETH".to_string()
}

fn default_base_asset() -> String {
    "UST".to_string()
}

fn default_quote_asset_reserve() -> Uint128 {
    Uint128(1_000_000_000)
}

fn default_base_asset_reserve() -> Uint128 {
    Uint128(100_000_000)
}

fn default_funding_period() -> u64 {
    86_400
}

fn default_margin_ratio() -> Uint128 {
    Uint128(50_000)
}

fn default_collateral_denom() -> String {
    "uusd".to_string()
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            decimals: default_decimals(),
            quote_asset: default_quote_asset(),
            base_asset: default_base_asset(),
            quote_asset_reserve: default_quote_asset_reserve(),
            base_asset_reserve: default_base_asset_reserve(),
            funding_period: default_funding_period(),
            toll_ratio: Uint128::zero(),
            spread_ratio: Uint128::zero(),
            fluctuation_limit_ratio: Uint128::zero(),
            initial_margin_ratio: default_margin_ratio(),
            maintenance_margin_ratio: default_margin_ratio(),
            liquidation_fee: default_margin_ratio(),
            collateral_denom: default_collateral_denom(),
            oracle_hub_contract: String::new(),
            token: None,
        }
    }
}

/// Bytecode file names inside the artifacts directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactNames {
    #[serde(default = "default_fee_pool_artifact")]
    pub fee_pool: String,
    #[serde(default = "default_insurance_fund_artifact")]
    pub insurance_fund: String,
    #[serde(default = "default_pricefeed_artifact")]
    pub pricefeed: String,
    #[serde(default = "default_token_artifact")]
    pub token: String,
    #[serde(default = "default_vamm_artifact")]
    pub vamm: String,
    #[serde(default = "default_engine_artifact")]
    pub engine: String,
}

fn default_fee_pool_artifact() -> String {
    "margined_fee_pool.wasm".to_string()
}

fn default_insurance_fund_artifact() -> String {
    "margined_insurance_fund.wasm".to_string()
}

fn default_pricefeed_artifact() -> String {
    "mock_pricefeed.wasm".to_string()
}

fn default_token_artifact() -> String {
    "cw20_base.wasm".to_string()
}

fn default_vamm_artifact() -> String {
    "margined_vamm.wasm".to_string()
}

fn default_engine_artifact() -> String {
    "margined_engine.wasm".to_string()
}

impl Default for ArtifactNames {
    fn default() -> Self {
        Self {
            fee_pool: default_fee_pool_artifact(),
            insurance_fund: default_insurance_fund_artifact(),
            pricefeed: default_pricefeed_artifact(),
            token: default_token_artifact(),
            vamm: default_vamm_artifact(),
            engine: default_engine_artifact(),
        }
    }
}

fn contract(id: &str) -> Option<AddrRef> {
    Some(AddrRef::contract(id))
}

/// Build the full deploy-and-wire plan for one vAMM market
pub fn standard_plan(params: &ProtocolParams, artifacts: &ArtifactNames) -> Result<DeploymentPlan> {
    let mut plan = DeploymentPlan::new()
        .deploy(FEE_POOL, &artifacts.fee_pool, fee_pool::InstantiateMsg {})?
        .deploy(
            INSURANCE_FUND,
            &artifacts.insurance_fund,
            insurance_fund::InstantiateMsg::default(),
        )?
        .deploy(
            PRICEFEED,
            &artifacts.pricefeed,
            pricefeed::InstantiateMsg {
                oracle_hub_contract: params.oracle_hub_contract.clone(),
                decimals: Some(params.decimals),
            },
        )?;

    if let Some(token) = &params.token {
        plan = plan.deploy(
            TOKEN,
            &artifacts.token,
            cw20::InstantiateMsg {
                name: token.name.clone(),
                symbol: token.symbol.clone(),
                decimals: token.decimals,
                initial_balances: token
                    .initial_balances
                    .iter()
                    .map(|b| InitialBalance {
                        address: AddrRef::literal(b.address.clone()),
                        amount: b.amount,
                    })
                    .collect(),
                mint: None,
            },
        )?;
    }

    let plan = plan
        .deploy(
            VAMM,
            &artifacts.vamm,
            vamm::InstantiateMsg {
                decimals: params.decimals,
                pricefeed: AddrRef::contract(PRICEFEED),
                margin_engine: None,
                insurance_fund: contract(INSURANCE_FUND),
                quote_asset: params.quote_asset.clone(),
                base_asset: params.base_asset.clone(),
                quote_asset_reserve: params.quote_asset_reserve,
                base_asset_reserve: params.base_asset_reserve,
                funding_period: params.funding_period,
                toll_ratio: params.toll_ratio,
                spread_ratio: params.spread_ratio,
                fluctuation_limit_ratio: params.fluctuation_limit_ratio,
            },
        )?
        .deploy(
            ENGINE,
            &artifacts.engine,
            engine::InstantiateMsg {
                pauser: None,
                decimals: Some(params.decimals),
                insurance_fund: contract(INSURANCE_FUND),
                fee_pool: AddrRef::contract(FEE_POOL),
                // placeholder until the configure step below when a token exists
                eligible_collateral: AddrRef::literal(params.collateral_denom.clone()),
                initial_margin_ratio: params.initial_margin_ratio,
                maintenance_margin_ratio: params.maintenance_margin_ratio,
                liquidation_fee: params.liquidation_fee,
                vamm: vec![AddrRef::contract(VAMM)],
            },
        )?
        .configure(
            "vamm: set margin engine",
            VAMM,
            vamm::ExecuteMsg::UpdateConfig(vamm::UpdateConfig {
                margin_engine: contract(ENGINE),
                ..vamm::UpdateConfig::default()
            }),
        )?
        .configure(
            "insurance fund: set beneficiary",
            INSURANCE_FUND,
            insurance_fund::ExecuteMsg::UpdateConfig {
                beneficiary: contract(ENGINE),
            },
        )?
        .configure(
            "insurance fund: register vamm",
            INSURANCE_FUND,
            insurance_fund::ExecuteMsg::AddVamm {
                vamm: AddrRef::contract(VAMM),
            },
        )?;

    let plan = if params.token.is_some() {
        plan.configure(
            "engine: set eligible collateral",
            ENGINE,
            engine::ExecuteMsg::UpdateConfig(engine::UpdateConfig {
                eligible_collateral: contract(TOKEN),
                ..engine::UpdateConfig::default()
            }),
        )?
        .configure(
            "fee pool: add token",
            FEE_POOL,
            fee_pool::ExecuteMsg::AddToken {
                token: AddrRef::contract(TOKEN),
            },
        )?
    } else {
        plan
    };

    plan.configure("vamm: open", VAMM, vamm::ExecuteMsg::SetOpen { open: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::plan::StepAction;
    use serde_json::json;

    fn labels(plan: &DeploymentPlan) -> Vec<&str> {
        plan.steps.iter().map(|s| s.label.as_str()).collect()
    }

    #[test]
    fn test_native_collateral_plan_order() {
        let plan = standard_plan(&ProtocolParams::default(), &ArtifactNames::default()).unwrap();
        assert_eq!(
            labels(&plan),
            vec![
                "deploy fee_pool",
                "deploy insurance_fund",
                "deploy pricefeed",
                "deploy vamm",
                "deploy engine",
                "vamm: set margin engine",
                "insurance fund: set beneficiary",
                "insurance fund: register vamm",
                "vamm: open",
            ]
        );
        assert!(plan.validate(&[]).is_ok());
    }

    #[test]
    fn test_token_plan_wires_collateral() {
        let params = ProtocolParams {
            token: Some(TokenParams {
                name: "Margined USD".to_string(),
                symbol: "MUSD".to_string(),
                decimals: 6,
                initial_balances: vec![TokenBalance {
                    address: "terra1alice".to_string(),
                    amount: Uint128(5_000_000_000),
                }],
            }),
            ..ProtocolParams::default()
        };
        let plan = standard_plan(&params, &ArtifactNames::default()).unwrap();
        assert!(plan.validate(&[]).is_ok());
        assert!(labels(&plan).contains(&"engine: set eligible collateral"));
        assert_eq!(plan.steps.last().unwrap().label, "vamm: open");

        let collateral = plan
            .steps
            .iter()
            .find(|s| s.label == "engine: set eligible collateral")
            .unwrap();
        match &collateral.action {
            StepAction::Configure { target, msg, .. } => {
                assert_eq!(target.as_str(), ENGINE);
                assert_eq!(
                    msg,
                    &json!({ "update_config": { "eligible_collateral": { "$contract": "token" } } })
                );
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_engine_init_payload() {
        let plan = standard_plan(&ProtocolParams::default(), &ArtifactNames::default()).unwrap();
        let engine = plan.steps.iter().find(|s| s.label == "deploy engine").unwrap();
        match &engine.action {
            StepAction::Deploy { init, artifact, .. } => {
                assert_eq!(artifact, "margined_engine.wasm");
                assert_eq!(init["eligible_collateral"], json!("uusd"));
                assert_eq!(init["vamm"], json!([{ "$contract": "vamm" }]));
                assert_eq!(init["insurance_fund"], json!({ "$contract": "insurance_fund" }));
                assert!(init.get("pauser").is_none());
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_params_from_toml_use_defaults() {
        let params: ProtocolParams = toml::from_str(
            r#"
            quote_asset = "BTC"
            quote_asset_reserve = "2000000000"
            "#,
        )
        .unwrap();
        assert_eq!(params.quote_asset, "BTC");
        assert_eq!(params.quote_asset_reserve, Uint128(2_000_000_000));
        assert_eq!(params.base_asset_reserve, Uint128(100_000_000));
        assert_eq!(params.funding_period, 86_400);
    }
}
