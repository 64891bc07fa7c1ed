//! Open a single position against a freshly deployed market and check the
//! engine's record against constant-product math.

use serde_json::{json, Value};

use super::{Action, Check, Scenario, ScenarioStep};
use crate::amm::expected_open_position;
use crate::deploy::topology::{ENGINE, TOKEN, VAMM};
use crate::deploy::ProtocolParams;
use crate::errors::{HarnessError, Result};
use crate::messages::engine::{self, Side};
use crate::messages::{contract_ref, cw20, var_ref, vamm, AddrRef};
use crate::types::{Coin, ContractId, Uint128};

#[derive(Debug, Clone, PartialEq)]
pub struct TradeParams {
    /// Wallet that opens the position
    pub trader: String,
    pub side: Side,
    pub margin: u128,
    /// Scaled by `10^decimals`
    pub leverage: u128,
    /// Allowed deviation on size, margin and notional
    pub tolerance: i128,
}

impl Default for TradeParams {
    fn default() -> Self {
        Self {
            trader: super::DEFAULT_WALLET.to_string(),
            side: Side::Sell,
            margin: 50_000_000,
            leverage: 4_000_000,
            tolerance: 0,
        }
    }
}

fn to_json<T: serde::Serialize>(msg: &T) -> Result<Value> {
    serde_json::to_value(msg).map_err(|e| HarnessError::Config(format!("failed to encode message: {}", e)))
}

/// Steps, in order:
///
/// 0. vAMM is open with the configured reserves
/// 1. (token collateral only) trader approves the engine
/// 2. trader opens the position
/// 3. read the new position id
/// 4. position matches the expected size, margin and notional
/// 5. vAMM total position size moved by the same amount
pub fn open_position_scenario(params: &ProtocolParams, trade: &TradeParams) -> Result<Scenario> {
    let quote_reserve = params.quote_asset_reserve.u128();
    let base_reserve = params.base_asset_reserve.u128();
    let expected = expected_open_position(
        trade.side,
        trade.margin,
        trade.leverage,
        params.decimals,
        quote_reserve,
        base_reserve,
    )
    .ok_or_else(|| {
        HarnessError::Config(format!(
            "trade of {} at leverage {} does not fit reserves {}/{}",
            trade.margin, trade.leverage, quote_reserve, base_reserve
        ))
    })?;
    let margin = i128::try_from(expected.margin).map_err(|e| HarnessError::Config(e.to_string()))?;
    let notional = i128::try_from(expected.notional).map_err(|e| HarnessError::Config(e.to_string()))?;

    let vamm_state = to_json(&vamm::QueryMsg::State {})?;
    let mut scenario = Scenario::new("open position").step(
        ScenarioStep::new(
            "vamm is open",
            Action::Query {
                contract: ContractId::new(VAMM),
                msg: vamm_state.clone(),
            },
        )
        .check(Check::exact("/open", json!(true)))
        .check(Check::exact("/quote_asset_reserve", json!(quote_reserve.to_string())))
        .check(Check::exact("/base_asset_reserve", json!(base_reserve.to_string()))),
    );

    let funds = if params.token.is_some() {
        let approve = cw20::ExecuteMsg::IncreaseAllowance {
            spender: AddrRef::contract(ENGINE),
            amount: Uint128(trade.margin),
        };
        scenario = scenario.step(
            ScenarioStep::new(
                "approve engine",
                Action::Execute {
                    contract: ContractId::new(TOKEN),
                    msg: to_json(&approve)?,
                    funds: Vec::new(),
                },
            )
            .wallet(&trade.trader),
        );
        Vec::new()
    } else {
        vec![Coin::new(trade.margin, params.collateral_denom.clone())]
    };

    let open_index = scenario.steps.len();
    let open = engine::ExecuteMsg::OpenPosition {
        vamm: AddrRef::contract(VAMM),
        side: trade.side,
        margin_amount: Uint128(trade.margin),
        leverage: Uint128(trade.leverage),
        take_profit: Uint128::zero(),
        stop_loss: None,
        base_asset_limit: Uint128::zero(),
    };
    let mut open_step = ScenarioStep::new(
        "open position",
        Action::Execute {
            contract: ContractId::new(ENGINE),
            msg: to_json(&open)?,
            funds,
        },
    )
    .wallet(&trade.trader)
    .check(Check::exact("/code", json!(0)));
    if open_index > 1 {
        open_step = open_step.depends_on(open_index - 1);
    }

    let position_query = json!({
        "position": { "vamm": contract_ref(VAMM), "position_id": var_ref("position_id") }
    });

    let scenario = scenario
        .step(open_step)
        .step(
            ScenarioStep::new(
                "last position id",
                Action::Query {
                    contract: ContractId::new(ENGINE),
                    msg: to_json(&engine::QueryMsg::LastPositionId {})?,
                },
            )
            .bind("position_id", "/last_order_id")
            .depends_on(open_index),
        )
        .step(
            ScenarioStep::new(
                "position matches constant-product math",
                Action::Query {
                    contract: ContractId::new(ENGINE),
                    msg: position_query,
                },
            )
            .check(Check::approx("/size", expected.size, trade.tolerance))
            .check(Check::approx("/margin", margin, trade.tolerance))
            .check(Check::approx("/notional", notional, trade.tolerance))
            .depends_on(open_index + 1),
        )
        .step(
            ScenarioStep::new(
                "vamm total position size",
                Action::Query {
                    contract: ContractId::new(VAMM),
                    msg: vamm_state,
                },
            )
            .check(Check::approx("/total_position_size", expected.size, trade.tolerance))
            .depends_on(open_index),
        );

    Ok(scenario)
}
