//! Constant-product pricing, used to compute expected scenario outcomes
//!
//! Mirrors the integer rounding of the vAMM: the amount owed to the trader
//! is rounded against them when the division is inexact.

use serde::Serialize;

use crate::messages::engine::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    AddToAmm,
    RemoveFromAmm,
}

impl From<Side> for Direction {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => Direction::AddToAmm,
            Side::Sell => Direction::RemoveFromAmm,
        }
    }
}

/// Scale the vAMM applies to the remainder check, independent of the pool's decimals
const REMAINDER_SCALE: u128 = 1_000_000_000;

/// Base asset received (or owed) for swapping `quote_amount` into or out of the pool
///
/// `None` on overflow or when the swap would drain the pool.
pub fn input_base_amount(
    direction: Direction,
    quote_amount: u128,
    quote_reserve: u128,
    base_reserve: u128,
    decimals: u8,
) -> Option<u128> {
    swap(direction, quote_amount, quote_reserve, base_reserve, decimals)
}

/// Quote asset received (or owed) for swapping `base_amount` into or out of the pool
pub fn output_quote_amount(
    direction: Direction,
    base_amount: u128,
    quote_reserve: u128,
    base_reserve: u128,
    decimals: u8,
) -> Option<u128> {
    swap(direction, base_amount, base_reserve, quote_reserve, decimals)
}

/// `k = in * out / 10^d`, `out_after = k * 10^d / in_after`; the rounding
/// step is decided by `(k * 10^9) % in_after`.
fn swap(direction: Direction, amount: u128, in_reserve: u128, out_reserve: u128, decimals: u8) -> Option<u128> {
    if amount == 0 {
        return Some(0);
    }

    let scale = 10u128.checked_pow(decimals as u32)?;
    let k = in_reserve.checked_mul(out_reserve)?.checked_div(scale)?;
    let in_after = match direction {
        Direction::AddToAmm => in_reserve.checked_add(amount)?,
        Direction::RemoveFromAmm => in_reserve.checked_sub(amount)?,
    };
    if in_after == 0 {
        return None;
    }

    let out_after = k.checked_mul(scale)?.checked_div(in_after)?;
    let mut delta = out_after.abs_diff(out_reserve);

    if k.checked_mul(REMAINDER_SCALE)? % in_after != 0 {
        delta = match direction {
            Direction::AddToAmm => delta.checked_sub(1)?,
            Direction::RemoveFromAmm => delta.checked_add(1)?,
        };
    }
    Some(delta)
}

/// Position notional: margin times leverage, leverage scaled by `10^decimals`
pub fn position_notional(margin: u128, leverage: u128, decimals: u8) -> Option<u128> {
    margin
        .checked_mul(leverage)?
        .checked_div(10u128.checked_pow(decimals as u32)?)
}

/// Position the engine should record for a fresh open against a fee-free vAMM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExpectedPosition {
    /// Negative for shorts
    pub size: i128,
    pub margin: u128,
    pub notional: u128,
}

pub fn expected_open_position(
    side: Side,
    margin: u128,
    leverage: u128,
    decimals: u8,
    quote_reserve: u128,
    base_reserve: u128,
) -> Option<ExpectedPosition> {
    let notional = position_notional(margin, leverage, decimals)?;
    let base = input_base_amount(side.into(), notional, quote_reserve, base_reserve, decimals)?;
    let base = i128::try_from(base).ok()?;

    Some(ExpectedPosition {
        size: match side {
            Side::Buy => base,
            Side::Sell => -base,
        },
        margin,
        notional,
    })
}
