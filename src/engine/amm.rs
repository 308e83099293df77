//! Constant-product AMM quoting.

use crate::domain::Decimal;
use crate::ledger::AmmPool;
use serde::{Deserialize, Serialize};

/// Significant digits the ledger keeps for issued-currency amounts.
const LEDGER_PRECISION: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapDirection {
    /// Native currency in, fund tokens out.
    Buy,
    /// Fund tokens in, native currency out.
    Sell,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapQuote {
    pub direction: SwapDirection,
    pub amount_in: Decimal,
    pub estimated_out: Decimal,
    /// Effective price in native units per token.
    pub effective_price: Option<Decimal>,
    pub fee_percent: Decimal,
}

/// Output of swapping `amount_in` into a pool holding `reserve_in` and
/// `reserve_out`, after a fee of `fee_percent` on the input.
///
/// `None` for a non-positive input, an empty pool, a fee of 100% or more, or
/// amounts too large to compute.
pub fn estimate_swap_output(
    amount_in: Decimal,
    reserve_in: Decimal,
    reserve_out: Decimal,
    fee_percent: Decimal,
) -> Option<Decimal> {
    if !amount_in.is_positive() || !reserve_in.is_positive() || !reserve_out.is_positive() {
        return None;
    }
    let fee_fraction = fee_percent.checked_div(Decimal::hundred())?;
    let multiplier = Decimal::one() - fee_fraction;
    if !multiplier.is_positive() {
        return None;
    }

    let in_after_fee = amount_in.checked_mul(multiplier)?;
    let out = in_after_fee
        .checked_mul(reserve_out)?
        .checked_div(reserve_in.checked_add(in_after_fee)?)?;
    Some(out.round_significant(LEDGER_PRECISION))
}

/// Native units per token at the pool's current reserves.
pub fn spot_price(pool: &AmmPool) -> Option<Decimal> {
    pool.native_reserve
        .checked_div(pool.token_reserve)
        .map(|p| p.round_significant(LEDGER_PRECISION))
}

pub fn quote_swap(pool: &AmmPool, direction: SwapDirection, amount_in: Decimal) -> Option<SwapQuote> {
    let (reserve_in, reserve_out) = match direction {
        SwapDirection::Buy => (pool.native_reserve, pool.token_reserve),
        SwapDirection::Sell => (pool.token_reserve, pool.native_reserve),
    };
    let fee_percent = pool.fee_percent();
    let estimated_out = estimate_swap_output(amount_in, reserve_in, reserve_out, fee_percent)?;

    let effective_price = match direction {
        SwapDirection::Buy => amount_in.checked_div(estimated_out),
        SwapDirection::Sell => estimated_out.checked_div(amount_in),
    }
    .map(|p| p.round_significant(LEDGER_PRECISION));

    Some(SwapQuote {
        direction,
        amount_in,
        estimated_out,
        effective_price,
        fee_percent,
    })
}
