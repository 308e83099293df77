//! Pure computation for pricing and deposit checks. No I/O.

pub mod amm;
pub mod tolerance;

pub use amm::{estimate_swap_output, quote_swap, spot_price, SwapDirection, SwapQuote};
pub use tolerance::{AmountCheck, AmountTolerance};
