//! Received-versus-requested amount comparison for deposits.

use crate::domain::Decimal;

/// Relative band within which a deposit is considered the requested amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountTolerance {
    /// Fraction of the requested amount, e.g. `0.01` for 1%.
    pub relative: Decimal,
}

impl Default for AmountTolerance {
    fn default() -> Self {
        Self {
            relative: Decimal::from_parts(1, 2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountCheck {
    Within,
    /// `deviation` is `received - requested`.
    Outside { deviation: Decimal },
}

impl AmountTolerance {
    /// Compare `received` with `requested`. The band is inclusive.
    pub fn check(&self, requested: Decimal, received: Decimal) -> AmountCheck {
        let deviation = received - requested;
        if deviation.abs() > requested.abs() * self.relative {
            AmountCheck::Outside { deviation }
        } else {
            AmountCheck::Within
        }
    }
}
