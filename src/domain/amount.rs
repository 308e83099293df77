//! Ledger amounts: native drops or an issued-currency value.

use crate::domain::{Address, Decimal};
use serde::{Deserialize, Serialize};

/// Native currency smallest units per display unit.
pub const DROPS_PER_XRP: u64 = 1_000_000;

/// An issued asset, identified by currency code and issuing account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssuedAsset {
    pub currency: String,
    pub issuer: Address,
}

impl IssuedAsset {
    pub fn new(currency: impl Into<String>, issuer: Address) -> Self {
        Self {
            currency: currency.into(),
            issuer,
        }
    }

    pub fn amount(&self, value: Decimal) -> LedgerAmount {
        LedgerAmount::Issued {
            value,
            issuer: self.issuer.clone(),
            currency: self.currency.clone(),
        }
    }
}

/// Amount field of a ledger payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LedgerAmount {
    Native {
        drops: u64,
    },
    Issued {
        value: Decimal,
        issuer: Address,
        currency: String,
    },
}

impl LedgerAmount {
    /// Canonical display-unit value of the amount.
    pub fn normalize(&self) -> Decimal {
        match self {
            LedgerAmount::Native { drops } => {
                Decimal::from(*drops)
                    .checked_div(Decimal::from(DROPS_PER_XRP))
                    .unwrap_or_default()
            }
            LedgerAmount::Issued { value, .. } => *value,
        }
    }

    pub fn issuer(&self) -> Option<&Address> {
        match self {
            LedgerAmount::Native { .. } => None,
            LedgerAmount::Issued { issuer, .. } => Some(issuer),
        }
    }

    /// Parse the JSON shape the ledger uses: a drops string, or
    /// `{"currency", "issuer", "value"}`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(drops) => drops
                .parse::<u64>()
                .ok()
                .map(|drops| LedgerAmount::Native { drops }),
            serde_json::Value::Object(obj) => {
                let currency = obj.get("currency")?.as_str()?.to_string();
                let issuer = Address::new(obj.get("issuer")?.as_str()?.to_string());
                let value = Decimal::from_str_canonical(obj.get("value")?.as_str()?).ok()?;
                Some(LedgerAmount::Issued {
                    value,
                    issuer,
                    currency,
                })
            }
            _ => None,
        }
    }

    /// Render in the ledger's JSON shape.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            LedgerAmount::Native { drops } => serde_json::Value::String(drops.to_string()),
            LedgerAmount::Issued {
                value,
                issuer,
                currency,
            } => serde_json::json!({
                "currency": currency,
                "issuer": issuer.as_str(),
                "value": value.to_canonical_string(),
            }),
        }
    }
}

impl std::fmt::Display for LedgerAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerAmount::Native { drops } => {
                write!(f, "{} XRP ({} drops)", self.normalize(), drops)
            }
            LedgerAmount::Issued {
                value, currency, ..
            } => write!(f, "{} {}", value, currency),
        }
    }
}
