//! Domain types for the fund back-office.
//!
//! This module provides:
//! - Lossless numeric handling via the Decimal wrapper
//! - Ledger primitives: TimeMs, Address, DestinationTag, LedgerAmount
//! - Stored records: Purchase, Investor, Redemption, NavRecord
//! - ObservedPayment, the unit of work consumed by the deposit matcher

pub mod amount;
pub mod decimal;
pub mod investor;
pub mod nav;
pub mod payment;
pub mod primitives;
pub mod purchase;
pub mod redemption;

pub use amount::{IssuedAsset, LedgerAmount, DROPS_PER_XRP};
pub use decimal::Decimal;
pub use investor::Investor;
pub use nav::NavRecord;
pub use payment::{ObservedPayment, TX_SUCCESS};
pub use primitives::{Address, AddressParseError, DestinationTag, TimeMs};
pub use purchase::{Purchase, PurchaseStatus};
pub use redemption::{Redemption, RedemptionStatus};
