pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod orchestration;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    Address, Decimal, DestinationTag, Investor, LedgerAmount, ObservedPayment, Purchase,
    PurchaseStatus, TimeMs,
};
pub use error::AppError;
pub use ledger::{LedgerError, LedgerGateway, MockLedger, XrplGateway};
pub use orchestration::{DepositMatcher, Monitor, ReconcileSettings};
