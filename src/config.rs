use crate::domain::{Address, DestinationTag, IssuedAsset};
use crate::ledger::{LedgerWallets, WalletKeys};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_XRPL_RPC_URL: &str = "https://s.altnet.rippletest.net:51234/";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub xrpl_rpc_url: String,
    pub token_currency: String,
    pub token_issuer: Address,
    pub cold_wallet_seed: Secret,
    pub hot_wallet_address: Address,
    pub hot_wallet_seed: Secret,
    pub deposit_wallet_address: Address,
    pub deposit_wallet_seed: Secret,
    /// Expected issuer of incoming USDC. Deposits from other issuers are flagged.
    pub usdc_issuer: Option<Address>,
    pub usdc_currency: String,
    pub custody_address: Option<Address>,
    pub custody_destination_tag: Option<DestinationTag>,
    pub catchup_history_limit: u32,
    pub ledger_poll_interval: Duration,
    pub reconnect_delay: Duration,
    pub monitor_enabled: bool,
}

/// Wallet seed. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(***)")
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8000u16, "must be a valid u16")?;
        let database_path = required(&env_map, "DATABASE_PATH")?;
        let xrpl_rpc_url = optional(&env_map, "XRPL_RPC_URL")
            .unwrap_or_else(|| DEFAULT_XRPL_RPC_URL.to_string());
        let token_currency =
            optional(&env_map, "TOKEN_CURRENCY_CODE").unwrap_or_else(|| "IND".to_string());

        let token_issuer = required_address(&env_map, "TOKEN_ISSUER_ADDRESS")?;
        let cold_wallet_seed = Secret::new(required(&env_map, "COLD_WALLET_SEED")?);
        let hot_wallet_address = required_address(&env_map, "HOT_WALLET_ADDRESS")?;
        let hot_wallet_seed = Secret::new(required(&env_map, "HOT_WALLET_SEED")?);
        let deposit_wallet_address = required_address(&env_map, "DEPOSIT_WALLET_ADDRESS")?;
        let deposit_wallet_seed = Secret::new(required(&env_map, "DEPOSIT_WALLET_SEED")?);

        let usdc_issuer = optional_address(&env_map, "USDC_ISSUER_ADDRESS")?;
        let usdc_currency =
            optional(&env_map, "USDC_CURRENCY_CODE").unwrap_or_else(|| "USD".to_string());

        let custody_address = optional_address(&env_map, "CUSTODY_ADDRESS")?;
        let custody_destination_tag = match optional(&env_map, "CUSTODY_DESTINATION_TAG") {
            Some(raw) => Some(DestinationTag::new(raw.parse::<u32>().map_err(|_| {
                ConfigError::InvalidValue(
                    "CUSTODY_DESTINATION_TAG".to_string(),
                    "must be a valid u32".to_string(),
                )
            })?)),
            None => None,
        };

        let catchup_history_limit =
            parse_or(&env_map, "CATCHUP_HISTORY_LIMIT", 400u32, "must be a valid u32")?;
        if catchup_history_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "CATCHUP_HISTORY_LIMIT".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let ledger_poll_interval = Duration::from_millis(parse_or(
            &env_map,
            "LEDGER_POLL_INTERVAL_MS",
            4000u64,
            "must be a valid u64",
        )?);
        let reconnect_delay = Duration::from_millis(parse_or(
            &env_map,
            "RECONNECT_DELAY_MS",
            5000u64,
            "must be a valid u64",
        )?);

        let monitor_enabled = match env_map
            .get("MONITOR_ENABLED")
            .map(|s| s.as_str())
            .unwrap_or("true")
        {
            "true" | "1" => true,
            "false" | "0" => false,
            other => {
                return Err(ConfigError::InvalidValue(
                    "MONITOR_ENABLED".to_string(),
                    format!("must be true or false, got {}", other),
                ))
            }
        };

        Ok(Config {
            port,
            database_path,
            xrpl_rpc_url,
            token_currency,
            token_issuer,
            cold_wallet_seed,
            hot_wallet_address,
            hot_wallet_seed,
            deposit_wallet_address,
            deposit_wallet_seed,
            usdc_issuer,
            usdc_currency,
            custody_address,
            custody_destination_tag,
            catchup_history_limit,
            ledger_poll_interval,
            reconnect_delay,
            monitor_enabled,
        })
    }

    /// The fund token.
    pub fn token_asset(&self) -> IssuedAsset {
        IssuedAsset::new(self.token_currency.clone(), self.token_issuer.clone())
    }

    /// USDC as accepted for deposits and paid for redemptions, when an issuer is configured.
    pub fn usdc_asset(&self) -> Option<IssuedAsset> {
        self.usdc_issuer
            .as_ref()
            .map(|issuer| IssuedAsset::new(self.usdc_currency.clone(), issuer.clone()))
    }

    pub fn wallets(&self) -> LedgerWallets {
        LedgerWallets {
            issuer: WalletKeys {
                address: self.token_issuer.clone(),
                seed: self.cold_wallet_seed.clone(),
            },
            operational: WalletKeys {
                address: self.hot_wallet_address.clone(),
                seed: self.hot_wallet_seed.clone(),
            },
            deposit: WalletKeys {
                address: self.deposit_wallet_address.clone(),
                seed: self.deposit_wallet_seed.clone(),
            },
        }
    }
}

fn optional(env_map: &HashMap<String, String>, key: &str) -> Option<String> {
    env_map
        .get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn required(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    optional(env_map, key).ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn parse_address(key: &str, raw: &str) -> Result<Address, ConfigError> {
    raw.parse::<Address>()
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

fn required_address(env_map: &HashMap<String, String>, key: &str) -> Result<Address, ConfigError> {
    parse_address(key, &required(env_map, key)?)
}

fn optional_address(
    env_map: &HashMap<String, String>,
    key: &str,
) -> Result<Option<Address>, ConfigError> {
    optional(env_map, key)
        .map(|raw| parse_address(key, &raw))
        .transpose()
}

fn parse_or<T: std::str::FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    expected: &str,
) -> Result<T, ConfigError> {
    match optional(env_map, key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), expected.to_string())),
        None => Ok(default),
    }
}
