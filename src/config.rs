use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::ledger::{ConfirmationConfig, EthereumConfig};
use crate::store::models::Role;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = config::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(config::ConfigError::Message(format!(
                "STORE_BACKEND must be postgres or memory, got {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub store_backend: StoreBackend,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub eth_rpc_url: String,
    pub contract_address: String,
    pub private_key: String,
    pub contract_abi_path: PathBuf,
    pub gas_limit: u64,
    pub gas_price_wei: u64,
    pub confirmation_poll_interval: Duration,
    pub confirmation_timeout: Duration,
    pub default_role: Role,
    pub cors_allowed_origins: Vec<String>,
    pub write_rate_limit_per_minute: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self, config::ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| config::ConfigError::Message(format!("{} must be set", key)))
        };

        let default_role = var("DEFAULT_ROLE", "student")
            .parse::<Role>()
            .map_err(|e| config::ConfigError::Message(format!("DEFAULT_ROLE: {}", e)))?;

        let write_rate_limit_per_minute = parse_number(&lookup, "WRITE_RATE_LIMIT_PER_MINUTE", 60)?;
        if write_rate_limit_per_minute == 0 {
            return Err(config::ConfigError::Message(
                "WRITE_RATE_LIMIT_PER_MINUTE must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            database_url: var("DATABASE_URL", "postgresql://localhost/credits"),
            bind_address: var("BIND_ADDRESS", "0.0.0.0:8080"),
            store_backend: var("STORE_BACKEND", "postgres").parse()?,
            db_max_connections: parse_number(&lookup, "DB_MAX_CONNECTIONS", 20)?,
            db_min_connections: parse_number(&lookup, "DB_MIN_CONNECTIONS", 2)?,
            eth_rpc_url: var("ETH_RPC_URL", "http://127.0.0.1:8545"),
            contract_address: required("CREDIT_CONTRACT_ADDRESS")?,
            private_key: required("ETH_PRIVATE_KEY")?,
            contract_abi_path: PathBuf::from(var(
                "CREDIT_CONTRACT_ABI_PATH",
                "./contract/abi/credit_contract.json",
            )),
            gas_limit: parse_number(&lookup, "LEDGER_GAS_LIMIT", 300_000)?,
            gas_price_wei: parse_number(&lookup, "LEDGER_GAS_PRICE_WEI", 1_000_000_000)?,
            confirmation_poll_interval: Duration::from_millis(parse_number(
                &lookup,
                "CONFIRMATION_POLL_INTERVAL_MS",
                500,
            )?),
            confirmation_timeout: Duration::from_secs(parse_number(
                &lookup,
                "CONFIRMATION_TIMEOUT_SECS",
                15,
            )?),
            default_role,
            cors_allowed_origins: var("CORS_ALLOWED_ORIGINS", "http://localhost:5173")
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            write_rate_limit_per_minute,
        })
    }

    pub fn ethereum(&self) -> EthereumConfig {
        EthereumConfig {
            rpc_url: self.eth_rpc_url.clone(),
            contract_address: self.contract_address.clone(),
            private_key: self.private_key.clone(),
            abi_path: self.contract_abi_path.clone(),
            gas_limit: self.gas_limit,
            gas_price_wei: self.gas_price_wei,
        }
    }

    pub fn confirmation(&self) -> ConfirmationConfig {
        ConfirmationConfig {
            poll_interval: self.confirmation_poll_interval,
            timeout: self.confirmation_timeout,
        }
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T, config::ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            config::ConfigError::Message(format!("{} has invalid value {:?}: {}", key, raw, e))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, config::ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("CREDIT_CONTRACT_ADDRESS", "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
        ("ETH_PRIVATE_KEY", "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(&REQUIRED).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.store_backend, StoreBackend::Postgres);
        assert_eq!(config.gas_limit, 300_000);
        assert_eq!(config.gas_price_wei, 1_000_000_000);
        assert_eq!(config.confirmation_poll_interval, Duration::from_millis(500));
        assert_eq!(config.confirmation_timeout, Duration::from_secs(15));
        assert_eq!(config.default_role, Role::Student);
        assert_eq!(config.cors_allowed_origins, vec!["http://localhost:5173"]);
    }

    #[test]
    fn test_missing_required_key() {
        let err = load(&REQUIRED[..1]).unwrap_err();
        assert!(err.to_string().contains("ETH_PRIVATE_KEY"));
    }

    #[test]
    fn test_invalid_values() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("LEDGER_GAS_LIMIT", "lots"));
        assert!(load(&pairs).unwrap_err().to_string().contains("LEDGER_GAS_LIMIT"));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("DEFAULT_ROLE", "dean"));
        assert!(load(&pairs).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("STORE_BACKEND", "redis"));
        assert!(load(&pairs).is_err());
    }

    #[test]
    fn test_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("STORE_BACKEND", "memory"),
            ("CONFIRMATION_TIMEOUT_SECS", "30"),
            ("CORS_ALLOWED_ORIGINS", "https://a.example, https://b.example"),
        ]);
        let config = load(&pairs).unwrap();
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.confirmation().timeout, Duration::from_secs(30));
        assert_eq!(config.cors_allowed_origins.len(), 2);
    }
}
