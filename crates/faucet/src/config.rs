//! Faucet configuration

use anyhow::Context;
use faucet_common::utils::config::load_config;
use faucet_common::utils::converter::from_hex;
use faucet_common::utils::logging::LoggingConfig;
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::address::Address;
use crate::error::{FaucetError, FaucetResult};

/// Faucet service configuration
///
/// Field aliases accept the key names of the legacy `config.json`
/// (`rskNode`, `faucetPrivateKey`, `valueToSend`, ...). The `config` crate
/// lowercases keys when reading files, hence the lowercase twins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaucetConfig {
    /// Server address
    pub server_addr: String,

    /// Overrides the port of `server_addr` when set
    pub port: Option<u16>,

    /// RPC endpoint of the node; `host:port` is taken as plain http
    #[serde(alias = "rskNode", alias = "rsknode")]
    pub rpc_url: String,

    /// Per-request timeout for node calls (seconds)
    pub rpc_timeout_secs: u64,

    /// Expected faucet account; must match the key when given
    #[serde(alias = "faucetAddress", alias = "faucetaddress")]
    pub faucet_address: Option<String>,

    /// Faucet account private key (hex)
    #[serde(alias = "faucetPrivateKey", alias = "faucetprivatekey")]
    pub private_key: String,

    /// Amount to dispense per request (in wei)
    #[serde(alias = "valueToSend", alias = "valuetosend")]
    pub dispense_amount: String,

    /// Gas limit for transactions
    #[serde(alias = "gas")]
    pub gas_limit: u64,

    /// Chain id used for address checksums and EIP-155 signatures
    pub chain_id: u64,

    /// How often expired eligibility records are swept (seconds)
    pub sweep_interval_secs: u64,

    /// Enable CORS
    pub cors_enabled: bool,

    pub verification: VerificationConfig,

    pub broadcast: BroadcastConfig,

    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationMode {
    /// No verifier configured
    None,
    /// Compare against a fixed token
    Static,
    /// reCAPTCHA-style `siteverify` endpoint
    SiteVerify,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub mode: VerificationMode,

    /// Secret for the siteverify endpoint
    #[serde(alias = "captchaSecret", alias = "captchasecret")]
    pub secret: Option<String>,

    pub verify_url: String,

    /// Expected token in `static` mode
    pub static_token: Option<String>,

    /// Let requests through when no verifier gives an answer
    pub fail_open: bool,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            mode: VerificationMode::None,
            secret: None,
            verify_url: "https://www.google.com/recaptcha/api/siteverify".to_string(),
            static_token: None,
            fail_open: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Signed transactions waiting for the broadcast worker
    pub queue_capacity: usize,

    /// Never hand out a nonce at or below the last one assigned
    pub track_local_nonce: bool,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            track_local_nonce: true,
        }
    }
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:3000".to_string(),
            port: None,
            rpc_url: "http://localhost:4444".to_string(),
            rpc_timeout_secs: 10,
            faucet_address: None,
            private_key: String::new(),
            dispense_amount: "50000000000000000".to_string(), // 0.05 SBTC
            gas_limit: 21000,
            chain_id: 31, // RSK testnet
            sweep_interval_secs: 3600,
            cors_enabled: true,
            verification: VerificationConfig::default(),
            broadcast: BroadcastConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl FaucetConfig {
    /// Load from an optional file, then apply `FAUCET_*` environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => load_config::<Self, _>(path)
                .with_context(|| format!("Failed to load faucet config from {:?}", path))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("FAUCET_SERVER_ADDR") {
            self.server_addr = addr;
        }

        if let Some(port) = lookup("FAUCET_PORT") {
            match port.parse() {
                Ok(port) => self.port = Some(port),
                Err(e) => warn!("Ignoring FAUCET_PORT={:?}: {}", port, e),
            }
        }

        if let Some(rpc_url) = lookup("FAUCET_RPC_URL") {
            self.rpc_url = rpc_url;
        }

        if let Some(key) = lookup("FAUCET_PRIVATE_KEY") {
            self.private_key = key;
        }

        if let Some(address) = lookup("FAUCET_ADDRESS") {
            self.faucet_address = Some(address);
        }

        if let Some(amount) = lookup("FAUCET_DISPENSE_AMOUNT") {
            self.dispense_amount = amount;
        }

        if let Some(gas) = lookup("FAUCET_GAS_LIMIT") {
            match gas.parse() {
                Ok(gas) => self.gas_limit = gas,
                Err(e) => warn!("Ignoring FAUCET_GAS_LIMIT={:?}: {}", gas, e),
            }
        }

        if let Some(chain_id) = lookup("FAUCET_CHAIN_ID") {
            match chain_id.parse() {
                Ok(id) => self.chain_id = id,
                Err(e) => warn!("Ignoring FAUCET_CHAIN_ID={:?}: {}", chain_id, e),
            }
        }

        if let Some(secret) = lookup("FAUCET_CAPTCHA_SECRET") {
            self.verification.secret = Some(secret);
        }

        if let Some(level) = lookup("FAUCET_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Listen address with `port` applied.
    pub fn listen_addr(&self) -> String {
        match self.port {
            Some(port) => {
                let host = self
                    .server_addr
                    .rsplit_once(':')
                    .map_or(self.server_addr.as_str(), |(host, _)| host);
                format!("{}:{}", host, port)
            }
            None => self.server_addr.clone(),
        }
    }

    pub fn rpc_endpoint(&self) -> String {
        if self.rpc_url.contains("://") {
            self.rpc_url.clone()
        } else {
            format!("http://{}", self.rpc_url)
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Resolve the typed, immutable payout policy.
    pub fn payout_policy(&self) -> FaucetResult<PayoutPolicy> {
        PayoutPolicy::from_config(self)
    }
}

/// Process-wide transfer parameters, fixed for the lifetime of the service.
#[derive(Debug, Clone)]
pub struct PayoutPolicy {
    pub rpc_url: String,
    pub faucet_address: Address,
    pub signing_key: SigningKey,
    pub dispense_amount: u128,
    pub gas_limit: u64,
    pub chain_id: u64,
}

impl PayoutPolicy {
    pub fn from_config(config: &FaucetConfig) -> FaucetResult<Self> {
        let key_hex = config.private_key.trim();
        if key_hex.is_empty() {
            return Err(FaucetError::InvalidConfig("private_key is required".to_string()));
        }
        let key_bytes = from_hex(key_hex)
            .map_err(|e| FaucetError::InvalidConfig(format!("Invalid private key: {}", e)))?;
        if key_bytes.len() != 32 {
            return Err(FaucetError::InvalidConfig(format!(
                "Invalid private key length: {} bytes",
                key_bytes.len()
            )));
        }
        let signing_key = SigningKey::from_slice(&key_bytes)
            .map_err(|e| FaucetError::InvalidConfig(format!("Invalid signing key: {}", e)))?;

        let faucet_address = Address::from_verifying_key(signing_key.verifying_key());
        if let Some(configured) = &config.faucet_address {
            let configured: Address = configured
                .parse()
                .map_err(|e| FaucetError::InvalidConfig(format!("faucet_address: {}", e)))?;
            if configured != faucet_address {
                return Err(FaucetError::InvalidConfig(format!(
                    "faucet_address {} does not match private key address {}",
                    configured, faucet_address
                )));
            }
        }

        let dispense_amount = config
            .dispense_amount
            .trim()
            .parse::<u128>()
            .map_err(|e| FaucetError::InvalidConfig(format!("Invalid dispense amount: {}", e)))?;

        if config.gas_limit == 0 {
            return Err(FaucetError::InvalidConfig("gas_limit must be positive".to_string()));
        }

        Ok(Self {
            rpc_url: config.rpc_endpoint(),
            faucet_address,
            signing_key,
            dispense_amount,
            gas_limit: config.gas_limit,
            chain_id: config.chain_id,
        })
    }
}
