//! RSK testnet faucet.
//!
//! Sends a fixed amount of SBTC to a requested address at most once per
//! address per day:
//! - Address and checksum validation
//! - In-memory eligibility tracking with hourly expiry sweeps
//! - EIP-155 transaction signing and queued broadcast
//! - Human-verification gate
//! - HTTP interface and Prometheus metrics

pub mod address;
pub mod api;
pub mod broadcast;
pub mod chain;
pub mod config;
pub mod error;
pub mod metrics;
pub mod service;
pub mod tracker;
pub mod tx;
pub mod verification;

pub use address::{is_valid_address, Address};
pub use chain::{ChainClient, JsonRpcChainClient};
pub use config::{FaucetConfig, PayoutPolicy};
pub use error::{FaucetError, FaucetResult, Rejection};
pub use metrics::FaucetMetrics;
pub use service::{DispenseReceipt, DispenseRequest, FaucetService, FaucetStatus, ServiceOptions};
pub use tracker::{EligibilityTracker, Sweeper};
pub use tx::TransactionSigner;
pub use verification::Verifier;
