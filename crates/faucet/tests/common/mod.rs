//! Shared fixtures for the faucet integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use faucet_common::utils::logging::init_test_logging;
use rsk_faucet::verification::StaticTokenVerifier;
use rsk_faucet::{
    Address, ChainClient, EligibilityTracker, FaucetConfig, FaucetError, FaucetMetrics, FaucetResult,
    FaucetService, PayoutPolicy, ServiceOptions, Verifier,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const FAUCET_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
pub const FAUCET_ADDRESS: &str = "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23";

/// `0x…dead` with its chain 31 checksum.
pub const DEAD: &str = "0x000000000000000000000000000000000000dEad";
pub const OTHER: &str = "0x5aAeb6053F3e94c9b9A09F33669435E7EF1BEaEd";
pub const TOKEN: &str = "123456";

/// Scriptable in-memory node.
#[derive(Default)]
pub struct MockChain {
    pub syncing: AtomicBool,
    pub unreachable: AtomicBool,
    pub fail_broadcast: AtomicBool,
    /// Accept transactions but never count them as pending
    pub evict: AtomicBool,
    pub pending_nonce: AtomicU64,
    pub gas_price: AtomicU64,
    pub balance: Mutex<u128>,
    pub sync_delay: Mutex<Option<Duration>>,
    pub sync_checks: AtomicUsize,
    pub sent: Mutex<Vec<Vec<u8>>>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        let chain = Self::default();
        chain.gas_price.store(60_000_000, Ordering::SeqCst);
        Arc::new(chain)
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    /// Waits until the broadcast worker has handed `count` transactions to the node.
    pub async fn wait_for_sent(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.sent.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("broadcast did not reach the node");
    }

    fn check_reachable(&self) -> FaucetResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(FaucetError::Rpc("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn get_balance(&self, _address: &Address) -> FaucetResult<u128> {
        self.check_reachable()?;
        Ok(*self.balance.lock().unwrap())
    }

    async fn get_pending_nonce(&self, _address: &Address) -> FaucetResult<u64> {
        self.check_reachable()?;
        Ok(self.pending_nonce.load(Ordering::SeqCst))
    }

    async fn get_gas_price(&self) -> FaucetResult<u128> {
        self.check_reachable()?;
        Ok(self.gas_price.load(Ordering::SeqCst) as u128)
    }

    async fn is_syncing(&self) -> FaucetResult<bool> {
        self.sync_checks.fetch_add(1, Ordering::SeqCst);
        let delay = *self.sync_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_reachable()?;
        Ok(self.syncing.load(Ordering::SeqCst))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> FaucetResult<String> {
        self.sent.lock().unwrap().push(raw.to_vec());
        if self.fail_broadcast.load(Ordering::SeqCst) {
            return Err(FaucetError::Rpc("insufficient funds".to_string()));
        }
        if !self.evict.load(Ordering::SeqCst) {
            self.pending_nonce.fetch_add(1, Ordering::SeqCst);
        }
        Ok(format!("0x{}", hex::encode(keccak_hash::keccak(raw).0)))
    }
}

pub fn policy() -> PayoutPolicy {
    FaucetConfig {
        private_key: FAUCET_KEY.to_string(),
        ..Default::default()
    }
    .payout_policy()
    .unwrap()
}

pub fn static_verifier() -> Arc<dyn Verifier> {
    Arc::new(StaticTokenVerifier::new(TOKEN))
}

pub fn service_with(chain: Arc<MockChain>, verifier: Arc<dyn Verifier>, options: ServiceOptions) -> FaucetService {
    init_test_logging();
    FaucetService::new(
        policy(),
        chain,
        verifier,
        Arc::new(EligibilityTracker::new()),
        options,
        FaucetMetrics::new().unwrap(),
    )
}

pub fn service(chain: Arc<MockChain>) -> FaucetService {
    service_with(chain, static_verifier(), ServiceOptions::default())
}
