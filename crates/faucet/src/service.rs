//! Faucet service core logic

use chrono::Utc;
use faucet_common::utils::converter::{format_units, to_hex, NATIVE_DECIMALS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::address::{is_valid_address, Address};
use crate::broadcast::{next_nonce, BroadcastJob, Broadcaster, NonceCursor};
use crate::chain::{ChainClient, JsonRpcChainClient};
use crate::config::{FaucetConfig, PayoutPolicy, VerificationMode};
use crate::error::{FaucetError, FaucetResult, Rejection};
use crate::metrics::FaucetMetrics;
use crate::tracker::EligibilityTracker;
use crate::tx::{transaction_hash, TransactionSigner};
use crate::verification::{build_verifier, Verifier};

/// Dispense request as received from the HTTP layer.
#[derive(Debug, Clone, Default)]
pub struct DispenseRequest {
    pub address: String,
    pub token: Option<String>,
}

impl DispenseRequest {
    pub fn new(address: impl Into<String>, token: Option<&str>) -> Self {
        Self {
            address: address.into(),
            token: token.map(str::to_string),
        }
    }
}

/// Outcome of an accepted dispense: the transfer was signed and queued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispenseReceipt {
    /// Address exactly as submitted
    pub address: String,
    pub nonce: u64,
    pub tx_hash: String,
    pub amount: String,
}

impl DispenseReceipt {
    pub fn message(&self) -> String {
        format!("Successfully sent some SBTCs to {}.", self.address)
    }
}

/// Faucet status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaucetStatus {
    pub address: String,
    pub balance: String,
    pub dispense_amount: String,
    pub chain_id: u64,
    pub tracked_addresses: usize,
}

/// Behaviour switches that are not part of the payout policy.
#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    /// Treat "no verifier answer" as a pass
    pub fail_open_verification: bool,
    pub track_local_nonce: bool,
    pub broadcast_queue_capacity: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            fail_open_verification: true,
            track_local_nonce: true,
            broadcast_queue_capacity: 256,
        }
    }
}

impl ServiceOptions {
    pub fn from_config(config: &FaucetConfig) -> Self {
        Self {
            fail_open_verification: config.verification.fail_open,
            track_local_nonce: config.broadcast.track_local_nonce,
            broadcast_queue_capacity: config.broadcast.queue_capacity,
        }
    }
}

/// Faucet service
pub struct FaucetService {
    policy: Arc<PayoutPolicy>,
    chain: Arc<dyn ChainClient>,
    verifier: Arc<dyn Verifier>,
    tracker: Arc<EligibilityTracker>,
    signer: TransactionSigner,
    broadcaster: Broadcaster,
    nonce_cursor: NonceCursor,
    options: ServiceOptions,
    metrics: FaucetMetrics,
}

impl FaucetService {
    /// Must be called inside a Tokio runtime; spawns the broadcast worker.
    pub fn new(
        policy: PayoutPolicy,
        chain: Arc<dyn ChainClient>,
        verifier: Arc<dyn Verifier>,
        tracker: Arc<EligibilityTracker>,
        options: ServiceOptions,
        metrics: FaucetMetrics,
    ) -> Self {
        let policy = Arc::new(policy);
        let signer = TransactionSigner::new(policy.clone());
        let nonce_cursor = NonceCursor::default();
        let broadcaster = Broadcaster::start(
            chain.clone(),
            metrics.clone(),
            nonce_cursor.clone(),
            options.broadcast_queue_capacity,
        );

        info!("Faucet address: {}", signer.address());
        if !options.fail_open_verification {
            info!("Requests without a verification answer will be rejected");
        }

        Self {
            signer,
            policy,
            chain,
            verifier,
            tracker,
            broadcaster,
            nonce_cursor,
            options,
            metrics,
        }
    }

    /// Wires the JSON-RPC client and configured verifier around `tracker`.
    pub fn from_config(
        config: &FaucetConfig,
        tracker: Arc<EligibilityTracker>,
        metrics: FaucetMetrics,
    ) -> FaucetResult<Self> {
        let policy = config.payout_policy()?;
        let chain = Arc::new(JsonRpcChainClient::new(policy.rpc_url.clone(), config.rpc_timeout())?);
        info!("Using node at {}", chain.rpc_url());
        let verifier = build_verifier(&config.verification, config.rpc_timeout())?;

        if config.verification.mode == VerificationMode::None && config.verification.fail_open {
            warn!("No verification service configured; every non-empty token will be accepted");
        }

        Ok(Self::new(
            policy,
            chain,
            verifier,
            tracker,
            ServiceOptions::from_config(config),
            metrics,
        ))
    }

    pub fn policy(&self) -> &PayoutPolicy {
        &self.policy
    }

    pub fn tracker(&self) -> &Arc<EligibilityTracker> {
        &self.tracker
    }

    pub fn metrics(&self) -> &FaucetMetrics {
        &self.metrics
    }

    /// Dispense the payout amount to the requested address.
    ///
    /// Guards run in a fixed order and the first failure is returned; a
    /// rejected request leaves no grant and sends nothing.
    pub async fn dispense(&self, request: DispenseRequest) -> FaucetResult<DispenseReceipt> {
        self.metrics.dispense_requests_total.inc();

        let result = self.try_dispense(&request).await;
        match &result {
            Ok(receipt) => {
                self.metrics.dispensed_total.inc();
                info!("Sending {} wei to {} (nonce {})", receipt.amount, receipt.address, receipt.nonce);
            }
            Err(FaucetError::Rejected(reason)) => {
                self.metrics.record_rejection(reason.label());
                info!("Rejected dispense to {:?}: {}", request.address, reason);
            }
            Err(e) => {
                self.metrics.dispense_errors_total.inc();
                error!("Dispense to {:?} failed: {}", request.address, e);
            }
        }
        result
    }

    async fn try_dispense(&self, request: &DispenseRequest) -> FaucetResult<DispenseReceipt> {
        if !is_valid_address(&request.address, self.policy.chain_id) {
            return Err(Rejection::InvalidAddress.into());
        }
        let destination: Address = request
            .address
            .parse()
            .map_err(|_| Rejection::InvalidAddress)?;

        // Held until the grant is recorded; dropping it on any early return
        // hands the address to the next waiting attempt.
        let reservation = self
            .tracker
            .reserve(&request.address)
            .await
            .ok_or(Rejection::AlreadyUsed)?;

        let token = request
            .token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or(Rejection::MissingVerification)?;

        if self.chain.is_syncing().await? {
            return Err(Rejection::NodeSyncing.into());
        }

        match self.verifier.verify(token).await {
            Some(true) => {}
            Some(false) => return Err(Rejection::VerificationFailed.into()),
            None if self.options.fail_open_verification => {
                warn!("No verification answer for {}, passing through", request.address);
            }
            None => return Err(Rejection::VerificationFailed.into()),
        }

        let (nonce, raw) = self.sign_transfer(destination).await?;
        let tx_hash = to_hex(transaction_hash(&raw));

        self.broadcaster
            .submit(BroadcastJob {
                to: destination,
                nonce,
                raw,
            })
            .await?;

        // The grant stands whatever the broadcast outcome turns out to be.
        reservation.commit();
        self.metrics.tracked_addresses.set(self.tracker.len() as i64);

        Ok(DispenseReceipt {
            address: request.address.clone(),
            nonce,
            tx_hash,
            amount: self.policy.dispense_amount.to_string(),
        })
    }

    /// Picks a nonce and gas price and signs the transfer.
    ///
    /// Nonce selection is serialized so concurrent dispenses get distinct
    /// nonces even before the node has seen the earlier transactions.
    async fn sign_transfer(&self, destination: Address) -> FaucetResult<(u64, Vec<u8>)> {
        let mut last_assigned = self.nonce_cursor.lock().await;

        let pending = self.chain.get_pending_nonce(&self.policy.faucet_address).await?;
        let gas_price = self.chain.get_gas_price().await?;
        let nonce = next_nonce(*last_assigned, pending, self.options.track_local_nonce);

        let raw = self.signer.build(destination, nonce, gas_price)?;
        *last_assigned = Some(nonce);

        debug!("Signed transfer to {}: nonce={} gas_price={}", destination, nonce, gas_price);
        Ok((nonce, raw))
    }

    /// Faucet balance in SBTC.
    pub async fn balance(&self) -> FaucetResult<String> {
        let wei = self.chain.get_balance(&self.policy.faucet_address).await?;
        Ok(format_units(wei, NATIVE_DECIMALS))
    }

    /// Get faucet status
    pub async fn get_status(&self) -> FaucetResult<FaucetStatus> {
        let tracked_addresses = self.tracker.len();
        self.metrics.tracked_addresses.set(tracked_addresses as i64);

        Ok(FaucetStatus {
            address: self.policy.faucet_address.to_string(),
            balance: self.balance().await?,
            dispense_amount: format_units(self.policy.dispense_amount, NATIVE_DECIMALS),
            chain_id: self.policy.chain_id,
            tracked_addresses,
        })
    }

    /// Prometheus exposition with the tracked-address gauge brought up to date.
    pub fn render_metrics(&self) -> prometheus::Result<String> {
        self.metrics.tracked_addresses.set(self.tracker.len() as i64);
        self.metrics.encode()
    }

    /// Flushes queued broadcasts and stops the worker.
    pub async fn shutdown(&self) {
        self.broadcaster.shutdown().await;
        info!(
            "Faucet service stopped at {} with {} tracked addresses",
            Utc::now().to_rfc3339(),
            self.tracker.len()
        );
    }
}
