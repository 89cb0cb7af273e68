//! Background submission of signed transactions.
//!
//! The dispense path hands a raw transaction to the queue and returns; one
//! worker drains the queue in order, so broadcasts never overlap. Failures are
//! logged and counted, never retried.
//!
//! The local nonce floor only lives while signed transactions are queued:
//! once the queue is empty the next transfer goes back to the node's pending
//! count, whether the last broadcast succeeded or not.

use faucet_common::utils::converter::to_hex;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::address::Address;
use crate::chain::ChainClient;
use crate::error::{FaucetError, FaucetResult};
use crate::metrics::FaucetMetrics;
use crate::tx::transaction_hash;

/// Last nonce handed out by this process.
///
/// Guarded by an async mutex because nonce selection spans node calls.
pub type NonceCursor = Arc<tokio::sync::Mutex<Option<u64>>>;

/// Picks the nonce for the next transfer given the node's pending count.
pub fn next_nonce(last_assigned: Option<u64>, pending: u64, track_local: bool) -> u64 {
    match last_assigned {
        Some(last) if track_local && last >= pending => last + 1,
        _ => pending,
    }
}

#[derive(Debug, Clone)]
pub struct BroadcastJob {
    pub to: Address,
    pub nonce: u64,
    pub raw: Vec<u8>,
}

pub struct Broadcaster {
    sender: mpsc::Sender<BroadcastJob>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Broadcaster {
    /// Spawns the worker. A failed broadcast clears `cursor` so the next
    /// transfer goes back to the node's pending count.
    pub fn start(
        chain: Arc<dyn ChainClient>,
        metrics: FaucetMetrics,
        cursor: NonceCursor,
        capacity: usize,
    ) -> Self {
        let (sender, mut receiver) = mpsc::channel::<BroadcastJob>(capacity.max(1));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    job = receiver.recv() => match job {
                        Some(job) => {
                            let nonce = job.nonce;
                            let sent = submit(chain.as_ref(), &metrics, &cursor, job).await;
                            if sent && receiver.is_empty() {
                                release_nonce(&cursor, nonce).await;
                            }
                        }
                        None => break,
                    },
                    _ = &mut shutdown_rx => {
                        receiver.close();
                        while let Some(job) = receiver.recv().await {
                            let nonce = job.nonce;
                            if submit(chain.as_ref(), &metrics, &cursor, job).await && receiver.is_empty() {
                                release_nonce(&cursor, nonce).await;
                            }
                        }
                        break;
                    }
                }
            }
            debug!("Broadcast worker stopped");
        });

        Self {
            sender,
            shutdown: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queues a transaction. Returns once it is queued, not once it is sent.
    pub async fn submit(&self, job: BroadcastJob) -> FaucetResult<()> {
        self.sender
            .send(job)
            .await
            .map_err(|_| FaucetError::Internal("broadcast queue is closed".to_string()))
    }

    /// Stops accepting work, sends everything already queued and waits for the worker.
    pub async fn shutdown(&self) {
        let signal = self.shutdown.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(signal) = signal {
            let _ = signal.send(());
        }

        let worker = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Broadcast worker ended abnormally: {}", e);
            }
        }
    }
}

/// Drops the floor if `nonce` is still the last one handed out.
async fn release_nonce(cursor: &NonceCursor, nonce: u64) {
    let mut last = cursor.lock().await;
    if *last == Some(nonce) {
        *last = None;
        debug!("Nonce cursor released after {}", nonce);
    }
}

/// Sends one job; true when the node accepted it.
async fn submit(chain: &dyn ChainClient, metrics: &FaucetMetrics, cursor: &NonceCursor, job: BroadcastJob) -> bool {
    match chain.send_raw_transaction(&job.raw).await {
        Ok(hash) => {
            metrics.broadcasts_total.inc();
            info!("transaction hash {} (to {}, nonce {})", hash, job.to, job.nonce);
            true
        }
        Err(e) => {
            metrics.broadcast_failures_total.inc();
            error!(
                "Broadcast of {} to {} (nonce {}) failed: {}",
                to_hex(transaction_hash(&job.raw)),
                job.to,
                job.nonce,
                e
            );
            let mut last = cursor.lock().await;
            if last.map_or(false, |n| n >= job.nonce) {
                *last = None;
            }
            false
        }
    }
}
