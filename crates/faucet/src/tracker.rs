//! In-memory eligibility tracking.
//!
//! Each address that received a disbursement keeps one record holding the
//! grant time in milliseconds. An address with no record is eligible. Records
//! are dropped by a periodic sweep once the window has elapsed.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::address::normalize;

/// Length of the eligibility window: 24 hours.
pub const ELIGIBILITY_WINDOW_MS: i64 = 86_400_000;

/// One dispense attempt at a time per address.
type Turn = Arc<tokio::sync::Mutex<()>>;

#[derive(Debug, Default)]
struct TrackerState {
    /// normalized address -> granted at (ms since epoch)
    grants: HashMap<String, i64>,
    /// addresses with a dispense attempt running or waiting
    in_flight: HashMap<String, Turn>,
}

/// Per-address once-per-window gate.
#[derive(Debug, Default)]
pub struct EligibilityTracker {
    state: Mutex<TrackerState>,
}

impl EligibilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        // The state is plain data with no invariant spanning a panic point.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// False iff a live grant record exists for the address.
    pub fn is_eligible(&self, address: &str) -> bool {
        !self.lock().grants.contains_key(&normalize(address))
    }

    pub fn record_grant(&self, address: &str) {
        self.record_grant_at(address, Utc::now().timestamp_millis());
    }

    /// Stores `now_ms` as the grant time, replacing any previous record.
    pub fn record_grant_at(&self, address: &str, now_ms: i64) {
        self.lock().grants.insert(normalize(address), now_ms);
    }

    pub fn granted_at(&self, address: &str) -> Option<i64> {
        self.lock().grants.get(&normalize(address)).copied()
    }

    /// Claims the address for one dispense attempt.
    ///
    /// Waits for any attempt already running for the same address, then
    /// returns `None` iff the address holds a grant.
    pub async fn reserve(self: &Arc<Self>, address: &str) -> Option<Reservation> {
        let key = normalize(address);
        let turn = {
            let mut state = self.lock();
            if state.grants.contains_key(&key) {
                return None;
            }
            state.in_flight.entry(key.clone()).or_default().clone()
        };

        let reservation = Reservation {
            tracker: Arc::clone(self),
            key,
            _turn: turn.lock_owned().await,
        };

        // The attempt we waited on may have been granted.
        if self.lock().grants.contains_key(&reservation.key) {
            return None;
        }
        Some(reservation)
    }

    /// Number of addresses with an attempt running or waiting.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Removes every record whose age is at least one window. Returns the count removed.
    pub fn sweep(&self, now_ms: i64) -> usize {
        let mut state = self.lock();
        let before = state.grants.len();
        state
            .grants
            .retain(|_, granted_at| now_ms - *granted_at < ELIGIBILITY_WINDOW_MS);
        before - state.grants.len()
    }

    /// Number of live grant records.
    pub fn len(&self) -> usize {
        self.lock().grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Claim on an address held for the duration of one dispense attempt.
///
/// Dropping without [`Reservation::commit`] hands the address to the next
/// waiting attempt, if any.
#[derive(Debug)]
pub struct Reservation {
    tracker: Arc<EligibilityTracker>,
    key: String,
    _turn: OwnedMutexGuard<()>,
}

impl Reservation {
    pub fn address(&self) -> &str {
        &self.key
    }

    /// Records the grant for the reserved address.
    pub fn commit(self) {
        self.tracker.record_grant(&self.key);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut state = self.tracker.lock();
        // Waiters clone the turn under the state lock; the map and this
        // guard account for two references.
        let idle = state
            .in_flight
            .get(&self.key)
            .map_or(false, |turn| Arc::strong_count(turn) <= 2);
        if idle {
            state.in_flight.remove(&self.key);
        }
    }
}

/// Background task that sweeps expired records on a fixed period.
pub struct Sweeper {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawns the sweep loop. The first pass runs one full period after start.
    pub fn start(tracker: Arc<EligibilityTracker>, period: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = tracker.sweep(Utc::now().timestamp_millis());
                        if removed > 0 {
                            info!("Swept {} expired eligibility records", removed);
                        } else {
                            debug!("Eligibility sweep found nothing to remove");
                        }
                    }
                    _ = &mut shutdown_rx => {
                        debug!("Sweeper stopping");
                        break;
                    }
                }
            }
        });

        info!("Eligibility sweeper started (period: {:?})", period);
        Self {
            shutdown: Some(shutdown_tx),
            handle,
        }
    }

    /// Signals the loop to exit and waits for it.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.handle.await {
            warn!("Sweeper task ended abnormally: {}", e);
        }
    }
}
