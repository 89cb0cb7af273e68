//! Prometheus metrics for the faucet

use prometheus::{opts, Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct FaucetMetrics {
    registry: Registry,

    pub dispense_requests_total: IntCounter,
    pub dispense_rejections_total: IntCounterVec,
    pub dispense_errors_total: IntCounter,
    pub dispensed_total: IntCounter,

    pub broadcasts_total: IntCounter,
    pub broadcast_failures_total: IntCounter,

    pub tracked_addresses: IntGauge,
}

impl FaucetMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let dispense_requests_total = IntCounter::with_opts(opts!(
            "faucet_dispense_requests_total",
            "Dispense requests received"
        ))?;
        let dispense_rejections_total = IntCounterVec::new(
            opts!("faucet_dispense_rejections_total", "Dispense requests rejected, by reason"),
            &["reason"],
        )?;
        let dispense_errors_total = IntCounter::with_opts(opts!(
            "faucet_dispense_errors_total",
            "Dispense requests that failed on a node or signing error"
        ))?;
        let dispensed_total = IntCounter::with_opts(opts!(
            "faucet_dispensed_total",
            "Transfers signed and queued for broadcast"
        ))?;
        let broadcasts_total = IntCounter::with_opts(opts!(
            "faucet_broadcasts_total",
            "Raw transactions accepted by the node"
        ))?;
        let broadcast_failures_total = IntCounter::with_opts(opts!(
            "faucet_broadcast_failures_total",
            "Raw transactions rejected by the node or not delivered"
        ))?;
        let tracked_addresses = IntGauge::with_opts(opts!(
            "faucet_tracked_addresses",
            "Addresses currently inside their eligibility window"
        ))?;

        registry.register(Box::new(dispense_requests_total.clone()))?;
        registry.register(Box::new(dispense_rejections_total.clone()))?;
        registry.register(Box::new(dispense_errors_total.clone()))?;
        registry.register(Box::new(dispensed_total.clone()))?;
        registry.register(Box::new(broadcasts_total.clone()))?;
        registry.register(Box::new(broadcast_failures_total.clone()))?;
        registry.register(Box::new(tracked_addresses.clone()))?;

        Ok(Self {
            registry,
            dispense_requests_total,
            dispense_rejections_total,
            dispense_errors_total,
            dispensed_total,
            broadcasts_total,
            broadcast_failures_total,
            tracked_addresses,
        })
    }

    pub fn record_rejection(&self, reason: &str) {
        self.dispense_rejections_total.with_label_values(&[reason]).inc();
    }

    /// Prometheus text exposition of every registered metric.
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
