use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::OnceCell;
use prometheus::{
    histogram_opts, opts, Gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec,
};

pub static METRICS: OnceCell<Arc<Metrics>> = OnceCell::new();

#[derive(Debug)]
pub struct Metrics {
    // Beacon node pool
    pub beacon_node_score: IntGaugeVec,
    pub beacon_node_version: IntGaugeVec,
    pub processed_beacon_node_events: IntCounterVec,

    // Remote signer
    pub remote_signer_score: IntGauge,
    pub signed_messages: IntCounterVec,

    // Attestation consensus
    pub attestation_consensus_time_seconds: Histogram,
    pub attestation_consensus_failures_total: IntCounter,

    // Duties
    pub duty_start_time_seconds: HistogramVec,
    pub duty_submission_time_seconds: HistogramVec,
    pub published_attestations: IntCounter,
    pub published_aggregate_attestations: IntCounter,
    pub published_blocks: IntCounter,
    pub published_sync_committee_messages: IntCounter,
    pub published_sync_contributions: IntCounter,

    // Safety
    pub slashing_detected: IntGauge,

    // Validators
    pub validator_count: IntGaugeVec,

    // Errors by category
    pub errors_total: IntCounterVec,

    // Block value seen at proposal time, for operator dashboards
    pub best_block_value_gwei: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        Ok(Self {
            beacon_node_score: IntGaugeVec::new(
                opts!("beacon_node_score", "Beacon node score"),
                &["node"],
            )?,
            beacon_node_version: IntGaugeVec::new(
                opts!("beacon_node_version", "Beacon node version in use"),
                &["node", "version"],
            )?,
            processed_beacon_node_events: IntCounterVec::new(
                opts!(
                    "processed_beacon_node_events",
                    "Successfully processed beacon node events",
                ),
                &["node", "event"],
            )?,

            remote_signer_score: IntGauge::new("remote_signer_score", "Remote signer score")?,
            signed_messages: IntCounterVec::new(
                opts!("signed_messages", "Number of signed messages"),
                &["type"],
            )?,

            attestation_consensus_time_seconds: Histogram::with_opts(histogram_opts!(
                "attestation_consensus_time_seconds",
                "Time it took connected beacon nodes to agree on attestation data",
                vec![
                    0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.25, 0.3, 0.4, 0.5, 0.75, 1.0, 2.0, 3.0,
                ],
            ))?,
            attestation_consensus_failures_total: IntCounter::new(
                "attestation_consensus_failures_total",
                "Amount of attestation consensus failures",
            )?,

            duty_start_time_seconds: HistogramVec::new(
                histogram_opts!(
                    "duty_start_time_seconds",
                    "Time into the slot at which a duty started",
                ),
                &["duty"],
            )?,
            duty_submission_time_seconds: HistogramVec::new(
                histogram_opts!(
                    "duty_submission_time_seconds",
                    "Time into the slot at which a duty's messages were submitted",
                ),
                &["duty"],
            )?,
            published_attestations: IntCounter::new(
                "published_attestations",
                "Successfully published attestations",
            )?,
            published_aggregate_attestations: IntCounter::new(
                "published_aggregate_attestations",
                "Successfully published aggregate attestations",
            )?,
            published_blocks: IntCounter::new(
                "published_blocks",
                "Successfully published blocks",
            )?,
            published_sync_committee_messages: IntCounter::new(
                "published_sync_committee_messages",
                "Successfully published sync committee messages",
            )?,
            published_sync_contributions: IntCounter::new(
                "published_sync_contributions",
                "Successfully published sync committee contributions",
            )?,

            slashing_detected: IntGauge::new(
                "slashing_detected",
                "1 if any of the managed validators have been slashed, 0 otherwise",
            )?,

            validator_count: IntGaugeVec::new(
                opts!("validator_count", "Amount of validators per status"),
                &["status"],
            )?,

            errors_total: IntCounterVec::new(
                opts!("errors_total", "Errors by category"),
                &["category"],
            )?,

            best_block_value_gwei: Gauge::new(
                "best_block_value_gwei",
                "Value of the best produced block in Gwei",
            )?,
        })
    }

    pub fn register_with_default_metrics(&self) -> Result<()> {
        let registry = prometheus::default_registry();

        registry.register(Box::new(self.beacon_node_score.clone()))?;
        registry.register(Box::new(self.beacon_node_version.clone()))?;
        registry.register(Box::new(self.processed_beacon_node_events.clone()))?;
        registry.register(Box::new(self.remote_signer_score.clone()))?;
        registry.register(Box::new(self.signed_messages.clone()))?;
        registry.register(Box::new(self.attestation_consensus_time_seconds.clone()))?;
        registry.register(Box::new(self.attestation_consensus_failures_total.clone()))?;
        registry.register(Box::new(self.duty_start_time_seconds.clone()))?;
        registry.register(Box::new(self.duty_submission_time_seconds.clone()))?;
        registry.register(Box::new(self.published_attestations.clone()))?;
        registry.register(Box::new(self.published_aggregate_attestations.clone()))?;
        registry.register(Box::new(self.published_blocks.clone()))?;
        registry.register(Box::new(self.published_sync_committee_messages.clone()))?;
        registry.register(Box::new(self.published_sync_contributions.clone()))?;
        registry.register(Box::new(self.slashing_detected.clone()))?;
        registry.register(Box::new(self.validator_count.clone()))?;
        registry.register(Box::new(self.errors_total.clone()))?;
        registry.register(Box::new(self.best_block_value_gwei.clone()))?;

        Ok(())
    }

    pub fn set_beacon_node_score(&self, node: &str, score: i64) {
        self.beacon_node_score.with_label_values(&[node]).set(score);
    }

    pub fn count_error(&self, category: &str) {
        self.errors_total.with_label_values(&[category]).inc();
    }
}
