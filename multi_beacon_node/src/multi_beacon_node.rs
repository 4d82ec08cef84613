//! The quorum coordinator.
//!
//! Read operations fan out to every healthy beacon node. Depending on the
//! operation, the first successful response wins, all successful responses
//! are combined (best aggregate, best block), or responses are counted until
//! a threshold of nodes agrees (attestation data). Operations where the
//! responding node does not matter go to the highest-scoring node with
//! failover down the score order.

use std::sync::{Arc, OnceLock};

use beacon_api::{
    AttesterDuty, BeaconNode, BeaconNodeError, Genesis, ProduceBlockV3Response, ProposerDuty,
    ProposerPreparation, SyncCommitteeSubscription, SyncDuty, ValidatorInfo, ValidatorLiveness,
    BeaconCommitteeSubscription,
};
use futures::{
    future::Future,
    stream::{FuturesUnordered, StreamExt as _},
};
use itertools::Itertools as _;
use log::{info, warn};
use prometheus_metrics::Metrics;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use types::{
    altair::containers::{SignedContributionAndProof, SyncCommitteeContribution, SyncCommitteeMessage},
    builder::SignedValidatorRegistrationV1,
    combined::{Attestation, SignedAggregateAndProof, SignedBeaconBlock, SignedBlindedBeaconBlock},
    config::{Config, SpecMismatch},
    electra::containers::SingleAttestation,
    nonstandard::{Phase, ValidatorStatus},
    phase0::{
        containers::Attestation as Phase0Attestation,
        primitives::{
            CommitteeIndex, Epoch, Slot, SubcommitteeIndex, ValidatorIndex, Wei, H256,
        },
    },
    PublicKeyBytes, SignatureBytes,
};

use crate::attestation_consensus::FinalityCache;

#[derive(Debug, Error)]
pub enum MultiBeaconNodeError {
    #[error("failed to get a successful response from any beacon node for {operation}")]
    AllNodesFailed { operation: &'static str },
    #[error(
        "failed to fully initialize a sufficient amount of beacon nodes \
         ({initialized}/{total} initialized, threshold {threshold})"
    )]
    InsufficientNodesInitialized {
        initialized: usize,
        total: usize,
        threshold: usize,
    },
    #[error("beacon nodes provided different genesis")]
    GenesisMismatch,
    #[error("beacon node {node} runs on a different spec: {mismatches:?}")]
    SpecMismatch {
        node: String,
        mismatches: Vec<SpecMismatch>,
    },
    #[error("failed to reach consensus on attestation data for slot {slot}")]
    AttestationConsensus { slot: Slot },
    #[error("no block was produced for slot {slot} in time")]
    NoBlockProduced { slot: Slot },
}

pub struct MultiBeaconNode {
    beacon_nodes: Vec<Arc<BeaconNode>>,
    beacon_nodes_proposal: Vec<Arc<BeaconNode>>,
    attestation_consensus_threshold: usize,
    config: Arc<Config>,
    genesis: OnceLock<Genesis>,
    pub(crate) finality_cache: FinalityCache,
    pub(crate) metrics: Option<Arc<Metrics>>,
}

impl MultiBeaconNode {
    #[must_use]
    pub fn new(
        beacon_nodes: Vec<Arc<BeaconNode>>,
        beacon_nodes_proposal: Vec<Arc<BeaconNode>>,
        attestation_consensus_threshold: usize,
        config: Arc<Config>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            beacon_nodes,
            beacon_nodes_proposal,
            attestation_consensus_threshold,
            config,
            genesis: OnceLock::new(),
            finality_cache: FinalityCache::default(),
            metrics,
        }
    }

    #[must_use]
    pub const fn threshold(&self) -> usize {
        self.attestation_consensus_threshold
    }

    #[must_use]
    pub const fn config(&self) -> &Arc<Config> {
        &self.config
    }

    #[must_use]
    pub fn beacon_nodes(&self) -> &[Arc<BeaconNode>] {
        &self.beacon_nodes
    }

    #[must_use]
    pub fn genesis(&self) -> Genesis {
        *self
            .genesis
            .get()
            .expect("genesis is set during initialization")
    }

    /// Initializes all connected beacon nodes concurrently. At least
    /// `attestation_consensus_threshold` of them must come up with the same
    /// genesis and a spec matching the local configuration.
    pub async fn initialize(
        &self,
        ignore_spec_mismatch: bool,
    ) -> Result<(), MultiBeaconNodeError> {
        let all_nodes = self
            .beacon_nodes
            .iter()
            .chain(&self.beacon_nodes_proposal);

        futures::future::join_all(all_nodes.map(|beacon_node| async move {
            if let Err(error) = beacon_node.initialize().await {
                warn!(
                    "failed to initialize beacon node at {}: {error}",
                    beacon_node.base_url(),
                );
            }
        }))
        .await;

        let initialized = self.healthy_nodes().count();
        let total = self.beacon_nodes.len();

        if initialized < self.attestation_consensus_threshold {
            return Err(MultiBeaconNodeError::InsufficientNodesInitialized {
                initialized,
                total,
                threshold: self.attestation_consensus_threshold,
            });
        }

        let genesis = self
            .healthy_nodes()
            .filter_map(|beacon_node| BeaconNode::genesis(beacon_node))
            .dedup()
            .exactly_one()
            .map_err(|_| MultiBeaconNodeError::GenesisMismatch)?;

        for beacon_node in self.healthy_nodes() {
            let mismatches = self.config.mismatches(&beacon_node.remote_spec());

            if !mismatches.is_empty() {
                if ignore_spec_mismatch {
                    warn!(
                        "ignoring spec mismatch on beacon node {}: {mismatches:?}",
                        beacon_node.host(),
                    );
                } else {
                    return Err(MultiBeaconNodeError::SpecMismatch {
                        node: beacon_node.host().to_owned(),
                        mismatches,
                    });
                }
            }
        }

        self.genesis.get_or_init(|| genesis);

        info!("successfully initialized {initialized}/{total} beacon nodes");

        Ok(())
    }

    /// Keeps retrying initialization of nodes that failed to come up, so a
    /// beacon node that was down at startup rejoins the quorum later.
    pub async fn run_reinitializer(self: Arc<Self>) -> anyhow::Result<()> {
        const REINITIALIZATION_INTERVAL: core::time::Duration =
            core::time::Duration::from_secs(30);

        loop {
            tokio::time::sleep(REINITIALIZATION_INTERVAL).await;

            let uninitialized = self
                .beacon_nodes
                .iter()
                .chain(&self.beacon_nodes_proposal)
                .filter(|beacon_node| !beacon_node.is_initialized())
                .cloned()
                .collect::<Vec<_>>();

            for beacon_node in uninitialized {
                if let Err(error) = beacon_node.initialize().await {
                    warn!(
                        "failed to initialize beacon node at {}: {error}",
                        beacon_node.base_url(),
                    );
                }
            }
        }
    }

    /// The highest-scoring initialized beacon node. Ties resolve to the node
    /// listed first in the configuration.
    #[must_use]
    pub fn best_beacon_node(&self) -> Arc<BeaconNode> {
        self.nodes_by_score()
            .next()
            .expect("at least one beacon node is configured")
    }

    pub(crate) fn healthy_nodes(&self) -> impl Iterator<Item = &Arc<BeaconNode>> {
        self.beacon_nodes
            .iter()
            .filter(|beacon_node| beacon_node.is_initialized())
    }

    fn nodes_by_score(&self) -> impl Iterator<Item = Arc<BeaconNode>> + '_ {
        // `sorted_by_key` is stable, so equal scores keep configuration
        // order after the descending sort.
        self.healthy_nodes()
            .sorted_by_key(|beacon_node| core::cmp::Reverse(beacon_node.score()))
            .cloned()
    }

    pub(crate) fn proposal_nodes(&self) -> Vec<Arc<BeaconNode>> {
        if self.beacon_nodes_proposal.is_empty() {
            self.healthy_nodes().cloned().collect()
        } else {
            self.beacon_nodes_proposal
                .iter()
                .filter(|beacon_node| beacon_node.is_initialized())
                .cloned()
                .collect()
        }
    }

    /// Issues `operation` against every healthy node and returns the first
    /// successful response, cancelling the rest.
    pub(crate) async fn first_success<T, F, Fut>(
        &self,
        operation: &'static str,
        f: F,
    ) -> Result<T, MultiBeaconNodeError>
    where
        F: Fn(Arc<BeaconNode>) -> Fut,
        Fut: Future<Output = Result<T, BeaconNodeError>>,
    {
        let mut requests = self
            .healthy_nodes()
            .cloned()
            .map(f)
            .collect::<FuturesUnordered<_>>();

        while let Some(result) = requests.next().await {
            match result {
                Ok(response) => return Ok(response),
                Err(error) => warn!("beacon node request failed for {operation}: {error}"),
            }
        }

        Err(MultiBeaconNodeError::AllNodesFailed { operation })
    }

    /// Issues `operation` against every healthy node and collects all
    /// successful responses. Fails only when no node succeeds.
    pub(crate) async fn all_successes<T, F, Fut>(
        &self,
        operation: &'static str,
        f: F,
    ) -> Result<Vec<T>, MultiBeaconNodeError>
    where
        F: Fn(Arc<BeaconNode>) -> Fut,
        Fut: Future<Output = Result<T, BeaconNodeError>>,
    {
        self.all_successes_on(self.healthy_nodes().cloned().collect(), operation, f)
            .await
    }

    pub(crate) async fn all_successes_on<T, F, Fut>(
        &self,
        beacon_nodes: Vec<Arc<BeaconNode>>,
        operation: &'static str,
        f: F,
    ) -> Result<Vec<T>, MultiBeaconNodeError>
    where
        F: Fn(Arc<BeaconNode>) -> Fut,
        Fut: Future<Output = Result<T, BeaconNodeError>>,
    {
        let results = futures::future::join_all(beacon_nodes.into_iter().map(f)).await;

        let responses = results
            .into_iter()
            .filter_map(|result| match result {
                Ok(response) => Some(response),
                Err(error) => {
                    warn!("beacon node request failed for {operation}: {error}");
                    None
                }
            })
            .collect::<Vec<_>>();

        if responses.is_empty() {
            return Err(MultiBeaconNodeError::AllNodesFailed { operation });
        }

        Ok(responses)
    }

    /// Tries nodes in descending score order until one succeeds.
    pub(crate) async fn with_failover<T, F, Fut>(
        &self,
        operation: &'static str,
        f: F,
    ) -> Result<T, MultiBeaconNodeError>
    where
        F: Fn(Arc<BeaconNode>) -> Fut,
        Fut: Future<Output = Result<T, BeaconNodeError>>,
    {
        for beacon_node in self.nodes_by_score() {
            match f(beacon_node).await {
                Ok(response) => return Ok(response),
                Err(error) => warn!("beacon node request failed for {operation}: {error}"),
            }
        }

        Err(MultiBeaconNodeError::AllNodesFailed { operation })
    }

    pub async fn get_validators(
        &self,
        ids: Vec<PublicKeyBytes>,
        statuses: Vec<ValidatorStatus>,
    ) -> Result<Vec<ValidatorInfo>, MultiBeaconNodeError> {
        let ids = Arc::new(ids);
        let statuses = Arc::new(statuses);

        self.first_success("get_validators", move |beacon_node| {
            let ids = ids.clone();
            let statuses = statuses.clone();
            async move { beacon_node.get_validators(&ids, &statuses, "head").await }
        })
        .await
    }

    pub async fn get_attester_duties(
        &self,
        epoch: Epoch,
        indices: Vec<ValidatorIndex>,
    ) -> Result<beacon_api::schemas::DutiesResponse<AttesterDuty>, MultiBeaconNodeError> {
        let indices = Arc::new(indices);

        self.with_failover("get_attester_duties", move |beacon_node| {
            let indices = indices.clone();
            async move { beacon_node.get_attester_duties(epoch, &indices).await }
        })
        .await
    }

    pub async fn get_proposer_duties(
        &self,
        epoch: Epoch,
    ) -> Result<beacon_api::schemas::DutiesResponse<ProposerDuty>, MultiBeaconNodeError> {
        self.with_failover("get_proposer_duties", move |beacon_node| async move {
            beacon_node.get_proposer_duties(epoch).await
        })
        .await
    }

    pub async fn get_sync_duties(
        &self,
        epoch: Epoch,
        indices: Vec<ValidatorIndex>,
    ) -> Result<Vec<SyncDuty>, MultiBeaconNodeError> {
        let indices = Arc::new(indices);

        self.with_failover("get_sync_duties", move |beacon_node| {
            let indices = indices.clone();
            async move { beacon_node.get_sync_duties(epoch, &indices).await }
        })
        .await
    }

    pub async fn get_block_root(&self, block_id: &str) -> Result<H256, MultiBeaconNodeError> {
        self.with_failover("get_block_root", move |beacon_node| {
            let block_id = block_id.to_owned();
            async move { beacon_node.get_block_root(&block_id).await }
        })
        .await
    }

    pub async fn get_liveness(
        &self,
        epoch: Epoch,
        indices: Vec<ValidatorIndex>,
    ) -> Result<Vec<ValidatorLiveness>, MultiBeaconNodeError> {
        let indices = Arc::new(indices);

        self.with_failover("get_liveness", move |beacon_node| {
            let indices = indices.clone();
            async move { beacon_node.get_liveness(epoch, &indices).await }
        })
        .await
    }

    pub async fn publish_attestations(
        &self,
        attestations: Vec<Phase0Attestation>,
    ) -> Result<(), MultiBeaconNodeError> {
        let attestations = Arc::new(attestations);

        self.all_successes("publish_attestations", move |beacon_node| {
            let attestations = attestations.clone();
            async move { beacon_node.publish_attestations(&attestations).await }
        })
        .await
        .map(drop)
    }

    pub async fn publish_single_attestations(
        &self,
        attestations: Vec<SingleAttestation>,
        phase: Phase,
    ) -> Result<(), MultiBeaconNodeError> {
        let attestations = Arc::new(attestations);

        self.all_successes("publish_attestations", move |beacon_node| {
            let attestations = attestations.clone();
            async move {
                beacon_node
                    .publish_single_attestations(&attestations, phase)
                    .await
            }
        })
        .await
        .map(drop)
    }

    pub async fn publish_aggregate_and_proofs(
        &self,
        aggregates: Vec<SignedAggregateAndProof>,
        phase: Phase,
    ) -> Result<(), MultiBeaconNodeError> {
        let aggregates = Arc::new(aggregates);

        self.all_successes("publish_aggregate_and_proofs", move |beacon_node| {
            let aggregates = aggregates.clone();
            async move {
                beacon_node
                    .publish_aggregate_and_proofs(&aggregates, phase)
                    .await
            }
        })
        .await
        .map(drop)
    }

    pub async fn publish_sync_committee_messages(
        &self,
        messages: Vec<SyncCommitteeMessage>,
    ) -> Result<(), MultiBeaconNodeError> {
        let messages = Arc::new(messages);

        self.all_successes("publish_sync_committee_messages", move |beacon_node| {
            let messages = messages.clone();
            async move { beacon_node.publish_sync_committee_messages(&messages).await }
        })
        .await
        .map(drop)
    }

    pub async fn publish_contribution_and_proofs(
        &self,
        contributions: Vec<SignedContributionAndProof>,
    ) -> Result<(), MultiBeaconNodeError> {
        let contributions = Arc::new(contributions);

        self.all_successes("publish_contribution_and_proofs", move |beacon_node| {
            let contributions = contributions.clone();
            async move {
                beacon_node
                    .publish_contribution_and_proofs(&contributions)
                    .await
            }
        })
        .await
        .map(drop)
    }

    pub async fn prepare_beacon_committee_subscriptions(
        &self,
        subscriptions: Vec<BeaconCommitteeSubscription>,
    ) -> Result<(), MultiBeaconNodeError> {
        let subscriptions = Arc::new(subscriptions);

        self.all_successes(
            "prepare_beacon_committee_subscriptions",
            move |beacon_node| {
                let subscriptions = subscriptions.clone();
                async move {
                    beacon_node
                        .prepare_beacon_committee_subscriptions(&subscriptions)
                        .await
                }
            },
        )
        .await
        .map(drop)
    }

    pub async fn prepare_sync_committee_subscriptions(
        &self,
        subscriptions: Vec<SyncCommitteeSubscription>,
    ) -> Result<(), MultiBeaconNodeError> {
        let subscriptions = Arc::new(subscriptions);

        self.all_successes(
            "prepare_sync_committee_subscriptions",
            move |beacon_node| {
                let subscriptions = subscriptions.clone();
                async move {
                    beacon_node
                        .prepare_sync_committee_subscriptions(&subscriptions)
                        .await
                }
            },
        )
        .await
        .map(drop)
    }

    pub async fn prepare_beacon_proposer(
        &self,
        preparations: Vec<ProposerPreparation>,
    ) -> Result<(), MultiBeaconNodeError> {
        let preparations = Arc::new(preparations);

        self.all_successes("prepare_beacon_proposer", move |beacon_node| {
            let preparations = preparations.clone();
            async move { beacon_node.prepare_beacon_proposer(&preparations).await }
        })
        .await
        .map(drop)
    }

    /// Registrations go to a single node; relays deduplicate, there is no
    /// benefit in spamming every node with the same batch.
    pub async fn register_validators(
        &self,
        registrations: Vec<SignedValidatorRegistrationV1>,
    ) -> Result<(), MultiBeaconNodeError> {
        let registrations = Arc::new(registrations);

        self.with_failover("register_validators", move |beacon_node| {
            let registrations = registrations.clone();
            async move { beacon_node.register_validators(&registrations).await }
        })
        .await
    }

    /// Returns the aggregate with the most participants among all timely
    /// responses; returns early if an aggregate covers the whole committee.
    pub async fn get_aggregate_attestation(
        &self,
        slot: Slot,
        attestation_data_root: H256,
        committee_index: CommitteeIndex,
        deadline: Instant,
    ) -> Result<Attestation, MultiBeaconNodeError> {
        let mut requests = self
            .healthy_nodes()
            .cloned()
            .map(|beacon_node| async move {
                beacon_node
                    .get_aggregate_attestation(
                        slot,
                        attestation_data_root,
                        committee_index,
                        Some(deadline),
                    )
                    .await
            })
            .collect::<FuturesUnordered<_>>();

        let mut best: Option<Attestation> = None;

        while let Some(result) = requests.next().await {
            match result {
                Ok(aggregate) => {
                    if aggregate.num_set_bits() == aggregate.num_bits() {
                        return Ok(aggregate);
                    }

                    let better = best
                        .as_ref()
                        .is_none_or(|current| aggregate.num_set_bits() > current.num_set_bits());

                    if better {
                        best = Some(aggregate);
                    }
                }
                Err(error) => {
                    warn!("beacon node request failed for get_aggregate_attestation: {error}");
                }
            }
        }

        best.ok_or(MultiBeaconNodeError::AllNodesFailed {
            operation: "get_aggregate_attestation",
        })
    }

    /// Returns the contribution with the most participants among all timely
    /// responses.
    pub async fn get_sync_committee_contribution(
        &self,
        slot: Slot,
        subcommittee_index: SubcommitteeIndex,
        beacon_block_root: H256,
        deadline: Instant,
    ) -> Result<SyncCommitteeContribution, MultiBeaconNodeError> {
        let contributions = self
            .all_successes("get_sync_committee_contribution", move |beacon_node| {
                async move {
                    beacon_node
                        .get_sync_committee_contribution(
                            slot,
                            subcommittee_index,
                            beacon_block_root,
                            Some(deadline),
                        )
                        .await
                }
            })
            .await?;

        contributions
            .into_iter()
            .max_by_key(SyncCommitteeContribution::participant_count)
            .ok_or(MultiBeaconNodeError::AllNodesFailed {
                operation: "get_sync_committee_contribution",
            })
    }

    /// Asks every proposer-allowed node to produce a block and picks the one
    /// with the highest effective value. Builder-built blocks have their
    /// claimed value weighted by `builder_boost_factor / 100` before the
    /// comparison. Waits a bounded amount of time for better blocks once the
    /// first one arrives; falls back to the first block produced at all.
    pub async fn produce_best_block(
        &self,
        slot: Slot,
        randao_reveal: SignatureBytes,
        graffiti: Option<H256>,
        builder_boost_factor: u64,
    ) -> Result<ProduceBlockV3Response, MultiBeaconNodeError> {
        let beacon_nodes = self.proposal_nodes();

        if !self.beacon_nodes_proposal.is_empty() {
            info!(
                "overriding beacon nodes for block proposal, using {:?}",
                beacon_nodes
                    .iter()
                    .map(|beacon_node| beacon_node.host())
                    .collect::<Vec<_>>(),
            );
        }

        let production_window = self.config.interval_duration() / 3;
        let window_end = Instant::now() + production_window;

        let mut requests = beacon_nodes
            .into_iter()
            .map(|beacon_node| {
                let host = beacon_node.host().to_owned();
                async move {
                    let response = beacon_node
                        .produce_block_v3(slot, randao_reveal, graffiti, builder_boost_factor, None)
                        .await;
                    (host, response)
                }
            })
            .collect::<FuturesUnordered<_>>();

        let mut best: Option<(Wei, ProduceBlockV3Response)> = None;

        loop {
            let next = tokio::time::timeout_at(window_end, requests.next());

            let Ok(Some((host, result))) = next.await else {
                break;
            };

            match result {
                Ok(response) => {
                    let effective_value = effective_block_value(&response, builder_boost_factor);
                    info!(
                        "evaluating block from {host} with effective value {effective_value}",
                    );

                    let better = best
                        .as_ref()
                        .is_none_or(|(current, _)| effective_value > *current);

                    if better {
                        best = Some((effective_value, response));
                    }
                }
                Err(error) => {
                    warn!("beacon node request failed for produce_block_v3: {error}");
                }
            }
        }

        // No block within the window; take the first one that arrives at all.
        if best.is_none() {
            warn!("block production window elapsed with no block, waiting for the first one");

            while let Some((host, result)) = requests.next().await {
                match result {
                    Ok(response) => {
                        let effective_value =
                            effective_block_value(&response, builder_boost_factor);
                        info!("proceeding with late block from {host}");
                        best = Some((effective_value, response));
                        break;
                    }
                    Err(error) => {
                        warn!("beacon node request failed for produce_block_v3: {error}");
                    }
                }
            }
        }

        let (value, response) =
            best.ok_or(MultiBeaconNodeError::NoBlockProduced { slot })?;

        if let Some(metrics) = self.metrics.as_ref() {
            metrics
                .best_block_value_gwei
                .set(wei_to_gwei_lossy(value));
        }

        info!("proceeding with best block by effective value: {value}");

        Ok(response)
    }

    pub async fn publish_block(
        &self,
        block: SignedBeaconBlock,
        kzg_proofs: Value,
        blobs: Value,
    ) -> Result<(), MultiBeaconNodeError> {
        let block = Arc::new(block);
        let kzg_proofs = Arc::new(kzg_proofs);
        let blobs = Arc::new(blobs);

        self.all_successes_on(self.proposal_nodes(), "publish_block", move |beacon_node| {
            let block = block.clone();
            let kzg_proofs = kzg_proofs.clone();
            let blobs = blobs.clone();
            async move { beacon_node.publish_block(&block, &kzg_proofs, &blobs).await }
        })
        .await
        .map(drop)
    }

    pub async fn publish_blinded_block(
        &self,
        block: SignedBlindedBeaconBlock,
    ) -> Result<(), MultiBeaconNodeError> {
        let block = Arc::new(block);

        self.all_successes_on(
            self.proposal_nodes(),
            "publish_blinded_block",
            move |beacon_node| {
                let block = block.clone();
                async move { beacon_node.publish_blinded_block(&block).await }
            },
        )
        .await
        .map(drop)
    }
}

fn effective_block_value(response: &ProduceBlockV3Response, builder_boost_factor: u64) -> Wei {
    let value = response.value();

    if response.execution_payload_blinded {
        value * Wei::from(builder_boost_factor) / Wei::from(100)
    } else {
        value
    }
}

fn wei_to_gwei_lossy(value: Wei) -> f64 {
    (value / Wei::from(1_000_000_000_u64)).low_u128() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_response(value_wei: u64, blinded: bool) -> ProduceBlockV3Response {
        serde_json::from_value(serde_json::json!({
            "version": "electra",
            "execution_payload_blinded": blinded,
            "execution_payload_value": value_wei.to_string(),
            "consensus_block_value": "0",
            "data": {},
        }))
        .expect("response deserializes")
    }

    #[test]
    fn builder_blocks_are_boosted_before_comparison() {
        let local = block_response(22_000_000_000, false);
        let builder = block_response(25_000_000_000, true);

        let local_value = effective_block_value(&local, 90);
        let builder_value = effective_block_value(&builder, 90);

        assert_eq!(local_value, Wei::from(22_000_000_000_u64));
        assert_eq!(builder_value, Wei::from(22_500_000_000_u64));
        assert!(builder_value > local_value);
    }

    #[test]
    fn local_blocks_are_not_boosted() {
        let local = block_response(20_000_000_000, false);

        assert_eq!(
            effective_block_value(&local, 90),
            Wei::from(20_000_000_000_u64),
        );
    }
}
