//! The duty scheduler.
//!
//! One logical loop consumes the slot tick stream and the merged beacon node
//! event stream. Duty execution is spawned onto tasks so a slow network call
//! never delays the clock; everything that mutates duty caches happens on
//! this loop, so duty refresh is always ordered before duty firing within an
//! epoch.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use beacon_api::{
    BeaconCommitteeSubscription, BeaconNodeEvent, ChainReorgEvent, HeadEvent,
    SyncCommitteeSubscription,
};
use clock::Tick;
use futures::{stream::StreamExt as _, Stream};
use itertools::Itertools as _;
use log::{debug, info, warn};
use multi_beacon_node::{EventPipeline, MultiBeaconNode, SourcedEvent};
use prometheus_metrics::{observe_timer_vec, Metrics};
use signer::{AggregationSlot, ForkInfo, RemoteSigner, SigningMessage};
use tokio::{
    sync::watch,
    task::JoinSet,
    time::Instant,
};
use types::{
    config::Config,
    nonstandard::Phase,
    phase0::primitives::{Epoch, ExecutionAddress, Graffiti, Slot, UnixSeconds, H256},
    PublicKeyBytes,
};
use validator_registry::{Validator as ManagedValidator, ValidatorRegistry};

use crate::{
    attestation, block_proposal,
    duties::{
        AttesterDuties, AttesterDutyWithProof, ProposerDuties, SyncDuties,
        SyncDutyWithSubcommittees,
    },
    misc::{self, Duty},
    sync_committee,
    validator_config::ValidatorConfig,
};

/// How far ahead of the slot start a head event counts as late, in twelfths
/// of a slot.
const LATE_HEAD_TWELFTHS: u32 = 4;

/// Shutdown waits for a proposal due within this many slots.
const SHUTDOWN_PROPOSAL_LOOKAHEAD_SLOTS: u64 = 3;

/// Everything a duty task needs, bundled for cheap cloning.
pub(crate) struct Services {
    pub multi_beacon_node: Arc<MultiBeaconNode>,
    pub remote_signer: Arc<RemoteSigner>,
    pub registry: Arc<ValidatorRegistry>,
    pub config: Arc<Config>,
    pub validator_config: Arc<ValidatorConfig>,
    pub genesis_time: UnixSeconds,
    pub genesis_validators_root: H256,
    pub metrics: Option<Arc<Metrics>>,
}

impl Services {
    pub fn fork_info_at_slot(&self, slot: Slot) -> ForkInfo {
        ForkInfo {
            fork: self.config.fork_at_epoch(self.config.epoch_of(slot)),
            genesis_validators_root: self.genesis_validators_root,
        }
    }

    pub fn phase_at_slot(&self, slot: Slot) -> Phase {
        self.config.phase_at_epoch(self.config.epoch_of(slot))
    }

    pub fn instant_of_slot_fraction(&self, slot: Slot, numerator: u32, denominator: u32) -> Instant {
        clock::instant_of_slot_fraction(
            &self.config,
            self.genesis_time,
            slot,
            numerator,
            denominator,
        )
        .into()
    }

    pub fn observe_duty_start(&self, duty: Duty, slot: Slot) {
        if let Some(metrics) = self.metrics.as_ref() {
            observe_timer_vec(
                &metrics.duty_start_time_seconds,
                duty.as_ref(),
                clock::time_since_slot_start(&self.config, self.genesis_time, slot),
            );
        }
    }

    pub fn observe_duty_submission(&self, duty: Duty, slot: Slot) {
        if let Some(metrics) = self.metrics.as_ref() {
            observe_timer_vec(
                &metrics.duty_submission_time_seconds,
                duty.as_ref(),
                clock::time_since_slot_start(&self.config, self.genesis_time, slot),
            );
        }
    }

    pub fn count_error(&self, category: &str) {
        if let Some(metrics) = self.metrics.as_ref() {
            metrics.count_error(category);
        }
    }

    pub fn fee_recipient_for(&self, validator: &ManagedValidator) -> ExecutionAddress {
        validator
            .fee_recipient
            .unwrap_or(self.validator_config.fee_recipient)
    }

    pub fn gas_limit_for(&self, validator: &ManagedValidator) -> u64 {
        validator.gas_limit.unwrap_or(self.validator_config.gas_limit)
    }

    pub fn graffiti_for(&self, pubkey: PublicKeyBytes) -> Option<Graffiti> {
        self.registry
            .load()
            .get(pubkey)
            .and_then(|validator| validator.graffiti)
            .or(self.validator_config.graffiti)
    }
}

pub struct Validator {
    services: Arc<Services>,
    event_pipeline: EventPipeline,
    shutdown_rx: watch::Receiver<bool>,
    attester_duties: AttesterDuties,
    proposer_duties: ProposerDuties,
    sync_duties: SyncDuties,
    last_attested_slot: Option<Slot>,
    last_proposed_slot: Option<Slot>,
    last_sync_message_slot: Option<Slot>,
    duty_tasks: JoinSet<()>,
}

impl Validator {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        multi_beacon_node: Arc<MultiBeaconNode>,
        remote_signer: Arc<RemoteSigner>,
        registry: Arc<ValidatorRegistry>,
        validator_config: Arc<ValidatorConfig>,
        event_pipeline: EventPipeline,
        genesis_time: UnixSeconds,
        genesis_validators_root: H256,
        metrics: Option<Arc<Metrics>>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let config = multi_beacon_node.config().clone();

        let services = Arc::new(Services {
            multi_beacon_node,
            remote_signer,
            registry,
            config,
            validator_config,
            genesis_time,
            genesis_validators_root,
            metrics,
        });

        Self {
            services,
            event_pipeline,
            shutdown_rx,
            attester_duties: AttesterDuties::default(),
            proposer_duties: ProposerDuties::default(),
            sync_duties: SyncDuties::default(),
            last_attested_slot: None,
            last_proposed_slot: None,
            last_sync_message_slot: None,
            duty_tasks: JoinSet::new(),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let config = self.services.config.clone();
        let genesis_time = self.services.genesis_time;

        let ticks = clock::ticks(&config, genesis_time)?;
        futures::pin_mut!(ticks);

        let current_epoch = Tick::current(&config, genesis_time)?.epoch(&config);
        self.update_all_duties(current_epoch).await;

        loop {
            tokio::select! {
                tick = next_tick(&mut ticks) => self.handle_tick(tick?).await,
                event = self.event_pipeline.next_event() => {
                    let event = event.ok_or_else(|| anyhow!("event pipeline terminated"))?;
                    self.handle_event(event).await;
                }
                _ = self.shutdown_rx.changed() => {
                    self.shut_down_gracefully().await;
                    return Ok(());
                }
            }

            self.reap_finished_tasks();
        }
    }

    async fn handle_tick(&mut self, tick: Tick) {
        let config = self.services.config.clone();
        let slot = tick.slot;
        let epoch = tick.epoch(&config);

        if tick.is_start_of_slot() {
            info!("slot {slot}");

            if tick.is_start_of_epoch(&config) {
                self.on_epoch_start(epoch).await;
            }

            // Statuses refresh one slot before the epoch boundary, ahead of
            // the duty update that relies on them.
            if (slot + 1) % config.slots_per_epoch.get() == 0 {
                let registry = self.services.registry.clone();
                let multi_beacon_node = self.services.multi_beacon_node.clone();

                self.duty_tasks.spawn(async move {
                    validator_registry::refresh_statuses(&registry, &multi_beacon_node)
                        .await
                        .ok();
                });
            }

            self.fire_block_proposal(slot, epoch);

            let services = self.services.clone();
            self.duty_tasks.spawn(async move {
                block_proposal::register_validators(&services, slot).await;
            });
        } else if tick.is_attestation_deadline() {
            // Reached only when no head event fired the duty earlier.
            self.fire_attestation(slot, None);
            self.fire_sync_committee_messages(slot, epoch);
        }
    }

    async fn handle_event(&mut self, event: SourcedEvent) {
        let SourcedEvent { node, event } = event;

        match event {
            BeaconNodeEvent::Head(head_event) => {
                debug!("new head @ {} : {:?} (from {node})", head_event.slot, head_event.block);
                self.handle_head_event(head_event).await;
            }
            BeaconNodeEvent::ChainReorg(reorg_event) => {
                info!(
                    "chain reorg of depth {} at slot {}, old head {:?}, new head {:?}",
                    reorg_event.depth,
                    reorg_event.slot,
                    reorg_event.old_head_block,
                    reorg_event.new_head_block,
                );
                self.handle_reorg_event(reorg_event).await;
            }
            BeaconNodeEvent::AttesterSlashing(slashing) => {
                self.services.registry.handle_attester_slashing(&slashing);
            }
            BeaconNodeEvent::ProposerSlashing(slashing) => {
                self.services.registry.handle_proposer_slashing(&slashing);
            }
            BeaconNodeEvent::BlockGossip(gossip) => {
                debug!("block gossip @ {} : {:?}", gossip.slot, gossip.block);
            }
        }
    }

    async fn handle_head_event(&mut self, head_event: HeadEvent) {
        let config = &self.services.config;

        let lateness =
            clock::time_since_slot_start(config, self.services.genesis_time, head_event.slot);
        let late_threshold = config.slot_duration() * LATE_HEAD_TWELFTHS / 12;

        if lateness > late_threshold {
            warn!(
                "late head event for slot {}: {:.3}s after slot start",
                head_event.slot,
                lateness.as_secs_f64(),
            );
        }

        let known_roots = self
            .attester_duties
            .is_dependent_root_known(head_event.previous_duty_dependent_root)
            && self
                .attester_duties
                .is_dependent_root_known(head_event.current_duty_dependent_root)
            && self
                .proposer_duties
                .is_dependent_root_known(head_event.current_duty_dependent_root);

        if !known_roots {
            info!("head event duty dependent root mismatch -> updating duties");
            let epoch = config.epoch_of(head_event.slot);
            self.update_attester_duties(epoch).await;
            self.update_proposer_duties(epoch).await;
        }

        self.fire_attestation(head_event.slot, Some(head_event));
    }

    async fn handle_reorg_event(&mut self, reorg_event: ChainReorgEvent) {
        let config = self.services.config.clone();

        self.services
            .multi_beacon_node
            .handle_chain_reorg(reorg_event.slot, reorg_event.depth);

        let epoch = config.epoch_of(reorg_event.slot);
        let epoch_start = config.start_slot_of_epoch(epoch);

        // A reorg reaching across the epoch boundary may change duties and
        // invalidates pre-computed selection proofs; re-derive both.
        if reorg_event.slot.saturating_sub(reorg_event.depth) < epoch_start {
            self.attester_duties.invalidate_epoch(epoch);
            self.attester_duties.invalidate_epoch(epoch + 1);
            self.update_attester_duties(epoch).await;
            self.update_proposer_duties(epoch).await;
        }
    }

    fn fire_attestation(&mut self, slot: Slot, head_event: Option<HeadEvent>) {
        if self.last_attested_slot.is_some_and(|last| slot <= last) {
            debug!(
                "not attesting to slot {slot} (already attested to slot {:?})",
                self.last_attested_slot,
            );
            return;
        }

        self.last_attested_slot = Some(slot);

        let epoch = self.services.config.epoch_of(slot);
        let duties = self.attester_duties.take_for_slot(slot, epoch);

        self.duty_tasks.spawn(attestation::attest_and_aggregate(
            self.services.clone(),
            duties,
            slot,
            head_event,
        ));
    }

    fn fire_block_proposal(&mut self, slot: Slot, epoch: Epoch) {
        if self.last_proposed_slot.is_some_and(|last| slot <= last) {
            return;
        }

        let duties = self.proposer_duties.take_for_slot(slot, epoch);

        if duties.is_empty() {
            return;
        }

        self.last_proposed_slot = Some(slot);

        for duty in duties {
            self.duty_tasks.spawn(block_proposal::propose_block(
                self.services.clone(),
                duty,
                slot,
            ));
        }
    }

    fn fire_sync_committee_messages(&mut self, slot: Slot, epoch: Epoch) {
        if self.last_sync_message_slot.is_some_and(|last| slot <= last) {
            return;
        }

        self.last_sync_message_slot = Some(slot);

        let period = self.services.config.sync_committee_period_of_epoch(epoch);
        let duties = self.sync_duties.for_period(period).to_vec();

        if duties.is_empty() {
            return;
        }

        self.duty_tasks.spawn(sync_committee::sync_committee_messages(
            self.services.clone(),
            duties,
            slot,
        ));
    }

    async fn on_epoch_start(&mut self, epoch: Epoch) {
        let config = self.services.config.clone();

        self.attester_duties.prune(epoch);
        self.proposer_duties.prune(epoch);
        self.sync_duties
            .prune(config.sync_committee_period_of_epoch(epoch));

        self.update_all_duties(epoch).await;

        let services = self.services.clone();
        self.duty_tasks.spawn(async move {
            block_proposal::prepare_beacon_proposer(&services).await;
        });
    }

    async fn update_all_duties(&mut self, epoch: Epoch) {
        self.update_attester_duties(epoch).await;
        self.update_proposer_duties(epoch).await;
        self.update_sync_duties(epoch).await;
    }

    async fn update_attester_duties(&mut self, current_epoch: Epoch) {
        let snapshot = self.services.registry.load();

        if !snapshot.any_active_or_pending() {
            warn!("not updating attester duties - no active or pending validators");
            return;
        }

        let indices = snapshot.duty_indices();
        drop(snapshot);

        let current_slot = current_slot_of(&self.services);

        for epoch in [current_epoch, current_epoch + 1] {
            debug!("updating attester duties for epoch {epoch}");

            let response = match self
                .services
                .multi_beacon_node
                .get_attester_duties(epoch, indices.clone())
                .await
            {
                Ok(response) => response,
                Err(error) => {
                    warn!("failed to fetch attester duties for epoch {epoch}: {error}");
                    continue;
                }
            };

            if self
                .attester_duties
                .has_dependent_root(epoch, response.dependent_root)
            {
                debug!(
                    "skipping attester duties for epoch {epoch} - dependent root unchanged",
                );
                continue;
            }

            let duties = response
                .data
                .into_iter()
                .filter(|duty| duty.slot >= current_slot)
                .collect::<Vec<_>>();

            let duties_with_proofs = self.compute_selection_proofs(epoch, duties).await;

            let subscriptions = duties_with_proofs
                .iter()
                .filter(|with_proof| with_proof.is_aggregator)
                .map(|with_proof| BeaconCommitteeSubscription {
                    validator_index: with_proof.duty.validator_index,
                    committee_index: with_proof.duty.committee_index,
                    committees_at_slot: with_proof.duty.committees_at_slot,
                    slot: with_proof.duty.slot,
                    is_aggregator: with_proof.is_aggregator,
                })
                .collect::<Vec<_>>();

            debug!(
                "updated attester duties for epoch {epoch} -> {}",
                duties_with_proofs.len(),
            );

            self.attester_duties
                .store(epoch, response.dependent_root, duties_with_proofs);

            if !subscriptions.is_empty() {
                let multi_beacon_node = self.services.multi_beacon_node.clone();
                self.duty_tasks.spawn(async move {
                    multi_beacon_node
                        .prepare_beacon_committee_subscriptions(subscriptions)
                        .await
                        .ok();
                });
            }
        }
    }

    /// Signs selection proofs for a batch of attester duties and decides
    /// aggregator roles.
    async fn compute_selection_proofs(
        &self,
        epoch: Epoch,
        duties: Vec<beacon_api::AttesterDuty>,
    ) -> Vec<AttesterDutyWithProof> {
        use futures::stream::FuturesUnordered;

        let fork_info = self
            .services
            .fork_info_at_slot(self.services.config.start_slot_of_epoch(epoch));

        let mut signing_requests = duties
            .into_iter()
            .map(|duty| {
                let remote_signer = self.services.remote_signer.clone();

                async move {
                    let signature = remote_signer
                        .sign(
                            SigningMessage::AggregationSlot {
                                aggregation_slot: AggregationSlot { slot: duty.slot },
                            },
                            Some(fork_info),
                            duty.pubkey,
                        )
                        .await;
                    (duty, signature)
                }
            })
            .collect::<FuturesUnordered<_>>();

        let mut duties_with_proofs = vec![];

        while let Some((duty, result)) = signing_requests.next().await {
            match result {
                Ok(selection_proof) => duties_with_proofs.push(AttesterDutyWithProof {
                    duty,
                    is_aggregator: misc::is_aggregator(duty.committee_length, selection_proof),
                    selection_proof,
                }),
                Err(error) => {
                    warn!("failed to get signature for aggregation selection proof: {error}");
                    self.services.count_error("signature");
                }
            }
        }

        duties_with_proofs
    }

    async fn update_proposer_duties(&mut self, current_epoch: Epoch) {
        let managed_indices = self.services.registry.load().managed_indices();

        if managed_indices.is_empty() {
            return;
        }

        let current_slot = current_slot_of(&self.services);

        for epoch in [current_epoch, current_epoch + 1] {
            debug!("updating proposer duties for epoch {epoch}");

            let response = match self
                .services
                .multi_beacon_node
                .get_proposer_duties(epoch)
                .await
            {
                Ok(response) => response,
                Err(error) => {
                    warn!("failed to fetch proposer duties for epoch {epoch}: {error}");
                    continue;
                }
            };

            if self
                .proposer_duties
                .has_dependent_root(epoch, response.dependent_root)
            {
                continue;
            }

            let duties = response
                .data
                .into_iter()
                .filter(|duty| duty.slot >= current_slot)
                .filter(|duty| managed_indices.contains(&duty.validator_index))
                .collect_vec();

            for duty in &duties {
                info!(
                    "upcoming block proposal duty at slot {} for validator {}",
                    duty.slot, duty.validator_index,
                );
            }

            self.proposer_duties
                .store(epoch, response.dependent_root, duties);
        }
    }

    async fn update_sync_duties(&mut self, current_epoch: Epoch) {
        let config = self.services.config.clone();
        let indices = self.services.registry.load().duty_indices();

        if indices.is_empty() {
            return;
        }

        let current_period = config.sync_committee_period_of_epoch(current_epoch);
        let next_period_start = config.first_epoch_of_sync_committee_period(current_period + 1);

        let requests = [
            (current_period, current_epoch),
            (current_period + 1, next_period_start),
        ];

        for (period, epoch) in requests {
            if self.sync_duties.has_period(period) {
                continue;
            }

            debug!("updating sync committee duties for period {period}");

            let duties = match self
                .services
                .multi_beacon_node
                .get_sync_duties(epoch, indices.clone())
                .await
            {
                Ok(duties) => duties,
                Err(error) => {
                    warn!("failed to fetch sync duties for epoch {epoch}: {error}");
                    continue;
                }
            };

            let with_subcommittees = duties
                .into_iter()
                .map(|duty| {
                    let subcommittee_indices = duty
                        .validator_sync_committee_indices
                        .iter()
                        .map(|position| misc::subcommittee_index_of(&config, *position))
                        .unique()
                        .sorted()
                        .collect();

                    SyncDutyWithSubcommittees {
                        duty,
                        subcommittee_indices,
                    }
                })
                .collect::<Vec<_>>();

            let until_epoch = config.first_epoch_of_sync_committee_period(period + 1);

            let subscriptions = with_subcommittees
                .iter()
                .map(|with_subcommittees| SyncCommitteeSubscription {
                    validator_index: with_subcommittees.duty.validator_index,
                    sync_committee_indices: with_subcommittees
                        .duty
                        .validator_sync_committee_indices
                        .clone(),
                    until_epoch,
                })
                .collect::<Vec<_>>();

            if !with_subcommittees.is_empty() {
                info!(
                    "{} validators in the sync committee for period {period}",
                    with_subcommittees.len(),
                );
            }

            self.sync_duties.store(period, with_subcommittees);

            if !subscriptions.is_empty() {
                let multi_beacon_node = self.services.multi_beacon_node.clone();
                self.duty_tasks.spawn(async move {
                    multi_beacon_node
                        .prepare_sync_committee_subscriptions(subscriptions)
                        .await
                        .ok();
                });
            }
        }
    }

    /// Deferred shutdown: an imminent proposal is waited out (up to three
    /// slots), then in-flight attester and sync duties get another one and a
    /// half slots to finish. After that the budget is spent and the process
    /// exits regardless.
    async fn shut_down_gracefully(&mut self) {
        let config = self.services.config.clone();

        let current_slot = Tick::current(&config, self.services.genesis_time)
            .map(|tick| tick.slot)
            .unwrap_or_default();

        if let Some(duty_slot) = self.proposer_duties.next_duty_slot(current_slot) {
            if duty_slot <= current_slot + SHUTDOWN_PROPOSAL_LOOKAHEAD_SLOTS {
                info!(
                    "waiting for upcoming block proposal to complete during slot {duty_slot}",
                );

                // The proposal fires at the start of its slot; wait until
                // the slot after it begins.
                tokio::time::sleep_until(
                    self.services.instant_of_slot_fraction(duty_slot + 1, 0, 1),
                )
                .await;
            }
        }

        info!("waiting for pending duties to complete");

        let budget = config.slot_duration() * 3 / 2;

        if tokio::time::timeout(budget, drain_tasks(&mut self.duty_tasks))
            .await
            .is_err()
        {
            warn!("shutdown budget elapsed with duties still pending");
        }

        info!("shutting down...");
    }

    fn reap_finished_tasks(&mut self) {
        while let Some(result) = self.duty_tasks.try_join_next() {
            if let Err(error) = result {
                if error.is_panic() {
                    warn!("duty task panicked: {error}");
                }
            }
        }
    }
}

async fn drain_tasks(tasks: &mut JoinSet<()>) {
    while tasks.join_next().await.is_some() {}
}

async fn next_tick(
    ticks: &mut (impl Stream<Item = Result<Tick>> + Unpin),
) -> Result<Tick> {
    ticks
        .next()
        .await
        .unwrap_or_else(|| Err(anyhow!("tick stream terminated")))
}

fn current_slot_of(services: &Services) -> Slot {
    Tick::current(&services.config, services.genesis_time)
        .map(|tick| tick.slot)
        .unwrap_or_default()
}
