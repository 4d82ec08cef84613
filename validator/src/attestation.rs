//! Attestation and aggregation duties.

use std::{collections::HashSet, sync::Arc};

use beacon_api::HeadEvent;
use futures::stream::{FuturesUnordered, StreamExt as _};
use log::{debug, error, info, warn};
use signer::SigningMessage;
use ssz_types::BitList;
use tokio::time::Instant;
use tree_hash::TreeHash as _;
use types::{
    combined::{AggregateAndProof, Attestation, SignedAggregateAndProof},
    electra::containers::SingleAttestation,
    nonstandard::Phase,
    phase0::{
        containers::{Attestation as Phase0Attestation, AttestationData},
        primitives::{CommitteeIndex, Slot},
    },
};

use crate::{
    duties::AttesterDutyWithProof,
    misc::Duty,
    validator::Services,
};

/// Performs the attestation duty for `slot` and schedules aggregation for
/// the aggregators among `duties`. Never signs when the slashing latch is
/// set, and abandons the slot entirely when attestation data consensus is
/// not reached by the deadline.
pub(crate) async fn attest_and_aggregate(
    services: Arc<Services>,
    duties: Vec<AttesterDutyWithProof>,
    slot: Slot,
    head_event: Option<HeadEvent>,
) {
    if duties.is_empty() {
        debug!("no remaining attester duties for slot {slot}");
        return;
    }

    if services.registry.slashing_detected() {
        warn!("slashing detected, not attesting to slot {slot}");
        return;
    }

    debug!("attesting to slot {slot}, {} duties", duties.len());
    services.observe_duty_start(Duty::Attestation, slot);

    // Consensus may take until the aggregation deadline. Attesting later
    // than that is pointless; the attestation could no longer be aggregated.
    let deadline = services.instant_of_slot_fraction(slot, 2, 3);

    let consensus_started = Instant::now();

    let attestation_data = match services
        .multi_beacon_node
        .produce_attestation_data(slot, 0, deadline, head_event)
        .await
    {
        Ok(attestation_data) => attestation_data,
        Err(error) => {
            error!("failed to produce attestation data: {error}");

            if let Some(metrics) = services.metrics.as_ref() {
                metrics.attestation_consensus_failures_total.inc();
                metrics.count_error("attestation_consensus");
            }

            return;
        }
    };

    let consensus_time = consensus_started.elapsed();
    debug!(
        "reached consensus on attestation data in {:.3}s",
        consensus_time.as_secs_f64(),
    );

    if let Some(metrics) = services.metrics.as_ref() {
        metrics
            .attestation_consensus_time_seconds
            .observe(consensus_time.as_secs_f64());
    }

    debug!(
        "attestation data: source {:?}, target {:?}, head {:?} (from head event: {})",
        attestation_data.source,
        attestation_data.target,
        attestation_data.beacon_block_root,
        head_event.is_some(),
    );

    // The latch may have flipped while consensus was in progress. Signing is
    // ordered strictly after this observation.
    if services.registry.slashing_detected() {
        warn!("slashing detected during attestation consensus, not signing for slot {slot}");
        return;
    }

    let phase = services.phase_at_slot(slot);

    let aggregator_duties = duties
        .iter()
        .copied()
        .filter(|with_proof| with_proof.is_aggregator)
        .collect::<Vec<_>>();

    // Aggregation is scheduled before publication so publishing delays do
    // not eat into the aggregation deadline.
    tokio::spawn(aggregate_attestations(
        services.clone(),
        slot,
        attestation_data,
        aggregator_duties,
    ));

    if phase >= Phase::Electra {
        attest_electra(&services, &duties, slot, attestation_data).await;
    } else {
        attest_phase0(&services, &duties, slot, attestation_data).await;
    }
}

/// Pre-Electra: one attestation object per duty, with the committee index
/// embedded in the data and a one-hot aggregation bitlist.
async fn attest_phase0(
    services: &Services,
    duties: &[AttesterDutyWithProof],
    slot: Slot,
    attestation_data: AttestationData,
) {
    let fork_info = services.fork_info_at_slot(slot);

    let mut signing_requests = duties
        .iter()
        .map(|with_proof| {
            let duty = with_proof.duty;
            let data = AttestationData {
                index: duty.committee_index,
                ..attestation_data
            };

            async move {
                let signature = services
                    .remote_signer
                    .sign(SigningMessage::Attestation(data), Some(fork_info), duty.pubkey)
                    .await;
                (duty, data, signature)
            }
        })
        .collect::<FuturesUnordered<_>>();

    let mut attestations = vec![];

    while let Some((duty, data, result)) = signing_requests.next().await {
        let signature = match result {
            Ok(signature) => signature,
            Err(error) => {
                error!("failed to get signature for attestation for slot {slot}: {error}");
                services.count_error("signature");
                continue;
            }
        };

        let Ok(mut aggregation_bits) = BitList::with_capacity(duty.committee_length as usize)
        else {
            error!(
                "committee length {} exceeds the attestation bitfield bound",
                duty.committee_length,
            );
            continue;
        };

        if aggregation_bits
            .set(duty.validator_committee_index as usize, true)
            .is_err()
        {
            error!(
                "validator committee position {} exceeds committee length {}",
                duty.validator_committee_index, duty.committee_length,
            );
            continue;
        }

        attestations.push(Phase0Attestation {
            aggregation_bits,
            data,
            signature,
        });
    }

    if attestations.is_empty() {
        return;
    }

    let count = attestations.len();
    services.observe_duty_submission(Duty::Attestation, slot);

    match services
        .multi_beacon_node
        .publish_attestations(attestations)
        .await
    {
        Ok(()) => {
            info!("published attestations for slot {slot}, count: {count}");

            if let Some(metrics) = services.metrics.as_ref() {
                metrics.published_attestations.inc_by(count as u64);
            }
        }
        Err(error) => {
            error!("failed to publish attestations for slot {slot}: {error}");
            services.count_error("attestation_publish");
        }
    }
}

/// Post-Electra: the committee index lives outside the signed data; a
/// `SingleAttestation` per duty is published instead.
async fn attest_electra(
    services: &Services,
    duties: &[AttesterDutyWithProof],
    slot: Slot,
    attestation_data: AttestationData,
) {
    let fork_info = services.fork_info_at_slot(slot);
    let data = AttestationData {
        index: 0,
        ..attestation_data
    };

    let mut signing_requests = duties
        .iter()
        .map(|with_proof| {
            let duty = with_proof.duty;

            async move {
                let signature = services
                    .remote_signer
                    .sign(SigningMessage::Attestation(data), Some(fork_info), duty.pubkey)
                    .await;
                (duty, signature)
            }
        })
        .collect::<FuturesUnordered<_>>();

    let mut attestations = vec![];

    while let Some((duty, result)) = signing_requests.next().await {
        match result {
            Ok(signature) => attestations.push(SingleAttestation {
                committee_index: duty.committee_index,
                attester_index: duty.validator_index,
                data,
                signature,
            }),
            Err(error) => {
                error!("failed to get signature for attestation for slot {slot}: {error}");
                services.count_error("signature");
            }
        }
    }

    if attestations.is_empty() {
        return;
    }

    let count = attestations.len();
    services.observe_duty_submission(Duty::Attestation, slot);

    match services
        .multi_beacon_node
        .publish_single_attestations(attestations, Phase::Electra)
        .await
    {
        Ok(()) => {
            info!("published attestations for slot {slot}, count: {count}");

            if let Some(metrics) = services.metrics.as_ref() {
                metrics.published_attestations.inc_by(count as u64);
            }
        }
        Err(error) => {
            error!("failed to publish attestations for slot {slot}: {error}");
            services.count_error("attestation_publish");
        }
    }
}

/// Waits for the aggregation deadline, fetches the best aggregate per
/// committee and publishes signed aggregate-and-proofs for every aggregator
/// duty.
async fn aggregate_attestations(
    services: Arc<Services>,
    slot: Slot,
    attestation_data: AttestationData,
    aggregator_duties: Vec<AttesterDutyWithProof>,
) {
    if aggregator_duties.is_empty() {
        return;
    }

    tokio::time::sleep_until(services.instant_of_slot_fraction(slot, 2, 3)).await;

    if services.registry.slashing_detected() {
        warn!("slashing detected, not aggregating for slot {slot}");
        return;
    }

    debug!(
        "aggregating attestations for slot {slot}, {} duties",
        aggregator_duties.len(),
    );
    services.observe_duty_start(Duty::AttestationAggregation, slot);

    let phase = services.phase_at_slot(slot);
    let deadline = services.instant_of_slot_fraction(slot, 3, 3);

    let committee_indices = aggregator_duties
        .iter()
        .map(|with_proof| with_proof.duty.committee_index)
        .collect::<HashSet<_>>();

    let mut aggregate_requests = committee_indices
        .into_iter()
        .map(|committee_index| {
            let services = services.clone();

            async move {
                let data_root = aggregate_data_root(attestation_data, committee_index, phase);

                let aggregate = services
                    .multi_beacon_node
                    .get_aggregate_attestation(slot, data_root, committee_index, deadline)
                    .await;

                (committee_index, aggregate)
            }
        })
        .collect::<FuturesUnordered<_>>();

    let mut signed_aggregates: Vec<SignedAggregateAndProof> = vec![];

    while let Some((committee_index, result)) = aggregate_requests.next().await {
        let aggregate = match result {
            Ok(aggregate) => aggregate,
            Err(error) => {
                error!(
                    "failed to get aggregate attestation for committee {committee_index}: {error}",
                );
                services.count_error("aggregate_attestation");
                continue;
            }
        };

        for with_proof in aggregator_duties
            .iter()
            .filter(|with_proof| with_proof.duty.committee_index == committee_index)
        {
            let signed = sign_aggregate_and_proof(
                &services,
                with_proof,
                aggregate.clone(),
                slot,
            )
            .await;

            if let Some(signed) = signed {
                signed_aggregates.push(signed);
            }
        }
    }

    if signed_aggregates.is_empty() {
        return;
    }

    let count = signed_aggregates.len();
    services.observe_duty_submission(Duty::AttestationAggregation, slot);

    match services
        .multi_beacon_node
        .publish_aggregate_and_proofs(signed_aggregates, phase)
        .await
    {
        Ok(()) => {
            info!("published aggregate and proofs for slot {slot}, count: {count}");

            if let Some(metrics) = services.metrics.as_ref() {
                metrics.published_aggregate_attestations.inc_by(count as u64);
            }
        }
        Err(error) => {
            error!("failed to publish aggregate and proofs for slot {slot}: {error}");
            services.count_error("aggregate_attestation_publish");
        }
    }
}

async fn sign_aggregate_and_proof(
    services: &Services,
    with_proof: &AttesterDutyWithProof,
    aggregate: Attestation,
    slot: Slot,
) -> Option<SignedAggregateAndProof> {
    let fork_info = services.fork_info_at_slot(slot);

    let aggregate_and_proof = AggregateAndProof::new(
        with_proof.duty.validator_index,
        aggregate,
        with_proof.selection_proof,
    );

    let result = services
        .remote_signer
        .sign(
            SigningMessage::AggregateAndProof(Box::new(aggregate_and_proof.clone())),
            Some(fork_info),
            with_proof.duty.pubkey,
        )
        .await;

    match result {
        Ok(signature) => Some(aggregate_and_proof.with_signature(signature)),
        Err(error) => {
            error!("failed to get signature for aggregate and proof: {error}");
            services.count_error("signature");
            None
        }
    }
}

/// The root under which a committee's aggregate is indexed. The committee
/// index is part of the data before Electra and zeroed afterwards.
fn aggregate_data_root(
    attestation_data: AttestationData,
    committee_index: CommitteeIndex,
    phase: Phase,
) -> types::phase0::primitives::H256 {
    let data = AttestationData {
        index: if phase >= Phase::Electra {
            0
        } else {
            committee_index
        },
        ..attestation_data
    };

    data.tree_hash_root()
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(Phase::Deneb, 5 => 5)]
    #[test_case(Phase::Electra, 5 => 0)]
    fn aggregate_data_root_committee_index(phase: Phase, committee_index: u64) -> u64 {
        let data = AttestationData {
            index: if phase >= Phase::Electra { 0 } else { committee_index },
            ..AttestationData::default()
        };

        // The root must match what `aggregate_data_root` hashes.
        assert_eq!(
            aggregate_data_root(AttestationData::default(), committee_index, phase),
            data.tree_hash_root(),
        );

        data.index
    }
}
