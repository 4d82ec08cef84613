//! Sync committee messages and contributions.
//!
//! Messages go out at the attestation deadline, contributions at the
//! aggregation deadline. Selection proofs are slot-scoped, so they are
//! signed alongside the messages and carried over to the contribution step.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt as _};
use log::{debug, error, info, warn};
use signer::{SigningMessage, SyncCommitteeMessageFields};
use types::{
    altair::containers::{
        ContributionAndProof, SignedContributionAndProof, SyncAggregatorSelectionData,
        SyncCommitteeMessage,
    },
    config::Config,
    phase0::primitives::{Slot, SubcommitteeIndex, ValidatorIndex, H256},
    PublicKeyBytes, SignatureBytes,
};

use crate::{
    duties::SyncDutyWithSubcommittees,
    misc::{self, Duty},
    validator::Services,
};

/// An aggregator role for one `(validator, slot, subcommittee)`.
struct ContributionRole {
    pubkey: PublicKeyBytes,
    validator_index: ValidatorIndex,
    subcommittee_index: SubcommitteeIndex,
    selection_proof: SignatureBytes,
}

/// Publishes sync committee messages for `slot` and schedules contributions
/// for any aggregator roles among the duties.
pub(crate) async fn sync_committee_messages(
    services: Arc<Services>,
    duties: Vec<SyncDutyWithSubcommittees>,
    slot: Slot,
) {
    if duties.is_empty() {
        return;
    }

    if services.registry.slashing_detected() {
        warn!("slashing detected, not producing sync committee messages for slot {slot}");
        return;
    }

    debug!(
        "producing sync committee messages for slot {slot}, {} duties",
        duties.len(),
    );
    services.observe_duty_start(Duty::SyncCommitteeMessage, slot);

    let beacon_block_root = match services.multi_beacon_node.get_block_root("head").await {
        Ok(root) => root,
        Err(error) => {
            error!("failed to get the head block root for slot {slot}: {error}");
            services.count_error("sync_committee_message");
            return;
        }
    };

    let fork_info = services.fork_info_at_slot(slot);

    let mut signing_requests = duties
        .iter()
        .map(|with_subcommittees| {
            let duty = &with_subcommittees.duty;
            let pubkey = duty.pubkey;
            let validator_index = duty.validator_index;

            let services = &services;
            async move {
                let signature = services
                    .remote_signer
                    .sign(
                        SigningMessage::SyncCommitteeMessage {
                            sync_committee_message: SyncCommitteeMessageFields {
                                beacon_block_root,
                                slot,
                            },
                        },
                        Some(fork_info),
                        pubkey,
                    )
                    .await;
                (validator_index, signature)
            }
        })
        .collect::<FuturesUnordered<_>>();

    let mut messages = vec![];

    while let Some((validator_index, result)) = signing_requests.next().await {
        match result {
            Ok(signature) => messages.push(SyncCommitteeMessage {
                slot,
                beacon_block_root,
                validator_index,
                signature,
            }),
            Err(error) => {
                error!("failed to get signature for sync committee message: {error}");
                services.count_error("signature");
            }
        }
    }

    drop(signing_requests);

    // Aggregator roles are determined now so the contribution task has its
    // selection proofs ready at the deadline.
    let roles = contribution_roles(&services, &duties, slot).await;

    tokio::spawn(publish_contributions(
        services.clone(),
        slot,
        beacon_block_root,
        roles,
    ));

    if messages.is_empty() {
        return;
    }

    let count = messages.len();
    services.observe_duty_submission(Duty::SyncCommitteeMessage, slot);

    match services
        .multi_beacon_node
        .publish_sync_committee_messages(messages)
        .await
    {
        Ok(()) => {
            info!("published sync committee messages for slot {slot}, count: {count}");

            if let Some(metrics) = services.metrics.as_ref() {
                metrics.published_sync_committee_messages.inc_by(count as u64);
            }
        }
        Err(error) => {
            error!("failed to publish sync committee messages for slot {slot}: {error}");
            services.count_error("sync_committee_publish");
        }
    }
}

/// Signs the slot's selection proofs and keeps the roles that win
/// aggregation selection.
async fn contribution_roles(
    services: &Services,
    duties: &[SyncDutyWithSubcommittees],
    slot: Slot,
) -> Vec<ContributionRole> {
    let fork_info = services.fork_info_at_slot(slot);

    let mut signing_requests = duties
        .iter()
        .flat_map(|with_subcommittees| {
            let duty = &with_subcommittees.duty;

            with_subcommittees
                .subcommittee_indices
                .iter()
                .map(move |subcommittee_index| (duty.pubkey, duty.validator_index, *subcommittee_index))
        })
        .map(|(pubkey, validator_index, subcommittee_index)| {
            let services = &services;
            async move {
                let signature = services
                    .remote_signer
                    .sign(
                        SigningMessage::SyncAggregatorSelectionData(
                            SyncAggregatorSelectionData {
                                slot,
                                subcommittee_index,
                            },
                        ),
                        Some(fork_info),
                        pubkey,
                    )
                    .await;
                (pubkey, validator_index, subcommittee_index, signature)
            }
        })
        .collect::<FuturesUnordered<_>>();

    let mut signed_proofs = vec![];

    while let Some((pubkey, validator_index, subcommittee_index, result)) =
        signing_requests.next().await
    {
        match result {
            Ok(selection_proof) => {
                signed_proofs.push(SignedSelectionProof {
                    pubkey,
                    validator_index,
                    subcommittee_index,
                    selection_proof,
                });
            }
            Err(error) => {
                error!("failed to get signature for sync selection proof: {error}");
                services.count_error("signature");
            }
        }
    }

    select_contribution_roles(&services.config, signed_proofs)
}

/// A signed selection proof for one `(validator, slot, subcommittee)`,
/// before aggregation selection has been applied.
struct SignedSelectionProof {
    pubkey: PublicKeyBytes,
    validator_index: ValidatorIndex,
    subcommittee_index: SubcommitteeIndex,
    selection_proof: SignatureBytes,
}

/// Keeps the proofs that win aggregation selection for their subcommittee.
fn select_contribution_roles(
    config: &Config,
    signed_proofs: Vec<SignedSelectionProof>,
) -> Vec<ContributionRole> {
    signed_proofs
        .into_iter()
        .filter(|signed| misc::is_sync_committee_aggregator(config, signed.selection_proof))
        .map(|signed| ContributionRole {
            pubkey: signed.pubkey,
            validator_index: signed.validator_index,
            subcommittee_index: signed.subcommittee_index,
            selection_proof: signed.selection_proof,
        })
        .collect()
}

/// Waits for the aggregation deadline, fetches the best contribution per
/// subcommittee and publishes signed contribution-and-proofs.
async fn publish_contributions(
    services: Arc<Services>,
    slot: Slot,
    beacon_block_root: H256,
    roles: Vec<ContributionRole>,
) {
    if roles.is_empty() {
        return;
    }

    tokio::time::sleep_until(services.instant_of_slot_fraction(slot, 2, 3)).await;

    if services.registry.slashing_detected() {
        warn!("slashing detected, not contributing for slot {slot}");
        return;
    }

    services.observe_duty_start(Duty::SyncCommitteeContribution, slot);

    let fork_info = services.fork_info_at_slot(slot);
    let deadline = services.instant_of_slot_fraction(slot, 3, 3);

    let mut contribution_requests = roles
        .iter()
        .map(|role| {
            let services = services.clone();
            let subcommittee_index = role.subcommittee_index;

            async move {
                let contribution = services
                    .multi_beacon_node
                    .get_sync_committee_contribution(
                        slot,
                        subcommittee_index,
                        beacon_block_root,
                        deadline,
                    )
                    .await;
                (subcommittee_index, contribution)
            }
        })
        .collect::<FuturesUnordered<_>>();

    let mut contributions_by_subcommittee = std::collections::HashMap::new();

    while let Some((subcommittee_index, result)) = contribution_requests.next().await {
        match result {
            Ok(contribution) => {
                contributions_by_subcommittee.insert(subcommittee_index, contribution);
            }
            Err(error) => {
                error!(
                    "failed to get sync committee contribution for subcommittee \
                     {subcommittee_index}: {error}",
                );
                services.count_error("sync_contribution");
            }
        }
    }

    let mut signed_contributions = vec![];

    for role in &roles {
        let Some(contribution) = contributions_by_subcommittee.get(&role.subcommittee_index)
        else {
            continue;
        };

        let message = ContributionAndProof {
            aggregator_index: role.validator_index,
            contribution: contribution.clone(),
            selection_proof: role.selection_proof,
        };

        let result = services
            .remote_signer
            .sign(
                SigningMessage::ContributionAndProof(Box::new(message.clone())),
                Some(fork_info),
                role.pubkey,
            )
            .await;

        match result {
            Ok(signature) => {
                signed_contributions.push(SignedContributionAndProof { message, signature });
            }
            Err(error) => {
                error!("failed to get signature for contribution and proof: {error}");
                services.count_error("signature");
            }
        }
    }

    if signed_contributions.is_empty() {
        return;
    }

    let count = signed_contributions.len();
    services.observe_duty_submission(Duty::SyncCommitteeContribution, slot);

    match services
        .multi_beacon_node
        .publish_contribution_and_proofs(signed_contributions)
        .await
    {
        Ok(()) => {
            info!("published sync contributions for slot {slot}, count: {count}");

            if let Some(metrics) = services.metrics.as_ref() {
                metrics.published_sync_contributions.inc_by(count as u64);
            }
        }
        Err(error) => {
            error!("failed to publish sync contributions for slot {slot}: {error}");
            services.count_error("sync_contribution_publish");
        }
    }
}

#[cfg(test)]
mod tests {
    use core::num::NonZeroU64;

    use super::*;

    fn signed_proof(byte: u8, subcommittee_index: SubcommitteeIndex) -> SignedSelectionProof {
        SignedSelectionProof {
            pubkey: PublicKeyBytes::repeat_byte(byte),
            validator_index: u64::from(byte),
            subcommittee_index,
            selection_proof: SignatureBytes::repeat_byte(byte),
        }
    }

    /// A configuration whose subcommittees are no larger than the aggregator
    /// target, making the selection modulus one.
    fn config_where_everyone_aggregates() -> Config {
        Config {
            sync_committee_size: NonZeroU64::new(64)
                .expect("sync committee size is nonzero"),
            ..Config::mainnet()
        }
    }

    #[test]
    fn no_proofs_produce_no_roles() {
        let roles = select_contribution_roles(&Config::mainnet(), vec![]);

        assert!(roles.is_empty());
    }

    #[test]
    fn every_proof_selects_when_subcommittees_are_at_the_target() {
        let config = config_where_everyone_aggregates();

        let roles = select_contribution_roles(
            &config,
            vec![signed_proof(1, 0), signed_proof(1, 3), signed_proof(2, 2)],
        );

        assert_eq!(roles.len(), 3);

        // Each role carries the proof it was selected by.
        assert_eq!(roles[0].validator_index, 1);
        assert_eq!(roles[0].subcommittee_index, 0);
        assert_eq!(roles[0].selection_proof, SignatureBytes::repeat_byte(1));
        assert_eq!(roles[1].subcommittee_index, 3);
        assert_eq!(roles[2].pubkey, PublicKeyBytes::repeat_byte(2));
    }

    #[test]
    fn selection_agrees_with_the_aggregation_predicate() {
        let config = Config::mainnet();

        let proofs = (0_u8..32)
            .map(|byte| signed_proof(byte, u64::from(byte) % 4))
            .collect::<Vec<_>>();

        let expected = proofs
            .iter()
            .filter(|signed| {
                misc::is_sync_committee_aggregator(&config, signed.selection_proof)
            })
            .map(|signed| (signed.validator_index, signed.subcommittee_index))
            .collect::<Vec<_>>();

        let roles = select_contribution_roles(&config, proofs);

        let selected = roles
            .iter()
            .map(|role| (role.validator_index, role.subcommittee_index))
            .collect::<Vec<_>>();

        assert_eq!(selected, expected);

        for role in roles {
            assert!(misc::is_sync_committee_aggregator(&config, role.selection_proof));
        }
    }
}
