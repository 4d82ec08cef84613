//! Block proposal, proposer preparation and builder registration.

use std::sync::Arc;

use beacon_api::{BlockContents, ProposerDuty, ProposerPreparation};
use futures::stream::{FuturesUnordered, StreamExt as _};
use log::{debug, error, info, warn};
use signer::{SigningBlock, SigningMessage};
use types::{
    builder::{SignedValidatorRegistrationV1, ValidatorRegistrationV1},
    nonstandard::Phase,
    phase0::primitives::Slot,
};

use crate::{misc::Duty, validator::Services};

const REGISTRATION_BATCH_SIZE: usize = 512;

/// Produces, signs and publishes the block for a proposal duty.
pub(crate) async fn propose_block(services: Arc<Services>, duty: ProposerDuty, slot: Slot) {
    if services.registry.slashing_detected() {
        warn!("slashing detected, not producing a block for slot {slot}");
        return;
    }

    info!("producing block for slot {slot}");
    services.observe_duty_start(Duty::BlockProposal, slot);

    let epoch = services.config.epoch_of(slot);
    let fork_info = services.fork_info_at_slot(slot);

    let randao_reveal = match services
        .remote_signer
        .sign(
            SigningMessage::RandaoReveal {
                randao_reveal: signer::RandaoReveal { epoch },
            },
            Some(fork_info),
            duty.pubkey,
        )
        .await
    {
        Ok(signature) => signature,
        Err(error) => {
            error!("failed to get signature for RANDAO reveal: {error}");
            services.count_error("signature");
            return;
        }
    };

    let graffiti = services.graffiti_for(duty.pubkey);

    let response = match services
        .multi_beacon_node
        .produce_best_block(
            slot,
            randao_reveal,
            graffiti,
            services.validator_config.builder_boost_factor,
        )
        .await
    {
        Ok(response) => response,
        Err(error) => {
            error!("failed to produce block: {error}");
            services.count_error("block_produce");
            return;
        }
    };

    let contents = match response.block_contents() {
        Ok(contents) => contents,
        Err(error) => {
            error!("failed to parse produced block: {error}");
            services.count_error("block_produce");
            return;
        }
    };

    // Producing the best block can take a while; re-observe the latch right
    // before requesting the proposal signature.
    if services.registry.slashing_detected() {
        warn!("slashing detected during block production, not signing for slot {slot}");
        return;
    }

    match contents {
        BlockContents::Full {
            block,
            kzg_proofs,
            blobs,
        } => {
            let header = block.to_header();
            let signing_block = match block.phase() {
                Phase::Electra => SigningBlock::Electra {
                    block_header: header,
                },
                _ => SigningBlock::Deneb {
                    block_header: header,
                },
            };

            let Some(signature) = sign_block(&services, signing_block, duty, slot).await else {
                return;
            };

            let block_root = block.hash_tree_root();
            let signed_block = block.with_signature(signature);

            info!("publishing block for slot {slot}, root {block_root:?}");
            services.observe_duty_submission(Duty::BlockProposal, slot);

            match services
                .multi_beacon_node
                .publish_block(signed_block, kzg_proofs, blobs)
                .await
            {
                Ok(()) => {
                    info!("published block for slot {slot}, root {block_root:?}");

                    if let Some(metrics) = services.metrics.as_ref() {
                        metrics.published_blocks.inc();
                    }
                }
                Err(error) => {
                    error!("failed to publish block for slot {slot}: {error}");
                    services.count_error("block_publish");
                }
            }
        }
        BlockContents::Blinded(block) => {
            let header = block.to_header();
            let signing_block = match block.phase() {
                Phase::Electra => SigningBlock::Electra {
                    block_header: header,
                },
                _ => SigningBlock::Deneb {
                    block_header: header,
                },
            };

            let Some(signature) = sign_block(&services, signing_block, duty, slot).await else {
                return;
            };

            let block_root = block.hash_tree_root();
            let signed_block = block.with_signature(signature);

            info!("publishing blinded block for slot {slot}, root {block_root:?}");
            services.observe_duty_submission(Duty::BlockProposal, slot);

            match services
                .multi_beacon_node
                .publish_blinded_block(signed_block)
                .await
            {
                Ok(()) => {
                    info!("published blinded block for slot {slot}, root {block_root:?}");

                    if let Some(metrics) = services.metrics.as_ref() {
                        metrics.published_blocks.inc();
                    }
                }
                Err(error) => {
                    error!("failed to publish blinded block for slot {slot}: {error}");
                    services.count_error("block_publish");
                }
            }
        }
    }
}

async fn sign_block(
    services: &Services,
    signing_block: SigningBlock,
    duty: ProposerDuty,
    slot: Slot,
) -> Option<types::SignatureBytes> {
    let fork_info = services.fork_info_at_slot(slot);

    match services
        .remote_signer
        .sign(
            SigningMessage::BeaconBlock(signing_block),
            Some(fork_info),
            duty.pubkey,
        )
        .await
    {
        Ok(signature) => Some(signature),
        Err(error) => {
            error!("failed to get signature for block: {error}");
            services.count_error("signature");
            None
        }
    }
}

/// Tells every beacon node which fee recipient to prepare payloads with.
pub(crate) async fn prepare_beacon_proposer(services: &Services) {
    let preparations = services
        .registry
        .load()
        .active_or_pending()
        .filter_map(|validator| {
            Some(ProposerPreparation {
                validator_index: validator.index?,
                fee_recipient: services.fee_recipient_for(validator),
            })
        })
        .collect::<Vec<_>>();

    if preparations.is_empty() {
        return;
    }

    debug!("calling prepare beacon proposer for {} validators", preparations.len());

    if let Err(error) = services
        .multi_beacon_node
        .prepare_beacon_proposer(preparations)
        .await
    {
        error!("failed to prepare beacon proposer: {error}");
        services.count_error("prepare_proposer");
    }
}

/// Registers a slice of the managed validators with external builders. The
/// slice rotates by slot so a large validator set spreads its registrations
/// over a whole epoch.
pub(crate) async fn register_validators(services: &Services, slot: Slot) {
    if !services.validator_config.use_external_builder {
        return;
    }

    let slots_per_epoch = services.config.slots_per_epoch.get();

    let snapshot = services.registry.load();
    let to_register = snapshot
        .active_or_pending()
        .filter(|validator| {
            validator
                .index
                .is_some_and(|index| index % slots_per_epoch == slot % slots_per_epoch)
        })
        .collect::<Vec<_>>();

    if to_register.is_empty() {
        return;
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    for batch in to_register.chunks(REGISTRATION_BATCH_SIZE) {
        let mut signing_requests = batch
            .iter()
            .map(|validator| {
                let registration = ValidatorRegistrationV1 {
                    fee_recipient: services.fee_recipient_for(validator),
                    gas_limit: services.gas_limit_for(validator),
                    timestamp,
                    pubkey: validator.public_key,
                };

                async move {
                    let signature = services
                        .remote_signer
                        .sign(
                            SigningMessage::ValidatorRegistration(registration),
                            None,
                            registration.pubkey,
                        )
                        .await;
                    (registration, signature)
                }
            })
            .collect::<FuturesUnordered<_>>();

        let mut registrations = vec![];

        while let Some((message, result)) = signing_requests.next().await {
            match result {
                Ok(signature) => {
                    registrations.push(SignedValidatorRegistrationV1 { message, signature });
                }
                Err(error) => {
                    error!("failed to get signature for validator registration: {error}");
                    services.count_error("signature");
                }
            }
        }

        if registrations.is_empty() {
            continue;
        }

        let count = registrations.len();

        match services
            .multi_beacon_node
            .register_validators(registrations)
            .await
        {
            Ok(()) => info!("published {count} validator registrations"),
            Err(error) => {
                error!("failed to register validators: {error}");
                services.count_error("registration");
            }
        }
    }
}

