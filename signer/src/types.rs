use serde::{Deserialize, Serialize};
use tree_hash::TreeHash as _;
use types::{
    altair::containers::{ContributionAndProof, SyncAggregatorSelectionData},
    builder::ValidatorRegistrationV1,
    combined::AggregateAndProof,
    phase0::{
        containers::{AttestationData, BeaconBlockHeader, Fork, VoluntaryExit},
        primitives::{Epoch, Slot, H256},
    },
};

use crate::signing::{self, DomainType};

#[derive(Clone, Copy, Debug, Serialize)]
pub struct ForkInfo {
    pub fork: Fork,
    pub genesis_validators_root: H256,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningMessage {
    AggregationSlot {
        aggregation_slot: AggregationSlot,
    },
    AggregateAndProof(Box<AggregateAndProof>),
    Attestation(AttestationData),
    BeaconBlock(SigningBlock),
    RandaoReveal {
        randao_reveal: RandaoReveal,
    },
    SyncCommitteeMessage {
        sync_committee_message: SyncCommitteeMessageFields,
    },
    SyncAggregatorSelectionData(SyncAggregatorSelectionData),
    ContributionAndProof(Box<ContributionAndProof>),
    ValidatorRegistration(ValidatorRegistrationV1),
    VoluntaryExit(VoluntaryExit),
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct AggregationSlot {
    #[serde(with = "serde_utils::string_or_native")]
    pub slot: Slot,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct RandaoReveal {
    #[serde(with = "serde_utils::string_or_native")]
    pub epoch: Epoch,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct SyncCommitteeMessageFields {
    pub beacon_block_root: H256,
    #[serde(with = "serde_utils::string_or_native")]
    pub slot: Slot,
}

/// The signer expects block signing requests to carry only the header along
/// with the phase the block belongs to.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "UPPERCASE", tag = "version")]
pub enum SigningBlock {
    Deneb { block_header: BeaconBlockHeader },
    Electra { block_header: BeaconBlockHeader },
}

impl SigningBlock {
    const fn block_header(self) -> BeaconBlockHeader {
        match self {
            Self::Deneb { block_header } | Self::Electra { block_header } => block_header,
        }
    }
}

impl SigningMessage {
    /// The root signed under this message's domain, or `None` for messages
    /// whose domain is not derivable from `fork_info` alone (the signer owns
    /// the fork-pinning rules for exits and builder registrations).
    #[must_use]
    pub fn object_root(&self) -> Option<H256> {
        match self {
            Self::AggregationSlot { aggregation_slot } => {
                Some(signing::uint64_root(aggregation_slot.slot))
            }
            Self::AggregateAndProof(aggregate_and_proof) => match aggregate_and_proof.as_ref() {
                AggregateAndProof::Phase0(message) => Some(message.tree_hash_root()),
                AggregateAndProof::Electra(message) => Some(message.tree_hash_root()),
            },
            Self::Attestation(data) => Some(data.tree_hash_root()),
            Self::BeaconBlock(block) => Some(block.block_header().tree_hash_root()),
            Self::RandaoReveal { randao_reveal } => {
                Some(signing::uint64_root(randao_reveal.epoch))
            }
            Self::SyncCommitteeMessage {
                sync_committee_message,
            } => Some(sync_committee_message.beacon_block_root),
            Self::SyncAggregatorSelectionData(data) => Some(data.tree_hash_root()),
            Self::ContributionAndProof(message) => Some(message.tree_hash_root()),
            Self::ValidatorRegistration(_) | Self::VoluntaryExit(_) => None,
        }
    }

    #[must_use]
    pub const fn domain_type(&self) -> Option<DomainType> {
        match self {
            Self::AggregationSlot { .. } => Some(DomainType::SELECTION_PROOF),
            Self::AggregateAndProof(_) => Some(DomainType::AGGREGATE_AND_PROOF),
            Self::Attestation(_) => Some(DomainType::BEACON_ATTESTER),
            Self::BeaconBlock(_) => Some(DomainType::BEACON_PROPOSER),
            Self::RandaoReveal { .. } => Some(DomainType::RANDAO),
            Self::SyncCommitteeMessage { .. } => Some(DomainType::SYNC_COMMITTEE),
            Self::SyncAggregatorSelectionData(_) => {
                Some(DomainType::SYNC_COMMITTEE_SELECTION_PROOF)
            }
            Self::ContributionAndProof(_) => Some(DomainType::CONTRIBUTION_AND_PROOF),
            Self::ValidatorRegistration(_) | Self::VoluntaryExit(_) => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SigningRequest {
    // `type` is a keyword in Rust.
    #[serde(rename = "type")]
    message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    fork_info: Option<ForkInfo>,
    #[serde(rename = "signingRoot", skip_serializing_if = "Option::is_none")]
    signing_root: Option<H256>,
    #[serde(flatten)]
    message: SigningMessage,
}

impl SigningRequest {
    #[must_use]
    pub fn new(message: SigningMessage, fork_info: Option<ForkInfo>) -> Self {
        let message_type = match message {
            SigningMessage::AggregationSlot { .. } => MessageType::AggregationSlot,
            SigningMessage::AggregateAndProof(_) => MessageType::AggregateAndProof,
            SigningMessage::Attestation(_) => MessageType::Attestation,
            SigningMessage::BeaconBlock { .. } => MessageType::BlockV2,
            SigningMessage::RandaoReveal { .. } => MessageType::RandaoReveal,
            SigningMessage::SyncCommitteeMessage { .. } => MessageType::SyncCommitteeMessage,
            SigningMessage::SyncAggregatorSelectionData(_) => {
                MessageType::SyncCommitteeSelectionProof
            }
            SigningMessage::ContributionAndProof(_) => {
                MessageType::SyncCommitteeContributionAndProof
            }
            SigningMessage::ValidatorRegistration(_) => MessageType::ValidatorRegistration,
            SigningMessage::VoluntaryExit(_) => MessageType::VoluntaryExit,
        };

        let signing_root = match (message.object_root(), message.domain_type(), fork_info) {
            (Some(object_root), Some(domain_type), Some(fork_info)) => {
                let domain = signing::compute_domain(
                    domain_type,
                    fork_info.fork.current_version,
                    fork_info.genesis_validators_root,
                );
                Some(signing::compute_signing_root(object_root, domain))
            }
            _ => None,
        };

        Self {
            message_type,
            fork_info,
            signing_root,
            message,
        }
    }

    #[must_use]
    pub const fn message_type_name(&self) -> &'static str {
        self.message_type.as_str()
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum MessageType {
    AggregationSlot,
    AggregateAndProof,
    Attestation,
    BlockV2,
    RandaoReveal,
    SyncCommitteeMessage,
    SyncCommitteeSelectionProof,
    SyncCommitteeContributionAndProof,
    ValidatorRegistration,
    VoluntaryExit,
}

impl MessageType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::AggregationSlot => "AGGREGATION_SLOT",
            Self::AggregateAndProof => "AGGREGATE_AND_PROOF",
            Self::Attestation => "ATTESTATION",
            Self::BlockV2 => "BLOCK_V2",
            Self::RandaoReveal => "RANDAO_REVEAL",
            Self::SyncCommitteeMessage => "SYNC_COMMITTEE_MESSAGE",
            Self::SyncCommitteeSelectionProof => "SYNC_COMMITTEE_SELECTION_PROOF",
            Self::SyncCommitteeContributionAndProof => "SYNC_COMMITTEE_CONTRIBUTION_AND_PROOF",
            Self::ValidatorRegistration => "VALIDATOR_REGISTRATION",
            Self::VoluntaryExit => "VOLUNTARY_EXIT",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SigningResponse {
    pub signature: types::SignatureBytes,
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use types::config::Config;

    use super::*;

    #[test]
    fn attestation_request_shape() {
        let config = Config::mainnet();
        let fork_info = ForkInfo {
            fork: config.fork_at_epoch(364_032),
            genesis_validators_root: H256::zero(),
        };

        let request = SigningRequest::new(
            SigningMessage::Attestation(AttestationData::default()),
            Some(fork_info),
        );

        let value = serde_json::to_value(&request).expect("request serializes");

        assert_eq!(value["type"], "ATTESTATION");
        assert_eq!(value["fork_info"]["fork"]["epoch"], "364032");
        assert!(value["attestation"].is_object());
        assert!(value["signingRoot"].is_string());
    }

    #[test]
    fn block_request_carries_version_and_header_only() {
        let request = SigningRequest::new(
            SigningMessage::BeaconBlock(SigningBlock::Electra {
                block_header: BeaconBlockHeader::default(),
            }),
            None,
        );

        let value = serde_json::to_value(&request).expect("request serializes");

        assert_eq!(value["type"], "BLOCK_V2");
        assert_eq!(value["beacon_block"]["version"], "ELECTRA");
        assert!(value["beacon_block"]["block_header"].is_object());
        assert!(value["beacon_block"].get("block").is_none());
    }

    #[test]
    fn registration_request_has_no_fork_info_or_signing_root() {
        let registration = ValidatorRegistrationV1 {
            fee_recipient: Default::default(),
            gas_limit: 45_000_000,
            timestamp: 1_700_000_000,
            pubkey: Default::default(),
        };

        let request = SigningRequest::new(
            SigningMessage::ValidatorRegistration(registration),
            None,
        );

        let value = serde_json::to_value(&request).expect("request serializes");

        assert_eq!(value["type"], "VALIDATOR_REGISTRATION");
        assert_eq!(value["validator_registration"]["gas_limit"], "45000000");
        assert!(value.get("fork_info").is_none());
        assert!(value.get("signingRoot").is_none());
    }

    #[test]
    fn message_types_serialize_screaming_snake_case() {
        assert_eq!(
            serde_json::to_value(MessageType::BlockV2).expect("serializes"),
            json!("BLOCK_V2"),
        );
        assert_eq!(
            serde_json::to_value(MessageType::SyncCommitteeContributionAndProof)
                .expect("serializes"),
            json!("SYNC_COMMITTEE_CONTRIBUTION_AND_PROOF"),
        );
    }
}
