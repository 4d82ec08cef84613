//! Enums over the phases a container can take at runtime.
//!
//! The variant is always known from the `version` field of the Beacon API
//! response that produced the value, so these are serialized untagged and
//! deserialized explicitly by phase in `beacon_api`.

use serde::Serialize;
use tree_hash::TreeHash as _;

use crate::{
    bls::SignatureBytes,
    deneb,
    electra,
    nonstandard::Phase,
    phase0::{
        self,
        containers::{AttestationData, BeaconBlockHeader},
        primitives::{Slot, ValidatorIndex, H256},
    },
};

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(untagged)]
pub enum BeaconBlock {
    Deneb(deneb::containers::BeaconBlock),
    Electra(electra::containers::BeaconBlock),
}

impl BeaconBlock {
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Deneb(_) => Phase::Deneb,
            Self::Electra(_) => Phase::Electra,
        }
    }

    #[must_use]
    pub const fn slot(&self) -> Slot {
        match self {
            Self::Deneb(block) => block.slot,
            Self::Electra(block) => block.slot,
        }
    }

    #[must_use]
    pub const fn proposer_index(&self) -> ValidatorIndex {
        match self {
            Self::Deneb(block) => block.proposer_index,
            Self::Electra(block) => block.proposer_index,
        }
    }

    /// Builds the header signed under the `BLOCK_V2` domain. The body root is
    /// computed locally; the remote signer never sees full block bodies.
    #[must_use]
    pub fn to_header(&self) -> BeaconBlockHeader {
        match self {
            Self::Deneb(block) => BeaconBlockHeader {
                slot: block.slot,
                proposer_index: block.proposer_index,
                parent_root: block.parent_root,
                state_root: block.state_root,
                body_root: block.body.tree_hash_root(),
            },
            Self::Electra(block) => BeaconBlockHeader {
                slot: block.slot,
                proposer_index: block.proposer_index,
                parent_root: block.parent_root,
                state_root: block.state_root,
                body_root: block.body.tree_hash_root(),
            },
        }
    }

    #[must_use]
    pub fn hash_tree_root(&self) -> H256 {
        match self {
            Self::Deneb(block) => block.tree_hash_root(),
            Self::Electra(block) => block.tree_hash_root(),
        }
    }

    #[must_use]
    pub fn with_signature(self, signature: SignatureBytes) -> SignedBeaconBlock {
        match self {
            Self::Deneb(message) => SignedBeaconBlock::Deneb(
                deneb::containers::SignedBeaconBlock { message, signature },
            ),
            Self::Electra(message) => SignedBeaconBlock::Electra(
                electra::containers::SignedBeaconBlock { message, signature },
            ),
        }
    }
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(untagged)]
pub enum BlindedBeaconBlock {
    Deneb(deneb::containers::BlindedBeaconBlock),
    Electra(electra::containers::BlindedBeaconBlock),
}

impl BlindedBeaconBlock {
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Deneb(_) => Phase::Deneb,
            Self::Electra(_) => Phase::Electra,
        }
    }

    #[must_use]
    pub const fn slot(&self) -> Slot {
        match self {
            Self::Deneb(block) => block.slot,
            Self::Electra(block) => block.slot,
        }
    }

    #[must_use]
    pub fn to_header(&self) -> BeaconBlockHeader {
        match self {
            Self::Deneb(block) => BeaconBlockHeader {
                slot: block.slot,
                proposer_index: block.proposer_index,
                parent_root: block.parent_root,
                state_root: block.state_root,
                body_root: block.body.tree_hash_root(),
            },
            Self::Electra(block) => BeaconBlockHeader {
                slot: block.slot,
                proposer_index: block.proposer_index,
                parent_root: block.parent_root,
                state_root: block.state_root,
                body_root: block.body.tree_hash_root(),
            },
        }
    }

    #[must_use]
    pub fn hash_tree_root(&self) -> H256 {
        match self {
            Self::Deneb(block) => block.tree_hash_root(),
            Self::Electra(block) => block.tree_hash_root(),
        }
    }

    #[must_use]
    pub fn with_signature(self, signature: SignatureBytes) -> SignedBlindedBeaconBlock {
        match self {
            Self::Deneb(message) => SignedBlindedBeaconBlock::Deneb(
                deneb::containers::SignedBlindedBeaconBlock { message, signature },
            ),
            Self::Electra(message) => SignedBlindedBeaconBlock::Electra(
                electra::containers::SignedBlindedBeaconBlock { message, signature },
            ),
        }
    }
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(untagged)]
pub enum SignedBeaconBlock {
    Deneb(deneb::containers::SignedBeaconBlock),
    Electra(electra::containers::SignedBeaconBlock),
}

impl SignedBeaconBlock {
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Deneb(_) => Phase::Deneb,
            Self::Electra(_) => Phase::Electra,
        }
    }
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(untagged)]
pub enum SignedBlindedBeaconBlock {
    Deneb(deneb::containers::SignedBlindedBeaconBlock),
    Electra(electra::containers::SignedBlindedBeaconBlock),
}

impl SignedBlindedBeaconBlock {
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Deneb(_) => Phase::Deneb,
            Self::Electra(_) => Phase::Electra,
        }
    }

    #[must_use]
    pub fn as_ssz_bytes(&self) -> Vec<u8> {
        match self {
            Self::Deneb(block) => ssz::Encode::as_ssz_bytes(block),
            Self::Electra(block) => ssz::Encode::as_ssz_bytes(block),
        }
    }
}

/// Aggregates returned by `/eth/v2/validator/aggregate_attestation`.
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
#[serde(untagged)]
pub enum Attestation {
    Phase0(phase0::containers::Attestation),
    Electra(electra::containers::Attestation),
}

impl Attestation {
    #[must_use]
    pub const fn data(&self) -> AttestationData {
        match self {
            Self::Phase0(attestation) => attestation.data,
            Self::Electra(attestation) => attestation.data,
        }
    }

    /// Number of participating validators. Aggregates with more set bits are
    /// strictly better for inclusion.
    #[must_use]
    pub fn num_set_bits(&self) -> usize {
        match self {
            Self::Phase0(attestation) => attestation.aggregation_bits.num_set_bits(),
            Self::Electra(attestation) => attestation.aggregation_bits.num_set_bits(),
        }
    }

    #[must_use]
    pub fn num_bits(&self) -> usize {
        match self {
            Self::Phase0(attestation) => attestation.aggregation_bits.len(),
            Self::Electra(attestation) => attestation.aggregation_bits.len(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
#[serde(untagged)]
pub enum AggregateAndProof {
    Phase0(phase0::containers::AggregateAndProof),
    Electra(electra::containers::AggregateAndProof),
}

impl AggregateAndProof {
    #[must_use]
    pub fn new(
        aggregator_index: ValidatorIndex,
        aggregate: Attestation,
        selection_proof: SignatureBytes,
    ) -> Self {
        match aggregate {
            Attestation::Phase0(aggregate) => {
                Self::Phase0(phase0::containers::AggregateAndProof {
                    aggregator_index,
                    aggregate,
                    selection_proof,
                })
            }
            Attestation::Electra(aggregate) => {
                Self::Electra(electra::containers::AggregateAndProof {
                    aggregator_index,
                    aggregate,
                    selection_proof,
                })
            }
        }
    }

    #[must_use]
    pub fn with_signature(self, signature: SignatureBytes) -> SignedAggregateAndProof {
        match self {
            Self::Phase0(message) => SignedAggregateAndProof::Phase0(
                phase0::containers::SignedAggregateAndProof { message, signature },
            ),
            Self::Electra(message) => SignedAggregateAndProof::Electra(
                electra::containers::SignedAggregateAndProof { message, signature },
            ),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
#[serde(untagged)]
pub enum SignedAggregateAndProof {
    Phase0(phase0::containers::SignedAggregateAndProof),
    Electra(electra::containers::SignedAggregateAndProof),
}
