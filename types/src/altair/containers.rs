use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::BitVector;
use tree_hash_derive::TreeHash;

use crate::{
    bls::SignatureBytes,
    phase0::primitives::{Slot, SubcommitteeIndex, ValidatorIndex, H256},
    preset::{SyncCommitteeSize, SyncSubcommitteeSize},
};

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize, Encode, Decode, TreeHash)]
pub struct SyncAggregate {
    pub sync_committee_bits: BitVector<SyncCommitteeSize>,
    pub sync_committee_signature: SignatureBytes,
}

/// A single validator's vote for a head block, published to
/// `/eth/v1/beacon/pool/sync_committees`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct SyncCommitteeMessage {
    #[serde(with = "serde_utils::string_or_native")]
    pub slot: Slot,
    pub beacon_block_root: H256,
    #[serde(with = "serde_utils::string_or_native")]
    pub validator_index: ValidatorIndex,
    pub signature: SignatureBytes,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize, Serialize, TreeHash)]
pub struct SyncAggregatorSelectionData {
    #[serde(with = "serde_utils::string_or_native")]
    pub slot: Slot,
    #[serde(with = "serde_utils::string_or_native")]
    pub subcommittee_index: SubcommitteeIndex,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize, TreeHash)]
pub struct SyncCommitteeContribution {
    #[serde(with = "serde_utils::string_or_native")]
    pub slot: Slot,
    pub beacon_block_root: H256,
    #[serde(with = "serde_utils::string_or_native")]
    pub subcommittee_index: SubcommitteeIndex,
    pub aggregation_bits: BitVector<SyncSubcommitteeSize>,
    pub signature: SignatureBytes,
}

impl SyncCommitteeContribution {
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.aggregation_bits.num_set_bits()
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize, TreeHash)]
pub struct ContributionAndProof {
    #[serde(with = "serde_utils::string_or_native")]
    pub aggregator_index: ValidatorIndex,
    pub contribution: SyncCommitteeContribution,
    pub selection_proof: SignatureBytes,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct SignedContributionAndProof {
    pub message: ContributionAndProof,
    pub signature: SignatureBytes,
}
