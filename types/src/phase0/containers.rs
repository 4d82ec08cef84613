use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::{BitList, FixedVector, VariableList};
use tree_hash_derive::TreeHash;
use typenum::U33;

use crate::{
    bls::{PublicKeyBytes, SignatureBytes},
    phase0::primitives::{CommitteeIndex, Epoch, Slot, ValidatorIndex, Version, H256},
    preset::{MaxValidatorsPerCommittee, MaxVoluntaryExits},
};

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct Fork {
    pub previous_version: Version,
    pub current_version: Version,
    #[serde(with = "serde_utils::string_or_native")]
    pub epoch: Epoch,
}

#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Deserialize, Serialize, Encode, Decode,
    TreeHash,
)]
pub struct Checkpoint {
    #[serde(with = "serde_utils::string_or_native")]
    pub epoch: Epoch,
    pub root: H256,
}

#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Deserialize, Serialize, Encode, Decode,
    TreeHash,
)]
pub struct AttestationData {
    #[serde(with = "serde_utils::string_or_native")]
    pub slot: Slot,
    #[serde(with = "serde_utils::string_or_native")]
    pub index: CommitteeIndex,
    pub beacon_block_root: H256,
    pub source: Checkpoint,
    pub target: Checkpoint,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize, Encode, Decode, TreeHash)]
pub struct Attestation {
    pub aggregation_bits: BitList<MaxValidatorsPerCommittee>,
    pub data: AttestationData,
    pub signature: SignatureBytes,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize, TreeHash)]
pub struct AggregateAndProof {
    #[serde(with = "serde_utils::string_or_native")]
    pub aggregator_index: ValidatorIndex,
    pub aggregate: Attestation,
    pub selection_proof: SignatureBytes,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct SignedAggregateAndProof {
    pub message: AggregateAndProof,
    pub signature: SignatureBytes,
}

#[derive(
    Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize, Encode, Decode, TreeHash,
)]
pub struct BeaconBlockHeader {
    #[serde(with = "serde_utils::string_or_native")]
    pub slot: Slot,
    #[serde(with = "serde_utils::string_or_native")]
    pub proposer_index: ValidatorIndex,
    pub parent_root: H256,
    pub state_root: H256,
    pub body_root: H256,
}

#[derive(
    Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize, Encode, Decode, TreeHash,
)]
pub struct SignedBeaconBlockHeader {
    pub message: BeaconBlockHeader,
    pub signature: SignatureBytes,
}

#[derive(
    Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize, Encode, Decode, TreeHash,
)]
pub struct Eth1Data {
    pub deposit_root: H256,
    #[serde(with = "serde_utils::string_or_native")]
    pub deposit_count: u64,
    pub block_hash: H256,
}

#[derive(
    Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize, Encode, Decode, TreeHash,
)]
pub struct ProposerSlashing {
    pub signed_header_1: SignedBeaconBlockHeader,
    pub signed_header_2: SignedBeaconBlockHeader,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize, Encode, Decode, TreeHash)]
pub struct IndexedAttestation {
    #[serde(with = "ssz_types::serde_utils::quoted_u64_var_list")]
    pub attesting_indices: VariableList<u64, MaxValidatorsPerCommittee>,
    pub data: AttestationData,
    pub signature: SignatureBytes,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize, Encode, Decode, TreeHash)]
pub struct AttesterSlashing {
    pub attestation_1: IndexedAttestation,
    pub attestation_2: IndexedAttestation,
}

#[derive(
    Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize, Encode, Decode, TreeHash,
)]
pub struct DepositData {
    pub pubkey: PublicKeyBytes,
    pub withdrawal_credentials: H256,
    #[serde(with = "serde_utils::string_or_native")]
    pub amount: u64,
    pub signature: SignatureBytes,
}

#[derive(Clone, PartialEq, Debug, Deserialize, Serialize, Encode, Decode, TreeHash)]
pub struct Deposit {
    pub proof: FixedVector<H256, U33>,
    pub data: DepositData,
}

#[derive(
    Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize, Encode, Decode, TreeHash,
)]
pub struct VoluntaryExit {
    #[serde(with = "serde_utils::string_or_native")]
    pub epoch: Epoch,
    #[serde(with = "serde_utils::string_or_native")]
    pub validator_index: ValidatorIndex,
}

#[derive(
    Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize, Encode, Decode, TreeHash,
)]
pub struct SignedVoluntaryExit {
    pub message: VoluntaryExit,
    pub signature: SignatureBytes,
}

pub type VoluntaryExits = VariableList<SignedVoluntaryExit, MaxVoluntaryExits>;

#[cfg(test)]
mod tests {
    use tree_hash::TreeHash as _;

    use super::*;

    #[test]
    fn attestation_data_json_round_trip() {
        let json = serde_json::json!({
            "slot": "100",
            "index": "3",
            "beacon_block_root":
                "0xabababababababababababababababababababababababababababababababab",
            "source": {
                "epoch": "63",
                "root": "0x0101010101010101010101010101010101010101010101010101010101010101",
            },
            "target": {
                "epoch": "64",
                "root": "0x0202020202020202020202020202020202020202020202020202020202020202",
            },
        });

        let data = serde_json::from_value::<AttestationData>(json.clone())
            .expect("attestation data deserializes");

        assert_eq!(data.slot, 100);
        assert_eq!(data.index, 3);
        assert_eq!(data.source.epoch, 63);
        assert_eq!(
            serde_json::to_value(data).expect("attestation data serializes"),
            json,
        );
    }

    #[test]
    fn attestation_data_tree_hash_is_stable() {
        let data = AttestationData::default();

        // Five zero chunks merkleized over a depth-3 tree.
        let zero = H256::zero();
        let h01 = tree_hash::merkle_root(&[zero.as_bytes(), zero.as_bytes()].concat(), 0);
        let h0123 = tree_hash::merkle_root(&[h01.as_bytes(), h01.as_bytes()].concat(), 0);
        let root = tree_hash::merkle_root(&[h0123.as_bytes(), h0123.as_bytes()].concat(), 0);

        assert_eq!(data.tree_hash_root(), root);
    }
}
