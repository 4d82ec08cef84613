use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash_derive::TreeHash;

use crate::{
    bls::{PublicKeyBytes, SignatureBytes},
    phase0::primitives::{ExecutionAddress, Gwei, ValidatorIndex},
};

#[derive(
    Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize, Encode, Decode, TreeHash,
)]
pub struct Withdrawal {
    #[serde(with = "serde_utils::string_or_native")]
    pub index: u64,
    #[serde(with = "serde_utils::string_or_native")]
    pub validator_index: ValidatorIndex,
    pub address: ExecutionAddress,
    #[serde(with = "serde_utils::string_or_native")]
    pub amount: Gwei,
}

#[derive(
    Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize, Encode, Decode, TreeHash,
)]
pub struct BlsToExecutionChange {
    #[serde(with = "serde_utils::string_or_native")]
    pub validator_index: ValidatorIndex,
    pub from_bls_pubkey: PublicKeyBytes,
    pub to_execution_address: ExecutionAddress,
}

#[derive(
    Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize, Encode, Decode, TreeHash,
)]
pub struct SignedBlsToExecutionChange {
    pub message: BlsToExecutionChange,
    pub signature: SignatureBytes,
}
