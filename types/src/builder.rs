use serde::{Deserialize, Serialize};
use tree_hash_derive::TreeHash;

use crate::{
    bls::{PublicKeyBytes, SignatureBytes},
    phase0::primitives::{ExecutionAddress, UnixSeconds},
};

/// Registration published to external builders via
/// `/eth/v1/validator/register_validator`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize, Serialize, TreeHash)]
pub struct ValidatorRegistrationV1 {
    pub fee_recipient: ExecutionAddress,
    #[serde(with = "serde_utils::string_or_native")]
    pub gas_limit: u64,
    #[serde(with = "serde_utils::string_or_native")]
    pub timestamp: UnixSeconds,
    pub pubkey: PublicKeyBytes,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct SignedValidatorRegistrationV1 {
    pub message: ValidatorRegistrationV1,
    pub signature: SignatureBytes,
}
