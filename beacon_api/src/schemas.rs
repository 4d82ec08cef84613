//! Response and request shapes of the Beacon API endpoints Vero uses.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use types::{
    combined::{BeaconBlock, BlindedBeaconBlock},
    nonstandard::{Phase, ValidatorStatus},
    phase0::primitives::{
        CommitteeIndex, Epoch, ExecutionAddress, Slot, SubcommitteeIndex, UnixSeconds,
        ValidatorIndex, Version, Wei, H256,
    },
    PublicKeyBytes,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
pub struct Genesis {
    #[serde(with = "serde_utils::string_or_native")]
    pub genesis_time: UnixSeconds,
    pub genesis_validators_root: H256,
    pub genesis_fork_version: Version,
}

/// The plain `{"data": …}` envelope most endpoints respond with.
#[derive(Debug, Deserialize)]
pub struct DataResponse<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub struct DutiesResponse<T> {
    pub dependent_root: H256,
    #[serde(default)]
    pub execution_optimistic: bool,
    pub data: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct SyncDutiesResponse {
    #[serde(default)]
    pub execution_optimistic: bool,
    pub data: Vec<SyncDuty>,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Deserialize)]
pub struct AttesterDuty {
    pub pubkey: PublicKeyBytes,
    #[serde(with = "serde_utils::string_or_native")]
    pub validator_index: ValidatorIndex,
    #[serde(with = "serde_utils::string_or_native")]
    pub committee_index: CommitteeIndex,
    #[serde(with = "serde_utils::string_or_native")]
    pub committee_length: u64,
    #[serde(with = "serde_utils::string_or_native")]
    pub committees_at_slot: u64,
    #[serde(with = "serde_utils::string_or_native")]
    pub validator_committee_index: u64,
    #[serde(with = "serde_utils::string_or_native")]
    pub slot: Slot,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Deserialize)]
pub struct ProposerDuty {
    pub pubkey: PublicKeyBytes,
    #[serde(with = "serde_utils::string_or_native")]
    pub validator_index: ValidatorIndex,
    #[serde(with = "serde_utils::string_or_native")]
    pub slot: Slot,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize)]
pub struct SyncDuty {
    pub pubkey: PublicKeyBytes,
    #[serde(with = "serde_utils::string_or_native")]
    pub validator_index: ValidatorIndex,
    #[serde(with = "string_sequence")]
    pub validator_sync_committee_indices: Vec<u64>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
pub struct ValidatorInfo {
    #[serde(with = "serde_utils::string_or_native")]
    pub index: ValidatorIndex,
    pub status: ValidatorStatus,
    pub validator: ValidatorData,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
pub struct ValidatorData {
    pub pubkey: PublicKeyBytes,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
pub struct ValidatorLiveness {
    #[serde(with = "serde_utils::string_or_native")]
    pub index: ValidatorIndex,
    pub is_live: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
pub struct BlockRootData {
    pub root: H256,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct BeaconCommitteeSubscription {
    #[serde(with = "serde_utils::string_or_native")]
    pub validator_index: ValidatorIndex,
    #[serde(with = "serde_utils::string_or_native")]
    pub committee_index: CommitteeIndex,
    #[serde(with = "serde_utils::string_or_native")]
    pub committees_at_slot: u64,
    #[serde(with = "serde_utils::string_or_native")]
    pub slot: Slot,
    pub is_aggregator: bool,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct SyncCommitteeSubscription {
    #[serde(with = "serde_utils::string_or_native")]
    pub validator_index: ValidatorIndex,
    #[serde(with = "string_sequence")]
    pub sync_committee_indices: Vec<SubcommitteeIndex>,
    #[serde(with = "serde_utils::string_or_native")]
    pub until_epoch: Epoch,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct ProposerPreparation {
    #[serde(with = "serde_utils::string_or_native")]
    pub validator_index: ValidatorIndex,
    pub fee_recipient: ExecutionAddress,
}

/// Response of `/eth/v3/validator/blocks/{slot}`. The payload under `data` is
/// kept raw until the caller knows whether it wants the full or the blinded
/// representation; blobs and KZG proofs are passed through to publication
/// without interpretation.
#[derive(Clone, Debug, Deserialize)]
pub struct ProduceBlockV3Response {
    pub version: Phase,
    #[serde(default)]
    pub execution_payload_blinded: bool,
    #[serde(default, with = "serde_utils::decimal_quantity")]
    pub execution_payload_value: Wei,
    #[serde(default, with = "serde_utils::decimal_quantity")]
    pub consensus_block_value: Wei,
    pub data: Value,
}

impl ProduceBlockV3Response {
    /// Total claimed value of the block in Wei.
    #[must_use]
    pub fn value(&self) -> Wei {
        self.execution_payload_value
            .saturating_add(self.consensus_block_value)
    }

    pub fn block_contents(&self) -> Result<BlockContents> {
        if self.execution_payload_blinded {
            let block = match self.version {
                Phase::Deneb => BlindedBeaconBlock::Deneb(serde_json::from_value(
                    self.data.clone(),
                )?),
                Phase::Electra => BlindedBeaconBlock::Electra(serde_json::from_value(
                    self.data.clone(),
                )?),
                phase => bail!("unsupported block version {phase} in block production response"),
            };

            return Ok(BlockContents::Blinded(block));
        }

        let block_value = self
            .data
            .get("block")
            .cloned()
            .unwrap_or_else(|| self.data.clone());

        let block = match self.version {
            Phase::Deneb => BeaconBlock::Deneb(serde_json::from_value(block_value)?),
            Phase::Electra => BeaconBlock::Electra(serde_json::from_value(block_value)?),
            phase => bail!("unsupported block version {phase} in block production response"),
        };

        let kzg_proofs = self.data.get("kzg_proofs").cloned().unwrap_or(Value::Null);
        let blobs = self.data.get("blobs").cloned().unwrap_or(Value::Null);

        Ok(BlockContents::Full {
            block,
            kzg_proofs,
            blobs,
        })
    }
}

#[derive(Clone, Debug)]
pub enum BlockContents {
    Full {
        block: BeaconBlock,
        kzg_proofs: Value,
        blobs: Value,
    },
    Blinded(BlindedBeaconBlock),
}

/// Stringified integer sequences, as used by duty responses and
/// subscription requests.
pub mod string_sequence {
    use core::{fmt::Display, str::FromStr};

    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<T: Display, S: Serializer>(
        values: &[T],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(ToString::to_string))
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
        D: Deserializer<'de>,
    {
        Vec::<String>::deserialize(deserializer)?
            .into_iter()
            .map(|string| string.parse().map_err(D::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_attester_duty() {
        let json = serde_json::json!({
            "pubkey": format!("0x{}", "93".repeat(48)),
            "validator_index": "7",
            "committee_index": "3",
            "committee_length": "130",
            "committees_at_slot": "64",
            "validator_committee_index": "11",
            "slot": "100",
        });

        let duty = serde_json::from_value::<AttesterDuty>(json).expect("duty deserializes");

        assert_eq!(duty.validator_index, 7);
        assert_eq!(duty.committee_length, 130);
        assert_eq!(duty.slot, 100);
    }

    #[test]
    fn block_response_value_is_the_sum_of_both_components() {
        let response = serde_json::from_value::<ProduceBlockV3Response>(serde_json::json!({
            "version": "electra",
            "execution_payload_blinded": true,
            "execution_payload_value": "20000000000",
            "consensus_block_value": "5000000000",
            "data": {},
        }))
        .expect("response deserializes");

        assert_eq!(response.value(), Wei::from(25_000_000_000_u64));
        assert!(response.execution_payload_blinded);
    }

    #[test]
    fn sync_duty_indices_are_stringified() {
        let json = serde_json::json!({
            "pubkey": format!("0x{}", "93".repeat(48)),
            "validator_index": "5",
            "validator_sync_committee_indices": ["1", "120", "300"],
        });

        let duty = serde_json::from_value::<SyncDuty>(json).expect("duty deserializes");

        assert_eq!(duty.validator_sync_committee_indices, vec![1, 120, 300]);
    }
}
