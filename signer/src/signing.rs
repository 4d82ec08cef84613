//! Signing domain and signing root computation.
//!
//! The remote signer derives signing roots on its own from `fork_info` and the
//! message type; the roots computed here are sent along so the signer can
//! reject requests it disagrees with.

use tree_hash::TreeHash as _;
use types::phase0::primitives::{Version, H256};

/// `DomainType` constants from the consensus specs.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DomainType(pub [u8; 4]);

impl DomainType {
    pub const BEACON_PROPOSER: Self = Self([0, 0, 0, 0]);
    pub const BEACON_ATTESTER: Self = Self([1, 0, 0, 0]);
    pub const RANDAO: Self = Self([2, 0, 0, 0]);
    pub const VOLUNTARY_EXIT: Self = Self([4, 0, 0, 0]);
    pub const SELECTION_PROOF: Self = Self([5, 0, 0, 0]);
    pub const AGGREGATE_AND_PROOF: Self = Self([6, 0, 0, 0]);
    pub const SYNC_COMMITTEE: Self = Self([7, 0, 0, 0]);
    pub const SYNC_COMMITTEE_SELECTION_PROOF: Self = Self([8, 0, 0, 0]);
    pub const CONTRIBUTION_AND_PROOF: Self = Self([9, 0, 0, 0]);
    pub const APPLICATION_BUILDER: Self = Self([0, 0, 0, 1]);
}

/// `compute_domain` from the consensus specs: the domain type followed by the
/// first 28 bytes of the fork data root.
#[must_use]
pub fn compute_domain(
    domain_type: DomainType,
    fork_version: Version,
    genesis_validators_root: H256,
) -> H256 {
    let fork_data_root = compute_fork_data_root(fork_version, genesis_validators_root);

    let mut domain = H256::zero();
    domain[..4].copy_from_slice(&domain_type.0);
    domain[4..].copy_from_slice(&fork_data_root[..28]);
    domain
}

/// `compute_signing_root`: the root of `SigningData { object_root, domain }`.
#[must_use]
pub fn compute_signing_root(object_root: H256, domain: H256) -> H256 {
    hash_pair(object_root, domain)
}

#[must_use]
pub fn uint64_root(value: u64) -> H256 {
    let mut root = H256::zero();
    root[..8].copy_from_slice(&value.to_le_bytes());
    root
}

fn compute_fork_data_root(fork_version: Version, genesis_validators_root: H256) -> H256 {
    let mut version_chunk = H256::zero();
    version_chunk[..4].copy_from_slice(fork_version.as_bytes());
    hash_pair(version_chunk, genesis_validators_root)
}

fn hash_pair(left: H256, right: H256) -> H256 {
    tree_hash::merkle_root(&[left.as_bytes(), right.as_bytes()].concat(), 0)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use types::phase0::containers::AttestationData;

    use super::*;

    #[test]
    fn domain_embeds_type_and_fork_data_root() {
        let domain = compute_domain(
            DomainType::BEACON_ATTESTER,
            Version::from_low_u64_be(0x0100_0000),
            H256::zero(),
        );

        assert_eq!(&domain[..4], &[1, 0, 0, 0]);
        assert_ne!(&domain[4..], &[0; 28]);
    }

    #[test]
    fn signing_root_differs_by_domain() {
        let object_root = AttestationData::default().tree_hash_root();

        let attester = compute_domain(
            DomainType::BEACON_ATTESTER,
            Version::zero(),
            H256::zero(),
        );
        let randao = compute_domain(DomainType::RANDAO, Version::zero(), H256::zero());

        assert_ne!(
            compute_signing_root(object_root, attester),
            compute_signing_root(object_root, randao),
        );
    }

    #[test]
    fn uint64_root_is_little_endian_padded() {
        assert_eq!(
            uint64_root(5),
            H256(hex!(
                "0500000000000000000000000000000000000000000000000000000000000000"
            )),
        );
    }
}
