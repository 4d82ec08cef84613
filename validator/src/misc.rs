use strum::AsRefStr;
use types::{config::Config, preset, SignatureBytes};

/// Duty labels used by the `duty_start_time_seconds` and
/// `duty_submission_time_seconds` histograms.
#[derive(Clone, Copy, PartialEq, Eq, Debug, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Duty {
    Attestation,
    AttestationAggregation,
    BlockProposal,
    SyncCommitteeMessage,
    SyncCommitteeContribution,
}

/// Aggregation selection per the consensus specs: the first eight bytes of
/// the hashed selection proof, little-endian, modulo the committee's
/// aggregator modulus.
#[must_use]
pub fn is_aggregator(committee_length: u64, selection_proof: SignatureBytes) -> bool {
    let modulo = (committee_length / preset::TARGET_AGGREGATORS_PER_COMMITTEE).max(1);

    proof_dividend(selection_proof) % modulo == 0
}

#[must_use]
pub fn is_sync_committee_aggregator(config: &Config, selection_proof: SignatureBytes) -> bool {
    let subcommittee_size =
        config.sync_committee_size.get() / config.sync_committee_subnet_count.get();
    let modulo =
        (subcommittee_size / preset::TARGET_AGGREGATORS_PER_SYNC_SUBCOMMITTEE).max(1);

    proof_dividend(selection_proof) % modulo == 0
}

/// The subcommittee a position in the sync committee belongs to.
#[must_use]
pub const fn subcommittee_index_of(config: &Config, position_in_committee: u64) -> u64 {
    let subcommittee_size =
        config.sync_committee_size.get() / config.sync_committee_subnet_count.get();

    position_in_committee / subcommittee_size
}

fn proof_dividend(selection_proof: SignatureBytes) -> u64 {
    let digest = hashing::hash_768(selection_proof.as_bytes());

    digest[..8]
        .try_into()
        .map(u64::from_le_bytes)
        .expect("slice has the same length as u64")
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    const SAMPLE_PROOF: SignatureBytes = SignatureBytes(hex!(
        "b3baa751d0a9132cfe93e4e3d5ff9075111100e3789dca219ade5a24d27e19d1\
         6b3353149da1833e9b691bb38634e8dc04469be7032132906c927d7e1a49b414\
         730612877bc6b2810c8f202daf793d1ab0d6b5cb21d52f9e52e883859887a5d9"
    ));

    #[test]
    fn committees_at_or_below_the_target_always_aggregate() {
        // With a modulus of one, every proof selects the validator.
        assert!(is_aggregator(16, SAMPLE_PROOF));
        assert!(is_aggregator(1, SAMPLE_PROOF));
        assert!(is_aggregator(0, SAMPLE_PROOF));
    }

    #[test]
    fn selection_is_deterministic() {
        let config = Config::mainnet();

        assert_eq!(
            is_aggregator(2048, SAMPLE_PROOF),
            is_aggregator(2048, SAMPLE_PROOF),
        );
        assert_eq!(
            is_sync_committee_aggregator(&config, SAMPLE_PROOF),
            is_sync_committee_aggregator(&config, SAMPLE_PROOF),
        );
    }

    #[test]
    fn subcommittee_indices_split_the_committee_evenly() {
        let config = Config::mainnet();

        assert_eq!(subcommittee_index_of(&config, 0), 0);
        assert_eq!(subcommittee_index_of(&config, 127), 0);
        assert_eq!(subcommittee_index_of(&config, 128), 1);
        assert_eq!(subcommittee_index_of(&config, 511), 3);
    }
}
