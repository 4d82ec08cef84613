//! Per-epoch duty caches.
//!
//! Attester and proposer duties are keyed by the dependent root the beacon
//! node computed them under; a head event carrying an unknown dependent root
//! means the duties may have changed and triggers a re-fetch. Re-fetching
//! with an unchanged dependent root is a no-op, which makes duty refresh
//! idempotent within an epoch.

use std::collections::BTreeMap;

use beacon_api::{AttesterDuty, ProposerDuty, SyncDuty};
use types::{
    phase0::primitives::{Epoch, Slot, SubcommitteeIndex, H256},
    SignatureBytes,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AttesterDutyWithProof {
    pub duty: AttesterDuty,
    pub is_aggregator: bool,
    pub selection_proof: SignatureBytes,
}

#[derive(Default)]
pub struct AttesterDuties {
    by_epoch: BTreeMap<Epoch, Vec<AttesterDutyWithProof>>,
    dependent_roots: BTreeMap<Epoch, H256>,
}

impl AttesterDuties {
    /// Whether duties computed under `dependent_root` are already cached for
    /// the epoch.
    #[must_use]
    pub fn has_dependent_root(&self, epoch: Epoch, dependent_root: H256) -> bool {
        self.dependent_roots.get(&epoch) == Some(&dependent_root)
    }

    /// A head event whose duty dependent roots are all unknown signals a
    /// duty change on the canonical chain.
    #[must_use]
    pub fn is_dependent_root_known(&self, dependent_root: H256) -> bool {
        self.dependent_roots.is_empty()
            || self
                .dependent_roots
                .values()
                .any(|root| *root == dependent_root)
    }

    pub fn store(
        &mut self,
        epoch: Epoch,
        dependent_root: H256,
        duties: Vec<AttesterDutyWithProof>,
    ) {
        self.by_epoch.insert(epoch, duties);
        self.dependent_roots.insert(epoch, dependent_root);
    }

    /// Removes and returns the duties of `slot`. Each duty is handed out at
    /// most once; a second call for the same slot returns nothing.
    pub fn take_for_slot(&mut self, slot: Slot, epoch: Epoch) -> Vec<AttesterDutyWithProof> {
        let Some(duties) = self.by_epoch.get_mut(&epoch) else {
            return vec![];
        };

        let (for_slot, remaining) = duties
            .drain(..)
            .partition(|with_proof| with_proof.duty.slot == slot);

        *duties = remaining;

        for_slot
    }

    pub fn prune(&mut self, current_epoch: Epoch) {
        self.by_epoch = self.by_epoch.split_off(&current_epoch);
        self.dependent_roots = self.dependent_roots.split_off(&current_epoch);
    }

    /// Drops cached duties and the dependent root for one epoch, forcing the
    /// next refresh to recompute selection proofs from scratch.
    pub fn invalidate_epoch(&mut self, epoch: Epoch) {
        self.by_epoch.remove(&epoch);
        self.dependent_roots.remove(&epoch);
    }
}

#[derive(Default)]
pub struct ProposerDuties {
    by_epoch: BTreeMap<Epoch, Vec<ProposerDuty>>,
    dependent_roots: BTreeMap<Epoch, H256>,
}

impl ProposerDuties {
    #[must_use]
    pub fn has_dependent_root(&self, epoch: Epoch, dependent_root: H256) -> bool {
        self.dependent_roots.get(&epoch) == Some(&dependent_root)
    }

    #[must_use]
    pub fn is_dependent_root_known(&self, dependent_root: H256) -> bool {
        self.dependent_roots.is_empty()
            || self
                .dependent_roots
                .values()
                .any(|root| *root == dependent_root)
    }

    pub fn store(&mut self, epoch: Epoch, dependent_root: H256, duties: Vec<ProposerDuty>) {
        self.by_epoch.insert(epoch, duties);
        self.dependent_roots.insert(epoch, dependent_root);
    }

    pub fn take_for_slot(&mut self, slot: Slot, epoch: Epoch) -> Vec<ProposerDuty> {
        let Some(duties) = self.by_epoch.get_mut(&epoch) else {
            return vec![];
        };

        let (for_slot, remaining) = duties.drain(..).partition(|duty| duty.slot == slot);

        *duties = remaining;

        for_slot
    }

    /// The earliest upcoming proposal slot, if any. Deferred shutdown waits
    /// for these.
    #[must_use]
    pub fn next_duty_slot(&self, after_slot: Slot) -> Option<Slot> {
        self.by_epoch
            .values()
            .flatten()
            .map(|duty| duty.slot)
            .filter(|slot| *slot >= after_slot)
            .min()
    }

    pub fn prune(&mut self, current_epoch: Epoch) {
        self.by_epoch = self.by_epoch.split_off(&current_epoch);
        self.dependent_roots = self.dependent_roots.split_off(&current_epoch);
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SyncDutyWithSubcommittees {
    pub duty: SyncDuty,
    /// Distinct subcommittees this validator sits in.
    pub subcommittee_indices: Vec<SubcommitteeIndex>,
}

#[derive(Default)]
pub struct SyncDuties {
    by_period: BTreeMap<u64, Vec<SyncDutyWithSubcommittees>>,
}

impl SyncDuties {
    #[must_use]
    pub fn has_period(&self, period: u64) -> bool {
        self.by_period.contains_key(&period)
    }

    pub fn store(&mut self, period: u64, duties: Vec<SyncDutyWithSubcommittees>) {
        self.by_period.insert(period, duties);
    }

    #[must_use]
    pub fn for_period(&self, period: u64) -> &[SyncDutyWithSubcommittees] {
        self.by_period
            .get(&period)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn prune(&mut self, current_period: u64) {
        self.by_period = self.by_period.split_off(&current_period);
    }
}

#[cfg(test)]
mod tests {
    use types::PublicKeyBytes;

    use super::*;

    fn attester_duty(slot: Slot, validator_index: u64) -> AttesterDutyWithProof {
        AttesterDutyWithProof {
            duty: AttesterDuty {
                pubkey: PublicKeyBytes::repeat_byte(validator_index as u8),
                validator_index,
                committee_index: 1,
                committee_length: 128,
                committees_at_slot: 64,
                validator_committee_index: 3,
                slot,
            },
            is_aggregator: false,
            selection_proof: SignatureBytes::zero(),
        }
    }

    #[test]
    fn duties_are_handed_out_once() {
        let mut duties = AttesterDuties::default();

        duties.store(
            3,
            H256::repeat_byte(1),
            vec![attester_duty(100, 1), attester_duty(100, 2), attester_duty(101, 3)],
        );

        let first = duties.take_for_slot(100, 3);
        let second = duties.take_for_slot(100, 3);
        let later = duties.take_for_slot(101, 3);

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert_eq!(later.len(), 1);
    }

    #[test]
    fn refresh_is_idempotent_under_the_same_dependent_root() {
        let mut duties = AttesterDuties::default();
        let root = H256::repeat_byte(1);

        assert!(!duties.has_dependent_root(3, root));

        duties.store(3, root, vec![attester_duty(100, 1)]);

        assert!(duties.has_dependent_root(3, root));
        assert!(duties.is_dependent_root_known(root));
        assert!(!duties.is_dependent_root_known(H256::repeat_byte(9)));
    }

    #[test]
    fn pruning_drops_past_epochs_only() {
        let mut duties = AttesterDuties::default();

        duties.store(3, H256::repeat_byte(1), vec![attester_duty(100, 1)]);
        duties.store(4, H256::repeat_byte(2), vec![attester_duty(130, 1)]);

        duties.prune(4);

        assert!(duties.take_for_slot(100, 3).is_empty());
        assert_eq!(duties.take_for_slot(130, 4).len(), 1);
    }

    #[test]
    fn next_proposal_slot_skips_past_duties() {
        let mut duties = ProposerDuties::default();

        duties.store(
            3,
            H256::repeat_byte(1),
            vec![
                ProposerDuty {
                    pubkey: PublicKeyBytes::repeat_byte(1),
                    validator_index: 1,
                    slot: 98,
                },
                ProposerDuty {
                    pubkey: PublicKeyBytes::repeat_byte(2),
                    validator_index: 2,
                    slot: 103,
                },
            ],
        );

        assert_eq!(duties.next_duty_slot(99), Some(103));
        assert_eq!(duties.next_duty_slot(104), None);
    }
}
