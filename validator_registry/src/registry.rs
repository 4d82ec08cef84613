use core::sync::atomic::{AtomicBool, Ordering};
use std::{
    collections::{hash_map::Entry, HashMap, HashSet},
    sync::Arc,
};

use arc_swap::{ArcSwap, Guard};
use beacon_api::{AttesterSlashingEvent, ProposerSlashingEvent, ValidatorInfo};
use log::{error, info, warn};
use prometheus_metrics::Metrics;
use thiserror::Error;
use types::{
    nonstandard::ValidatorStatus,
    phase0::primitives::{ExecutionAddress, Graffiti, ValidatorIndex},
    PublicKeyBytes,
};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("validator {public_key:?} is not managed by this process")]
    NotFound { public_key: PublicKeyBytes },
    #[error("validator {public_key:?} is already managed by this process")]
    Duplicate { public_key: PublicKeyBytes },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Validator {
    pub public_key: PublicKeyBytes,
    pub index: Option<ValidatorIndex>,
    pub status: ValidatorStatus,
    pub fee_recipient: Option<ExecutionAddress>,
    pub graffiti: Option<Graffiti>,
    pub gas_limit: Option<u64>,
}

impl Validator {
    const fn new(public_key: PublicKeyBytes) -> Self {
        Self {
            public_key,
            index: None,
            status: ValidatorStatus::Unknown,
            fee_recipient: None,
            graffiti: None,
            gas_limit: None,
        }
    }

    #[must_use]
    pub const fn is_active_or_pending(&self) -> bool {
        self.status.is_active() || self.status.is_pending()
    }
}

#[derive(Clone, Default)]
pub struct Snapshot {
    validators: HashMap<PublicKeyBytes, Validator>,
}

impl Snapshot {
    #[must_use]
    pub fn get(&self, public_key: PublicKeyBytes) -> Option<&Validator> {
        self.validators.get(&public_key)
    }

    #[must_use]
    pub fn has_key(&self, public_key: PublicKeyBytes) -> bool {
        self.validators.contains_key(&public_key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn keys(&self) -> impl ExactSizeIterator<Item = &PublicKeyBytes> {
        self.validators.keys()
    }

    pub fn validators(&self) -> impl Iterator<Item = &Validator> {
        self.validators.values()
    }

    pub fn active_or_pending(&self) -> impl Iterator<Item = &Validator> {
        self.validators
            .values()
            .filter(|validator| validator.is_active_or_pending())
    }

    /// Indices of all managed validators the chain knows about.
    #[must_use]
    pub fn managed_indices(&self) -> HashSet<ValidatorIndex> {
        self.validators
            .values()
            .filter_map(|validator| validator.index)
            .collect()
    }

    /// Indices eligible for duties.
    #[must_use]
    pub fn duty_indices(&self) -> Vec<ValidatorIndex> {
        self.validators
            .values()
            .filter(|validator| validator.is_active_or_pending())
            .filter_map(|validator| validator.index)
            .collect()
    }

    #[must_use]
    pub fn by_index(&self, index: ValidatorIndex) -> Option<&Validator> {
        self.validators
            .values()
            .find(|validator| validator.index == Some(index))
    }

    #[must_use]
    pub fn any_active_or_pending(&self) -> bool {
        self.validators
            .values()
            .any(Validator::is_active_or_pending)
    }
}

/// The set of validators this process performs duties for.
///
/// Reads take a cheap snapshot; mutations replace the snapshot atomically.
/// The slashing latch lives here because every consumer of the registry also
/// needs the latch on its signing fast path.
pub struct ValidatorRegistry {
    snapshot: ArcSwap<Snapshot>,
    slashing_detected: AtomicBool,
    slashing_detection_enabled: bool,
    metrics: Option<Arc<Metrics>>,
}

impl ValidatorRegistry {
    #[must_use]
    pub fn new(
        public_keys: impl IntoIterator<Item = PublicKeyBytes>,
        slashing_detection_enabled: bool,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let validators = public_keys
            .into_iter()
            .map(|public_key| (public_key, Validator::new(public_key)))
            .collect();

        if !slashing_detection_enabled {
            warn!(
                "slashing detection is disabled; \
                 this process will keep signing even if its validators are slashed",
            );
        }

        Self {
            snapshot: ArcSwap::from_pointee(Snapshot { validators }),
            slashing_detected: AtomicBool::new(false),
            slashing_detection_enabled,
            metrics,
        }
    }

    #[must_use]
    pub fn load(&self) -> Guard<Arc<Snapshot>> {
        self.snapshot.load()
    }

    fn update<R, F>(&self, f: F)
    where
        F: FnMut(&Arc<Snapshot>) -> R,
        R: Into<Arc<Snapshot>>,
    {
        self.snapshot.rcu(f);
    }

    pub fn append_key(&self, public_key: PublicKeyBytes) -> Result<(), RegistryError> {
        if self.load().has_key(public_key) {
            return Err(RegistryError::Duplicate { public_key });
        }

        self.update(|snapshot| {
            let mut snapshot = snapshot.as_ref().clone();

            if let Entry::Vacant(vacant) = snapshot.validators.entry(public_key) {
                vacant.insert(Validator::new(public_key));
            }

            snapshot
        });

        Ok(())
    }

    pub fn delete_key(&self, public_key: PublicKeyBytes) -> Result<(), RegistryError> {
        if !self.load().has_key(public_key) {
            return Err(RegistryError::NotFound { public_key });
        }

        self.update(|snapshot| {
            let mut snapshot = snapshot.as_ref().clone();
            snapshot.validators.remove(&public_key);
            snapshot
        });

        Ok(())
    }

    fn mutate_validator(
        &self,
        public_key: PublicKeyBytes,
        f: impl Fn(&mut Validator),
    ) -> Result<(), RegistryError> {
        if !self.load().has_key(public_key) {
            return Err(RegistryError::NotFound { public_key });
        }

        self.update(|snapshot| {
            let mut snapshot = snapshot.as_ref().clone();

            if let Some(validator) = snapshot.validators.get_mut(&public_key) {
                f(validator);
            }

            snapshot
        });

        Ok(())
    }

    pub fn set_fee_recipient(
        &self,
        public_key: PublicKeyBytes,
        fee_recipient: Option<ExecutionAddress>,
    ) -> Result<(), RegistryError> {
        self.mutate_validator(public_key, |validator| {
            validator.fee_recipient = fee_recipient;
        })
    }

    pub fn set_graffiti(
        &self,
        public_key: PublicKeyBytes,
        graffiti: Option<Graffiti>,
    ) -> Result<(), RegistryError> {
        self.mutate_validator(public_key, |validator| validator.graffiti = graffiti)
    }

    pub fn set_gas_limit(
        &self,
        public_key: PublicKeyBytes,
        gas_limit: Option<u64>,
    ) -> Result<(), RegistryError> {
        self.mutate_validator(public_key, |validator| validator.gas_limit = gas_limit)
    }

    /// Applies a batch of chain-side updates. An index, once assigned, never
    /// re-binds to another key; contradictory responses are dropped.
    pub fn apply_chain_info(&self, infos: &[ValidatorInfo]) {
        self.update(|snapshot| {
            let mut snapshot = snapshot.as_ref().clone();

            let mut reported = HashSet::new();

            for info in infos {
                let Some(validator) = snapshot.validators.get_mut(&info.validator.pubkey) else {
                    continue;
                };

                match validator.index {
                    Some(existing) if existing != info.index => {
                        error!(
                            "beacon node reports index {} for validator {:?} already known as {existing}",
                            info.index, info.validator.pubkey,
                        );
                        continue;
                    }
                    _ => {}
                }

                validator.index = Some(info.index);
                validator.status = info.status;
                reported.insert(info.validator.pubkey);
            }

            // Keys the chain did not report have not been deposited yet or
            // were pruned from the head state.
            for (public_key, validator) in &mut snapshot.validators {
                if !reported.contains(public_key) {
                    validator.status = ValidatorStatus::Unknown;
                }
            }

            snapshot
        });

        self.detect_slashed_statuses();
        self.publish_counts();
    }

    #[must_use]
    pub fn slashing_detected(&self) -> bool {
        self.slashing_detected.load(Ordering::SeqCst)
    }

    /// Latches the slashing flag. There is no way to clear it in-process.
    pub fn set_slashing_detected(&self) {
        if self.slashing_detected.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(metrics) = self.metrics.as_ref() {
            metrics.slashing_detected.set(1);
        }

        error!("slashing detected; no further duties will be signed by this process");
    }

    pub fn handle_attester_slashing(&self, event: &AttesterSlashingEvent) {
        if !self.slashing_detection_enabled {
            return;
        }

        let slashing = &event.0;

        let indices_1 = slashing
            .attestation_1
            .attesting_indices
            .iter()
            .copied()
            .collect::<HashSet<_>>();

        let slashed_indices = slashing
            .attestation_2
            .attesting_indices
            .iter()
            .copied()
            .filter(|index| indices_1.contains(index))
            .collect::<HashSet<_>>();

        let managed = self.load().managed_indices();
        let our_slashed = slashed_indices.intersection(&managed).collect::<Vec<_>>();

        if !our_slashed.is_empty() {
            error!("attester slashing affects managed validator indices {our_slashed:?}");
            self.set_slashing_detected();
        }

        info!(
            "processed attester slashing event affecting validator indices {slashed_indices:?}",
        );
    }

    pub fn handle_proposer_slashing(&self, event: &ProposerSlashingEvent) {
        if !self.slashing_detection_enabled {
            return;
        }

        let slashed_index = event.0.signed_header_1.message.proposer_index;

        if self.load().managed_indices().contains(&slashed_index) {
            error!("proposer slashing affects managed validator index {slashed_index}");
            self.set_slashing_detected();
        }

        info!("processed proposer slashing event affecting validator index {slashed_index}");
    }

    fn detect_slashed_statuses(&self) {
        if !self.slashing_detection_enabled {
            return;
        }

        let snapshot = self.load();

        let slashed = snapshot
            .validators()
            .filter(|validator| validator.status.is_slashed())
            .map(|validator| validator.public_key)
            .collect::<Vec<_>>();

        if !slashed.is_empty() {
            error!("slashed validators detected while updating statuses: {slashed:?}");
            self.set_slashing_detected();
        }
    }

    fn publish_counts(&self) {
        let Some(metrics) = self.metrics.as_ref() else {
            return;
        };

        let snapshot = self.load();

        let mut active = 0_i64;
        let mut pending = 0_i64;
        let mut exited = 0_i64;
        let mut withdrawal = 0_i64;
        let mut unknown = 0_i64;

        for validator in snapshot.validators() {
            if validator.status.is_active() {
                active += 1;
            } else if validator.status.is_pending() {
                pending += 1;
            } else if validator.status.is_exited() {
                exited += 1;
            } else if validator.status.has_withdrawn() {
                withdrawal += 1;
            } else {
                unknown += 1;
            }
        }

        for (status, count) in [
            ("active", active),
            ("pending", pending),
            ("exited", exited),
            ("withdrawal", withdrawal),
            ("unknown", unknown),
        ] {
            metrics.validator_count.with_label_values(&[status]).set(count);
        }
    }
}

#[cfg(test)]
mod tests {
    use beacon_api::schemas::ValidatorData;

    use super::*;

    fn pubkey(byte: u8) -> PublicKeyBytes {
        PublicKeyBytes::repeat_byte(byte)
    }

    fn info(byte: u8, index: ValidatorIndex, status: ValidatorStatus) -> ValidatorInfo {
        ValidatorInfo {
            index,
            status,
            validator: ValidatorData {
                pubkey: pubkey(byte),
            },
        }
    }

    fn registry() -> ValidatorRegistry {
        ValidatorRegistry::new([pubkey(1), pubkey(2)], true, None)
    }

    #[test]
    fn chain_info_assigns_indices_and_statuses() {
        let registry = registry();

        registry.apply_chain_info(&[
            info(1, 10, ValidatorStatus::ActiveOngoing),
            info(2, 20, ValidatorStatus::PendingQueued),
        ]);

        let snapshot = registry.load();

        assert_eq!(snapshot.get(pubkey(1)).and_then(|v| v.index), Some(10));
        assert_eq!(
            snapshot.get(pubkey(2)).map(|v| v.status),
            Some(ValidatorStatus::PendingQueued),
        );
        assert_eq!(snapshot.duty_indices().len(), 2);
        assert!(!registry.slashing_detected());
    }

    #[test]
    fn an_index_never_rebinds() {
        let registry = registry();

        registry.apply_chain_info(&[info(1, 10, ValidatorStatus::ActiveOngoing)]);
        registry.apply_chain_info(&[info(1, 11, ValidatorStatus::ActiveOngoing)]);

        assert_eq!(
            registry.load().get(pubkey(1)).and_then(|v| v.index),
            Some(10),
        );
    }

    #[test]
    fn slashed_status_latches_the_flag() {
        let registry = registry();

        registry.apply_chain_info(&[info(1, 10, ValidatorStatus::ActiveSlashed)]);

        assert!(registry.slashing_detected());

        // The latch stays set even if later refreshes disagree.
        registry.apply_chain_info(&[info(1, 10, ValidatorStatus::ActiveOngoing)]);

        assert!(registry.slashing_detected());
    }

    #[test]
    fn slashing_detection_can_be_disabled() {
        let registry = ValidatorRegistry::new([pubkey(1)], false, None);

        registry.apply_chain_info(&[info(1, 10, ValidatorStatus::ActiveSlashed)]);

        assert!(!registry.slashing_detected());
    }

    #[test]
    fn attester_slashing_requires_an_intersecting_managed_index() {
        use ssz_types::VariableList;
        use types::electra::containers::{AttesterSlashing, IndexedAttestation};
        use types::phase0::containers::AttestationData;
        use types::SignatureBytes;

        fn indexed(indices: Vec<u64>) -> IndexedAttestation {
            IndexedAttestation {
                attesting_indices: VariableList::new(indices)
                    .expect("indices fit the list bound"),
                data: AttestationData::default(),
                signature: SignatureBytes::zero(),
            }
        }

        let registry = registry();
        registry.apply_chain_info(&[info(1, 10, ValidatorStatus::ActiveOngoing)]);

        let unrelated = AttesterSlashingEvent(AttesterSlashing {
            attestation_1: indexed(vec![1, 2, 3]),
            attestation_2: indexed(vec![2, 3, 4]),
        });

        registry.handle_attester_slashing(&unrelated);
        assert!(!registry.slashing_detected());

        let ours = AttesterSlashingEvent(AttesterSlashing {
            attestation_1: indexed(vec![4, 10, 30]),
            attestation_2: indexed(vec![10, 30, 50]),
        });

        registry.handle_attester_slashing(&ours);
        assert!(registry.slashing_detected());
    }

    #[test]
    fn overrides_require_a_managed_key() {
        let registry = registry();

        assert!(registry
            .set_gas_limit(pubkey(1), Some(36_000_000))
            .is_ok());
        assert!(matches!(
            registry.set_gas_limit(pubkey(9), Some(36_000_000)),
            Err(RegistryError::NotFound { .. }),
        ));

        assert_eq!(
            registry.load().get(pubkey(1)).and_then(|v| v.gas_limit),
            Some(36_000_000),
        );
    }

    #[test]
    fn deleting_a_key_removes_the_validator() {
        let registry = registry();

        registry.delete_key(pubkey(2)).expect("key exists");

        assert!(!registry.load().has_key(pubkey(2)));
        assert!(matches!(
            registry.delete_key(pubkey(2)),
            Err(RegistryError::NotFound { .. }),
        ));
    }
}
