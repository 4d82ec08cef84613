use core::{num::NonZeroU64, time::Duration};
use std::{borrow::Cow, collections::BTreeMap, path::Path};

use anyhow::Result;
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    nonstandard::Phase,
    phase0::{
        consts::{FAR_FUTURE_EPOCH, GENESIS_SLOT},
        containers::Fork,
        primitives::{Epoch, Slot, SyncCommitteePeriod, UnixSeconds, Version},
    },
};

/// Configuration variables customizable at runtime.
///
/// Deserializable from the standard network configuration YAML; unknown keys
/// are ignored, missing keys fall back to their mainnet values. The variables
/// every connected beacon node reports on `/eth/v1/config/spec` are checked
/// against this at startup.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config {
    // Meta
    pub config_name: Cow<'static, str>,
    pub preset_base: Cow<'static, str>,

    // Genesis
    pub genesis_fork_version: Version,
    #[serde(with = "serde_utils::string_or_native")]
    pub min_genesis_time: UnixSeconds,

    // Forking
    #[serde(with = "serde_utils::string_or_native")]
    pub altair_fork_epoch: Epoch,
    pub altair_fork_version: Version,
    #[serde(with = "serde_utils::string_or_native")]
    pub bellatrix_fork_epoch: Epoch,
    pub bellatrix_fork_version: Version,
    #[serde(with = "serde_utils::string_or_native")]
    pub capella_fork_epoch: Epoch,
    pub capella_fork_version: Version,
    #[serde(with = "serde_utils::string_or_native")]
    pub deneb_fork_epoch: Epoch,
    pub deneb_fork_version: Version,
    #[serde(with = "serde_utils::string_or_native")]
    pub electra_fork_epoch: Epoch,
    pub electra_fork_version: Version,

    // Time parameters
    #[serde(with = "serde_utils::string_or_native")]
    pub seconds_per_slot: NonZeroU64,
    #[serde(with = "serde_utils::string_or_native")]
    pub slots_per_epoch: NonZeroU64,
    #[serde(with = "serde_utils::string_or_native")]
    pub intervals_per_slot: NonZeroU64,

    // Sync committees
    #[serde(with = "serde_utils::string_or_native")]
    pub epochs_per_sync_committee_period: NonZeroU64,
    #[serde(with = "serde_utils::string_or_native")]
    pub sync_committee_size: NonZeroU64,
    #[serde(with = "serde_utils::string_or_native")]
    pub sync_committee_subnet_count: NonZeroU64,
}

impl Default for Config {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl Config {
    #[must_use]
    pub fn mainnet() -> Self {
        Self {
            config_name: Cow::Borrowed("mainnet"),
            preset_base: Cow::Borrowed("mainnet"),
            genesis_fork_version: Version::zero(),
            min_genesis_time: 1_606_824_000,
            altair_fork_epoch: 74_240,
            altair_fork_version: Version::from_low_u64_be(0x0100_0000),
            bellatrix_fork_epoch: 144_896,
            bellatrix_fork_version: Version::from_low_u64_be(0x0200_0000),
            capella_fork_epoch: 194_048,
            capella_fork_version: Version::from_low_u64_be(0x0300_0000),
            deneb_fork_epoch: 269_568,
            deneb_fork_version: Version::from_low_u64_be(0x0400_0000),
            electra_fork_epoch: 364_032,
            electra_fork_version: Version::from_low_u64_be(0x0500_0000),
            seconds_per_slot: nonzero!(12_u64),
            slots_per_epoch: nonzero!(32_u64),
            intervals_per_slot: nonzero!(3_u64),
            epochs_per_sync_committee_period: nonzero!(256_u64),
            sync_committee_size: nonzero!(512_u64),
            sync_committee_subnet_count: nonzero!(4_u64),
        }
    }

    #[must_use]
    pub fn gnosis() -> Self {
        Self {
            config_name: Cow::Borrowed("gnosis"),
            preset_base: Cow::Borrowed("gnosis"),
            genesis_fork_version: Version::from_low_u64_be(0x0000_0064),
            min_genesis_time: 1_638_968_400,
            altair_fork_epoch: 512,
            altair_fork_version: Version::from_low_u64_be(0x0100_0064),
            bellatrix_fork_epoch: 385_536,
            bellatrix_fork_version: Version::from_low_u64_be(0x0200_0064),
            capella_fork_epoch: 648_704,
            capella_fork_version: Version::from_low_u64_be(0x0300_0064),
            deneb_fork_epoch: 889_856,
            deneb_fork_version: Version::from_low_u64_be(0x0400_0064),
            electra_fork_epoch: 1_337_856,
            electra_fork_version: Version::from_low_u64_be(0x0500_0064),
            seconds_per_slot: nonzero!(5_u64),
            slots_per_epoch: nonzero!(16_u64),
            intervals_per_slot: nonzero!(3_u64),
            epochs_per_sync_committee_period: nonzero!(512_u64),
            sync_committee_size: nonzero!(512_u64),
            sync_committee_subnet_count: nonzero!(4_u64),
        }
    }

    #[must_use]
    pub fn holesky() -> Self {
        Self {
            config_name: Cow::Borrowed("holesky"),
            genesis_fork_version: Version::from_low_u64_be(0x0101_7000),
            min_genesis_time: 1_695_902_100,
            altair_fork_epoch: 0,
            altair_fork_version: Version::from_low_u64_be(0x0201_7000),
            bellatrix_fork_epoch: 0,
            bellatrix_fork_version: Version::from_low_u64_be(0x0301_7000),
            capella_fork_epoch: 256,
            capella_fork_version: Version::from_low_u64_be(0x0401_7000),
            deneb_fork_epoch: 29_696,
            deneb_fork_version: Version::from_low_u64_be(0x0501_7000),
            electra_fork_epoch: 115_968,
            electra_fork_version: Version::from_low_u64_be(0x0601_7000),
            ..Self::mainnet()
        }
    }

    #[must_use]
    pub fn hoodi() -> Self {
        Self {
            config_name: Cow::Borrowed("hoodi"),
            genesis_fork_version: Version::from_low_u64_be(0x1000_0910),
            min_genesis_time: 1_742_212_800,
            altair_fork_epoch: 0,
            altair_fork_version: Version::from_low_u64_be(0x2000_0910),
            bellatrix_fork_epoch: 0,
            bellatrix_fork_version: Version::from_low_u64_be(0x3000_0910),
            capella_fork_epoch: 0,
            capella_fork_version: Version::from_low_u64_be(0x4000_0910),
            deneb_fork_epoch: 0,
            deneb_fork_version: Version::from_low_u64_be(0x5000_0910),
            electra_fork_epoch: 2048,
            electra_fork_version: Version::from_low_u64_be(0x6000_0910),
            ..Self::mainnet()
        }
    }

    #[must_use]
    pub fn chiado() -> Self {
        Self {
            config_name: Cow::Borrowed("chiado"),
            genesis_fork_version: Version::from_low_u64_be(0x0000_006f),
            min_genesis_time: 1_665_396_000,
            altair_fork_epoch: 90,
            altair_fork_version: Version::from_low_u64_be(0x0100_006f),
            bellatrix_fork_epoch: 180,
            bellatrix_fork_version: Version::from_low_u64_be(0x0200_006f),
            capella_fork_epoch: 244_224,
            capella_fork_version: Version::from_low_u64_be(0x0300_006f),
            deneb_fork_epoch: 516_608,
            deneb_fork_version: Version::from_low_u64_be(0x0400_006f),
            electra_fork_epoch: 948_224,
            electra_fork_version: Version::from_low_u64_be(0x0500_006f),
            ..Self::gnosis()
        }
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_yaml::from_slice(&bytes).map_err(Into::into)
    }

    #[must_use]
    pub const fn slot_duration(&self) -> Duration {
        Duration::from_secs(self.seconds_per_slot.get())
    }

    /// Duration of one attestation/aggregation interval.
    #[must_use]
    pub const fn interval_duration(&self) -> Duration {
        Duration::from_secs(self.seconds_per_slot.get() / self.intervals_per_slot.get())
    }

    #[must_use]
    pub const fn epoch_of(&self, slot: Slot) -> Epoch {
        slot / self.slots_per_epoch.get()
    }

    #[must_use]
    pub const fn start_slot_of_epoch(&self, epoch: Epoch) -> Slot {
        epoch * self.slots_per_epoch.get()
    }

    #[must_use]
    pub const fn is_epoch_start(&self, slot: Slot) -> bool {
        slot % self.slots_per_epoch.get() == 0
    }

    /// The slot in progress at `time`, clamped to the genesis slot for times
    /// before genesis.
    #[must_use]
    pub const fn slot_at_time(&self, time: UnixSeconds, genesis_time: UnixSeconds) -> Slot {
        let seconds_elapsed = time.saturating_sub(genesis_time);
        GENESIS_SLOT + seconds_elapsed / self.seconds_per_slot.get()
    }

    #[must_use]
    pub const fn start_of_slot(&self, slot: Slot, genesis_time: UnixSeconds) -> UnixSeconds {
        genesis_time + slot * self.seconds_per_slot.get()
    }

    #[must_use]
    pub const fn sync_committee_period_of_epoch(&self, epoch: Epoch) -> SyncCommitteePeriod {
        epoch / self.epochs_per_sync_committee_period.get()
    }

    #[must_use]
    pub const fn first_epoch_of_sync_committee_period(
        &self,
        period: SyncCommitteePeriod,
    ) -> Epoch {
        period * self.epochs_per_sync_committee_period.get()
    }

    #[must_use]
    pub fn phase_at_epoch(&self, epoch: Epoch) -> Phase {
        self.fork_schedule()
            .into_iter()
            .rev()
            .find(|(_, fork_epoch, _)| *fork_epoch != FAR_FUTURE_EPOCH && epoch >= *fork_epoch)
            .map_or(Phase::Phase0, |(phase, _, _)| phase)
    }

    #[must_use]
    pub fn fork_version(&self, epoch: Epoch) -> Version {
        self.fork_schedule()
            .into_iter()
            .rev()
            .find(|(_, fork_epoch, _)| *fork_epoch != FAR_FUTURE_EPOCH && epoch >= *fork_epoch)
            .map_or(self.genesis_fork_version, |(_, _, version)| version)
    }

    /// The `Fork` in force at `epoch`, as required by the remote signer's
    /// `fork_info` field.
    #[must_use]
    pub fn fork_at_epoch(&self, epoch: Epoch) -> Fork {
        let schedule = self.fork_schedule();

        let mut previous_version = self.genesis_fork_version;
        let mut current_version = self.genesis_fork_version;
        let mut fork_epoch = 0;

        for (_, activation_epoch, version) in schedule {
            if activation_epoch != FAR_FUTURE_EPOCH && epoch >= activation_epoch {
                previous_version = current_version;
                current_version = version;
                fork_epoch = activation_epoch;
            }
        }

        Fork {
            previous_version,
            current_version,
            epoch: fork_epoch,
        }
    }

    fn fork_schedule(&self) -> [(Phase, Epoch, Version); 5] {
        [
            (Phase::Altair, self.altair_fork_epoch, self.altair_fork_version),
            (
                Phase::Bellatrix,
                self.bellatrix_fork_epoch,
                self.bellatrix_fork_version,
            ),
            (
                Phase::Capella,
                self.capella_fork_epoch,
                self.capella_fork_version,
            ),
            (Phase::Deneb, self.deneb_fork_epoch, self.deneb_fork_version),
            (
                Phase::Electra,
                self.electra_fork_epoch,
                self.electra_fork_version,
            ),
        ]
    }

    /// Values that must agree between this configuration and every connected
    /// beacon node's `/eth/v1/config/spec` response.
    #[must_use]
    pub fn fingerprint(&self) -> BTreeMap<String, String> {
        let mut fingerprint = BTreeMap::new();

        fingerprint.insert(
            "SECONDS_PER_SLOT".to_owned(),
            self.seconds_per_slot.to_string(),
        );
        fingerprint.insert(
            "SLOTS_PER_EPOCH".to_owned(),
            self.slots_per_epoch.to_string(),
        );
        fingerprint.insert(
            "GENESIS_FORK_VERSION".to_owned(),
            format!("{:?}", self.genesis_fork_version),
        );

        for (phase, epoch, version) in self.fork_schedule() {
            let phase = phase.as_ref().to_uppercase();
            fingerprint.insert(format!("{phase}_FORK_EPOCH"), epoch.to_string());
            fingerprint.insert(format!("{phase}_FORK_VERSION"), format!("{version:?}"));
        }

        fingerprint
    }

    /// Compares the local fingerprint against a raw remote spec. Keys the
    /// remote does not report are skipped; far-future fork epochs are only
    /// compared when the remote reports them.
    #[must_use]
    pub fn mismatches(&self, remote: &BTreeMap<String, String>) -> Vec<SpecMismatch> {
        self.fingerprint()
            .into_iter()
            .filter_map(|(key, local)| {
                let remote_value = remote.get(&key)?;

                (!remote_value.eq_ignore_ascii_case(&local)).then(|| SpecMismatch {
                    key,
                    local,
                    remote: remote_value.clone(),
                })
            })
            .collect()
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Error)]
#[error("{key}: local {local}, remote {remote}")]
pub struct SpecMismatch {
    pub key: String,
    pub local: String,
    pub remote: String,
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(0 => Phase::Phase0)]
    #[test_case(74_239 => Phase::Phase0)]
    #[test_case(74_240 => Phase::Altair)]
    #[test_case(269_568 => Phase::Deneb)]
    #[test_case(364_032 => Phase::Electra)]
    #[test_case(u64::MAX / 2 => Phase::Electra)]
    fn mainnet_phase_at_epoch(epoch: Epoch) -> Phase {
        Config::mainnet().phase_at_epoch(epoch)
    }

    #[test]
    fn mainnet_slot_arithmetic() {
        let config = Config::mainnet();
        let genesis_time = 1_606_824_023;

        assert_eq!(config.epoch_of(100), 3);
        assert_eq!(config.start_slot_of_epoch(3), 96);
        assert!(config.is_epoch_start(96));
        assert!(!config.is_epoch_start(100));
        assert_eq!(config.slot_at_time(genesis_time, genesis_time), 0);
        assert_eq!(config.slot_at_time(genesis_time + 11, genesis_time), 0);
        assert_eq!(config.slot_at_time(genesis_time + 12, genesis_time), 1);
        assert_eq!(config.slot_at_time(genesis_time - 100, genesis_time), 0);
        assert_eq!(
            config.start_of_slot(100, genesis_time),
            genesis_time + 1200,
        );
    }

    #[test]
    fn fork_at_epoch_tracks_previous_version() {
        let config = Config::mainnet();
        let fork = config.fork_at_epoch(364_032);

        assert_eq!(fork.previous_version, config.deneb_fork_version);
        assert_eq!(fork.current_version, config.electra_fork_version);
        assert_eq!(fork.epoch, 364_032);
    }

    #[test]
    fn fingerprint_mismatch_detection() {
        let config = Config::mainnet();
        let mut remote = config.fingerprint();

        assert!(config.mismatches(&remote).is_empty());

        remote.insert("SECONDS_PER_SLOT".to_owned(), "5".to_owned());
        let mismatches = config.mismatches(&remote);

        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].key, "SECONDS_PER_SLOT");

        // Keys the remote does not report are not compared.
        remote.remove("SECONDS_PER_SLOT");
        assert!(config.mismatches(&remote).is_empty());
    }

    #[test]
    fn gnosis_timing_differs_from_mainnet() {
        let config = Config::gnosis();

        assert_eq!(config.slot_duration(), Duration::from_secs(5));
        assert_eq!(config.slots_per_epoch.get(), 16);
        assert_eq!(config.sync_committee_period_of_epoch(1024), 2);
    }
}
