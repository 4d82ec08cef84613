use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Consensus phases relevant to the networks Vero runs on. Blocks are only
/// produced for Deneb and later; earlier phases exist so the fork schedule in
/// [`Config`](crate::config::Config) can be represented in full.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, AsRefStr, Display, EnumString,
    Deserialize, Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Phase0,
    Altair,
    Bellatrix,
    Capella,
    Deneb,
    Electra,
}

/// Validator statuses as reported by `/eth/v1/beacon/states/{state_id}/validators`.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Debug, AsRefStr, Display, EnumString, Deserialize, Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ValidatorStatus {
    PendingInitialized,
    PendingQueued,
    ActiveOngoing,
    ActiveExiting,
    ActiveSlashed,
    ExitedUnslashed,
    ExitedSlashed,
    WithdrawalPossible,
    WithdrawalDone,
    Unknown,
}

impl ValidatorStatus {
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::ActiveOngoing | Self::ActiveExiting | Self::ActiveSlashed)
    }

    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::PendingInitialized | Self::PendingQueued)
    }

    #[must_use]
    pub const fn is_slashed(self) -> bool {
        matches!(self, Self::ActiveSlashed | Self::ExitedSlashed)
    }

    #[must_use]
    pub const fn is_exited(self) -> bool {
        matches!(self, Self::ExitedUnslashed | Self::ExitedSlashed)
    }

    #[must_use]
    pub const fn has_withdrawn(self) -> bool {
        matches!(self, Self::WithdrawalPossible | Self::WithdrawalDone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Phase::Electra).expect("phase serializes"),
            "\"electra\"",
        );
        assert_eq!(
            serde_json::from_str::<Phase>("\"deneb\"").expect("phase deserializes"),
            Phase::Deneb,
        );
        assert!(Phase::Deneb < Phase::Electra);
    }

    #[test]
    fn status_groups_are_disjoint() {
        let slashed = [
            ValidatorStatus::ActiveSlashed,
            ValidatorStatus::ExitedSlashed,
        ];

        for status in slashed {
            assert!(status.is_slashed());
            assert!(!status.is_pending());
        }

        assert!(ValidatorStatus::ActiveOngoing.is_active());
        assert!(!ValidatorStatus::Unknown.is_active());
    }
}
