use thiserror::Error as ThisError;
use types::phase0::primitives::ValidatorIndex;

#[derive(Debug, PartialEq, Eq, ThisError)]
pub enum Error {
    #[error("doppelgangers detected for validator indices: {indices:?}")]
    DoppelgangersDetected { indices: Vec<ValidatorIndex> },
}
