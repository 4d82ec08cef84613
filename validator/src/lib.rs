pub use crate::{
    validator::Validator,
    validator_config::ValidatorConfig,
};

mod attestation;
mod block_proposal;
mod duties;
mod misc;
mod sync_committee;
mod validator;
mod validator_config;
