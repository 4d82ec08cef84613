use types::phase0::primitives::{ExecutionAddress, Graffiti};

#[derive(Clone, Copy, Debug)]
pub struct ValidatorConfig {
    pub fee_recipient: ExecutionAddress,
    pub graffiti: Option<Graffiti>,
    pub gas_limit: u64,
    pub use_external_builder: bool,
    pub builder_boost_factor: u64,
}
