use fixed_hash::construct_fixed_hash;
use impl_serde::impl_fixed_hash_serde;

pub use ethereum_types::{H160, H256, U256};

pub type Slot = u64;
pub type Epoch = u64;
pub type CommitteeIndex = u64;
pub type SubcommitteeIndex = u64;
pub type SubnetId = u64;
pub type ValidatorIndex = u64;
pub type SyncCommitteePeriod = u64;
pub type Gwei = u64;
/// Block values reported by `produce_block_v3` are denominated in Wei and may
/// exceed `u64::MAX`.
pub type Wei = U256;
pub type UnixSeconds = u64;
pub type ExecutionAddress = H160;
pub type ExecutionBlockHash = H256;
pub type ExecutionBlockNumber = u64;
/// Block graffiti, 32 bytes of zero-padded UTF-8.
pub type Graffiti = H256;

construct_fixed_hash! {
    /// A fork version (`GENESIS_FORK_VERSION` and friends).
    pub struct Version(4);
}

impl_fixed_hash_serde!(Version, 4);
