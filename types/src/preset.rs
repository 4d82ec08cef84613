//! Mainnet preset constants used as SSZ list bounds.
//!
//! Vero does not compile in whole presets the way a full consensus client
//! does. The constants below only bound container fields and are shared by
//! every network Vero supports (Gnosis uses the mainnet preset). Runtime
//! values such as `SECONDS_PER_SLOT` live in [`Config`](crate::config::Config)
//! and are cross-checked against `/eth/v1/config/spec` at startup.

pub use typenum::{
    U1, U2, U4, U8, U16, U32, U64, U128, U256, U512, U2048, U4096, U8192, U131072, U1048576,
    U1073741824,
};

pub type MaxValidatorsPerCommittee = U2048;
pub type MaxCommitteesPerSlot = U64;
pub type MaxValidatorsPerSlot = U131072;
pub type MaxProposerSlashings = U16;
pub type MaxAttesterSlashings = U2;
pub type MaxAttesterSlashingsElectra = U1;
pub type MaxAttestations = U128;
pub type MaxAttestationsElectra = U8;
pub type MaxDeposits = U16;
pub type MaxVoluntaryExits = U16;
pub type MaxBlsToExecutionChanges = U16;
pub type SyncCommitteeSize = U512;
pub type SyncSubcommitteeSize = U128;
pub type SyncCommitteeSubnetCount = U4;
pub type BytesPerLogsBloom = U256;
pub type MaxExtraDataBytes = U32;
pub type MaxBytesPerTransaction = U1073741824;
pub type MaxTransactionsPerPayload = U1048576;
pub type MaxWithdrawalsPerPayload = U16;
pub type MaxBlobCommitmentsPerBlock = U4096;
pub type BytesPerBlob = U131072;
pub type MaxDepositRequestsPerPayload = U8192;
pub type MaxWithdrawalRequestsPerPayload = U16;
pub type MaxConsolidationRequestsPerPayload = U2;

pub const TARGET_AGGREGATORS_PER_COMMITTEE: u64 = 16;
pub const TARGET_AGGREGATORS_PER_SYNC_SUBCOMMITTEE: u64 = 16;
