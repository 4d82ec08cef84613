pub use crate::{
    signer::{RemoteSigner, SignerError},
    signing::{compute_domain, compute_signing_root, DomainType},
    types::{
        AggregationSlot, ForkInfo, RandaoReveal, SigningBlock, SigningMessage, SigningRequest,
        SigningResponse, SyncCommitteeMessageFields,
    },
};

mod signer;
mod signing;
mod types;
