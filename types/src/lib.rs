pub mod altair;
pub mod builder;
pub mod capella;
pub mod combined;
pub mod config;
pub mod deneb;
pub mod electra;
pub mod nonstandard;
pub mod phase0;
pub mod preset;
pub mod redacting_url;

mod bls;

pub use crate::bls::{KzgCommitment, KzgProof, PublicKeyBytes, SignatureBytes};
