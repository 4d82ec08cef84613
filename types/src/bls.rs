//! Opaque BLS and KZG byte types.
//!
//! Vero never performs BLS operations itself. Public keys identify validators
//! toward the remote signer and the Beacon API; signatures are carried from
//! the signer to the beacon nodes unverified.

use fixed_hash::construct_fixed_hash;
use impl_serde::impl_fixed_hash_serde;
use ssz::{Decode, DecodeError, Encode};
use tree_hash::{Hash256, MerkleHasher, TreeHash, TreeHashType};

pub const PUBLIC_KEY_SIZE: usize = 48;
pub const SIGNATURE_SIZE: usize = 96;

construct_fixed_hash! {
    pub struct PublicKeyBytes(PUBLIC_KEY_SIZE);
}

construct_fixed_hash! {
    pub struct SignatureBytes(SIGNATURE_SIZE);
}

construct_fixed_hash! {
    pub struct KzgCommitment(PUBLIC_KEY_SIZE);
}

construct_fixed_hash! {
    pub struct KzgProof(PUBLIC_KEY_SIZE);
}

impl_fixed_hash_serde!(PublicKeyBytes, PUBLIC_KEY_SIZE);
impl_fixed_hash_serde!(SignatureBytes, SIGNATURE_SIZE);
impl_fixed_hash_serde!(KzgCommitment, PUBLIC_KEY_SIZE);
impl_fixed_hash_serde!(KzgProof, PUBLIC_KEY_SIZE);

macro_rules! impl_ssz_for_fixed_bytes {
    ($type:ty, $size:expr) => {
        impl Encode for $type {
            fn is_ssz_fixed_len() -> bool {
                true
            }

            fn ssz_fixed_len() -> usize {
                $size
            }

            fn ssz_bytes_len(&self) -> usize {
                $size
            }

            fn ssz_append(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(self.as_bytes());
            }
        }

        impl Decode for $type {
            fn is_ssz_fixed_len() -> bool {
                true
            }

            fn ssz_fixed_len() -> usize {
                $size
            }

            fn from_ssz_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
                if bytes.len() == $size {
                    Ok(Self::from_slice(bytes))
                } else {
                    Err(DecodeError::InvalidByteLength {
                        len: bytes.len(),
                        expected: $size,
                    })
                }
            }
        }

        impl TreeHash for $type {
            fn tree_hash_type() -> TreeHashType {
                TreeHashType::Vector
            }

            fn tree_hash_packed_encoding(&self) -> tree_hash::PackedEncoding {
                unreachable!("bytes of a fixed vector are not packed")
            }

            fn tree_hash_packing_factor() -> usize {
                unreachable!("bytes of a fixed vector are not packed")
            }

            fn tree_hash_root(&self) -> Hash256 {
                let chunks = $size.div_ceil(tree_hash::BYTES_PER_CHUNK);
                let mut hasher = MerkleHasher::with_leaves(chunks);

                hasher
                    .write(self.as_bytes())
                    .and_then(|()| hasher.finish())
                    .expect("chunk count matches the byte length")
            }
        }
    };
}

impl_ssz_for_fixed_bytes!(PublicKeyBytes, PUBLIC_KEY_SIZE);
impl_ssz_for_fixed_bytes!(SignatureBytes, SIGNATURE_SIZE);
impl_ssz_for_fixed_bytes!(KzgCommitment, PUBLIC_KEY_SIZE);
impl_ssz_for_fixed_bytes!(KzgProof, PUBLIC_KEY_SIZE);

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    const SAMPLE_PUBKEY: PublicKeyBytes = PublicKeyBytes(hex!(
        "93247f2209abcacf57b75a51dafae777f9dd38bc7053d1af526f220a7489a6d3\
         a2753e5f3e8b1cfe39b56f43611df74a"
    ));

    #[test]
    fn public_key_serde_uses_prefixed_hex() {
        let json = serde_json::to_string(&SAMPLE_PUBKEY).expect("pubkey serializes");

        assert!(json.starts_with("\"0x93247f22"));
        assert_eq!(
            serde_json::from_str::<PublicKeyBytes>(&json).expect("pubkey deserializes"),
            SAMPLE_PUBKEY,
        );
    }

    #[test]
    fn public_key_ssz_round_trip() {
        let bytes = SAMPLE_PUBKEY.as_ssz_bytes();

        assert_eq!(bytes.len(), PUBLIC_KEY_SIZE);
        assert_eq!(
            PublicKeyBytes::from_ssz_bytes(&bytes).expect("pubkey decodes"),
            SAMPLE_PUBKEY,
        );
    }

    #[test]
    fn tree_hash_pads_to_chunk_boundary() {
        let root = SAMPLE_PUBKEY.tree_hash_root();
        let mut padded = [0_u8; 64];
        padded[..PUBLIC_KEY_SIZE].copy_from_slice(SAMPLE_PUBKEY.as_bytes());

        assert_eq!(root, tree_hash::merkle_root(&padded, 0));
    }
}
