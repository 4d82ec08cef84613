use ethereum_types::H256;
use sha2::{Digest as _, Sha256};

#[must_use]
pub fn hash_bytes(bytes: impl AsRef<[u8]>) -> H256 {
    H256(Sha256::digest(bytes).into())
}

/// Hashes a 96-byte signature. Aggregator selection reads the first eight
/// bytes of this digest as a little-endian integer.
#[must_use]
pub fn hash_768(bytes: impl AsRef<[u8]>) -> H256 {
    hash_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn hash_bytes_matches_sha256_test_vector() {
        assert_eq!(
            hash_bytes(b"abc"),
            H256(hex!(
                "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
            )),
        );
    }
}
