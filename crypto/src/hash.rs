//! Various hash functions

use ethereum_types::{H256, U256};

/// Hash of an empty subtree
pub const EMPTY_HASH: H256 = H256([0; 32]);

/// Calculate the keccak256 hash, as used by the EVM
pub fn keccak256(bytes: &[u8]) -> H256 {
    H256(keccak_hash::keccak(bytes).0)
}

/// Calculate `keccak256(a || b)` where || means concatenation.
///
/// Two empty subtrees collapse into an empty subtree, which keeps the hash of an empty trie
/// (and of every empty region inside a trie) equal to `EMPTY_HASH`.
pub fn keccak256_concat(a: &H256, b: &H256) -> H256 {
    if a.is_zero() && b.is_zero() {
        return EMPTY_HASH;
    }
    let mut h = [0u8; 64];
    h[..32].copy_from_slice(a.as_bytes());
    h[32..].copy_from_slice(b.as_bytes());

    keccak256(&h)
}

/// Big-endian 32-byte encoding of a 256-bit word
pub fn u256_to_bytes(value: &U256) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = value.byte(31 - i);
    }

    bytes
}

/// A 256-bit word seen as a hash
pub fn u256_to_h256(value: &U256) -> H256 {
    H256(u256_to_bytes(value))
}

/// A hash seen as a 256-bit word
pub fn h256_to_u256(hash: &H256) -> U256 {
    U256::from_big_endian(hash.as_bytes())
}
