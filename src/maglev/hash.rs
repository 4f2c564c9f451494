// src/maglev/hash.rs
use fnv::FnvHasher;
use std::hash::Hasher;

/// 64-bit FNV-1a digest of `bytes`.
///
/// Unseeded, so the same input hashes identically in every process. Used both
/// to derive backend permutations and to map client keys onto table slots.
pub fn hash(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}
