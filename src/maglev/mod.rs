// src/maglev/mod.rs
//! Maglev consistent hashing: permutation rows and lookup-table construction.

mod hash;
mod permutation;
mod table;

pub use hash::hash;
pub use permutation::Permutation;
pub use table::{is_prime, is_valid_table_size, LookupTable, TableError};

/// Reference lookup table size. Prime, and small enough that a full rebuild
/// finishes in a few milliseconds.
pub const DEFAULT_TABLE_SIZE: usize = 65537;
