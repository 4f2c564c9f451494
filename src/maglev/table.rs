// src/maglev/table.rs
use super::hash::hash;
use super::permutation::Permutation;
use std::collections::BTreeMap;

const EMPTY: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("table size {0} is not a prime in 2..=4294967291")]
    InvalidSize(usize),

    #[error("duplicate backend id in active set: {0}")]
    DuplicateBackend(String),
}

/// Returns true when `n` is prime. Trial division; only run on configuration.
pub fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3;
    while d <= n / d {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

/// Whether `size` can back a lookup table: prime and addressable by a `u32` slot.
pub fn is_valid_table_size(size: usize) -> bool {
    size as u64 <= u32::MAX as u64 && is_prime(size)
}

/// Maglev lookup table: slot index -> owning backend id.
///
/// Immutable once built. An empty table (no active backends) has size 0 and
/// resolves nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTable {
    /// Backend ids in canonical (ascending) order; slots index into this.
    owners: Vec<String>,
    slots: Box<[u32]>,
}

impl LookupTable {
    pub fn empty() -> Self {
        Self {
            owners: Vec::new(),
            slots: Box::default(),
        }
    }

    /// Build a fully populated table of `size` slots over `backends`.
    ///
    /// Input order does not matter: ids are sorted into canonical order before
    /// the fill, so the same set always yields the same table. Duplicate ids are
    /// rejected rather than collapsed. An empty set yields an empty table.
    pub fn build<S: AsRef<str>>(backends: &[S], size: usize) -> Result<Self, TableError> {
        if !is_valid_table_size(size) {
            return Err(TableError::InvalidSize(size));
        }

        let mut owners: Vec<String> = backends.iter().map(|b| b.as_ref().to_owned()).collect();
        owners.sort_unstable();
        if let Some(dup) = owners.windows(2).find(|w| w[0] == w[1]) {
            return Err(TableError::DuplicateBackend(dup[0].clone()));
        }

        if owners.is_empty() {
            return Ok(Self::empty());
        }

        let slots = populate(&owners, size);
        Ok(Self { owners, slots })
    }

    /// Number of slots; 0 for an empty table.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Backend ids the table was built from, in canonical order.
    pub fn backends(&self) -> &[String] {
        &self.owners
    }

    pub fn owner_of(&self, slot: usize) -> Option<&str> {
        let idx = *self.slots.get(slot)?;
        self.owners.get(idx as usize).map(String::as_str)
    }

    /// Slot a key hashes to, or `None` for an empty table.
    pub fn slot_for(&self, key: &[u8]) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        Some((hash(key) % self.size() as u64) as usize)
    }

    /// Backend id owning the slot `key` hashes to.
    pub fn lookup(&self, key: &[u8]) -> Option<&str> {
        self.owner_of(self.slot_for(key)?)
    }

    /// Owned-slot count per backend.
    pub fn slot_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = vec![0usize; self.owners.len()];
        for &idx in self.slots.iter() {
            counts[idx as usize] += 1;
        }
        self.owners
            .iter()
            .map(String::as_str)
            .zip(counts)
            .collect()
    }
}

impl Default for LookupTable {
    fn default() -> Self {
        Self::empty()
    }
}

/// Round-robin fill. Each backend in turn claims the next unclaimed slot of its
/// own permutation row; cursors only move forward.
fn populate(owners: &[String], size: usize) -> Box<[u32]> {
    let rows: Vec<Box<[u32]>> = owners
        .iter()
        .map(|id| Permutation::new(id, size).row())
        .collect();

    let mut slots = vec![EMPTY; size].into_boxed_slice();
    let mut next = vec![0usize; owners.len()];
    let mut filled = 0;

    'fill: loop {
        for (i, row) in rows.iter().enumerate() {
            // The row is a bijection and the table is not full, so an unclaimed
            // slot remains at or beyond next[i].
            let mut slot = row[next[i]] as usize;
            while slots[slot] != EMPTY {
                next[i] += 1;
                slot = row[next[i]] as usize;
            }

            slots[slot] = i as u32;
            next[i] += 1;
            filled += 1;

            if filled == size {
                break 'fill;
            }
        }
    }

    slots
}
