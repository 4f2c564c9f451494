// src/maglev/permutation.rs
use super::hash::hash;

/// Preference ordering of table slots for one backend.
///
/// `row[j] = (offset + j * skip) mod M`. With `M` prime and `1 <= skip < M`
/// the sequence visits every slot exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permutation {
    offset: u64,
    skip: u64,
    size: u64,
}

impl Permutation {
    /// Derive the permutation for `backend_id` over a table of `size` slots.
    ///
    /// `size` must be at least 2; callers validate it as a prime beforehand.
    pub fn new(backend_id: &str, size: usize) -> Self {
        debug_assert!(size >= 2, "table size must be at least 2");
        let size = size as u64;

        let offset = hash(backend_id.as_bytes()) % size;

        let mut salted = String::with_capacity(backend_id.len() + 1);
        salted.push_str(backend_id);
        salted.push('|');
        let skip = hash(salted.as_bytes()) % (size - 1) + 1;

        Self { offset, skip, size }
    }

    /// Materialise the full row.
    pub fn row(&self) -> Box<[u32]> {
        let mut row = Vec::with_capacity(self.size as usize);
        let mut slot = self.offset;
        for _ in 0..self.size {
            row.push(slot as u32);
            slot += self.skip;
            if slot >= self.size {
                slot -= self.size;
            }
        }
        row.into_boxed_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maglev::DEFAULT_TABLE_SIZE;
    use proptest::prelude::*;

    fn is_bijection(row: &[u32], size: usize) -> bool {
        let mut seen = vec![false; size];
        for &slot in row {
            let slot = slot as usize;
            if slot >= size || seen[slot] {
                return false;
            }
            seen[slot] = true;
        }
        row.len() == size
    }

    #[test]
    fn test_offset_and_skip_follow_fnv() {
        let perm = Permutation::new("Backend-1", DEFAULT_TABLE_SIZE);
        let m = DEFAULT_TABLE_SIZE as u64;
        assert_eq!(perm.offset, hash(b"Backend-1") % m);
        assert_eq!(perm.skip, hash(b"Backend-1|") % (m - 1) + 1);
    }

    #[test]
    fn test_default_size_row_is_bijection() {
        for id in ["Backend-1", "Backend-2", "Backend-3", ""] {
            let row = Permutation::new(id, DEFAULT_TABLE_SIZE).row();
            assert!(is_bijection(&row, DEFAULT_TABLE_SIZE), "row for {id:?}");
        }
    }

    #[test]
    fn test_row_follows_offset_and_skip() {
        let perm = Permutation::new("a", 13);
        let row = perm.row();
        for (j, &slot) in row.iter().enumerate() {
            let expected = (perm.offset + j as u64 * perm.skip) % 13;
            assert_eq!(slot as u64, expected);
        }
    }

    #[test]
    fn test_skip_in_range_for_smallest_prime() {
        let perm = Permutation::new("x", 2);
        assert_eq!(perm.skip, 1);
        assert!(is_bijection(&perm.row(), 2));
    }

    proptest! {
        #[test]
        fn prop_row_is_bijection(
            id in ".{0,24}",
            size in prop::sample::select(vec![2usize, 3, 7, 13, 101, 257, 1031]),
        ) {
            let row = Permutation::new(&id, size).row();
            prop_assert!(is_bijection(&row, size));
        }
    }
}
