//! Densely numbered entity references as set keys.

use crate::EntityRef;
use crate::Keys;
use core::marker::PhantomData;

/// A set of `K` for densely indexed entity references.
///
/// The `EntitySet` data structure uses the dense index space to implement a set with a bitvector.
/// Like `SecondaryMap`, an `EntitySet` is used to associate secondary information with entities.
#[derive(Debug, Clone)]
pub struct EntitySet<K>
where
    K: EntityRef,
{
    elems: Vec<u32>,
    len: usize,
    unused: PhantomData<K>,
}

impl<K: EntityRef> Default for EntitySet<K> {
    fn default() -> Self {
        Self {
            elems: Vec::new(),
            len: 0,
            unused: PhantomData,
        }
    }
}

impl<K: EntityRef> EntitySet<K> {
    /// Create a new empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new empty set with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            elems: Vec::with_capacity((capacity + 31) / 32),
            ..Self::new()
        }
    }

    /// Get the element at `k` if it exists.
    pub fn contains(&self, k: K) -> bool {
        let index = k.index();
        if index < self.len {
            (self.elems[index / 32] & (1 << (index % 32))) != 0
        } else {
            false
        }
    }

    /// Is this set completely empty?
    pub fn is_empty(&self) -> bool {
        if self.len != 0 {
            false
        } else {
            self.elems.iter().all(|&e| e == 0)
        }
    }

    /// Remove all entries from this set.
    pub fn clear(&mut self) {
        self.len = 0;
        self.elems.clear()
    }

    /// Iterate over all the keys up to the maximum in this set.
    pub fn keys(&self) -> Keys<K> {
        Keys::with_len(self.len)
    }

    /// Resize the set to have `n` entries by adding default entries as needed.
    pub fn resize(&mut self, n: usize) {
        self.elems.resize((n + 31) / 32, 0);
        self.len = n
    }

    /// Insert the element at `k`, growing the set as needed.
    ///
    /// Returns `true` if the element was not present before.
    pub fn insert(&mut self, k: K) -> bool {
        let index = k.index();
        if index >= self.len {
            self.resize(index + 1)
        }
        let word = &mut self.elems[index / 32];
        let mask = 1 << (index % 32);
        let absent = *word & mask == 0;
        *word |= mask;
        absent
    }

    /// Removes and returns the entity from the set if it exists.
    pub fn pop(&mut self) -> Option<K> {
        if self.len == 0 {
            return None;
        }

        // Clear the last known entity in the list.
        let last_index = self.len - 1;
        self.elems[last_index / 32] &= !(1 << (last_index % 32));

        // Set the length to the next last stored entity or zero if none.
        let mut shorten_by = 1;
        'outer: for (i, word) in self.elems.iter().enumerate().rev() {
            if i * 32 >= self.len {
                continue;
            }
            let live_bits = self.len - i * 32;
            let mut word = *word;
            if live_bits < 32 {
                word &= (1 << live_bits) - 1;
            }
            if word != 0 {
                self.len = i * 32 + 32 - word.leading_zeros() as usize;
                shorten_by = 0;
                break 'outer;
            }
        }
        if shorten_by != 0 {
            self.len = 0;
        }

        Some(K::new(last_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_impl;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    struct E(u32);
    entity_impl!(E);

    #[test]
    fn insert_contains() {
        let mut s = EntitySet::<E>::new();
        assert!(s.is_empty());
        assert!(!s.contains(E::new(3)));

        assert!(s.insert(E::new(3)));
        assert!(!s.insert(E::new(3)));
        assert!(s.contains(E::new(3)));
        assert!(!s.contains(E::new(2)));
        assert!(!s.is_empty());
    }

    #[test]
    fn large_indices() {
        let mut s = EntitySet::<E>::new();
        assert!(s.insert(E::new(100)));
        assert!(s.contains(E::new(100)));
        assert!(!s.contains(E::new(99)));
        s.clear();
        assert!(!s.contains(E::new(100)));
    }

    #[test]
    fn pop_in_reverse_insertion_order() {
        let mut s = EntitySet::<E>::new();
        s.insert(E::new(0));
        s.insert(E::new(4));
        s.insert(E::new(77));
        assert_eq!(s.pop(), Some(E::new(77)));
        assert_eq!(s.pop(), Some(E::new(4)));
        assert_eq!(s.pop(), Some(E::new(0)));
        assert_eq!(s.pop(), None);
        assert!(s.is_empty());
    }
}
