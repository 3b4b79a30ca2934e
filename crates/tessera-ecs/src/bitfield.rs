//! Fixed-width bit sets keyed by [`ComponentTypeId`].
//!
//! A [`Bitfield`] is the fingerprint of an archetype: bit `n` is set when the
//! component type with id `n` is part of the composition. Bit sets created at
//! different times may have different widths (the registry can grow between
//! them), so equality and hashing ignore trailing zero words.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::component::ComponentTypeId;

const WORD_BITS: usize = 64;

#[inline]
fn words_for(bits: usize) -> usize {
    bits.div_ceil(WORD_BITS)
}

// ---------------------------------------------------------------------------
// Bitfield
// ---------------------------------------------------------------------------

/// A bit set stored as a sequence of 64-bit words.
///
/// Invariant: `bit_count <= words.len() * 64`.
#[derive(Clone, Default)]
pub struct Bitfield {
    bit_count: usize,
    words: Vec<u64>,
}

impl Bitfield {
    /// Create an empty bit set able to hold at least `min_bits` bits.
    pub fn new(min_bits: usize) -> Self {
        Self {
            bit_count: min_bits,
            words: vec![0; words_for(min_bits)],
        }
    }

    /// Number of addressable bits requested at construction (or last growth).
    #[inline]
    pub fn bit_count(&self) -> usize {
        self.bit_count
    }

    /// Number of bits the backing words can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.words.len() * WORD_BITS
    }

    /// Grow to at least `min_bits`, preserving the bits already set.
    pub fn ensure_capacity(&mut self, min_bits: usize) {
        if min_bits > self.bit_count {
            self.bit_count = min_bits;
        }
        let needed = words_for(min_bits);
        if needed > self.words.len() {
            self.words.resize(needed, 0);
        }
    }

    /// Read bit `index`. Bits beyond the capacity read as unset.
    #[inline]
    pub fn get(&self, index: usize) -> bool {
        match self.words.get(index / WORD_BITS) {
            Some(word) => word & (1u64 << (index % WORD_BITS)) != 0,
            None => false,
        }
    }

    /// Write bit `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is beyond the capacity; grow with
    /// [`ensure_capacity`](Self::ensure_capacity) first.
    #[inline]
    pub fn set(&mut self, index: usize, value: bool) {
        assert!(
            index < self.capacity(),
            "bit {index} out of range for bitfield of capacity {}",
            self.capacity()
        );
        let word = &mut self.words[index / WORD_BITS];
        let mask = 1u64 << (index % WORD_BITS);
        if value {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }

    /// Read the bit for a component type.
    #[inline]
    pub fn contains(&self, id: ComponentTypeId) -> bool {
        self.get(id.index())
    }

    /// Set the bit for a component type, growing if necessary.
    pub fn insert(&mut self, id: ComponentTypeId) {
        self.ensure_capacity(id.index() + 1);
        self.set(id.index(), true);
    }

    /// Clear the bit for a component type. Out-of-range ids are already clear.
    pub fn remove(&mut self, id: ComponentTypeId) {
        if id.index() < self.capacity() {
            self.set(id.index(), false);
        }
    }

    /// `true` when every bit set in `self` is also set in `other`.
    ///
    /// Words are compared over the shared prefix. A word of `self` that lies
    /// beyond `other`'s extent counts as absent from `other`, so any bit set
    /// there makes `self` not a subset. Extra words in `other` are irrelevant.
    pub fn is_subset_of(&self, other: &Bitfield) -> bool {
        let shared = self.words.len().min(other.words.len());
        for i in 0..shared {
            if other.words[i] & self.words[i] != self.words[i] {
                return false;
            }
        }
        self.words[shared..].iter().all(|&w| w == 0)
    }

    /// Zero every word.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Whether no bit is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Iterate the indices of set bits in ascending order.
    pub fn ones(&self) -> Ones<'_> {
        Ones {
            words: &self.words,
            word_index: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }

    /// Iterate the set bits as component type ids.
    pub fn component_ids(&self) -> impl Iterator<Item = ComponentTypeId> + '_ {
        self.ones().map(ComponentTypeId::from_index)
    }

    /// A 64-bit content hash. Equal bit sets yield equal fingerprints
    /// regardless of width padding.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Words up to and including the last non-zero one.
    fn significant_words(&self) -> &[u64] {
        let len = self
            .words
            .iter()
            .rposition(|&w| w != 0)
            .map_or(0, |last| last + 1);
        &self.words[..len]
    }
}

impl PartialEq for Bitfield {
    fn eq(&self, other: &Self) -> bool {
        self.significant_words() == other.significant_words()
    }
}

impl Eq for Bitfield {}

impl Hash for Bitfield {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let words = self.significant_words();
        state.write_usize(words.len());
        for &w in words {
            state.write_u64(w);
        }
    }
}

impl fmt::Debug for Bitfield {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ones()).finish()
    }
}

impl FromIterator<ComponentTypeId> for Bitfield {
    fn from_iter<I: IntoIterator<Item = ComponentTypeId>>(iter: I) -> Self {
        let mut bits = Bitfield::new(0);
        for id in iter {
            bits.insert(id);
        }
        bits
    }
}

// ---------------------------------------------------------------------------
// Ones iterator
// ---------------------------------------------------------------------------

/// Iterator over set bit indices, produced by [`Bitfield::ones`].
pub struct Ones<'a> {
    words: &'a [u64],
    word_index: usize,
    current: u64,
}

impl Iterator for Ones<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.word_index * WORD_BITS + bit);
            }
            self.word_index += 1;
            self.current = *self.words.get(self.word_index)?;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
