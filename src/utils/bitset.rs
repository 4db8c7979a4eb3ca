//! Growable dense bit vector.
//!
//! Backs the version sets of the SSA passes. The universe of versions keeps
//! growing while a fixpoint runs, so a set never has a fixed width: inserting
//! past the end extends it, and operations between sets of different widths
//! treat the missing tail as zero bits.
//!
//! # Example
//!
//! ```rust,ignore
//! use classflow::utils::BitSet;
//!
//! let mut live = BitSet::new(8);
//! live.insert(3);
//! live.insert(70);
//! assert_eq!(live.iter().collect::<Vec<_>>(), vec![3, 70]);
//! ```

const WORD_BITS: usize = u64::BITS as usize;

#[inline]
fn split(index: usize) -> (usize, u64) {
    (index / WORD_BITS, 1u64 << (index % WORD_BITS))
}

/// Set of small integers stored one bit each.
#[derive(Clone, Default)]
pub struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    /// Creates an empty set with room for `capacity` bits.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        BitSet {
            words: vec![0; capacity.div_ceil(WORD_BITS)],
        }
    }

    /// Number of bits the set can hold without growing.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.words.len() * WORD_BITS
    }

    /// Returns `true` if no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Number of set bits.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Sets bit `index`, growing the set when needed.
    pub fn insert(&mut self, index: usize) {
        let (word, mask) = split(index);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= mask;
    }

    /// Clears bit `index`.
    pub fn remove(&mut self, index: usize) {
        let (word, mask) = split(index);
        if let Some(w) = self.words.get_mut(word) {
            *w &= !mask;
        }
    }

    /// Returns `true` if bit `index` is set.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        let (word, mask) = split(index);
        self.words.get(word).is_some_and(|w| w & mask != 0)
    }

    /// Adds every bit of `other`. Returns `true` if `self` changed.
    pub fn union_with(&mut self, other: &Self) -> bool {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        self.combine(other, |a, b| a | b)
    }

    /// Keeps only the bits also set in `other`. Returns `true` if `self` changed.
    pub fn intersect_with(&mut self, other: &Self) -> bool {
        self.combine(other, |a, b| a & b)
    }

    /// Clears every bit set in `other`. Returns `true` if `self` changed.
    pub fn difference_with(&mut self, other: &Self) -> bool {
        self.combine(other, |a, b| a & !b)
    }

    fn combine(&mut self, other: &Self, op: impl Fn(u64, u64) -> u64) -> bool {
        let mut changed = false;
        for (i, word) in self.words.iter_mut().enumerate() {
            let next = op(*word, other.words.get(i).copied().unwrap_or(0));
            changed |= next != *word;
            *word = next;
        }
        changed
    }

    /// Returns `true` if both sets hold the same bits, whatever their capacity.
    #[must_use]
    pub fn same_bits(&self, other: &Self) -> bool {
        let (short, long) = if self.words.len() <= other.words.len() {
            (&self.words, &other.words)
        } else {
            (&other.words, &self.words)
        };
        short.iter().zip(long.iter()).all(|(a, b)| a == b) && long[short.len()..].iter().all(|&w| w == 0)
    }

    /// Set bits in ascending order.
    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter {
            words: &self.words,
            word: 0,
            pending: self.words.first().copied().unwrap_or(0),
        }
    }
}

impl PartialEq for BitSet {
    fn eq(&self, other: &Self) -> bool {
        self.same_bits(other)
    }
}

impl Eq for BitSet {}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Iterator over the set bits of a [`BitSet`].
pub struct BitSetIter<'a> {
    words: &'a [u64],
    word: usize,
    pending: u64,
}

impl Iterator for BitSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.pending == 0 {
            self.word += 1;
            self.pending = *self.words.get(self.word)?;
        }
        let bit = self.pending.trailing_zeros() as usize;
        self.pending &= self.pending - 1;
        Some(self.word * WORD_BITS + bit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_past_capacity_grows() {
        let mut versions = BitSet::new(4);
        assert!(versions.is_empty());
        versions.insert(2);
        versions.insert(130);
        assert!(versions.capacity() > 130);
        assert!(versions.contains(130));
        assert!(!versions.contains(129));
        assert!(!versions.contains(10_000));
        assert_eq!(versions.count(), 2);

        versions.remove(2);
        versions.remove(10_000);
        assert_eq!(versions.iter().collect::<Vec<_>>(), vec![130]);
    }

    #[test]
    fn test_union_reports_change() {
        let mut a = BitSet::new(10);
        let mut b = BitSet::new(200);
        a.insert(1);
        b.insert(1);
        assert!(!a.union_with(&b));

        b.insert(150);
        assert!(a.union_with(&b));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1, 150]);
    }

    #[test]
    fn test_intersection_and_difference_with_shorter_set() {
        let mut a = BitSet::new(128);
        a.insert(1);
        a.insert(2);
        a.insert(70);
        let mut b = BitSet::new(8);
        b.insert(2);

        let mut both = a.clone();
        assert!(both.intersect_with(&b));
        assert_eq!(both.iter().collect::<Vec<_>>(), vec![2]);

        assert!(a.difference_with(&b));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1, 70]);
        assert!(!a.difference_with(&b));
    }

    #[test]
    fn test_equality_ignores_capacity() {
        let mut a = BitSet::new(10);
        let mut b = BitSet::new(500);
        a.insert(3);
        b.insert(3);
        assert_eq!(a, b);
        assert_eq!(b, a);
        b.insert(400);
        assert_ne!(a, b);
        assert_eq!(format!("{a:?}"), "{3}");
    }
}
