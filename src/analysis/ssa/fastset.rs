//! Bit sets over a registered element universe.
//!
//! A [`FastSparseSetFactory`] owns the registry assigning each element a bit
//! position. All sets spawned from one factory share that registry, so set
//! algebra between them is plain word-wise bit arithmetic. Elements unknown to
//! the registry are registered on first insertion and the universe grows.
//!
//! # Examples
//!
//! ```rust,ignore
//! use classflow::analysis::ssa::FastSparseSetFactory;
//!
//! let factory = FastSparseSetFactory::new([1, 2, 3]);
//! let mut a = factory.spawn_empty_set();
//! a.add(1);
//! a.add(7); // registers 7
//! let mut b = factory.spawn_empty_set();
//! b.add(7);
//! a.intersect_with(&b);
//! assert_eq!(a.to_vec(), vec![7]);
//! ```

use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    sync::{Arc, PoisonError, RwLock},
};

use crate::utils::BitSet;

#[derive(Debug)]
struct Registry<E> {
    positions: HashMap<E, usize>,
    elements: Vec<E>,
}

impl<E: Hash + Eq + Clone> Registry<E> {
    fn register(&mut self, element: E) -> usize {
        if let Some(&pos) = self.positions.get(&element) {
            return pos;
        }
        let pos = self.elements.len();
        self.positions.insert(element.clone(), pos);
        self.elements.push(element);
        pos
    }
}

type SharedRegistry<E> = Arc<RwLock<Registry<E>>>;

/// Creates [`FastSparseSet`]s sharing one element registry.
#[derive(Debug, Clone)]
pub struct FastSparseSetFactory<E> {
    registry: SharedRegistry<E>,
}

impl<E: Hash + Eq + Clone> FastSparseSetFactory<E> {
    /// Creates a factory whose universe starts with `initial`.
    pub fn new(initial: impl IntoIterator<Item = E>) -> Self {
        let mut registry = Registry {
            positions: HashMap::new(),
            elements: Vec::new(),
        };
        for element in initial {
            registry.register(element);
        }
        FastSparseSetFactory {
            registry: Arc::new(RwLock::new(registry)),
        }
    }

    /// An empty set over this factory's universe.
    #[must_use]
    pub fn spawn_empty_set(&self) -> FastSparseSet<E> {
        let len = self.universe_len();
        FastSparseSet {
            registry: Arc::clone(&self.registry),
            bits: BitSet::new(len),
        }
    }

    /// Number of registered elements.
    #[must_use]
    pub fn universe_len(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .elements
            .len()
    }
}

/// A set of elements of a shared universe, stored as bits.
pub struct FastSparseSet<E> {
    registry: SharedRegistry<E>,
    bits: BitSet,
}

impl<E> Clone for FastSparseSet<E> {
    fn clone(&self) -> Self {
        FastSparseSet {
            registry: Arc::clone(&self.registry),
            bits: self.bits.clone(),
        }
    }
}

impl<E: Hash + Eq + Clone> FastSparseSet<E> {
    fn position(&self, element: &E) -> Option<usize> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .positions
            .get(element)
            .copied()
    }

    /// Inserts `element`, registering it if needed.
    pub fn add(&mut self, element: E) {
        let pos = match self.position(&element) {
            Some(pos) => pos,
            None => self
                .registry
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .register(element),
        };
        self.bits.insert(pos);
    }

    /// Removes `element`.
    pub fn remove(&mut self, element: &E) {
        if let Some(pos) = self.position(element) {
            self.bits.remove(pos);
        }
    }

    /// Returns `true` if `element` is in the set.
    #[must_use]
    pub fn contains(&self, element: &E) -> bool {
        self.position(element).is_some_and(|pos| self.bits.contains(pos))
    }

    /// Returns `true` if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bits.count()
    }

    /// `self ∪= other`.
    pub fn union_with(&mut self, other: &Self) {
        self.bits.union_with(&other.bits);
    }

    /// `self ∩= other`.
    pub fn intersect_with(&mut self, other: &Self) {
        self.bits.intersect_with(&other.bits);
    }

    /// `self \= other`.
    pub fn complement_with(&mut self, other: &Self) {
        self.bits.difference_with(&other.bits);
    }

    /// `self ∪ other`.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.union_with(other);
        out
    }

    /// `self ∩ other`.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.intersect_with(other);
        out
    }

    /// The elements in registration order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<E> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        self.bits
            .iter()
            .filter_map(|pos| registry.elements.get(pos).cloned())
            .collect()
    }

    /// The only element of a one-element set.
    #[must_use]
    pub fn single(&self) -> Option<E> {
        if self.len() != 1 {
            return None;
        }
        self.to_vec().pop()
    }
}

impl<E> PartialEq for FastSparseSet<E> {
    fn eq(&self, other: &Self) -> bool {
        self.bits.same_bits(&other.bits)
    }
}

impl<E> Eq for FastSparseSet<E> {}

impl<E: Hash + Eq + Clone + fmt::Debug> fmt::Debug for FastSparseSet<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.to_vec()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_algebra_and_growth() {
        let factory = FastSparseSetFactory::new([1, 2, 3]);
        let mut a = factory.spawn_empty_set();
        a.add(1);
        a.add(3);
        a.add(40);
        assert_eq!(factory.universe_len(), 4);

        let mut b = factory.spawn_empty_set();
        b.add(3);
        b.add(40);
        assert!(a.contains(&40));
        assert!(!b.contains(&1));

        assert_eq!(a.intersection(&b).to_vec(), vec![3, 40]);
        let mut c = a.clone();
        c.complement_with(&b);
        assert_eq!(c.to_vec(), vec![1]);
        assert_eq!(c.single(), Some(1));
        assert_eq!(b.union(&c).len(), 3);
    }

    #[test]
    fn test_equality_ignores_capacity() {
        let factory = FastSparseSetFactory::new([5]);
        let mut a = factory.spawn_empty_set();
        let mut b = factory.spawn_empty_set();
        a.add(99);
        a.remove(&99);
        b.add(5);
        b.remove(&5);
        assert_eq!(a, b);
        assert!(a.is_empty());
    }
}
