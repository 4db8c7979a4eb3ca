//! Variable → version-set maps used by the SSA constructors.
//!
//! Keys fall into three keyspaces stored in separate dense vectors:
//!
//! | Key | Storage index |
//! |-----|---------------|
//! | `0..STACK_BASE` (locals) | `key` |
//! | `>= STACK_BASE` (stack temporaries) | `key - STACK_BASE` |
//! | `< 0` (field pseudo variables) | `-key - 1` |

use std::fmt;

use crate::{analysis::ssa::fastset::FastSparseSet, structure::STACK_BASE};

/// Set of versions of one variable.
pub type VersionSet = FastSparseSet<i32>;

#[derive(Clone, Copy)]
enum Space {
    Local,
    Stack,
    Field,
}

fn locate(key: i32) -> (Space, usize) {
    if key < 0 {
        (Space::Field, (-(key + 1)) as usize)
    } else if key >= STACK_BASE {
        (Space::Stack, (key - STACK_BASE) as usize)
    } else {
        (Space::Local, key as usize)
    }
}

/// Sparse map from variable index to its current version set.
#[derive(Clone, Default)]
pub struct SFormsFastMapDirect {
    locals: Vec<Option<VersionSet>>,
    stack: Vec<Option<VersionSet>>,
    fields: Vec<Option<VersionSet>>,
}

impl SFormsFastMapDirect {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn space(&self, space: Space) -> &Vec<Option<VersionSet>> {
        match space {
            Space::Local => &self.locals,
            Space::Stack => &self.stack,
            Space::Field => &self.fields,
        }
    }

    fn space_mut(&mut self, space: Space) -> &mut Vec<Option<VersionSet>> {
        match space {
            Space::Local => &mut self.locals,
            Space::Stack => &mut self.stack,
            Space::Field => &mut self.fields,
        }
    }

    /// Version set of `key`.
    #[must_use]
    pub fn get(&self, key: i32) -> Option<&VersionSet> {
        let (space, index) = locate(key);
        self.space(space).get(index).and_then(Option::as_ref)
    }

    /// Mutable version set of `key`.
    pub fn get_mut(&mut self, key: i32) -> Option<&mut VersionSet> {
        let (space, index) = locate(key);
        self.space_mut(space).get_mut(index).and_then(Option::as_mut)
    }

    /// Stores `value` for `key`; `None` deletes the entry.
    pub fn put(&mut self, key: i32, value: Option<VersionSet>) {
        let (space, index) = locate(key);
        let slots = self.space_mut(space);
        if index >= slots.len() {
            if value.is_none() {
                return;
            }
            slots.resize_with(index + 1, || None);
        }
        slots[index] = value;
    }

    /// Deletes the entry of `key`.
    pub fn remove(&mut self, key: i32) {
        self.put(key, None);
    }

    /// Returns `true` if `key` has an entry.
    #[must_use]
    pub fn contains_key(&self, key: i32) -> bool {
        self.get(key).is_some()
    }

    /// Number of keys with a non-empty version set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Returns `true` if no key has a non-empty version set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys and non-empty version sets, locals first, then stack
    /// temporaries, then fields.
    #[must_use]
    pub fn entries(&self) -> Vec<(i32, &VersionSet)> {
        let mut out = Vec::new();
        let spaces: [(Space, &Vec<Option<VersionSet>>); 3] = [
            (Space::Local, &self.locals),
            (Space::Stack, &self.stack),
            (Space::Field, &self.fields),
        ];
        for (space, slots) in spaces {
            for (index, slot) in slots.iter().enumerate() {
                let Some(set) = slot else {
                    continue;
                };
                if set.is_empty() {
                    continue;
                }
                let index = index as i32;
                let key = match space {
                    Space::Local => index,
                    Space::Stack => index + STACK_BASE,
                    Space::Field => -index - 1,
                };
                out.push((key, set));
            }
        }
        out
    }

    /// Keys with a non-empty version set.
    #[must_use]
    pub fn keys(&self) -> Vec<i32> {
        self.entries().into_iter().map(|(k, _)| k).collect()
    }

    /// Merges `other` into `self`, key by key.
    pub fn union(&mut self, other: &SFormsFastMapDirect) {
        for (key, set) in other.entries() {
            match self.get_mut(key) {
                Some(own) => own.union_with(set),
                None => self.put(key, Some(set.clone())),
            }
        }
    }

    /// Keeps only the versions also present in `other`; keys missing from
    /// `other` or left empty are dropped.
    pub fn intersection(&mut self, other: &SFormsFastMapDirect) {
        for key in self.keys() {
            let keep = match (self.get_mut(key), other.get(key)) {
                (Some(own), Some(theirs)) => {
                    own.intersect_with(theirs);
                    !own.is_empty()
                }
                _ => false,
            };
            if !keep {
                self.remove(key);
            }
        }
    }

    /// Removes the versions present in `other`; keys left empty are dropped.
    pub fn complement(&mut self, other: &SFormsFastMapDirect) {
        for key in self.keys() {
            let Some(theirs) = other.get(key) else {
                continue;
            };
            let emptied = self.get_mut(key).is_some_and(|own| {
                own.complement_with(theirs);
                own.is_empty()
            });
            if emptied {
                self.remove(key);
            }
        }
    }

    /// Drops every field pseudo variable.
    pub fn remove_all_fields(&mut self) {
        self.fields.clear();
    }
}

impl PartialEq for SFormsFastMapDirect {
    fn eq(&self, other: &Self) -> bool {
        let mine = self.entries();
        let theirs = other.entries();
        mine.len() == theirs.len()
            && mine
                .iter()
                .zip(theirs.iter())
                .all(|((ka, sa), (kb, sb))| ka == kb && sa == sb)
    }
}

impl Eq for SFormsFastMapDirect {}

impl fmt::Debug for SFormsFastMapDirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries().into_iter().map(|(k, s)| (k, s.to_vec())))
            .finish()
    }
}
