//! The merge contract for replicated metadata.
//!
//! All implementations must satisfy, for any `a`, `b`, `c`:
//! - **Commutativity:** `a ⊔ b == b ⊔ a`
//! - **Associativity:** `(a ⊔ b) ⊔ c == a ⊔ (b ⊔ c)`
//! - **Idempotency:** `a ⊔ a == a`
//!
//! The change handler never looks inside a metadata value; it only joins and
//! transmits it whole.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::hash::Hash;

/// A join-semilattice.
pub trait Semilattice {
    /// Join `other` into `self`, leaving `self` at least as informed as both.
    fn join(&mut self, other: &Self);

    /// By-value join.
    fn joined(mut self, other: &Self) -> Self
    where
        Self: Sized,
    {
        self.join(other);
        self
    }
}

/// Everything a value needs to be negotiated between nodes.
pub trait Metadata: Semilattice + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Metadata for T where
    T: Semilattice + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T: Ord + Clone> Semilattice for BTreeSet<T> {
    fn join(&mut self, other: &Self) {
        self.extend(other.iter().cloned());
    }
}

impl<T: Eq + Hash + Clone> Semilattice for HashSet<T> {
    fn join(&mut self, other: &Self) {
        self.extend(other.iter().cloned());
    }
}

impl<K: Ord + Clone, V: Semilattice + Clone> Semilattice for BTreeMap<K, V> {
    fn join(&mut self, other: &Self) {
        for (key, value) in other {
            match self.get_mut(key) {
                Some(existing) => existing.join(value),
                None => {
                    self.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

impl<V: Semilattice + Clone> Semilattice for Option<V> {
    fn join(&mut self, other: &Self) {
        let Some(value) = other else {
            return;
        };
        if let Some(existing) = self {
            existing.join(value);
        } else {
            *self = Some(value.clone());
        }
    }
}

impl Semilattice for bool {
    fn join(&mut self, other: &Self) {
        *self |= *other;
    }
}

impl Semilattice for u64 {
    fn join(&mut self, other: &Self) {
        *self = (*self).max(*other);
    }
}

/// A last-writer-wins register.
///
/// Ordered by `(version, writer)`; the writer breaks ties between equal
/// versions so the join stays commutative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub writer: String,
    pub value: T,
}

impl<T> Versioned<T> {
    /// `value` as written by `writer` at `version`.
    pub fn new(version: u64, writer: impl Into<String>, value: T) -> Self {
        Self {
            version,
            writer: writer.into(),
            value,
        }
    }

    /// A successor of `self` written by `writer`.
    pub fn supersede(&self, writer: impl Into<String>, value: T) -> Self {
        Self::new(self.version + 1, writer, value)
    }
}

impl<T: Clone> Semilattice for Versioned<T> {
    fn join(&mut self, other: &Self) {
        if (other.version, &other.writer) > (self.version, &self.writer) {
            *self = other.clone();
        }
    }
}
