//! The set of key-ids currently diverted to the client
//!
//! The set is never edited in place. `replace` swaps in a complete new set
//! and readers take an `Arc` snapshot, so an event is always checked against
//! one whole set: the old one or the new one.

use crate::keyboard::KeyId;
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Default)]
pub struct SuppressionSet {
    current: RwLock<Arc<BTreeSet<KeyId>>>,
}

impl SuppressionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new set wholesale
    pub fn replace(&self, keys: impl IntoIterator<Item = KeyId>) {
        let next = Arc::new(keys.into_iter().collect::<BTreeSet<_>>());
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    pub fn clear(&self) {
        self.replace(std::iter::empty());
    }

    /// The set as it is right now
    pub fn snapshot(&self) -> Arc<BTreeSet<KeyId>> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn contains(&self, id: KeyId) -> bool {
        self.snapshot().contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}
