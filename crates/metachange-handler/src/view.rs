//! Node-local metadata views.

use metachange_core::Semilattice;
use tokio::sync::watch;

/// The node-local copy of a metadata value.
///
/// `merge_in` is the only mutator; it joins, never replaces.
pub trait MetadataView<T>: Send + Sync {
    fn get(&self) -> T;
    fn merge_in(&self, update: &T);
}

/// A view held in memory, observable through [`InMemoryView::subscribe`].
pub struct InMemoryView<T> {
    value: watch::Sender<T>,
}

impl<T: Semilattice + Clone + Send + Sync> InMemoryView<T> {
    /// A view starting at `initial`.
    pub fn new(initial: T) -> Self {
        let (value, _) = watch::channel(initial);
        Self { value }
    }

    /// A receiver that observes every merge, including ones that leave the
    /// value unchanged.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.value.subscribe()
    }
}

impl<T: Semilattice + Clone + Default + Send + Sync> Default for InMemoryView<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Semilattice + Clone + Send + Sync> MetadataView<T> for InMemoryView<T> {
    fn get(&self) -> T {
        self.value.borrow().clone()
    }

    fn merge_in(&self, update: &T) {
        self.value.send_modify(|value| value.join(update));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn merge_joins_and_notifies() {
        let view = InMemoryView::new(BTreeSet::from([1u32]));
        let mut rx = view.subscribe();

        view.merge_in(&BTreeSet::from([2]));
        assert_eq!(view.get(), BTreeSet::from([1, 2]));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), BTreeSet::from([1, 2]));

        view.merge_in(&BTreeSet::from([1]));
        assert_eq!(view.get(), BTreeSet::from([1, 2]));
        assert!(rx.has_changed().unwrap());
    }
}
