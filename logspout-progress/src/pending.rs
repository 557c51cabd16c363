//! Pending-offset set backed by a `RoaringTreemap`.
//!
//! Offsets are stored as absolute u64 values, so a sparse log with gaps
//! wider than `u32::MAX` is tracked like a dense one, and a retried offset
//! below every other pending offset needs no special handling.

use logspout_core::Offset;
use roaring::RoaringTreemap;

/// Offsets emitted downstream and not yet resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingSet {
    offsets: RoaringTreemap,
}

impl PendingSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending offsets.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.offsets.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Adds an offset. Returns false if it was already pending.
    pub fn insert(&mut self, offset: Offset) -> bool {
        self.offsets.insert(offset.get())
    }

    /// Removes an offset. Returns false if it was not pending.
    pub fn remove(&mut self, offset: Offset) -> bool {
        self.offsets.remove(offset.get())
    }

    /// Returns true if the offset is pending.
    #[must_use]
    pub fn contains(&self, offset: Offset) -> bool {
        self.offsets.contains(offset.get())
    }

    /// Lowest pending offset.
    #[must_use]
    pub fn min(&self) -> Option<Offset> {
        self.offsets.min().map(Offset::new)
    }

    /// Highest pending offset.
    #[must_use]
    pub fn max(&self) -> Option<Offset> {
        self.offsets.max().map(Offset::new)
    }

    /// Removes every offset below `offset`, returning how many were dropped.
    pub fn clear_before(&mut self, offset: Offset) -> u64 {
        self.offsets.remove_range(..offset.get())
    }

    /// Iterates pending offsets in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Offset> + '_ {
        self.offsets.iter().map(Offset::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove_and_min() {
        let mut pending = PendingSet::new();

        assert!(pending.insert(Offset::new(105)));
        assert!(pending.insert(Offset::new(101)));
        assert!(!pending.insert(Offset::new(101)));

        assert_eq!(pending.len(), 2);
        assert_eq!(pending.min(), Some(Offset::new(101)));
        assert_eq!(pending.max(), Some(Offset::new(105)));

        assert!(pending.remove(Offset::new(101)));
        assert!(!pending.remove(Offset::new(101)));
        assert_eq!(pending.min(), Some(Offset::new(105)));

        assert!(!pending.contains(Offset::new(5)));
        assert!(!pending.remove(Offset::new(5)));
    }

    #[test]
    fn test_far_apart_offsets() {
        let mut pending = PendingSet::new();
        let far = Offset::new(u64::from(u32::MAX) + 10);
        let farther = Offset::new(u64::MAX - 1);

        assert!(pending.insert(Offset::new(5)));
        assert!(pending.insert(far));
        assert!(pending.insert(farther));
        assert_eq!(pending.len(), 3);
        assert_eq!(pending.min(), Some(Offset::new(5)));
        assert_eq!(pending.max(), Some(farther));

        // A redelivered offset below everything else is accepted.
        pending.remove(Offset::new(5));
        assert!(pending.insert(Offset::new(0)));
        assert_eq!(pending.min(), Some(Offset::new(0)));

        let offsets: Vec<u64> = pending.iter().map(Offset::get).collect();
        assert_eq!(offsets, vec![0, far.get(), farther.get()]);
    }

    #[test]
    fn test_clear_before() {
        let mut pending = PendingSet::new();
        for offset in [10, 11, 15, 30] {
            pending.insert(Offset::new(offset));
        }

        assert_eq!(pending.clear_before(Offset::new(15)), 2);
        assert_eq!(pending.min(), Some(Offset::new(15)));

        assert_eq!(pending.clear_before(Offset::new(5)), 0);
        assert_eq!(pending.len(), 2);

        let far = Offset::new(u64::from(u32::MAX) * 3);
        pending.insert(far);
        assert_eq!(pending.clear_before(Offset::new(u64::from(u32::MAX))), 2);
        assert_eq!(pending.min(), Some(far));
    }
}
