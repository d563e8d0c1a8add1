//! Byte accounting for one propagation call

use ferrosync_types::{ItemId, ProgressSink, PropagationObserver};
use std::sync::atomic::{AtomicU64, Ordering};

/// Planned versus completed bytes across all items of a call
#[derive(Debug, Default)]
pub struct ProgressAccountant {
    planned: AtomicU64,
    done: AtomicU64,
    moved: AtomicU64,
}

impl ProgressAccountant {
    /// Create an empty accountant
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item's predicted size to the plan
    pub fn plan(&self, bytes: u64) {
        self.planned.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record bytes actually moved
    pub fn record(&self, bytes: u64) {
        self.done.fetch_add(bytes, Ordering::Relaxed);
        self.moved.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Account for a finished item that moved fewer bytes than predicted
    pub fn item_finished(&self, predicted: u64, moved: u64) {
        let shortfall = predicted.saturating_sub(moved);
        if shortfall > 0 {
            self.done.fetch_add(shortfall, Ordering::Relaxed);
        }
    }

    /// Total planned bytes
    pub fn bytes_planned(&self) -> u64 {
        self.planned.load(Ordering::Relaxed)
    }

    /// Bytes counted as done, including credit for finished items
    pub fn bytes_done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    /// Bytes actually transferred
    pub fn bytes_moved(&self) -> u64 {
        self.moved.load(Ordering::Relaxed)
    }

    /// Completion percentage, always within 0..=100
    pub fn percentage(&self) -> f64 {
        let planned = self.bytes_planned();
        if planned == 0 {
            return 0.0;
        }
        (self.bytes_done() as f64 / planned as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// Progress sink handed to the replica provider for one item
pub struct ItemProgress<'a> {
    item: ItemId,
    accountant: &'a ProgressAccountant,
    observer: &'a dyn PropagationObserver,
    moved: AtomicU64,
}

impl<'a> ItemProgress<'a> {
    /// Create a sink for `item`
    pub fn new(
        item: ItemId,
        accountant: &'a ProgressAccountant,
        observer: &'a dyn PropagationObserver,
    ) -> Self {
        Self {
            item,
            accountant,
            observer,
            moved: AtomicU64::new(0),
        }
    }

    /// Bytes moved for this item so far
    pub fn moved(&self) -> u64 {
        self.moved.load(Ordering::Relaxed)
    }

    /// Close the item, crediting whatever it was predicted to move but did not
    pub fn finish(&self, predicted: u64) {
        self.accountant.item_finished(predicted, self.moved());
        self.observer.percentage(self.accountant.percentage());
    }
}

impl ProgressSink for ItemProgress<'_> {
    fn bytes(&self, delta: u64) {
        if delta == 0 {
            return;
        }
        self.moved.fetch_add(delta, Ordering::Relaxed);
        self.accountant.record(delta);
        self.observer.progress(self.item, delta);
        self.observer.percentage(self.accountant.percentage());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrosync_types::NoopObserver;
    use proptest::prelude::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Percentages(Mutex<Vec<f64>>);

    impl PropagationObserver for Percentages {
        fn percentage(&self, percent: f64) {
            self.0.lock().unwrap().push(percent);
        }
    }

    #[test]
    fn test_percentage_empty_plan() {
        let accountant = ProgressAccountant::new();
        assert_eq!(accountant.percentage(), 0.0);
        accountant.record(10);
        assert_eq!(accountant.percentage(), 0.0);
    }

    #[test]
    fn test_shortfall_is_credited() {
        let accountant = ProgressAccountant::new();
        accountant.plan(100);
        accountant.record(40);
        assert_eq!(accountant.percentage(), 40.0);

        accountant.item_finished(100, 40);
        assert_eq!(accountant.bytes_done(), 100);
        assert_eq!(accountant.bytes_moved(), 40);
        assert_eq!(accountant.percentage(), 100.0);
    }

    #[test]
    fn test_item_progress_forwards() {
        let accountant = ProgressAccountant::new();
        let observer = NoopObserver;
        let sink = ItemProgress::new(ItemId(3), &accountant, &observer);

        sink.bytes(5);
        sink.bytes(0);
        sink.bytes(7);
        assert_eq!(sink.moved(), 12);
        assert_eq!(accountant.bytes_moved(), 12);
    }

    #[test]
    fn test_observer_sees_percentage() {
        let accountant = ProgressAccountant::new();
        accountant.plan(200);
        let observer = Percentages::default();

        let first = ItemProgress::new(ItemId(0), &accountant, &observer);
        first.bytes(50);
        first.finish(100);
        let second = ItemProgress::new(ItemId(1), &accountant, &observer);
        second.bytes(100);
        second.finish(100);

        assert_eq!(*observer.0.lock().unwrap(), vec![25.0, 50.0, 100.0, 100.0]);
    }

    proptest! {
        #[test]
        fn test_percentage_is_clamped(
            planned in 0u64..1_000_000,
            steps in proptest::collection::vec(0u64..100_000, 0..20),
        ) {
            let accountant = ProgressAccountant::new();
            accountant.plan(planned);
            for step in steps {
                accountant.record(step);
                let pct = accountant.percentage();
                prop_assert!((0.0..=100.0).contains(&pct));
            }
        }
    }
}
