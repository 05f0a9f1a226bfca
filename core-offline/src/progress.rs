//! In-flight transfer progress
//!
//! Readers get copies; writers never move an entry backwards. A stale or
//! duplicate callback that reports fewer bytes than already recorded is
//! dropped, and the first known total is kept, so the fraction seen by any
//! observer only grows.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::watch;

use crate::types::ContentId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Progress {
    /// Total size not known yet.
    Indeterminate,
    /// Completed fraction in `[0, 1]`.
    Fraction(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
}

impl ProgressEntry {
    pub fn progress(&self) -> Progress {
        match self.total_bytes {
            None => Progress::Indeterminate,
            Some(0) => Progress::Fraction(1.0),
            Some(total) => {
                Progress::Fraction((self.bytes_transferred as f64 / total as f64).min(1.0))
            }
        }
    }
}

pub type ProgressSnapshot = HashMap<ContentId, Progress>;

pub struct ProgressTracker {
    entries: RwLock<HashMap<ContentId, ProgressEntry>>,
    snapshots: watch::Sender<ProgressSnapshot>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (snapshots, _) = watch::channel(HashMap::new());
        Self {
            entries: RwLock::new(HashMap::new()),
            snapshots,
        }
    }

    /// Record progress. Returns `false` when the update was stale and dropped.
    pub fn update(&self, content_id: &ContentId, bytes: u64, total: Option<u64>) -> bool {
        let snapshot = {
            let mut entries = self.entries.write();
            match entries.get_mut(content_id) {
                Some(entry) => {
                    let learned_total = entry.total_bytes.is_none() && total.is_some();
                    if bytes < entry.bytes_transferred
                        || (bytes == entry.bytes_transferred && !learned_total)
                    {
                        return false;
                    }
                    entry.bytes_transferred = bytes;
                    // The first known total sticks; a changing denominator could shrink the fraction.
                    if entry.total_bytes.is_none() {
                        entry.total_bytes = total;
                    }
                }
                None => {
                    entries.insert(
                        content_id.clone(),
                        ProgressEntry {
                            bytes_transferred: bytes,
                            total_bytes: total,
                        },
                    );
                }
            }
            Self::build_snapshot(&entries)
        };

        self.snapshots.send_replace(snapshot);
        true
    }

    pub fn remove(&self, content_id: &ContentId) -> Option<ProgressEntry> {
        let (removed, snapshot) = {
            let mut entries = self.entries.write();
            let removed = entries.remove(content_id);
            (removed, Self::build_snapshot(&entries))
        };

        if removed.is_some() {
            self.snapshots.send_replace(snapshot);
        }
        removed
    }

    pub fn entry(&self, content_id: &ContentId) -> Option<ProgressEntry> {
        self.entries.read().get(content_id).copied()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        Self::build_snapshot(&self.entries.read())
    }

    /// Receiver that observes a fresh snapshot after every accepted change.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn build_snapshot(entries: &HashMap<ContentId, ProgressEntry>) -> ProgressSnapshot {
        entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.progress()))
            .collect()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn id(s: &str) -> ContentId {
        ContentId::new(s)
    }

    fn fraction(progress: Progress) -> f64 {
        match progress {
            Progress::Fraction(f) => f,
            Progress::Indeterminate => 0.0,
        }
    }

    #[test]
    fn test_indeterminate_until_total_known() {
        let tracker = ProgressTracker::new();
        assert!(tracker.update(&id("m1"), 10, None));
        assert_eq!(tracker.snapshot()[&id("m1")], Progress::Indeterminate);

        assert!(tracker.update(&id("m1"), 10, Some(100)));
        assert_eq!(tracker.snapshot()[&id("m1")], Progress::Fraction(0.1));
    }

    #[test]
    fn test_stale_updates_are_dropped() {
        let tracker = ProgressTracker::new();
        assert!(tracker.update(&id("m1"), 50, Some(100)));
        assert!(!tracker.update(&id("m1"), 40, Some(100)));
        assert!(!tracker.update(&id("m1"), 50, Some(100)));
        assert!(!tracker.update(&id("m1"), 50, None));

        let entry = tracker.entry(&id("m1")).unwrap();
        assert_eq!(entry.bytes_transferred, 50);
        assert_eq!(entry.total_bytes, Some(100));
    }

    #[test]
    fn test_remove_and_subscribe() {
        let tracker = ProgressTracker::new();
        let receiver = tracker.subscribe();

        tracker.update(&id("m1"), 1, Some(4));
        assert_eq!(receiver.borrow()[&id("m1")], Progress::Fraction(0.25));

        assert!(tracker.remove(&id("m1")).is_some());
        assert!(receiver.borrow().is_empty());
        assert!(tracker.remove(&id("m1")).is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_fraction_is_clamped() {
        let entry = ProgressEntry {
            bytes_transferred: 150,
            total_bytes: Some(100),
        };
        assert_eq!(entry.progress(), Progress::Fraction(1.0));
    }

    #[test]
    fn test_concurrent_writers_stay_monotonic() {
        let tracker = Arc::new(ProgressTracker::new());
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for step in 0..500u64 {
                        tracker.update(&id("m1"), step * 4 + worker, Some(2_000));
                    }
                })
            })
            .collect();

        let mut last = 0.0;
        for _ in 0..200 {
            let current = tracker
                .snapshot()
                .get(&id("m1"))
                .copied()
                .map(fraction)
                .unwrap_or(0.0);
            assert!(current >= last);
            last = current;
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.entry(&id("m1")).unwrap().bytes_transferred, 1_999);
    }

    proptest! {
        #[test]
        fn prop_fraction_never_decreases(
            updates in proptest::collection::vec((0u64..1_000, proptest::option::of(500u64..1_000)), 1..64)
        ) {
            let tracker = ProgressTracker::new();
            let mut last = 0.0;

            for (bytes, total) in updates {
                tracker.update(&id("m1"), bytes, total);
                let current = fraction(tracker.snapshot()[&id("m1")]);
                prop_assert!(current >= last, "{} dropped below {}", current, last);
                last = current;
            }
        }
    }
}
