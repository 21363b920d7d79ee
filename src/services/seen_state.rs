//! Seen-change bookkeeping across poll cycles.
//!
//! Remembers, per change, the `updated` timestamp of the last detail the
//! bot fully processed. `diff` is read-only; the store only changes through
//! explicit `commit`/`remove` calls, so a change whose fetch or post failed
//! keeps its old entry and is picked up again on the next cycle.

use crate::models::ChangeSummary;
use std::collections::{BTreeSet, HashMap};

/// Outcome of comparing a query result with the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenDiff {
    /// Changes never seen, or whose timestamp moved since last processed.
    pub new_or_updated: BTreeSet<String>,

    /// Changes the store knows about that the query no longer returns.
    pub deleted_since: BTreeSet<String>,
}

/// In-memory map of change id to last processed `updated` timestamp.
#[derive(Debug, Clone, Default)]
pub struct SeenStateStore {
    entries: HashMap<String, String>,
}

impl SeenStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare the current query result against the store.
    pub fn diff(&self, current: &[ChangeSummary]) -> SeenDiff {
        let new_or_updated = current
            .iter()
            .filter(|s| self.entries.get(&s.id) != Some(&s.updated))
            .map(|s| s.id.clone())
            .collect();

        let present: BTreeSet<&str> = current.iter().map(|s| s.id.as_str()).collect();
        let deleted_since = self
            .entries
            .keys()
            .filter(|id| !present.contains(id.as_str()))
            .cloned()
            .collect();

        SeenDiff {
            new_or_updated,
            deleted_since,
        }
    }

    /// Record that `id` was processed at `timestamp`.
    pub fn commit(&mut self, id: impl Into<String>, timestamp: impl Into<String>) {
        self.entries.insert(id.into(), timestamp.into());
    }

    /// Forget `id`. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Stored timestamp for `id`.
    pub fn get(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
