//! Memory of slot identities already observed

use std::collections::{HashMap, HashSet};

use crate::record::{AvailabilityRecord, RecordIdentity};

/// Identities observed so far, each stamped with the poll that last saw it.
///
/// When the set grows past its ceiling, identities that were absent from the
/// most recent poll are evicted oldest-first. Identities present in the most
/// recent poll are never evicted, so a slot that is still on offer cannot be
/// reported again.
#[derive(Debug, Clone)]
pub struct SeenSet {
    entries: HashMap<RecordIdentity, u64>,
    generation: u64,
    ceiling: usize,
}

impl SeenSet {
    pub fn new(ceiling: usize) -> Self {
        Self {
            entries: HashMap::new(),
            generation: 0,
            ceiling: ceiling.max(1),
        }
    }

    /// Records whose identity has not been observed, deduplicated within the batch
    pub fn unseen(&self, records: &[AvailabilityRecord]) -> Vec<AvailabilityRecord> {
        let mut batch = HashSet::new();
        records
            .iter()
            .filter(|r| {
                let identity = r.identity();
                !self.entries.contains_key(&identity) && batch.insert(identity)
            })
            .cloned()
            .collect()
    }

    /// Mark every record of one poll as seen. Returns how many stale
    /// identities were evicted to stay under the ceiling.
    pub fn observe(&mut self, records: &[AvailabilityRecord]) -> usize {
        self.generation += 1;
        for record in records {
            self.entries.insert(record.identity(), self.generation);
        }

        if self.entries.len() <= self.ceiling {
            return 0;
        }

        let mut stale: Vec<(u64, RecordIdentity)> = self
            .entries
            .iter()
            .filter(|(_, generation)| **generation < self.generation)
            .map(|(identity, generation)| (*generation, identity.clone()))
            .collect();
        stale.sort();

        let excess = self.entries.len() - self.ceiling;
        let mut evicted = 0;
        for (_, identity) in stale.into_iter().take(excess) {
            self.entries.remove(&identity);
            evicted += 1;
        }

        if self.entries.len() > self.ceiling {
            tracing::warn!(
                "Latest poll alone holds {} slots, above the seen-set ceiling of {}",
                self.entries.len(),
                self.ceiling
            );
        } else {
            tracing::debug!("Evicted {} stale slot identities", evicted);
        }
        evicted
    }

    pub fn contains(&self, identity: &RecordIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }
}
