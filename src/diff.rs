//! Comparing two runs' slot lists.

use crate::shisetsu::SlotRecord;
use crate::shisetsu::slots::sort_for_output;
use std::collections::HashSet;

/// Slots that appeared and disappeared between two runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotDiff {
    pub added: Vec<SlotRecord>,
    pub removed: Vec<SlotRecord>,
}

impl SlotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Compare by uniqueness key; both sides come back sorted by (date, time slot).
pub fn diff(previous: &[SlotRecord], current: &[SlotRecord]) -> SlotDiff {
    let before: HashSet<_> = previous.iter().map(SlotRecord::key).collect();
    let after: HashSet<_> = current.iter().map(SlotRecord::key).collect();

    let mut added: Vec<SlotRecord> = current
        .iter()
        .filter(|r| !before.contains(&r.key()))
        .cloned()
        .collect();
    let mut removed: Vec<SlotRecord> = previous
        .iter()
        .filter(|r| !after.contains(&r.key()))
        .cloned()
        .collect();

    sort_for_output(&mut added);
    sort_for_output(&mut removed);
    SlotDiff { added, removed }
}
