// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation engine.
//!
//! [`compute_diff`] turns a live [`ZoneSnapshot`] and a [`DesiredState`] into the
//! ordered list of additions and removals that converges the zone. Records are
//! matched by full equality, so a ttl change shows up as a remove/add pair on the
//! same slot. Pairs are tracked so the batch planner can keep them in one
//! transaction.
//!
//! Operation order for each owner name:
//! 1. removals with no replacement, in canonical order
//! 2. replacement pairs (`Remove(live)` then `Add(desired)`), in canonical order
//!    of the addition
//! 3. additions with no predecessor, in canonical order
//!
//! Owner names follow the desired-state order, then names only present in the
//! live zone in canonical name order.

use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

use crate::records::{equals, same_slot, DesiredState, ResourceRecord};
use crate::snapshot::ZoneSnapshot;

/// One step of a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOperation {
    /// Add the record to the zone
    Add(ResourceRecord),
    /// Remove exactly this record from the zone
    Remove(ResourceRecord),
}

impl DiffOperation {
    /// The record this operation acts on
    #[must_use]
    pub fn record(&self) -> &ResourceRecord {
        match self {
            Self::Add(record) | Self::Remove(record) => record,
        }
    }

    /// Returns true for additions
    #[must_use]
    pub fn is_add(&self) -> bool {
        matches!(self, Self::Add(_))
    }
}

impl fmt::Display for DiffOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add(record) => write!(f, "+ {record}"),
            Self::Remove(record) => write!(f, "- {record}"),
        }
    }
}

/// Ordered operations converging a zone, with replacement pairs marked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    operations: Vec<DiffOperation>,
    pair_starts: BTreeSet<usize>,
}

impl Diff {
    /// All operations, in application order
    #[must_use]
    pub fn operations(&self) -> &[DiffOperation] {
        &self.operations
    }

    /// Number of operations
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if the zone already matches
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Returns true if the operation at `index` is the removal half of a
    /// replacement pair whose addition follows at `index + 1`.
    #[must_use]
    pub fn is_paired_with_next(&self, index: usize) -> bool {
        self.pair_starts.contains(&index)
    }

    /// Number of replacement pairs
    #[must_use]
    pub fn pairs(&self) -> usize {
        self.pair_starts.len()
    }

    /// Number of additions
    #[must_use]
    pub fn additions(&self) -> usize {
        self.operations.iter().filter(|op| op.is_add()).count()
    }

    /// Number of removals
    #[must_use]
    pub fn removals(&self) -> usize {
        self.len() - self.additions()
    }

    fn push(&mut self, operation: DiffOperation) {
        self.operations.push(operation);
    }

    fn push_pair(&mut self, remove: ResourceRecord, add: ResourceRecord) {
        self.pair_starts.insert(self.operations.len());
        self.operations.push(DiffOperation::Remove(remove));
        self.operations.push(DiffOperation::Add(add));
    }
}

/// Compute the operations that transform `live` into `desired`.
///
/// Reserved owner names and server-managed types are never touched, even if a
/// caller hands in a snapshot that still contains them.
#[must_use]
pub fn compute_diff(live: &ZoneSnapshot, desired: &DesiredState) -> Diff {
    let reserved = desired.reserved();
    let mut diff = Diff::default();

    let desired_names = desired.iter().map(|(name, _)| name);
    let live_only = live
        .names()
        .filter(|name| desired.records_at(name).is_empty());

    for name in desired_names.chain(live_only) {
        if reserved.is_reserved(name) {
            continue;
        }

        let live_records: Vec<&ResourceRecord> = live
            .records_at(name)
            .iter()
            .filter(|r| !reserved.excludes(r))
            .collect();
        let desired_records = desired.records_at(name);

        diff_owner(&mut diff, &live_records, desired_records);
    }

    debug!(
        zone = %desired.zone(),
        operations = diff.len(),
        additions = diff.additions(),
        removals = diff.removals(),
        pairs = diff.pairs(),
        "Computed diff"
    );
    diff
}

fn diff_owner(diff: &mut Diff, live: &[&ResourceRecord], desired: &[ResourceRecord]) {
    let mut removals: Vec<&ResourceRecord> = live
        .iter()
        .copied()
        .filter(|l| !desired.iter().any(|d| equals(l, d)))
        .collect();
    let mut additions: Vec<&ResourceRecord> = desired
        .iter()
        .filter(|d| !live.iter().any(|l| equals(l, d)))
        .collect();
    removals.sort_by(|a, b| a.canonical_cmp(b));
    additions.sort_by(|a, b| a.canonical_cmp(b));

    // Match each addition to at most one removal occupying the same slot.
    let mut pairs: Vec<(&ResourceRecord, &ResourceRecord)> = Vec::new();
    additions.retain(|add| {
        match removals.iter().position(|remove| same_slot(remove, add)) {
            Some(index) => {
                pairs.push((removals.remove(index), *add));
                false
            }
            None => true,
        }
    });

    for remove in removals {
        diff.push(DiffOperation::Remove(remove.clone()));
    }
    for (remove, add) in pairs {
        diff.push_pair(remove.clone(), add.clone());
    }
    for add in additions {
        diff.push(DiffOperation::Add(add.clone()));
    }
}

#[cfg(test)]
#[path = "diff_tests.rs"]
mod diff_tests;
