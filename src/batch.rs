// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Batch planner.
//!
//! Splits a [`Diff`] into consecutive windows that are each sent as one update
//! transaction. Order is preserved and a replacement pair (see
//! [`Diff::is_paired_with_next`]) always lands in a single batch: when a window
//! would end between the two halves it is cut one operation early instead.
//!
//! With a limit of one, a pair still travels together as a batch of two; a
//! batch is never allowed to hold half of a replacement.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use crate::diff::{Diff, DiffOperation};
use crate::errors::ConfigError;

/// Upper bound on operations per update transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchSize {
    /// The whole diff is sent as one transaction
    #[default]
    Unbounded,
    /// At most this many operations per transaction (pairs excepted)
    Limited(NonZeroUsize),
}

impl BatchSize {
    /// Validate a user-supplied limit.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBatchSize`] for zero or negative values.
    pub fn new(value: i64) -> Result<Self, ConfigError> {
        usize::try_from(value)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(Self::Limited)
            .ok_or(ConfigError::InvalidBatchSize { value })
    }

    /// The limit, or `None` when unbounded
    #[must_use]
    pub fn limit(&self) -> Option<usize> {
        match self {
            Self::Unbounded => None,
            Self::Limited(n) => Some(n.get()),
        }
    }
}

impl FromStr for BatchSize {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<i64>()
            .map_err(|_| ConfigError::Invalid {
                reason: format!("Batch size must be a positive integer, got '{s}'"),
            })?;
        Self::new(value)
    }
}

impl fmt::Display for BatchSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbounded => f.write_str("unbounded"),
            Self::Limited(n) => write!(f, "{n}"),
        }
    }
}

/// A contiguous view over part of a diff, sent as one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch<'a> {
    index: usize,
    operations: &'a [DiffOperation],
}

impl<'a> Batch<'a> {
    /// Wrap a slice of operations as batch number `index`.
    #[must_use]
    pub fn new(index: usize, operations: &'a [DiffOperation]) -> Self {
        Self { index, operations }
    }

    /// Zero-based position of this batch in the plan
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Operations carried by this batch
    #[must_use]
    pub fn operations(&self) -> &'a [DiffOperation] {
        self.operations
    }

    /// Number of operations
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if the batch carries no operations
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Partition `diff` into batches of at most `max` operations.
///
/// An empty diff yields no batches.
#[must_use]
pub fn plan_batches(diff: &Diff, max: BatchSize) -> Vec<Batch<'_>> {
    let operations = diff.operations();
    let Some(limit) = max.limit() else {
        return if operations.is_empty() {
            Vec::new()
        } else {
            vec![Batch::new(0, operations)]
        };
    };

    let mut batches = Vec::new();
    let mut start = 0;
    while start < operations.len() {
        let mut end = (start + limit).min(operations.len());
        if end < operations.len() && diff.is_paired_with_next(end - 1) {
            if end - start > 1 {
                end -= 1;
            } else {
                // A pair on its own exceeds the limit.
                end += 1;
            }
        }
        batches.push(Batch::new(batches.len(), &operations[start..end]));
        start = end;
    }
    batches
}

#[cfg(test)]
#[path = "batch_tests.rs"]
mod batch_tests;
