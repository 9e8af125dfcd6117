// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Folds harvested snapshots into per-error, per-transaction counts.

use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::debug;

use crate::directory::TransactionDirectory;
use crate::model::SnapshotRecord;

/// Name used for snapshots whose transaction is no longer in the directory.
pub const UNKNOWN_TRANSACTION: &str = "";

/// How the first occurrence of an (error, transaction) pair is counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CountingPolicy {
    /// First occurrence records 0; every pair ends at `occurrences - 1`.
    /// Matches the reports produced by earlier versions of the tool.
    #[default]
    FirstOccurrenceZero,
    /// First occurrence records 1; every pair ends at `occurrences`.
    FirstOccurrenceOne,
}

impl CountingPolicy {
    fn initial(self) -> u64 {
        match self {
            CountingPolicy::FirstOccurrenceZero => 0,
            CountingPolicy::FirstOccurrenceOne => 1,
        }
    }
}

/// error name -> transaction name -> count. Keys are kept sorted so the
/// serialized report is stable between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrequencyTable {
    errors: BTreeMap<String, BTreeMap<String, u64>>,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, error: &str, transaction: &str, policy: CountingPolicy) {
        let transactions = self.errors.entry(error.to_string()).or_default();
        match transactions.entry(transaction.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(policy.initial());
            }
            Entry::Occupied(mut entry) => *entry.get_mut() += 1,
        }
    }

    pub fn get(&self, error: &str, transaction: &str) -> Option<u64> {
        self.errors.get(error)?.get(transaction).copied()
    }

    pub fn transactions(&self, error: &str) -> Option<&BTreeMap<String, u64>> {
        self.errors.get(error)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, u64>)> {
        self.errors.iter()
    }

    /// Number of distinct error names.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn aggregate(
    records: impl IntoIterator<Item = SnapshotRecord>,
    directory: &TransactionDirectory,
    policy: CountingPolicy,
) -> FrequencyTable {
    let mut table = FrequencyTable::new();
    let mut unknown = 0usize;

    for record in records {
        let transaction = match directory.lookup(record.business_transaction_id) {
            Some(name) => name,
            None => {
                unknown += 1;
                UNKNOWN_TRANSACTION
            }
        };
        for detail in &record.error_details {
            table.record(&detail.name, transaction, policy);
        }
    }

    if unknown > 0 {
        debug!("{unknown} snapshots referenced business transactions missing from the directory");
    }
    table
}
