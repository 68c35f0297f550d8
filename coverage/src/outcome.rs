// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::test_id::TestId;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TestStatus {
    Passed,
    Failed,
}

/// Last known result of a single test.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Outcome {
    pub name: String,
    pub status: TestStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Outcome {
    pub fn passed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TestStatus::Passed,
            message: None,
        }
    }

    pub fn failed(name: impl Into<String>, message: Option<String>) -> Self {
        Self {
            name: name.into(),
            status: TestStatus::Failed,
            message,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == TestStatus::Failed
    }
}

/// Test id to last known outcome.
#[derive(Clone, Debug, Default)]
pub struct TestOutcomeStore {
    outcomes: BTreeMap<TestId, Outcome>,
}

impl TestOutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert; the last write wins.
    pub fn record(&mut self, id: TestId, outcome: Outcome) {
        self.outcomes.insert(id, outcome);
    }

    /// Drop every outcome whose test is not in `current`. Returns the number removed.
    pub fn prune_missing(&mut self, current: &BTreeSet<TestId>) -> usize {
        let before = self.outcomes.len();
        self.outcomes.retain(|id, _| current.contains(id));
        let removed = before - self.outcomes.len();

        if removed > 0 {
            debug!("pruned {} outcomes of tests no longer discovered", removed);
        }

        removed
    }

    /// Forget the outcome of `id`, so it is treated as never run.
    pub fn remove(&mut self, id: &TestId) -> Option<Outcome> {
        self.outcomes.remove(id)
    }

    pub fn snapshot(&self) -> BTreeMap<TestId, Outcome> {
        self.outcomes.clone()
    }

    pub fn get(&self, id: &TestId) -> Option<&Outcome> {
        self.outcomes.get(id)
    }

    pub fn known_ids(&self) -> BTreeSet<TestId> {
        self.outcomes.keys().copied().collect()
    }

    pub fn contains(&self, id: &TestId) -> bool {
        self.outcomes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn clear(&mut self) {
        self.outcomes.clear();
    }

    /// Record every outcome of `other` into `self`.
    pub fn merge(&mut self, other: TestOutcomeStore) {
        self.outcomes.extend(other.outcomes);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TestId, &Outcome)> {
        self.outcomes.iter()
    }
}
