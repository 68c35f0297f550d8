// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeSet;

use crate::document::DocumentPath;
use crate::map::CoverageMap;
use crate::outcome::TestOutcomeStore;
use crate::test_id::TestId;
use crate::universe::TestUniverse;

/// Chooses which discovered tests must run after a document changes.
pub struct ImpactAnalyzer<'a> {
    coverage: &'a mut CoverageMap,
    outcomes: &'a mut TestOutcomeStore,
}

impl<'a> ImpactAnalyzer<'a> {
    pub fn new(coverage: &'a mut CoverageMap, outcomes: &'a mut TestOutcomeStore) -> Self {
        Self { coverage, outcomes }
    }

    /// Tests to run because `document` changed.
    ///
    /// With no stored outcomes every discovered test runs. Otherwise a test runs
    /// if it touched `document` in its last recorded run, or if it has never run.
    /// Consumes the document's coverage.
    pub fn analyze(
        &mut self,
        document: &DocumentPath,
        universe: &TestUniverse,
    ) -> BTreeSet<TestId> {
        if self.outcomes.is_empty() {
            return universe.ids();
        }

        self.outcomes.prune_missing(&universe.ids());

        let impacted = self.coverage.take_impacted_tests(document);
        let selected: BTreeSet<TestId> = universe
            .iter()
            .map(|test| test.id)
            .filter(|id| impacted.contains(id) || !self.outcomes.contains(id))
            .collect();

        debug!(
            "document {} impacts {} tests, {} selected of {}",
            document,
            impacted.len(),
            selected.len(),
            universe.len()
        );

        selected
    }

    /// Union of [`ImpactAnalyzer::analyze`] over `documents`.
    pub fn analyze_all<'d>(
        &mut self,
        documents: impl IntoIterator<Item = &'d DocumentPath>,
        universe: &TestUniverse,
    ) -> BTreeSet<TestId> {
        let mut selected = BTreeSet::new();

        for document in documents {
            selected.extend(self.analyze(document, universe));
        }

        selected
    }
}
