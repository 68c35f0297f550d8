// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::block::CodeBlock;
use crate::document::DocumentPath;
use crate::test_id::TestId;

/// How far taking a document's impacted tests reaches.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationMode {
    /// Only the taken document's entries are evicted.
    #[default]
    Local,

    /// The taken test ids are also stripped from every other document.
    Global,
}

/// Per-document index of code blocks to the tests that executed them.
///
/// Invariant: for every document, the impacted set equals the union of its
/// blocks' test sets.
#[derive(Clone, Debug, Default)]
pub struct CoverageMap {
    documents: HashMap<DocumentPath, DocumentCoverage>,
    mode: InvalidationMode,
}

#[derive(Clone, Debug, Default)]
struct DocumentCoverage {
    // Insertion order is observable through `find_tests_covering_line`.
    blocks: Vec<(CodeBlock, BTreeSet<TestId>)>,
    index: HashMap<CodeBlock, usize>,
    impacted: BTreeSet<TestId>,
}

impl DocumentCoverage {
    fn record(&mut self, test: TestId, block: CodeBlock) {
        let index = match self.index.get(&block) {
            Some(&index) => index,
            None => {
                let index = self.blocks.len();
                self.blocks.push((block, BTreeSet::new()));
                self.index.insert(block, index);
                index
            }
        };

        self.blocks[index].1.insert(test);
        self.impacted.insert(test);
    }

    fn strip(&mut self, tests: &BTreeSet<TestId>) {
        for (_, covering) in &mut self.blocks {
            covering.retain(|t| !tests.contains(t));
        }
        self.blocks.retain(|(_, covering)| !covering.is_empty());

        self.index = self
            .blocks
            .iter()
            .enumerate()
            .map(|(index, (block, _))| (*block, index))
            .collect();
        self.impacted.retain(|t| !tests.contains(t));
    }
}

impl CoverageMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mode: InvalidationMode) -> Self {
        Self {
            documents: HashMap::new(),
            mode,
        }
    }

    pub fn mode(&self) -> InvalidationMode {
        self.mode
    }

    /// Record that `test` executed `block` of `document`. Idempotent.
    pub fn record_hit(&mut self, test: TestId, document: &DocumentPath, block: CodeBlock) {
        self.documents
            .entry(document.clone())
            .or_default()
            .record(test, block);
    }

    /// Remove and return the tests impacted by `document`.
    ///
    /// All blocks of the document are evicted with it. Unknown documents yield
    /// an empty set and leave the map unchanged.
    pub fn take_impacted_tests(&mut self, document: &DocumentPath) -> BTreeSet<TestId> {
        let taken = match self.documents.remove(document) {
            Some(coverage) => coverage.impacted,
            None => return BTreeSet::new(),
        };

        if self.mode == InvalidationMode::Global && !taken.is_empty() {
            for coverage in self.documents.values_mut() {
                coverage.strip(&taken);
            }
            self.documents.retain(|_, coverage| !coverage.blocks.is_empty());
        }

        taken
    }

    /// Tests of the first block, in insertion order, whose line range contains `line`.
    ///
    /// Overlapping blocks are not merged: only the first match is reported.
    pub fn find_tests_covering_line(&self, document: &DocumentPath, line: u32) -> BTreeSet<TestId> {
        self.documents
            .get(document)
            .and_then(|coverage| {
                coverage
                    .blocks
                    .iter()
                    .find(|(block, _)| block.contains_line(line))
            })
            .map(|(_, tests)| tests.clone())
            .unwrap_or_default()
    }

    /// The impacted set of `document`, without evicting anything.
    pub fn impacted_tests(&self, document: &DocumentPath) -> BTreeSet<TestId> {
        self.documents
            .get(document)
            .map(|coverage| coverage.impacted.clone())
            .unwrap_or_default()
    }

    pub fn blocks<'a>(
        &'a self,
        document: &DocumentPath,
    ) -> impl Iterator<Item = (&'a CodeBlock, &'a BTreeSet<TestId>)> + 'a {
        self.documents
            .get(document)
            .into_iter()
            .flat_map(|coverage| coverage.blocks.iter().map(|(block, tests)| (block, tests)))
    }

    pub fn documents(&self) -> impl Iterator<Item = &DocumentPath> {
        self.documents.keys()
    }

    /// Number of documents with coverage.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn clear(&mut self) {
        self.documents.clear();
    }

    /// Replay every hit of `other` into `self`, preserving `other`'s block order.
    pub fn merge(&mut self, other: &CoverageMap) {
        for (document, coverage) in &other.documents {
            for (block, tests) in &coverage.blocks {
                for test in tests {
                    self.record_hit(*test, document, *block);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
