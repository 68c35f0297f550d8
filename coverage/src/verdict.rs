// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use serde::{Deserialize, Serialize};

use crate::document::DocumentPath;
use crate::map::CoverageMap;
use crate::outcome::TestOutcomeStore;

/// Coverage status of one source line.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum LineVerdict {
    NotCovered,
    Passed,
    Failed,
}

impl LineVerdict {
    /// Classify `line` using the covering block's tests and their last outcomes.
    ///
    /// A covering test without a stored outcome does not count as failed.
    pub fn for_line(
        coverage: &CoverageMap,
        outcomes: &TestOutcomeStore,
        document: &DocumentPath,
        line: u32,
    ) -> Self {
        let tests = coverage.find_tests_covering_line(document, line);

        if tests.is_empty() {
            return Self::NotCovered;
        }

        let failed = tests
            .iter()
            .filter_map(|id| outcomes.get(id))
            .any(|outcome| outcome.is_failed());

        if failed {
            Self::Failed
        } else {
            Self::Passed
        }
    }
}
