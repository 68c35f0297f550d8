// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(clippy::new_without_default)]

#[macro_use]
extern crate log;

pub mod block;
pub mod document;
pub mod error;
pub mod impact;
pub mod map;
pub mod outcome;
pub mod test_id;
pub mod universe;
pub mod verdict;

pub use block::CodeBlock;
pub use document::DocumentPath;
pub use error::IngestError;
pub use impact::ImpactAnalyzer;
pub use map::{CoverageMap, InvalidationMode};
pub use outcome::{Outcome, TestOutcomeStore, TestStatus};
pub use test_id::TestId;
pub use universe::{TestUniverse, UnitTest};
pub use verdict::LineVerdict;
