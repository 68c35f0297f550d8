// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeSet;

use anyhow::Result;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::*;

fn block(line: u32, end_line: u32) -> CodeBlock {
    CodeBlock {
        line,
        column: 1,
        end_line,
        end_column: 80,
    }
}

fn ids(names: &[&str]) -> BTreeSet<TestId> {
    names.iter().map(|n| TestId::from_name(n)).collect()
}

#[test]
fn test_take_evicts_document() -> Result<()> {
    let mut map = CoverageMap::new();
    let a: DocumentPath = "A.cs".into();
    let t = TestId::from_name("T.T.T");

    map.record_hit(t, &a, block(1, 3));

    assert_eq!(map.take_impacted_tests(&a), ids(&["T.T.T"]));
    assert!(map.take_impacted_tests(&a).is_empty());
    assert!(map.find_tests_covering_line(&a, 2).is_empty());
    assert!(map.is_empty());

    Ok(())
}

#[test]
fn test_take_unrelated_document() {
    let mut map = CoverageMap::new();
    let a: DocumentPath = "A.cs".into();
    let b: DocumentPath = "B.cs".into();
    let t = TestId::from_name("T.T.T");

    map.record_hit(t, &a, block(1, 3));

    assert!(map.take_impacted_tests(&b).is_empty());
    assert_eq!(map.impacted_tests(&a), ids(&["T.T.T"]));
    assert_eq!(map.find_tests_covering_line(&a, 2), ids(&["T.T.T"]));
}

#[test]
fn test_record_hit_is_idempotent() {
    let mut once = CoverageMap::new();
    let mut twice = CoverageMap::new();
    let a: DocumentPath = "A.cs".into();
    let t = TestId::from_name("T.T.T");

    once.record_hit(t, &a, block(1, 3));
    twice.record_hit(t, &a, block(1, 3));
    twice.record_hit(t, &a, block(1, 3));

    assert_eq!(twice.blocks(&a).count(), 1);
    assert_eq!(
        once.find_tests_covering_line(&a, 1),
        twice.find_tests_covering_line(&a, 1)
    );
    assert_eq!(once.impacted_tests(&a), twice.impacted_tests(&a));
}

#[test]
fn test_documents_are_case_insensitive() {
    let mut map = CoverageMap::new();
    let t = TestId::from_name("T.T.T");

    map.record_hit(t, &r"C:\src\Gear.cs".into(), block(1, 3));

    assert_eq!(map.len(), 1);
    assert_eq!(
        map.take_impacted_tests(&r"c:\SRC\gear.cs".into()),
        ids(&["T.T.T"])
    );
}

#[test]
fn test_find_is_first_match_not_union() {
    let mut map = CoverageMap::new();
    let a: DocumentPath = "A.cs".into();

    map.record_hit(TestId::from_name("Outer.T.T"), &a, block(1, 20));
    map.record_hit(TestId::from_name("Inner.T.T"), &a, block(5, 10));

    assert_eq!(map.find_tests_covering_line(&a, 7), ids(&["Outer.T.T"]));
    assert!(map.find_tests_covering_line(&a, 21).is_empty());
    assert!(map.find_tests_covering_line(&"B.cs".into(), 7).is_empty());
}

#[test]
fn test_exact_span_blocks_are_distinct() {
    let mut map = CoverageMap::new();
    let a: DocumentPath = "A.cs".into();

    let first = CodeBlock {
        line: 5,
        column: 1,
        end_line: 5,
        end_column: 10,
    };
    let second = CodeBlock {
        column: 12,
        end_column: 20,
        ..first
    };

    map.record_hit(TestId::from_name("One.T.T"), &a, first);
    map.record_hit(TestId::from_name("Two.T.T"), &a, second);

    assert_eq!(map.blocks(&a).count(), 2);
    assert_eq!(map.impacted_tests(&a), ids(&["One.T.T", "Two.T.T"]));
}

#[test]
fn test_global_invalidation_strips_other_documents() {
    let mut map = CoverageMap::with_mode(InvalidationMode::Global);
    let a: DocumentPath = "A.cs".into();
    let b: DocumentPath = "B.cs".into();
    let shared = TestId::from_name("Shared.T.T");
    let only_b = TestId::from_name("OnlyB.T.T");

    map.record_hit(shared, &a, block(1, 3));
    map.record_hit(shared, &b, block(1, 3));
    map.record_hit(only_b, &b, block(1, 3));
    map.record_hit(shared, &b, block(7, 9));

    assert_eq!(map.take_impacted_tests(&a), ids(&["Shared.T.T"]));

    assert_eq!(map.impacted_tests(&b), ids(&["OnlyB.T.T"]));
    assert_eq!(map.blocks(&b).count(), 1);
    assert!(map.find_tests_covering_line(&b, 8).is_empty());
}

#[test]
fn test_local_invalidation_keeps_other_documents() {
    let mut map = CoverageMap::new();
    let a: DocumentPath = "A.cs".into();
    let b: DocumentPath = "B.cs".into();
    let shared = TestId::from_name("Shared.T.T");

    map.record_hit(shared, &a, block(1, 3));
    map.record_hit(shared, &b, block(1, 3));

    map.take_impacted_tests(&a);

    assert_eq!(map.impacted_tests(&b), ids(&["Shared.T.T"]));
}

#[test]
fn test_merge_replays_hits() {
    let a: DocumentPath = "A.cs".into();

    let mut staged = CoverageMap::new();
    staged.record_hit(TestId::from_name("X.T.T"), &a, block(1, 3));

    let mut map = CoverageMap::new();
    map.record_hit(TestId::from_name("Y.T.T"), &a, block(1, 3));
    map.merge(&staged);

    assert_eq!(map.impacted_tests(&a), ids(&["X.T.T", "Y.T.T"]));
}

fn arb_hit() -> impl Strategy<Value = (u8, u8, u32, u32)> {
    (0u8..4, 0u8..6, 1u32..30, 0u32..5)
}

proptest! {
    #[test]
    fn test_impacted_is_union_of_blocks(
        hits in prop::collection::vec(arb_hit(), 0..64),
        taken in 0u8..4,
        global in any::<bool>(),
    ) {
        let mode = if global { InvalidationMode::Global } else { InvalidationMode::Local };
        let mut map = CoverageMap::with_mode(mode);

        for (doc, test, line, len) in &hits {
            let document = DocumentPath::new(format!("doc{}.cs", doc));
            let test = TestId::from_name(&format!("T.T.T{}", test));
            map.record_hit(test, &document, block(*line, line + len));
        }

        map.take_impacted_tests(&DocumentPath::new(format!("doc{}.cs", taken)));

        let documents: Vec<_> = map.documents().cloned().collect();
        for document in documents {
            let union: BTreeSet<TestId> = map
                .blocks(&document)
                .flat_map(|(_, tests)| tests.iter().copied())
                .collect();

            prop_assert_eq!(union, map.impacted_tests(&document));
        }
    }

    #[test]
    fn test_record_hit_repeat_does_not_grow(
        hits in prop::collection::vec(arb_hit(), 1..32),
    ) {
        let mut map = CoverageMap::new();
        let record = |map: &mut CoverageMap| {
            for (doc, test, line, len) in &hits {
                let document = DocumentPath::new(format!("doc{}.cs", doc));
                let test = TestId::from_name(&format!("T.T.T{}", test));
                map.record_hit(test, &document, block(*line, line + len));
            }
        };

        record(&mut map);
        let before: Vec<_> = (0u8..4)
            .map(|d| {
                let document = DocumentPath::new(format!("doc{}.cs", d));
                (map.blocks(&document).count(), map.impacted_tests(&document))
            })
            .collect();

        record(&mut map);
        let after: Vec<_> = (0u8..4)
            .map(|d| {
                let document = DocumentPath::new(format!("doc{}.cs", d));
                (map.blocks(&document).count(), map.impacted_tests(&document))
            })
            .collect();

        prop_assert_eq!(before, after);
    }
}
