// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::test_id::TestId;

/// A discovered unit test.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct UnitTest {
    pub id: TestId,

    /// Fully-qualified name, `Namespace.Class.Method`.
    pub name: String,

    /// Method name alone.
    pub method: String,

    /// Project whose test assembly contains the test.
    pub project: String,
}

impl UnitTest {
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        let method = name.rsplit('.').next().unwrap_or(&name).to_owned();
        let id = TestId::from_name(&name);

        Self {
            id,
            name,
            method,
            project: project.into(),
        }
    }
}

/// The tests discovered in the current cycle, in discovery order.
#[derive(Clone, Debug, Default)]
pub struct TestUniverse {
    tests: Vec<UnitTest>,
    by_id: HashMap<TestId, usize>,
    by_name: HashMap<String, TestId>,
}

impl TestUniverse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a test. A test with the same id replaces the earlier entry in place.
    pub fn insert(&mut self, test: UnitTest) {
        self.by_name.insert(test.name.clone(), test.id);

        if let Some(&index) = self.by_id.get(&test.id) {
            self.tests[index] = test;
        } else {
            self.by_id.insert(test.id, self.tests.len());
            self.tests.push(test);
        }
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn contains(&self, id: &TestId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &TestId) -> Option<&UnitTest> {
        self.by_id.get(id).map(|&index| &self.tests[index])
    }

    pub fn lookup(&self, name: &str) -> Option<TestId> {
        self.by_name.get(name).copied()
    }

    /// Resolve a fully-qualified name, failing if it was not discovered.
    pub fn resolve(&self, name: &str) -> Result<TestId, IngestError> {
        self.lookup(name).ok_or_else(|| IngestError::UnknownTest {
            name: name.to_owned(),
        })
    }

    pub fn ids(&self) -> BTreeSet<TestId> {
        self.by_id.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnitTest> {
        self.tests.iter()
    }

    pub fn for_project<'a>(&'a self, project: &'a str) -> impl Iterator<Item = &'a UnitTest> {
        self.tests.iter().filter(move |t| t.project == project)
    }

    /// The tests named by `ids`, in discovery order.
    pub fn select(&self, ids: &BTreeSet<TestId>) -> Vec<&UnitTest> {
        self.tests.iter().filter(|t| ids.contains(&t.id)).collect()
    }
}

impl FromIterator<UnitTest> for TestUniverse {
    fn from_iter<I: IntoIterator<Item = UnitTest>>(iter: I) -> Self {
        let mut universe = Self::new();

        for test in iter {
            universe.insert(test);
        }

        universe
    }
}

impl Extend<UnitTest> for TestUniverse {
    fn extend<I: IntoIterator<Item = UnitTest>>(&mut self, iter: I) {
        for test in iter {
            self.insert(test);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_unit_test_new() {
        let test = UnitTest::new("Widgets.Tests", "Widgets.Tests.GearTests.Turns");

        assert_eq!(test.method, "Turns");
        assert_eq!(test.project, "Widgets.Tests");
        assert_eq!(test.id, TestId::from_name("Widgets.Tests.GearTests.Turns"));
    }

    #[test]
    fn test_resolve_unknown_name() {
        let universe: TestUniverse = [UnitTest::new("P", "A.B.C")].into_iter().collect();

        assert_eq!(universe.resolve("A.B.C").ok(), Some(TestId::from_name("A.B.C")));

        match universe.resolve("A.B.D") {
            Err(IngestError::UnknownTest { name }) => assert_eq!(name, "A.B.D"),
            other => panic!("expected unknown test error, got {:?}", other),
        }
    }

    #[test]
    fn test_select_keeps_discovery_order() {
        let universe: TestUniverse = ["Z.Z.Z", "A.A.A", "M.M.M"]
            .into_iter()
            .map(|name| UnitTest::new("P", name))
            .collect();

        let ids: BTreeSet<_> = [TestId::from_name("A.A.A"), TestId::from_name("Z.Z.Z")]
            .into_iter()
            .collect();

        let names: Vec<_> = universe.select(&ids).iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Z.Z.Z", "A.A.A"]);
    }

    #[test]
    fn test_insert_replaces_duplicates() {
        let mut universe = TestUniverse::new();
        universe.insert(UnitTest::new("P1", "A.B.C"));
        universe.insert(UnitTest::new("P2", "A.B.C"));

        assert_eq!(universe.len(), 1);
        assert_eq!(universe.for_project("P2").count(), 1);
        assert_eq!(universe.for_project("P1").count(), 0);
    }
}
