// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! JSON files exchanged with the test discovery worker and the test runner.

use std::path::Path;

use anyhow::{Context, Result};
use coverage::{TestId, UnitTest};
use serde::{Deserialize, Serialize};

/// A test as reported by the discovery worker.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DiscoveredTest {
    /// Fully-qualified name, `Namespace.Class.Method`.
    pub name: String,

    /// Method name, when the worker reports it separately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl DiscoveredTest {
    pub fn into_unit_test(self, project: &str) -> UnitTest {
        let mut test = UnitTest::new(project, self.name);
        if let Some(method) = self.method {
            test.method = method;
        }
        test
    }
}

pub mod v0 {
    use super::DiscoveredTest;

    /// Bare list of tests.
    pub type TestListJson = Vec<DiscoveredTest>;
}

pub mod v1 {
    use serde::{Deserialize, Serialize};

    use super::DiscoveredTest;

    #[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
    pub struct TestListJson {
        pub tests: Vec<DiscoveredTest>,
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "version", content = "list")]
pub enum TestListJson {
    #[serde(rename = "0.1")]
    V0(v0::TestListJson),

    #[serde(rename = "1.0")]
    V1(v1::TestListJson),
}

impl TestListJson {
    pub fn deserialize(text: &str) -> Result<Self> {
        // Try the unversioned bare list first.
        let v0 = serde_json::from_str::<v0::TestListJson>(text);

        if let Ok(v0) = v0 {
            return Ok(Self::V0(v0));
        }

        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading test list: {}", path.display()))?;

        Self::deserialize(&text).with_context(|| format!("parsing test list: {}", path.display()))
    }

    pub fn tests(self) -> Vec<DiscoveredTest> {
        match self {
            Self::V0(tests) => tests,
            Self::V1(list) => list.tests,
        }
    }
}

impl From<Vec<DiscoveredTest>> for TestListJson {
    fn from(tests: Vec<DiscoveredTest>) -> Self {
        Self::V1(v1::TestListJson { tests })
    }
}

/// The tests a runner is asked to execute for one assembly.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TestSelection {
    pub assembly: String,
    pub tests: Vec<SelectedTest>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SelectedTest {
    pub id: TestId,
    pub name: String,
}

impl TestSelection {
    pub fn new<'a>(assembly: impl Into<String>, tests: impl IntoIterator<Item = &'a UnitTest>) -> Self {
        let tests = tests
            .into_iter()
            .map(|t| SelectedTest {
                id: t.id,
                name: t.name.clone(),
            })
            .collect();

        Self {
            assembly: assembly.into(),
            tests,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .with_context(|| format!("writing test selection: {}", path.display()))?;

        Ok(())
    }
}
