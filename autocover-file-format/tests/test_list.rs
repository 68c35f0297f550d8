// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::Result;
use autocover_file_format::test_list::{DiscoveredTest, TestListJson, TestSelection};
use coverage::{TestId, UnitTest};
use pretty_assertions::assert_eq;

fn expected() -> Vec<DiscoveredTest> {
    vec![
        DiscoveredTest {
            name: "Foo.Bar.Baz".to_owned(),
            method: Some("Baz".to_owned()),
        },
        DiscoveredTest {
            name: "Widgets.Tests.GearTests.Turns".to_owned(),
            method: None,
        },
    ]
}

#[test]
fn test_test_list_formats() -> Result<()> {
    let v0 = TestListJson::deserialize(include_str!("files/test-list.v0.json"))?;
    assert_eq!(v0.tests(), expected());

    let v1 = TestListJson::deserialize(include_str!("files/test-list.v1.json"))?;
    assert_eq!(v1.tests(), expected());

    Ok(())
}

#[test]
fn test_discovered_test_into_unit_test() {
    let test = expected().remove(0).into_unit_test("Widgets.Tests");

    assert_eq!(test.id, TestId::from_name("Foo.Bar.Baz"));
    assert_eq!(test.method, "Baz");
    assert_eq!(test.project, "Widgets.Tests");
}

#[test]
fn test_selection_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("selection.json");

    let tests = vec![UnitTest::new("Widgets.Tests", "Foo.Bar.Baz")];
    let selection = TestSelection::new("Widgets.Tests.dll", &tests);
    selection.save(&path)?;

    let text = std::fs::read_to_string(&path)?;
    let json: serde_json::Value = serde_json::from_str(&text)?;

    assert_eq!(
        json,
        serde_json::json!({
            "assembly": "Widgets.Tests.dll",
            "tests": [
                {
                    "id": TestId::from_name("Foo.Bar.Baz").to_string(),
                    "name": "Foo.Bar.Baz",
                }
            ]
        })
    );

    Ok(())
}
