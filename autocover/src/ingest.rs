// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Turns the reports of a test run into coverage and outcome updates.
//!
//! Each report is parsed into a staged value first. The live [`CoverageMap`]
//! and [`TestOutcomeStore`] only change when the whole report parsed.

use std::path::Path;

use anyhow::{Context, Result};
use autocover_file_format::coverage::results::HitResults;
use autocover_file_format::test_run::TestRun;
use coverage::{CoverageMap, DocumentPath, InvalidationMode, TestOutcomeStore, TestUniverse};

use crate::toolchain::TestRunArtifacts;

/// Read a hit-results file into a new map.
///
/// A missing file means no test touched any instrumented code. A test name
/// not in `universe` fails the whole file.
pub fn parse_coverage_results(
    path: impl AsRef<Path>,
    universe: &TestUniverse,
    mode: InvalidationMode,
) -> Result<CoverageMap> {
    let path = path.as_ref();
    let mut map = CoverageMap::with_mode(mode);

    let results = match HitResults::load_existing(path)? {
        Some(results) => results,
        None => {
            debug!("no coverage results at {}", path.display());
            return Ok(map);
        }
    };

    for point in &results.points {
        let block = point
            .block()
            .with_context(|| format!("invalid sequence point in {}", path.display()))?;
        let document = DocumentPath::from(point.document.as_str());

        for name in &point.tests {
            let id = universe
                .resolve(name)
                .with_context(|| format!("ingesting {}", path.display()))?;
            map.record_hit(id, &document, block);
        }
    }

    Ok(map)
}

/// Read a test-run report into a new outcome store.
///
/// Results are keyed by the discovered test of the same id or name, falling
/// back to the id the report carries.
pub fn parse_test_run(path: impl AsRef<Path>, universe: &TestUniverse) -> Result<TestOutcomeStore> {
    let path = path.as_ref();
    let run = TestRun::load(path)?;

    let mut store = TestOutcomeStore::new();
    for result in &run.results {
        let reported = result.id();
        let id = if universe.contains(&reported) {
            reported
        } else {
            universe.lookup(&result.test_name).unwrap_or(reported)
        };

        store.record(id, result.outcome());
    }

    Ok(store)
}

/// What ingesting one test run changed.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub documents: usize,
    pub outcomes: usize,
    pub errors: Vec<anyhow::Error>,

    /// The coverage report was rejected; the run added no coverage.
    pub coverage_failed: bool,
}

/// Apply both reports of a test run.
///
/// A report that fails to parse is skipped and its error returned in the
/// summary. The other report still applies.
pub fn ingest(
    artifacts: &TestRunArtifacts,
    universe: &TestUniverse,
    coverage: &mut CoverageMap,
    outcomes: &mut TestOutcomeStore,
) -> IngestSummary {
    let mut summary = IngestSummary::default();

    match parse_coverage_results(&artifacts.results_file, universe, coverage.mode()) {
        Ok(staged) => {
            summary.documents = staged.len();
            coverage.merge(&staged);
        }
        Err(err) => {
            error!("discarding coverage results: {:?}", err);
            summary.coverage_failed = true;
            summary.errors.push(err);
        }
    }

    match parse_test_run(&artifacts.test_run_report, universe) {
        Ok(staged) => {
            summary.outcomes = staged.len();
            outcomes.merge(staged);
        }
        Err(err) => {
            error!("discarding test run report: {:?}", err);
            summary.errors.push(err);
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use coverage::{IngestError, LineVerdict, Outcome, TestId, UnitTest};
    use pretty_assertions::assert_eq;
    use tempfile::{tempdir, TempDir};

    use super::*;

    const DOCUMENT: &str = r"C:\src\Widgets\Gear.cs";

    const RESULTS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<results>
  <seqpnt line="5" column="9" endline="10" endcolumn="10" document="C:\src\Widgets\Gear.cs">
    <test name="Foo.Bar.Baz" />
  </seqpnt>
</results>
"#;

    const TEST_RUN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TestRun xmlns="http://microsoft.com/schemas/VisualStudio/TeamTest/2010">
  <Results>
    <UnitTestResult testName="Foo.Bar.Baz" outcome="Failed">
      <Output>
        <ErrorInfo>
          <Message>assert failed at line 7</Message>
        </ErrorInfo>
      </Output>
    </UnitTestResult>
  </Results>
</TestRun>
"#;

    fn universe(names: &[&str]) -> TestUniverse {
        names
            .iter()
            .map(|name| UnitTest::new("Widgets.Tests", *name))
            .collect()
    }

    fn write_artifacts(results: &str, test_run: &str) -> Result<(TempDir, TestRunArtifacts)> {
        let dir = tempdir()?;
        let artifacts = TestRunArtifacts {
            test_run_report: dir.path().join("testrun.trx"),
            results_file: dir.path().join("cReport.results.xml"),
        };

        std::fs::write(&artifacts.results_file, results)?;
        std::fs::write(&artifacts.test_run_report, test_run)?;

        Ok((dir, artifacts))
    }

    #[test]
    fn test_failed_test_marks_covered_lines() -> Result<()> {
        let (_dir, artifacts) = write_artifacts(RESULTS, TEST_RUN)?;
        let universe = universe(&["Foo.Bar.Baz"]);

        let mut coverage = CoverageMap::new();
        let mut outcomes = TestOutcomeStore::new();
        let summary = ingest(&artifacts, &universe, &mut coverage, &mut outcomes);

        assert!(summary.errors.is_empty());
        assert_eq!(summary.documents, 1);
        assert_eq!(summary.outcomes, 1);

        let document = DocumentPath::from(DOCUMENT);
        assert_eq!(
            LineVerdict::for_line(&coverage, &outcomes, &document, 7),
            LineVerdict::Failed
        );
        assert_eq!(
            LineVerdict::for_line(&coverage, &outcomes, &document, 12),
            LineVerdict::NotCovered
        );

        let id = TestId::from_name("Foo.Bar.Baz");
        assert_eq!(
            outcomes.get(&id),
            Some(&Outcome::failed(
                "Foo.Bar.Baz",
                Some("assert failed at line 7".to_owned())
            ))
        );

        Ok(())
    }

    #[test]
    fn test_unknown_test_name_is_fatal_for_results() -> Result<()> {
        let (_dir, artifacts) = write_artifacts(RESULTS, TEST_RUN)?;
        let universe = universe(&["Widgets.Tests.GearTests.Turns"]);

        let err = match parse_coverage_results(
            &artifacts.results_file,
            &universe,
            InvalidationMode::Local,
        ) {
            Ok(_) => anyhow::bail!("expected unknown test error"),
            Err(err) => err,
        };
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::UnknownTest { name }) if name == "Foo.Bar.Baz"
        ));

        // The outcome report still applies, the coverage map is untouched.
        let mut coverage = CoverageMap::new();
        let mut outcomes = TestOutcomeStore::new();
        let summary = ingest(&artifacts, &universe, &mut coverage, &mut outcomes);

        assert_eq!(summary.errors.len(), 1);
        assert!(summary.coverage_failed);
        assert!(coverage.is_empty());
        assert_eq!(outcomes.len(), 1);

        Ok(())
    }

    #[test]
    fn test_malformed_test_run_keeps_outcomes() -> Result<()> {
        let (_dir, artifacts) = write_artifacts(
            RESULTS,
            r#"<TestRun><Results><UnitTestResult outcome="Passed" /></Results></TestRun>"#,
        )?;
        let universe = universe(&["Foo.Bar.Baz"]);

        let id = TestId::from_name("Foo.Bar.Baz");
        let mut coverage = CoverageMap::new();
        let mut outcomes = TestOutcomeStore::new();
        outcomes.record(id, Outcome::passed("Foo.Bar.Baz"));

        let summary = ingest(&artifacts, &universe, &mut coverage, &mut outcomes);

        assert_eq!(summary.errors.len(), 1);
        assert!(!summary.coverage_failed);
        assert_eq!(outcomes.get(&id), Some(&Outcome::passed("Foo.Bar.Baz")));
        assert_eq!(coverage.len(), 1);

        Ok(())
    }

    #[test]
    fn test_missing_results_file_is_empty() -> Result<()> {
        let dir = tempdir()?;
        let path: PathBuf = dir.path().join("cReport.results.xml");

        let map = parse_coverage_results(&path, &universe(&[]), InvalidationMode::Local)?;
        assert!(map.is_empty());

        Ok(())
    }

    #[test]
    fn test_missing_test_run_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("testrun.trx");

        assert!(parse_test_run(&path, &universe(&[])).is_err());

        Ok(())
    }
}
