// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{format_err, Context, Result};
use autocover_file_format::coverage::base::BaseReport;
use autocover_file_format::coverage::results::{HitPoint, HitResults};
use tempfile::NamedTempFile;

use crate::lock::{NamedLock, RESULTS_LOCK_NAME};
use crate::paths::ReportPaths;

/// Tests that hit each point, by 1-based point index, by module id.
pub type HitTable = BTreeMap<String, BTreeMap<u32, BTreeSet<String>>>;

#[derive(Default)]
struct State {
    current_test: Option<String>,
    hits: HitTable,
}

/// Accumulates sequence point hits for the running test and merges them into
/// the hit-results file.
pub struct Recorder {
    state: Mutex<State>,
    paths: ReportPaths,
    lock: NamedLock,
}

impl Recorder {
    pub fn new(paths: ReportPaths) -> Self {
        Self {
            state: Mutex::new(State::default()),
            paths,
            lock: NamedLock::system(RESULTS_LOCK_NAME),
        }
    }

    pub fn with_lock(mut self, lock: NamedLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn paths(&self) -> &ReportPaths {
        &self.paths
    }

    /// Attribute subsequent hits to `test`. A blank name stops recording.
    pub fn set_current_test(&self, test: impl Into<String>) {
        let test = test.into();
        let mut state = self.state();

        state.current_test = if test.trim().is_empty() {
            None
        } else {
            Some(test)
        };
    }

    pub fn current_test(&self) -> Option<String> {
        self.state().current_test.clone()
    }

    /// Record one execution of `point` in `module_id`. No-op without a current test.
    pub fn hit(&self, module_id: &str, point: u32) {
        let mut state = self.state();
        let State { current_test, hits } = &mut *state;

        let test = match current_test {
            Some(test) => test,
            None => return,
        };

        if let Some(module) = hits.get_mut(module_id) {
            module.entry(point).or_default().insert(test.clone());
        } else {
            let module = BTreeMap::from([(point, BTreeSet::from([test.clone()]))]);
            hits.insert(module_id.to_owned(), module);
        }
    }

    /// Swap out the accumulated hits, leaving an empty table.
    pub fn take(&self) -> HitTable {
        std::mem::take(&mut self.state().hits)
    }

    /// Number of (module, point) pairs waiting to be flushed.
    pub fn pending(&self) -> usize {
        self.state().hits.values().map(|points| points.len()).sum()
    }

    /// Merge the accumulated hits into the results file.
    ///
    /// Returns the number of points written. On failure the hits are put back so
    /// a later flush can retry them.
    pub fn flush(&self) -> Result<usize> {
        let hits = self.take();

        if hits.is_empty() {
            return Ok(0);
        }

        match self.merge(&hits) {
            Ok(count) => Ok(count),
            Err(err) => {
                self.restore(hits);
                Err(err)
            }
        }
    }

    /// [`Recorder::flush`], writing failures to the diagnostic log instead of
    /// returning them.
    pub fn flush_counter(&self) {
        match self.flush() {
            Ok(0) => {}
            Ok(count) => debug!(
                "flushed {} hit points to {}",
                count,
                self.paths.results.display()
            ),
            Err(err) => {
                error!("unable to flush coverage hits: {:?}", err);

                if let Err(log_err) = write_log(&self.paths.log, &err) {
                    error!(
                        "unable to write coverage diagnostics to {}: {}",
                        self.paths.log.display(),
                        log_err
                    );
                }
            }
        }
    }

    fn merge(&self, hits: &HitTable) -> Result<usize> {
        let _guard = self.lock.acquire()?;

        let base = BaseReport::load(&self.paths.base_report)?;
        let fresh = correlate(&base, hits)?;
        let count = fresh.points.len();

        let mut results = HitResults::load_existing(&self.paths.results)?.unwrap_or_default();
        results.merge(fresh);

        save_atomic(&self.paths.results, &results.to_string()?)?;

        Ok(count)
    }

    fn restore(&self, hits: HitTable) {
        let mut state = self.state();

        for (module_id, points) in hits {
            let module = state.hits.entry(module_id).or_default();

            for (point, tests) in points {
                module.entry(point).or_default().extend(tests);
            }
        }
    }

    // Instrumented code must never panic, so a poisoned table is still used.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Resolve point indices against the base report's ordered sequence points.
pub fn correlate(base: &BaseReport, hits: &HitTable) -> Result<HitResults> {
    let mut results = HitResults::default();

    for (module_id, points) in hits {
        let module = base
            .module(module_id)
            .ok_or_else(|| format_err!("module not in base coverage report: {}", module_id))?;

        for (index, point) in module.points.iter().enumerate() {
            // Point indices start at 1.
            let tests = match u32::try_from(index + 1).ok().and_then(|n| points.get(&n)) {
                Some(tests) if !tests.is_empty() => tests,
                _ => continue,
            };

            results.points.push(HitPoint {
                line: point.line,
                column: point.column,
                end_line: point.end_line,
                end_column: point.end_column,
                document: point.document.clone(),
                tests: tests.clone(),
            });
        }

        let declared = module.points.len();
        if let Some((&max, _)) = points.iter().next_back() {
            if usize::try_from(max).map(|max| max > declared).unwrap_or(true) {
                warn!(
                    "module {} has {} sequence points, ignoring hits up to index {}",
                    module_id, declared, max
                );
            }
        }
    }

    Ok(results)
}

fn save_atomic(path: &Path, text: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temporary file in {}", dir.display()))?;
    file.write_all(text.as_bytes())?;
    file.as_file().sync_all()?;

    file.persist(path)
        .with_context(|| format!("replacing hit results: {}", path.display()))?;

    Ok(())
}

fn write_log(path: &Path, err: &anyhow::Error) -> Result<()> {
    std::fs::write(path, format!("{:?}\n", err))
        .with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;

    fn recorder() -> Recorder {
        Recorder::new(ReportPaths::new("cReport.xml"))
    }

    #[test]
    fn test_hit_without_current_test_is_ignored() {
        let recorder = recorder();
        recorder.hit("m", 1);
        assert_eq!(recorder.pending(), 0);

        recorder.set_current_test("  ");
        recorder.hit("m", 1);
        assert_eq!(recorder.pending(), 0);
    }

    #[test]
    fn test_hits_accumulate_per_test() {
        let recorder = recorder();

        recorder.set_current_test("A.A.A");
        recorder.hit("m", 1);
        recorder.hit("m", 1);
        recorder.hit("m", 2);
        recorder.set_current_test("B.B.B");
        recorder.hit("m", 1);

        let table = recorder.take();
        let tests: Vec<_> = table["m"][&1].iter().map(String::as_str).collect();
        assert_eq!(tests, vec!["A.A.A", "B.B.B"]);
        assert_eq!(table["m"][&2].len(), 1);

        // Taking leaves a fresh table.
        assert_eq!(recorder.pending(), 0);
    }

    #[test]
    fn test_hits_are_kept_per_module() {
        let recorder = recorder();

        recorder.set_current_test("A.A.A");
        recorder.hit("m", 3);
        recorder.hit("n", 3);
        recorder.hit("m", 3);
        assert_eq!(recorder.pending(), 2);

        let table = recorder.take();
        assert_eq!(table.keys().map(String::as_str).collect::<Vec<_>>(), vec!["m", "n"]);
        assert_eq!(table["m"][&3], BTreeSet::from(["A.A.A".to_owned()]));
        assert_eq!(table["n"][&3], BTreeSet::from(["A.A.A".to_owned()]));
    }

    #[test]
    fn test_concurrent_hits_are_not_lost() {
        let recorder = Arc::new(recorder());
        recorder.set_current_test("A.A.A");

        let threads: Vec<_> = (0..8u32)
            .map(|t| {
                let recorder = recorder.clone();
                std::thread::spawn(move || {
                    for point in 1..=100u32 {
                        recorder.hit(&format!("m{}", t % 2), point);
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().expect("hit thread panicked");
        }

        assert_eq!(recorder.pending(), 200);
    }

    #[test]
    fn test_flush_with_no_hits_does_nothing() -> Result<()> {
        // The base report does not exist, so any real work would fail.
        assert_eq!(recorder().flush()?, 0);
        Ok(())
    }

    #[test]
    fn test_correlate_uses_declaration_order() -> Result<()> {
        let base = BaseReport::parse(
            r#"<coverage><module moduleId="m">
                <method><seqpnt line="1" column="1" endline="1" endcolumn="5" document="A.cs"/></method>
                <method><seqpnt line="7" column="1" endline="9" endcolumn="5" document="A.cs"/></method>
            </module></coverage>"#,
        )?;

        let mut hits = HitTable::new();
        let tests: BTreeSet<String> = ["T.T.T".to_owned()].into_iter().collect();
        hits.entry("m".to_owned()).or_default().insert(2, tests.clone());
        hits.entry("m".to_owned()).or_default().insert(9, tests.clone());

        let results = correlate(&base, &hits)?;

        assert_eq!(
            results.points,
            vec![HitPoint {
                line: 7,
                column: 1,
                end_line: 9,
                end_column: 5,
                document: "A.cs".to_owned(),
                tests,
            }]
        );

        Ok(())
    }

    #[test]
    fn test_correlate_unknown_module() -> Result<()> {
        let base = BaseReport::parse("<coverage/>")?;

        let mut hits = HitTable::new();
        hits.entry("missing".to_owned())
            .or_default()
            .insert(1, ["T.T.T".to_owned()].into_iter().collect());

        assert!(correlate(&base, &hits).is_err());

        Ok(())
    }
}
