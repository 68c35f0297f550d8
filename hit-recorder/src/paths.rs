// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Overrides the location of the base coverage report.
pub const COVERAGE_FILE_VAR: &str = "AUTOCOVER_COVERAGE_FILE";

/// Base report file name, next to the instrumented binaries.
pub const DEFAULT_COVERAGE_FILE: &str = "cReport.xml";

const RESULTS_SUFFIX: &str = ".results.xml";
const LOG_SUFFIX: &str = ".log";

/// Files used by a flush.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReportPaths {
    /// Base coverage report written by the instrumentor.
    pub base_report: PathBuf,

    /// Merged hit results.
    pub results: PathBuf,

    /// Diagnostics written when a flush fails.
    pub log: PathBuf,
}

impl ReportPaths {
    pub fn new(base_report: impl Into<PathBuf>) -> Self {
        let base_report = base_report.into();
        let results = results_path(&base_report);
        let log = append(&results, LOG_SUFFIX);

        Self {
            base_report,
            results,
            log,
        }
    }

    /// Paths for the current process.
    ///
    /// Uses `AUTOCOVER_COVERAGE_FILE` if set, else `cReport.xml` in the directory
    /// of the running executable.
    pub fn from_env() -> Self {
        if let Some(path) = std::env::var_os(COVERAGE_FILE_VAR) {
            return Self::new(path);
        }

        let dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_default();

        Self::new(dir.join(DEFAULT_COVERAGE_FILE))
    }
}

/// `cReport.xml` becomes `cReport.results.xml`.
pub fn results_path(base_report: &Path) -> PathBuf {
    let has_xml_extension = base_report
        .extension()
        .map(|e| e.eq_ignore_ascii_case("xml"))
        .unwrap_or(false);

    if has_xml_extension {
        append(&base_report.with_extension(""), RESULTS_SUFFIX)
    } else {
        append(base_report, RESULTS_SUFFIX)
    }
}

fn append(path: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(path);
    path.push(suffix);
    PathBuf::from(path)
}
