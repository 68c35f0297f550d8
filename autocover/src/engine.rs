// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The analysis cycle: build, instrument, discover, select, run, ingest.
//!
//! At most one cycle runs at a time. The coverage map and outcome store are
//! only touched while the cycle mutex is held, and queries read a snapshot
//! published when a cycle or reset completes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::SystemTime;

use coverage::{
    CoverageMap, DocumentPath, ImpactAnalyzer, LineVerdict, Outcome, TestId, TestOutcomeStore,
    TestUniverse, UnitTest,
};
use strum_macros::Display;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::ingest;
use crate::settings::Settings;
use crate::toolchain::{InstrumentedAssembly, Toolchain};

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum EngineState {
    Idle,
    Building,
    Instrumenting,
    Testing,
}

/// Published after every state change.
#[derive(Clone, Debug)]
pub struct EngineStatus {
    pub state: EngineState,
    pub detail: Option<String>,
    pub last_error: Option<String>,
    pub last_check: Option<SystemTime>,

    /// Incremented each time a cycle or reset publishes new results.
    pub generation: u64,

    pub outcomes: Arc<BTreeMap<TestId, Outcome>>,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            state: EngineState::Idle,
            detail: None,
            last_error: None,
            last_check: None,
            generation: 0,
            outcomes: Arc::new(BTreeMap::new()),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AnalysisRequest {
    pub document: DocumentPath,

    /// Overrides the configured test settings for this cycle.
    pub test_settings: Option<PathBuf>,
}

impl AnalysisRequest {
    pub fn new(document: impl Into<DocumentPath>) -> Self {
        Self {
            document: document.into(),
            test_settings: None,
        }
    }
}

/// What one cycle did.
#[derive(Clone, Debug, Default)]
pub struct CycleReport {
    pub documents: Vec<DocumentPath>,
    pub built: Vec<String>,
    pub discovered: usize,
    pub selected: BTreeSet<TestId>,
    pub errors: Vec<String>,
}

impl CycleReport {
    /// True if the cycle ended without invoking a test runner.
    pub fn is_noop(&self) -> bool {
        self.selected.is_empty()
    }
}

#[derive(Default)]
struct EngineData {
    coverage: CoverageMap,
    outcomes: TestOutcomeStore,
}

/// Read-only copy of the engine data served to queries.
#[derive(Default)]
struct View {
    coverage: CoverageMap,
    outcomes: TestOutcomeStore,
}

pub struct Engine {
    config: Arc<Config>,
    toolchain: Toolchain,
    settings: RwLock<Settings>,

    // Held for a whole cycle, and by reset.
    data: tokio::sync::Mutex<EngineData>,
    view: RwLock<Arc<View>>,

    pending: Mutex<Vec<AnalysisRequest>>,
    wake: Notify,
    status: watch::Sender<EngineStatus>,
    cancel: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Engine {
    pub fn new(config: Arc<Config>, toolchain: Toolchain, settings: Settings) -> Self {
        let data = EngineData {
            coverage: CoverageMap::with_mode(config.invalidation),
            outcomes: TestOutcomeStore::new(),
        };
        let (status, _) = watch::channel(EngineStatus::default());

        Self {
            config,
            toolchain,
            settings: RwLock::new(settings),
            data: tokio::sync::Mutex::new(data),
            view: RwLock::new(Arc::new(View::default())),
            pending: Mutex::new(vec![]),
            wake: Notify::new(),
            status,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn settings(&self) -> Settings {
        *self
            .settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the settings. Turning the feature off resets the engine.
    pub async fn update_settings(&self, settings: Settings) {
        let was_enabled = {
            let mut current = self
                .settings
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let was_enabled = current.enable_auto_cover;
            *current = settings;
            was_enabled
        };

        if was_enabled && !settings.enable_auto_cover {
            info!("auto cover disabled");
            self.reset().await;
        }
    }

    /// Whether a save of `document` should trigger analysis.
    pub fn should_process(&self, document: &DocumentPath) -> bool {
        self.settings().enable_auto_cover && document.has_extension(&self.config.watch)
    }

    /// Queue `document` for the next cycle.
    ///
    /// Ignored unless the feature is enabled and the document is a watched
    /// kind. Returns whether the request was queued.
    pub fn submit_analysis_request(&self, document: impl Into<DocumentPath>) -> bool {
        let document = document.into();

        if !self.should_process(&document) {
            debug!("ignoring analysis request for {}", document);
            return false;
        }

        self.enqueue(AnalysisRequest::new(document));
        true
    }

    /// Queue a request without consulting the settings.
    pub fn enqueue(&self, request: AnalysisRequest) {
        {
            let mut pending = lock(&self.pending);

            if let Some(existing) = pending.iter_mut().find(|r| r.document == request.document) {
                debug!("coalescing analysis request for {}", request.document);
                *existing = request;
            } else {
                debug!("queued analysis request for {}", request.document);
                pending.push(request);
            }
        }

        self.wake.notify_one();
    }

    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    fn take_pending(&self) -> Vec<AnalysisRequest> {
        std::mem::take(&mut *lock(&self.pending))
    }

    pub fn status(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    pub fn current_status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    fn view(&self) -> Arc<View> {
        self.view
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn line_verdict(&self, document: impl Into<DocumentPath>, line: u32) -> LineVerdict {
        let view = self.view();
        LineVerdict::for_line(&view.coverage, &view.outcomes, &document.into(), line)
    }

    pub fn tests_covering_line(
        &self,
        document: impl Into<DocumentPath>,
        line: u32,
    ) -> BTreeSet<TestId> {
        self.view()
            .coverage
            .find_tests_covering_line(&document.into(), line)
    }

    /// Last outcome of every known test.
    pub fn snapshot(&self) -> BTreeMap<TestId, Outcome> {
        self.view().outcomes.snapshot()
    }

    fn set_state(&self, state: EngineState, detail: Option<String>) {
        if let Some(detail) = &detail {
            info!("{}: {}", state, detail);
        }

        self.status.send_modify(|status| {
            status.state = state;
            status.detail = detail;
        });
    }

    fn publish(&self, data: &EngineData, last_error: Option<String>) {
        let view = View {
            coverage: data.coverage.clone(),
            outcomes: data.outcomes.clone(),
        };
        let outcomes = Arc::new(view.outcomes.snapshot());

        *self
            .view
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(view);

        self.status.send_modify(|status| {
            status.state = EngineState::Idle;
            status.detail = None;
            status.last_error = last_error;
            status.last_check = Some(SystemTime::now());
            status.generation += 1;
            status.outcomes = outcomes;
        });
    }

    /// Run one cycle over every queued request.
    ///
    /// Returns `None` if nothing was queued. Failures are logged and reported
    /// in the returned [`CycleReport`] and the published status.
    pub async fn run_pending(&self) -> Option<CycleReport> {
        let mut data = self.data.lock().await;

        let requests = self.take_pending();
        if requests.is_empty() {
            return None;
        }

        let report = self.cycle(&mut data, requests).await;

        let last_error = if report.errors.is_empty() {
            None
        } else {
            Some(report.errors.join("\n"))
        };
        self.publish(&data, last_error);

        Some(report)
    }

    async fn cycle(&self, data: &mut EngineData, requests: Vec<AnalysisRequest>) -> CycleReport {
        let test_settings = requests
            .iter()
            .rev()
            .find_map(|r| r.test_settings.clone())
            .or_else(|| self.config.test_settings.clone());

        let mut report = CycleReport {
            documents: requests.into_iter().map(|r| r.document).collect(),
            ..CycleReport::default()
        };

        let assemblies = self.build_and_instrument(&mut report).await;
        if assemblies.is_empty() {
            info!("no project built, skipping cycle");
            return report;
        }

        let universe = self.discover(&assemblies).await;
        report.discovered = universe.len();

        let EngineData { coverage, outcomes } = data;
        report.selected =
            ImpactAnalyzer::new(coverage, outcomes).analyze_all(&report.documents, &universe);

        if report.selected.is_empty() {
            info!("no tests impacted by {} documents", report.documents.len());
            return report;
        }

        info!(
            "running {} of {} tests",
            report.selected.len(),
            universe.len()
        );

        let selected = universe.select(&report.selected);

        for assembly in &assemblies {
            let tests: Vec<&UnitTest> = selected
                .iter()
                .copied()
                .filter(|t| t.project == assembly.project)
                .collect();

            if tests.is_empty() {
                continue;
            }

            self.set_state(
                EngineState::Testing,
                Some(format!("{} ({} tests)", assembly.project, tests.len())),
            );

            let artifacts = match self
                .toolchain
                .runner
                .run_tests(assembly, &tests, test_settings.as_deref())
                .await
            {
                Ok(artifacts) => artifacts,
                Err(err) => {
                    error!("test run failed for {}: {:?}", assembly.project, err);
                    report
                        .errors
                        .push(format!("{}: test run failed: {:#}", assembly.project, err));
                    forget_outcomes(outcomes, &tests);
                    continue;
                }
            };

            self.set_state(
                EngineState::Testing,
                Some(format!("{} (parsing coverage results)", assembly.project)),
            );

            let summary = ingest::ingest(&artifacts, &universe, coverage, outcomes);
            debug!(
                "{}: ingested coverage for {} documents and {} outcomes",
                assembly.project, summary.documents, summary.outcomes
            );

            if summary.coverage_failed {
                forget_outcomes(outcomes, &tests);
            }

            report.errors.extend(
                summary
                    .errors
                    .into_iter()
                    .map(|err| format!("{}: {:#}", assembly.project, err)),
            );
        }

        report
    }

    async fn build_and_instrument(&self, report: &mut CycleReport) -> Vec<InstrumentedAssembly> {
        let mut assemblies = vec![];

        for project in &self.config.projects {
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(EngineState::Building, Some(project.name.clone()));
            if let Err(err) = self.toolchain.builder.build(project).await {
                warn!("build failed for {}: {:?}", project.name, err);
                report
                    .errors
                    .push(format!("{}: build failed: {:#}", project.name, err));
                continue;
            }
            report.built.push(project.name.clone());

            self.set_state(EngineState::Instrumenting, Some(project.name.clone()));
            match self.toolchain.instrumentor.instrument(project).await {
                Ok(assembly) => assemblies.push(assembly),
                Err(err) => {
                    warn!("instrumentation failed for {}: {:?}", project.name, err);
                    report
                        .errors
                        .push(format!("{}: instrumentation failed: {:#}", project.name, err));
                }
            }
        }

        assemblies
    }

    async fn discover(&self, assemblies: &[InstrumentedAssembly]) -> TestUniverse {
        let mut universe = TestUniverse::new();

        for assembly in assemblies {
            match self.toolchain.discoverer.discover(assembly).await {
                Ok(tests) => {
                    debug!("{}: discovered {} tests", assembly.project, tests.len());
                    universe.extend(tests);
                }
                Err(err) => {
                    warn!(
                        "test discovery failed for {}, assuming no tests: {:?}",
                        assembly.project, err
                    );
                }
            }
        }

        universe
    }

    /// Drop queued requests, wait for any running cycle, then clear all
    /// coverage and outcomes.
    pub async fn reset(&self) {
        let dropped = self.take_pending().len();

        let mut data = self.data.lock().await;
        info!("resetting engine, dropped {} queued requests", dropped);

        data.coverage.clear();
        data.outcomes.clear();
        self.publish(&data, None);
    }

    /// Process queued requests until [`Engine::shutdown`] is called.
    pub async fn run(&self) {
        info!("engine started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.wake.notified() => {}
            }

            while self.pending() > 0 && !self.cancel.is_cancelled() {
                if let Some(report) = self.run_pending().await {
                    if !report.errors.is_empty() {
                        warn!("cycle finished with {} errors", report.errors.len());
                    }
                }
            }
        }

        info!("engine stopped");
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// The impacted coverage of `tests` was taken before they ran. When the run
/// yields no coverage, forget their outcomes so the next cycle selects them
/// as never run.
fn forget_outcomes(outcomes: &mut TestOutcomeStore, tests: &[&UnitTest]) {
    let forgotten = tests
        .iter()
        .filter(|t| outcomes.remove(&t.id).is_some())
        .count();

    if forgotten > 0 {
        warn!("{} tests produced no coverage and will rerun", forgotten);
    }
}
