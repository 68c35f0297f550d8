// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! External collaborators of an analysis cycle.
//!
//! Each role is a trait so the engine can be driven by the configured command
//! lines or by in-memory fakes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use autocover_file_format::test_list::{TestListJson, TestSelection};
use coverage::UnitTest;
use hit_recorder::paths::{results_path, COVERAGE_FILE_VAR};
use tokio::fs;

use crate::config::{CommandConfig, Config, ProjectConfig};
use crate::expand::Expand;
use crate::process::{resolve_program, run_cmd, Output};
use crate::staging;

const TEST_LIST_NAME: &str = "tests.json";
const TEST_SELECTION_NAME: &str = "selection.json";
const TEST_RUN_REPORT_NAME: &str = "testrun.trx";

/// An instrumented test assembly, ready to run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstrumentedAssembly {
    pub project: String,
    pub assembly: PathBuf,
    pub staging_dir: PathBuf,
    pub base_report: PathBuf,
    pub results_file: PathBuf,
}

impl InstrumentedAssembly {
    pub fn new(project: impl Into<String>, staging_dir: impl Into<PathBuf>, assembly: &str) -> Self {
        let staging_dir = staging_dir.into();
        let base_report = staging_dir.join(staging::BASE_REPORT_NAME);
        let results_file = results_path(&base_report);

        Self {
            project: project.into(),
            assembly: staging_dir.join(assembly),
            staging_dir,
            base_report,
            results_file,
        }
    }
}

/// Reports written by one test run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestRunArtifacts {
    pub test_run_report: PathBuf,
    pub results_file: PathBuf,
}

#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, project: &ProjectConfig) -> Result<()>;
}

#[async_trait]
pub trait Instrumentor: Send + Sync {
    async fn instrument(&self, project: &ProjectConfig) -> Result<InstrumentedAssembly>;
}

#[async_trait]
pub trait TestDiscoverer: Send + Sync {
    async fn discover(&self, assembly: &InstrumentedAssembly) -> Result<Vec<UnitTest>>;
}

#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run_tests(
        &self,
        assembly: &InstrumentedAssembly,
        tests: &[&UnitTest],
        test_settings: Option<&Path>,
    ) -> Result<TestRunArtifacts>;
}

#[derive(Clone)]
pub struct Toolchain {
    pub builder: Arc<dyn Builder>,
    pub instrumentor: Arc<dyn Instrumentor>,
    pub discoverer: Arc<dyn TestDiscoverer>,
    pub runner: Arc<dyn TestRunner>,
}

impl Toolchain {
    /// A toolchain running the command lines named in `config`.
    pub fn from_config(config: Arc<Config>) -> Self {
        let commands = Arc::new(CommandToolchain::new(config));

        Self {
            builder: commands.clone(),
            instrumentor: commands.clone(),
            discoverer: commands.clone(),
            runner: commands,
        }
    }
}

pub struct CommandToolchain {
    config: Arc<Config>,
}

impl CommandToolchain {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    fn project(&self, name: &str) -> Result<&ProjectConfig> {
        self.config
            .projects
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| format_err!("unknown project: {}", name))
    }

    fn expand<'a>(&self, project: &ProjectConfig) -> Expand<'a> {
        let mut expand = Expand::new();
        expand
            .solution_dir(&self.config.solution_dir)
            .project_name(&project.name)
            .output_dir(self.config.output_dir(project))
            .staging_dir(self.config.staging_dir(project))
            .test_settings(self.config.test_settings.as_deref());
        expand
    }

    async fn run(
        &self,
        command: &CommandConfig,
        expand: &Expand<'_>,
        extra_env: &[(&str, String)],
        timeout: Option<std::time::Duration>,
    ) -> Result<Output> {
        let program = resolve_program(&expand.evaluate_value(&command.exe)?);
        let args = expand.evaluate(&command.args)?;

        let mut env = expand.evaluate_env(&command.env)?;
        for (key, value) in extra_env {
            env.entry((*key).to_owned()).or_insert_with(|| value.clone());
        }

        run_cmd(
            &program,
            args,
            &env,
            Some(self.config.solution_dir.as_path()),
            timeout,
        )
        .await
    }
}

async fn remove_stale(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(err).with_context(|| format!("unable to remove stale file: {}", path.display()))
        }
    }
}

#[async_trait]
impl Builder for CommandToolchain {
    async fn build(&self, project: &ProjectConfig) -> Result<()> {
        let mut expand = self.expand(project);
        expand.assembly(self.config.output_dir(project).join(&project.assembly));

        self.run(&project.build, &expand, &[], None)
            .await?
            .check(&format!("build of {}", project.name))?;

        Ok(())
    }
}

#[async_trait]
impl Instrumentor for CommandToolchain {
    async fn instrument(&self, project: &ProjectConfig) -> Result<InstrumentedAssembly> {
        let staging_dir = self.config.staging_dir(project);
        let staged = staging::stage(
            self.config.output_dir(project),
            &staging_dir,
            &project.instrument_extensions,
        )
        .await?;

        let instrumented = InstrumentedAssembly::new(&project.name, &staging_dir, &project.assembly);

        if staged.to_instrument.is_empty() {
            info!("{}: staged binaries are already instrumented", project.name);
        } else {
            let files = staged.staged_files();
            let mut expand = self.expand(project);
            expand
                .assembly(&instrumented.assembly)
                .base_report(&instrumented.base_report)
                .files(&files);

            self.run(&project.instrument, &expand, &[], None)
                .await?
                .check(&format!("instrumentation of {}", project.name))?;

            staged.mark_instrumented().await?;
        }

        if !fs::try_exists(&instrumented.base_report).await? {
            bail!(
                "instrumentor wrote no base report: {}",
                instrumented.base_report.display()
            );
        }

        Ok(instrumented)
    }
}

#[async_trait]
impl TestDiscoverer for CommandToolchain {
    async fn discover(&self, assembly: &InstrumentedAssembly) -> Result<Vec<UnitTest>> {
        let project = self.project(&assembly.project)?;
        let test_list = assembly.staging_dir.join(TEST_LIST_NAME);
        remove_stale(&test_list).await?;

        let mut expand = self.expand(project);
        expand.assembly(&assembly.assembly).test_list(&test_list);

        self.run(&project.discover, &expand, &[], None)
            .await?
            .check(&format!("test discovery for {}", project.name))?;

        let tests = TestListJson::load(&test_list)?
            .tests()
            .into_iter()
            .map(|test| test.into_unit_test(&project.name))
            .collect();

        Ok(tests)
    }
}

#[async_trait]
impl TestRunner for CommandToolchain {
    async fn run_tests(
        &self,
        assembly: &InstrumentedAssembly,
        tests: &[&UnitTest],
        test_settings: Option<&Path>,
    ) -> Result<TestRunArtifacts> {
        let project = self.project(&assembly.project)?;

        let artifacts = TestRunArtifacts {
            test_run_report: assembly.staging_dir.join(TEST_RUN_REPORT_NAME),
            results_file: assembly.results_file.clone(),
        };
        remove_stale(&artifacts.test_run_report).await?;
        remove_stale(&artifacts.results_file).await?;

        let selection = assembly.staging_dir.join(TEST_SELECTION_NAME);
        let assembly_name = assembly
            .assembly
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        TestSelection::new(assembly_name, tests.iter().copied()).save(&selection)?;

        let mut expand = self.expand(project);
        expand
            .assembly(&assembly.assembly)
            .base_report(&assembly.base_report)
            .results_file(&assembly.results_file)
            .test_selection(&selection)
            .test_run_report(&artifacts.test_run_report);

        if let Some(test_settings) = test_settings {
            expand.test_settings(Some(test_settings));
        }

        let coverage_file = assembly.base_report.to_string_lossy().into_owned();
        let output = self
            .run(
                &project.test,
                &expand,
                &[(COVERAGE_FILE_VAR, coverage_file)],
                self.config.test_timeout(),
            )
            .await?;

        // Runners exit non-zero when a test fails; the report carries the outcome.
        if !output.exit_status.success {
            debug!(
                "test runner for {} exited with {:?}",
                project.name, output.exit_status
            );
        }

        Ok(artifacts)
    }
}
