// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use coverage::InvalidationMode;
use serde::Deserialize;

/// Directory under the solution holding staged binaries and settings.
pub const WORK_DIR_NAME: &str = "_AutoCover";

pub fn default_watch() -> Vec<String> {
    vec!["cs".to_owned()]
}

pub fn default_instrument_extensions() -> Vec<String> {
    vec!["dll".to_owned(), "exe".to_owned()]
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub solution_dir: PathBuf,

    /// Defaults to the name of `solution_dir`.
    #[serde(default)]
    pub solution_name: Option<String>,

    /// Defaults to `<solution_dir>/_AutoCover`.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Extensions of source documents whose saves trigger analysis.
    #[serde(default = "default_watch")]
    pub watch: Vec<String>,

    #[serde(default)]
    pub invalidation: InvalidationMode,

    /// Seconds a test runner may take before it is killed. Unbounded if unset.
    #[serde(default)]
    pub test_timeout: Option<u64>,

    /// Test settings passed to the runner when a request does not name one.
    #[serde(default)]
    pub test_settings: Option<PathBuf>,

    pub projects: Vec<ProjectConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProjectConfig {
    pub name: String,

    /// Build output, relative to the solution directory unless absolute.
    pub output_dir: PathBuf,

    /// File name of the test assembly within `output_dir`.
    pub assembly: String,

    /// Extensions of staged files handed to the instrumentor.
    #[serde(default = "default_instrument_extensions")]
    pub instrument_extensions: Vec<String>,

    pub build: CommandConfig,
    pub instrument: CommandConfig,
    pub discover: CommandConfig,
    pub test: CommandConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CommandConfig {
    pub exe: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Config {
    /// Load a YAML config. A relative `solution_dir` is resolved against the
    /// directory containing the config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;

        let mut config =
            Self::parse(&text).with_context(|| format!("parsing config: {}", path.display()))?;

        if config.solution_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.solution_dir = parent.join(&config.solution_dir);
            }
        }

        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;

        if config.projects.is_empty() {
            bail!("config names no test projects");
        }

        let mut seen = std::collections::HashSet::new();
        for project in &config.projects {
            if !seen.insert(project.name.as_str()) {
                bail!("duplicate project name: {}", project.name);
            }
        }

        Ok(config)
    }

    pub fn solution_name(&self) -> String {
        if let Some(name) = &self.solution_name {
            return name.clone();
        }

        self.solution_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "solution".to_owned())
    }

    pub fn work_dir(&self) -> PathBuf {
        match &self.work_dir {
            Some(dir) => self.resolve(dir),
            None => self.solution_dir.join(WORK_DIR_NAME),
        }
    }

    /// Directory receiving the staged, instrumented copy of `project`.
    pub fn staging_dir(&self, project: &ProjectConfig) -> PathBuf {
        self.work_dir().join(&project.name)
    }

    pub fn output_dir(&self, project: &ProjectConfig) -> PathBuf {
        self.resolve(&project.output_dir)
    }

    pub fn test_timeout(&self) -> Option<Duration> {
        self.test_timeout.map(Duration::from_secs)
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_owned()
        } else {
            self.solution_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const CONFIG: &str = r#"
solution_dir: /src/widgets
test_timeout: 300
invalidation: global
projects:
  - name: Widgets.Tests
    output_dir: Widgets.Tests/bin/Debug
    assembly: Widgets.Tests.dll
    build:
      exe: msbuild
      args: ["{solution_dir}/Widgets.sln", "/t:{project_name}"]
    instrument:
      exe: instrument
      args: ["--report", "{base_report}", "{files}"]
    discover:
      exe: discover
      args: ["{assembly_path}", "{test_list}"]
    test:
      exe: run-tests
      args: ["{test_selection}", "{test_run_report}"]
      env:
        AUTOCOVER_COVERAGE_FILE: "{base_report}"
"#;

    #[test]
    fn test_parse_config() -> Result<()> {
        let config = Config::parse(CONFIG)?;

        assert_eq!(config.solution_name(), "widgets");
        assert_eq!(config.work_dir(), PathBuf::from("/src/widgets/_AutoCover"));
        assert_eq!(config.watch, vec!["cs"]);
        assert_eq!(config.invalidation, InvalidationMode::Global);
        assert_eq!(config.test_timeout(), Some(Duration::from_secs(300)));

        let project = &config.projects[0];
        assert_eq!(
            config.output_dir(project),
            PathBuf::from("/src/widgets/Widgets.Tests/bin/Debug")
        );
        assert_eq!(
            config.staging_dir(project),
            PathBuf::from("/src/widgets/_AutoCover/Widgets.Tests")
        );
        assert_eq!(project.instrument_extensions, vec!["dll", "exe"]);
        assert_eq!(project.test.env["AUTOCOVER_COVERAGE_FILE"], "{base_report}");

        Ok(())
    }

    #[test]
    fn test_defaults() -> Result<()> {
        let text = CONFIG
            .replace("test_timeout: 300\n", "")
            .replace("invalidation: global\n", "");
        let config = Config::parse(&text)?;

        assert_eq!(config.invalidation, InvalidationMode::Local);
        assert_eq!(config.test_timeout(), None);

        Ok(())
    }

    #[test]
    fn test_rejects_duplicate_projects() -> Result<()> {
        let mut text = CONFIG.to_owned();
        let project = &CONFIG[CONFIG.find("  - name").unwrap_or(0)..];
        text.push_str(project);

        assert!(Config::parse(&text).is_err());

        Ok(())
    }
}
