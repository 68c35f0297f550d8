// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::{Context, Result};
use process_control::{self, ChildExt, Control};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use std::{collections::HashMap, process::Stdio};

const MAX_LOG_LINE_LENGTH: usize = 8192;

/// Serializable representation of a process output.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Output {
    pub exit_status: ExitStatus,
    pub stderr: String,
    pub stdout: String,
}

impl Output {
    /// Fails with the captured output unless the process exited successfully.
    pub fn check(self, context: &str) -> Result<Self> {
        if self.exit_status.success {
            Ok(self)
        } else {
            bail!(
                "{} failed: {:?}\nstdout: {}\nstderr: {}",
                context,
                self.exit_status,
                truncate(&self.stdout),
                truncate(&self.stderr),
            );
        }
    }
}

fn truncate(text: &str) -> String {
    let mut text = text.trim().to_owned();
    if text.len() > MAX_LOG_LINE_LENGTH {
        let mut end = MAX_LOG_LINE_LENGTH;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
        text.push_str("...<truncated>");
    }
    text
}

impl From<std::process::Output> for Output {
    fn from(output: std::process::Output) -> Self {
        let exit_status = output.status.into();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        Self {
            exit_status,
            stderr,
            stdout,
        }
    }
}

impl From<process_control::Output> for Output {
    fn from(output: process_control::Output) -> Self {
        let exit_status = output.status.into();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        Self {
            exit_status,
            stderr,
            stdout,
        }
    }
}

/// Serializable representation of a process exit status.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub success: bool,
}

impl From<std::process::ExitStatus> for ExitStatus {
    #[cfg(windows)]
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: None,
            success: status.success(),
        }
    }

    #[cfg(unix)]
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        Self {
            code: status.code(),
            signal: status.signal(),
            success: status.success(),
        }
    }
}

impl From<process_control::ExitStatus> for ExitStatus {
    #[cfg(windows)]
    fn from(status: process_control::ExitStatus) -> Self {
        Self {
            code: status.code().map(|s| s as i32),
            signal: None,
            success: status.success(),
        }
    }

    #[cfg(unix)]
    fn from(status: process_control::ExitStatus) -> Self {
        Self {
            code: status.code().map(|s| s as i32),
            signal: status.signal(),
            success: status.success(),
        }
    }
}

/// Runs `program` to completion, capturing its output.
///
/// With a `timeout`, the process is killed once it expires and an error is
/// returned. Without one, the call waits as long as the process runs.
pub async fn run_cmd<S: ::std::hash::BuildHasher>(
    program: &Path,
    argv: Vec<String>,
    env: &HashMap<String, String, S>,
    cwd: Option<&Path>,
    timeout: Option<Duration>,
) -> Result<Output> {
    debug!(
        "running command: cmd:{:?} argv:{:?} env:{:?} cwd:{:?} timeout:{:?}",
        program, argv, env, cwd, timeout
    );

    let mut cmd = Command::new(program);
    cmd.env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .args(argv)
        .envs(env);

    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }

    // make a stringified version to save in the context of spawn_blocking
    let program_name = program.display().to_string();

    let runner = tokio::task::spawn_blocking(move || -> Result<Output> {
        let child = cmd
            .spawn()
            .with_context(|| format!("process failed to start: {}", program_name))?;

        match timeout {
            Some(timeout) => child
                .controlled_with_output()
                .time_limit(timeout)
                .terminate_for_timeout()
                .wait()?
                .map(Output::from)
                .ok_or_else(|| format_err!("process timed out: {}", program_name)),
            None => Ok(child.wait_with_output()?.into()),
        }
    });

    runner.await?
}

/// Locates an executable by name on `PATH` when it is not already a path.
pub fn resolve_program(program: &str) -> PathBuf {
    let path = PathBuf::from(program);
    if path.components().count() > 1 || path.is_absolute() {
        return path;
    }

    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            let candidate = dir.join(program);
            if candidate.is_file() {
                return candidate;
            }
        }
    }

    path
}
