// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use backoff::ExponentialBackoff;
use thiserror::Error;

/// Name of the lock guarding hit-results merges.
pub const RESULTS_LOCK_NAME: &str = "CoverageReportUpdate";

/// Longest wait for the lock before a flush gives up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
#[error("timed out after {waited:?} waiting for lock `{name}`")]
pub struct LockTimeout {
    pub name: String,
    pub waited: Duration,
}

/// A lock shared by every process that opens the same name in the same directory.
#[derive(Clone, Debug)]
pub struct NamedLock {
    name: String,
    path: PathBuf,
    timeout: Duration,
}

impl NamedLock {
    pub fn new(name: impl Into<String>, dir: impl AsRef<Path>) -> Self {
        let name = name.into();
        let path = dir.as_ref().join(format!("{}.lock", name));

        Self {
            name,
            path,
            timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// The lock in the system temporary directory.
    pub fn system(name: impl Into<String>) -> Self {
        Self::new(name, std::env::temp_dir())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the lock is held, for at most the configured timeout.
    ///
    /// Fails with [`LockTimeout`] if another process keeps holding it.
    pub fn acquire(&self) -> Result<NamedLockGuard> {
        let backoff = ExponentialBackoff {
            current_interval: Duration::from_millis(10),
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(500),
            max_elapsed_time: Some(self.timeout),
            ..Default::default()
        };

        let op = || match try_lock(&self.path) {
            Ok(Some(guard)) => Ok(guard),
            Ok(None) => Err(backoff::Error::transient(None)),
            Err(err) => Err(backoff::Error::permanent(Some(err))),
        };

        match backoff::retry(backoff, op) {
            Ok(guard) => {
                debug!("acquired lock: {}", self.path.display());
                Ok(guard)
            }
            Err(backoff::Error::Permanent(Some(err)))
            | Err(backoff::Error::Transient { err: Some(err), .. }) => Err(err),
            Err(_) => Err(LockTimeout {
                name: self.name.clone(),
                waited: self.timeout,
            }
            .into()),
        }
    }
}

/// Held lock. Released on drop.
#[derive(Debug)]
pub struct NamedLockGuard {
    file: File,
    path: PathBuf,
}

fn open(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("opening lock file: {}", path.display()))
}

#[cfg(unix)]
fn try_lock(path: &Path) -> Result<Option<NamedLockGuard>> {
    use nix::errno::Errno;
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    let file = open(path)?;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(Some(NamedLockGuard {
            file,
            path: path.to_owned(),
        })),
        Err(Errno::EWOULDBLOCK) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("locking {}", path.display())),
    }
}

#[cfg(not(unix))]
fn try_lock(path: &Path) -> Result<Option<NamedLockGuard>> {
    use std::io::{ErrorKind, Write};

    let file = OpenOptions::new().write(true).create_new(true).open(path);

    match file {
        Ok(mut file) => {
            write!(file, "{}", std::process::id())?;
            Ok(Some(NamedLockGuard {
                file,
                path: path.to_owned(),
            }))
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(None),
        Err(err) if err.kind() == ErrorKind::PermissionDenied => {
            // Held by another process that is deleting it.
            Ok(None)
        }
        Err(err) => Err(err).with_context(|| format!("creating lock file: {}", path.display())),
    }
}

impl Drop for NamedLockGuard {
    #[cfg(unix)]
    fn drop(&mut self) {
        use nix::fcntl::{flock, FlockArg};
        use std::os::unix::io::AsRawFd;

        // Closing the file releases the lock too; unlock explicitly anyway so
        // the release does not depend on other duplicated descriptors.
        if let Err(err) = flock(self.file.as_raw_fd(), FlockArg::Unlock) {
            warn!("unable to unlock {}: {}", self.path.display(), err);
        }
    }

    #[cfg(not(unix))]
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!("unable to remove lock file {}: {}", self.path.display(), err);
        }
    }
}
