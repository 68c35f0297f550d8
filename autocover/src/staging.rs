// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Staging of build output for instrumentation.
//!
//! The output directory of each test project is mirrored into a private
//! staging directory. Files handed to the instrumentor get a `.backup` copy of
//! the build output they were instrumented from, so an unchanged file is not
//! instrumented twice.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::fs;

/// Suffix appended to a staged file to name its pre-instrumentation copy.
pub const BACKUP_SUFFIX: &str = ".backup";

/// Base report written by the instrumentor into the staging directory.
pub const BASE_REPORT_NAME: &str = "cReport.xml";

pub async fn digest_file(file: impl AsRef<Path>) -> Result<String> {
    let file = file.as_ref();
    let data = fs::read(file)
        .await
        .with_context(|| format!("unable to read file to generate digest: {}", file.display()))?;

    Ok(hex::encode(Sha256::digest(&data)))
}

pub fn backup_path(staged: &Path) -> PathBuf {
    let mut name = staged.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StagedFile {
    pub source: PathBuf,
    pub staged: PathBuf,
}

/// Result of mirroring one output directory.
#[derive(Clone, Debug, Default)]
pub struct Staging {
    pub staging_dir: PathBuf,

    /// Freshly copied files that still need instrumenting.
    pub to_instrument: Vec<StagedFile>,

    /// Files left alone because their backup matches the build output.
    pub unchanged: usize,
}

impl Staging {
    pub fn base_report(&self) -> PathBuf {
        self.staging_dir.join(BASE_REPORT_NAME)
    }

    pub fn staged_files(&self) -> Vec<String> {
        self.to_instrument
            .iter()
            .map(|f| f.staged.to_string_lossy().into_owned())
            .collect()
    }

    /// Record that every file in `to_instrument` was instrumented.
    pub async fn mark_instrumented(&self) -> Result<()> {
        for file in &self.to_instrument {
            let backup = backup_path(&file.staged);
            fs::copy(&file.source, &backup)
                .await
                .with_context(|| format!("unable to write backup: {}", backup.display()))?;
        }
        Ok(())
    }
}

fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

async fn is_already_instrumented(source: &Path, staged: &Path) -> Result<bool> {
    let backup = backup_path(staged);
    if !fs::try_exists(&backup).await? || !fs::try_exists(staged).await? {
        return Ok(false);
    }

    Ok(digest_file(source).await? == digest_file(&backup).await?)
}

/// Mirror `output_dir` into `staging_dir`.
///
/// Files with an extension in `instrument_extensions` are copied unless a
/// matching backup shows the staged copy came from the same build. Other files
/// are always refreshed.
pub async fn stage(
    output_dir: impl AsRef<Path>,
    staging_dir: impl AsRef<Path>,
    instrument_extensions: &[String],
) -> Result<Staging> {
    let output_dir = output_dir.as_ref();
    let staging_dir = staging_dir.as_ref();

    if !fs::metadata(output_dir)
        .await
        .with_context(|| format!("missing build output: {}", output_dir.display()))?
        .is_dir()
    {
        bail!("build output is not a directory: {}", output_dir.display());
    }

    let mut staging = Staging {
        staging_dir: staging_dir.to_owned(),
        ..Staging::default()
    };

    let mut pending = vec![PathBuf::new()];
    while let Some(relative) = pending.pop() {
        let source_dir = output_dir.join(&relative);
        fs::create_dir_all(staging_dir.join(&relative))
            .await
            .with_context(|| format!("unable to create staging dir: {}", staging_dir.display()))?;

        let mut entries = fs::read_dir(&source_dir)
            .await
            .with_context(|| format!("unable to list files: {}", source_dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let relative = relative.join(entry.file_name());

            if entry.file_type().await?.is_dir() {
                pending.push(relative);
                continue;
            }

            let source = entry.path();
            let staged = staging_dir.join(&relative);

            if !matches_extension(&source, instrument_extensions) {
                fs::copy(&source, &staged)
                    .await
                    .with_context(|| format!("unable to stage: {}", source.display()))?;
                continue;
            }

            if is_already_instrumented(&source, &staged).await? {
                staging.unchanged += 1;
                continue;
            }

            fs::copy(&source, &staged)
                .await
                .with_context(|| format!("unable to stage: {}", source.display()))?;
            staging.to_instrument.push(StagedFile { source, staged });
        }
    }

    staging.to_instrument.sort_by(|a, b| a.staged.cmp(&b.staged));

    debug!(
        "staged {} into {}: {} to instrument, {} unchanged",
        output_dir.display(),
        staging_dir.display(),
        staging.to_instrument.len(),
        staging.unchanged
    );

    Ok(staging)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    fn extensions() -> Vec<String> {
        vec!["dll".to_owned()]
    }

    #[tokio::test]
    async fn test_stage_skips_instrumented_files() -> Result<()> {
        let output = tempdir()?;
        let staging_dir = tempdir()?;

        fs::create_dir_all(output.path().join("sub")).await?;
        fs::write(output.path().join("Widgets.dll"), b"widgets v1").await?;
        fs::write(output.path().join("sub").join("Gears.dll"), b"gears v1").await?;
        fs::write(output.path().join("app.config"), b"<config />").await?;

        let staging = stage(output.path(), staging_dir.path(), &extensions()).await?;
        assert_eq!(staging.to_instrument.len(), 2);
        assert_eq!(staging.unchanged, 0);
        assert!(staging_dir.path().join("app.config").is_file());
        assert!(staging_dir.path().join("sub").join("Gears.dll").is_file());

        // Simulate the instrumentor rewriting the staged binaries.
        for file in &staging.to_instrument {
            fs::write(&file.staged, b"instrumented").await?;
        }
        staging.mark_instrumented().await?;

        fs::write(output.path().join("Widgets.dll"), b"widgets v2").await?;

        let staging = stage(output.path(), staging_dir.path(), &extensions()).await?;
        assert_eq!(staging.unchanged, 1);
        assert_eq!(
            staging.to_instrument,
            vec![StagedFile {
                source: output.path().join("Widgets.dll"),
                staged: staging_dir.path().join("Widgets.dll"),
            }]
        );

        let gears = fs::read(staging_dir.path().join("sub").join("Gears.dll")).await?;
        assert_eq!(gears, b"instrumented");

        Ok(())
    }

    #[tokio::test]
    async fn test_stage_missing_output() -> Result<()> {
        let staging_dir = tempdir()?;
        let missing = staging_dir.path().join("missing");

        assert!(stage(&missing, staging_dir.path(), &extensions())
            .await
            .is_err());

        Ok(())
    }

    #[test]
    fn test_backup_path() {
        assert_eq!(
            backup_path(Path::new("/stage/Widgets.dll")),
            PathBuf::from("/stage/Widgets.dll.backup")
        );
    }
}
