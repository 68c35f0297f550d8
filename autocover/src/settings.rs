// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::config::WORK_DIR_NAME;

const SETTINGS_EXTENSION: &str = "acsettings";

/// Per-solution switches.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub enable_auto_cover: bool,

    #[serde(default)]
    pub disable_row_highlighting: bool,
}

impl Settings {
    /// `<solution_dir>/_AutoCover/<solution_name>.acsettings`
    pub fn path(solution_dir: impl AsRef<Path>, solution_name: &str) -> PathBuf {
        solution_dir
            .as_ref()
            .join(WORK_DIR_NAME)
            .join(format!("{}.{}", solution_name, SETTINGS_EXTENSION))
    }

    /// Load settings, defaulting every switch to off if the file is missing.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading settings: {}", path.display()));
            }
        };

        serde_json::from_str(&text).with_context(|| format!("parsing settings: {}", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dir = path
            .parent()
            .ok_or_else(|| format_err!("settings path has no parent: {}", path.display()))?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating settings dir: {}", dir.display()))?;

        let mut file = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, self)?;
        file.flush()?;
        file.persist(path)
            .with_context(|| format!("writing settings: {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_missing_settings_default_off() -> Result<()> {
        let dir = tempdir()?;
        let settings = Settings::load(Settings::path(dir.path(), "Widgets"))?;

        assert_eq!(settings, Settings::default());
        assert!(!settings.enable_auto_cover);
        assert!(!settings.disable_row_highlighting);

        Ok(())
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let dir = tempdir()?;
        let path = Settings::path(dir.path(), "Widgets");
        assert_eq!(path, dir.path().join("_AutoCover").join("Widgets.acsettings"));

        let settings = Settings {
            enable_auto_cover: true,
            disable_row_highlighting: false,
        };
        settings.save(&path)?;

        assert_eq!(Settings::load(&path)?, settings);

        Ok(())
    }

    #[test]
    fn test_partial_settings() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("partial.acsettings");
        std::fs::write(&path, r#"{ "disable_row_highlighting": true }"#)?;

        let settings = Settings::load(&path)?;
        assert!(!settings.enable_auto_cover);
        assert!(settings.disable_row_highlighting);

        Ok(())
    }
}
