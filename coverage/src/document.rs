// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Path to a source document.
///
/// Compared case-insensitively, but displays as originally given.
#[derive(Clone, Debug)]
pub struct DocumentPath {
    path: String,
    key: String,
}

impl DocumentPath {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let key = path.to_lowercase();

        Self { path, key }
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.path)
    }

    /// Whether the document's file extension is one of `extensions`, ignoring case.
    pub fn has_extension<S: AsRef<str>>(&self, extensions: &[S]) -> bool {
        let extension = match self.as_path().extension().and_then(|e| e.to_str()) {
            Some(extension) => extension,
            None => return false,
        };

        extensions
            .iter()
            .any(|e| e.as_ref().trim_start_matches('.').eq_ignore_ascii_case(extension))
    }
}

impl PartialEq for DocumentPath {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for DocumentPath {}

impl Hash for DocumentPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state)
    }
}

impl PartialOrd for DocumentPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DocumentPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl From<&str> for DocumentPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for DocumentPath {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

impl From<&Path> for DocumentPath {
    fn from(path: &Path) -> Self {
        Self::new(path.to_string_lossy())
    }
}

impl AsRef<str> for DocumentPath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

impl Serialize for DocumentPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.path)
    }
}

impl<'de> Deserialize<'de> for DocumentPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let path = String::deserialize(deserializer)?;
        Ok(Self::new(path))
    }
}
