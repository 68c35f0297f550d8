// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Stable identifier of a unit test.
///
/// Derived from the fully-qualified test name, so it is the same across builds,
/// instrumentation passes and processes.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct TestId(Uuid);

impl TestId {
    /// Hash of the UTF-16LE encoding of `name`, truncated to 16 bytes.
    pub fn from_name(name: &str) -> Self {
        let mut hasher = Sha256::new();

        for unit in name.encode_utf16() {
            hasher.update(unit.to_le_bytes());
        }

        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);

        Self(Uuid::from_bytes(bytes))
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl FromStr for TestId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let uuid = Uuid::parse_str(s.trim()).with_context(|| format!("invalid test id: {}", s))?;
        Ok(Self(uuid))
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_is_stable() {
        let a = TestId::from_name("Foo.Bar.Baz");
        let b = TestId::from_name("Foo.Bar.Baz");
        let c = TestId::from_name("Foo.Bar.Qux");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_display_round_trips_through_from_str() -> Result<()> {
        let id = TestId::from_name("Foo.Bar.Baz");
        let parsed: TestId = id.to_string().parse()?;
        assert_eq!(parsed, id);

        assert!("not-a-guid".parse::<TestId>().is_err());

        Ok(())
    }
}
