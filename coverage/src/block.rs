// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// A covered source span, as described by one sequence point.
///
/// Equality and hashing use the exact four-tuple. Use [`CodeBlock::contains_line`]
/// for point-to-block lookup.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct CodeBlock {
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl CodeBlock {
    pub fn new(line: u32, column: u32, end_line: u32, end_column: u32) -> Result<Self> {
        if end_line < line {
            bail!(
                "code block ends before it starts: line = {}, end line = {}",
                line,
                end_line
            );
        }

        Ok(Self {
            line,
            column,
            end_line,
            end_column,
        })
    }

    /// Whether `line` falls within `[line, end_line]`. Columns are ignored.
    pub fn contains_line(&self, line: u32) -> bool {
        self.line <= line && line <= self.end_line
    }
}

impl fmt::Display for CodeBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "({},{})-({},{})",
            self.line, self.column, self.end_line, self.end_column
        )
    }
}
