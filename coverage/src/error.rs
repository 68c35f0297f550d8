// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

/// Failure to correlate a test artifact with the discovered test universe.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("test `{name}` is not part of the discovered test universe")]
    UnknownTest { name: String },
}
