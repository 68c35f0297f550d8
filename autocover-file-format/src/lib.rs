// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

pub mod coverage;
pub mod test_list;
pub mod test_run;

mod xml;
