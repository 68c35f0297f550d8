// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

pub mod config;
pub mod engine;
pub mod expand;
pub mod ingest;
pub mod monitor;
pub mod process;
pub mod settings;
pub mod staging;
pub mod toolchain;
