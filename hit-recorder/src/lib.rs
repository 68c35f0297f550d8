// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Runtime side of coverage instrumentation.
//!
//! Instrumented code calls [`hit`] for every executed sequence point. The test
//! host names the running test with [`set_current_test`], and hits are merged into
//! the hit-results file by [`flush_counter`] when the host shuts down.

#[macro_use]
extern crate log;

use lazy_static::lazy_static;

pub mod lock;
pub mod paths;
pub mod recorder;

pub use lock::{LockTimeout, NamedLock};
pub use paths::ReportPaths;
pub use recorder::{HitTable, Recorder};

lazy_static! {
    static ref RECORDER: Recorder = Recorder::new(ReportPaths::from_env());
}

/// The process-wide recorder.
pub fn global() -> &'static Recorder {
    &RECORDER
}

pub fn hit(module_id: &str, point: u32) {
    RECORDER.hit(module_id, point)
}

pub fn set_current_test(test: impl Into<String>) {
    RECORDER.set_current_test(test)
}

/// Flush the process-wide recorder. Never fails; errors go to the diagnostic log.
pub fn flush_counter() {
    RECORDER.flush_counter()
}

/// Flush at process teardown.
///
/// Registers [`flush_counter`] as an exit hook, and also flushes when the
/// returned guard is dropped.
#[must_use = "hits are flushed when the guard is dropped"]
pub fn install() -> FlushGuard {
    atexit::register("hit-recorder flush", flush_counter);
    FlushGuard { _private: () }
}

pub struct FlushGuard {
    _private: (),
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        flush_counter();
    }
}
