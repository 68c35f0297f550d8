// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Process teardown hooks.
//!
//! Hooks run when [`execute`] or [`exit_process`] is called, or on Ctrl+C. Each
//! hook runs at most once; a panicking hook is logged and does not stop the rest.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use log::{debug, error, warn};

type Function = Box<dyn FnOnce() + Send>;

struct Hook {
    name: String,
    function: Function,
}

struct AtExit {
    hooks: Mutex<Vec<Hook>>,
}

lazy_static! {
    static ref ATEXIT: Arc<AtExit> = AtExit::new();
}

/// Register `function` to run at exit, under a `name` used in diagnostics.
pub fn register<F: FnOnce() + Send + 'static>(name: impl Into<String>, function: F) {
    ATEXIT.register(name.into(), Box::new(function))
}

/// Runs the registered hooks and terminates the process with the specified exit `code`.
pub fn exit_process(code: i32) -> ! {
    ATEXIT.exit_process(code)
}

/// Runs the registered hooks but does *not* terminate the process.
///
/// Not called automatically (e.g. via `drop`).
pub fn execute() {
    ATEXIT.execute()
}

/// Number of hooks still waiting to run.
pub fn pending() -> usize {
    ATEXIT.pending()
}

impl AtExit {
    fn new() -> Arc<Self> {
        let result = Arc::new(AtExit {
            hooks: Mutex::new(vec![]),
        });

        {
            // The `ctrlc` handler runs on its own thread, so the OS may still
            // terminate us before the hooks finish on logoff or shutdown.
            let result = result.clone();
            let installed = ctrlc::set_handler(move || {
                warn!("Ctrl+c pressed - some results may not be saved.");
                result.exit_process(1);
            });

            if let Err(err) = installed {
                warn!("unable to install Ctrl+c handler: {}", err);
            }
        }

        result
    }

    fn register(&self, name: String, function: Function) {
        debug!("registering exit hook: {}", name);
        self.lock().push(Hook { name, function });
    }

    fn exit_process(&self, code: i32) -> ! {
        self.execute();
        std::process::exit(code);
    }

    fn pending(&self) -> usize {
        self.lock().len()
    }

    fn execute(&self) {
        // Take the hooks first so a hook may register more without deadlocking.
        let hooks = std::mem::take(&mut *self.lock());

        for Hook { name, function } in hooks {
            debug!("running exit hook: {}", name);

            if panic::catch_unwind(AssertUnwindSafe(function)).is_err() {
                error!("exit hook panicked: {}", name);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Hook>> {
        self.hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    // The registry is process-global, so everything is checked in one test.
    #[test]
    fn test_hooks_run_once_and_survive_panics() {
        static RUNS: AtomicUsize = AtomicUsize::new(0);

        register("first", || {
            RUNS.fetch_add(1, Ordering::SeqCst);
        });
        register("panics", || panic!("hook failure"));
        register("last", || {
            RUNS.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(pending(), 3);

        execute();
        assert_eq!(RUNS.load(Ordering::SeqCst), 2);
        assert_eq!(pending(), 0);

        execute();
        assert_eq!(RUNS.load(Ordering::SeqCst), 2);
    }
}
