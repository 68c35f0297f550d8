// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::{Path, PathBuf};

use anyhow::{format_err, Result};
use coverage::DocumentPath;
use notify::{Event, EventKind, Watcher};
use tokio::{
    fs,
    sync::mpsc::{unbounded_channel, UnboundedReceiver},
};

use crate::engine::Engine;

/// Watches a source tree, and on a save of a watched document, emits its path.
pub struct SaveMonitor {
    dir: PathBuf,
    ignore: Vec<PathBuf>,
    extensions: Vec<String>,
    notify_events: UnboundedReceiver<notify::Result<Event>>,
    watcher: notify::RecommendedWatcher,
}

impl SaveMonitor {
    /// Create a new save monitor over `dir` and its subdirectories.
    ///
    /// The path `dir` must name a directory, not a file.
    pub async fn new(dir: impl AsRef<Path>, extensions: &[String]) -> Result<Self> {
        use notify::RecursiveMode;

        // Canonicalize so we can compare the watched dir to paths in the events.
        let dir = fs::canonicalize(dir).await?;

        if !fs::metadata(&dir).await?.is_dir() {
            bail!("monitored path is not a directory: {}", dir.display());
        }

        let (sender, notify_events) = unbounded_channel();
        let event_handler = move |event_or_err| {
            // A send error only occurs when the channel is closed. No remedial
            // action is needed (or possible), so ignore it.
            let _ = sender.send(event_or_err);
        };
        let mut watcher = notify::recommended_watcher(event_handler)?;
        watcher.watch(&dir, RecursiveMode::Recursive)?;

        Ok(Self {
            dir,
            ignore: vec![],
            extensions: extensions.to_vec(),
            notify_events,
            watcher,
        })
    }

    /// Skip events for anything below `path`, creating it if needed.
    pub async fn ignore(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::create_dir_all(path).await?;
        self.ignore.push(fs::canonicalize(path).await?);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.watcher.unwatch(&self.dir)?;
        Ok(())
    }

    fn is_watched(&self, path: &Path) -> bool {
        if self.ignore.iter().any(|dir| path.starts_with(dir)) {
            return false;
        }

        DocumentPath::from(path).has_extension(&self.extensions)
    }

    pub async fn next_document(&mut self) -> Result<Option<PathBuf>> {
        loop {
            let event = match self.notify_events.recv().await {
                Some(Ok(event)) => event,
                Some(Err(err)) => {
                    warn!(
                        "error watching for saved documents. path = {}, error = {}",
                        self.dir.display(),
                        err
                    );

                    let _ = self.stop();
                    return Ok(None);
                }
                None => {
                    let _ = self.stop();
                    return Ok(None);
                }
            };

            match event.kind {
                EventKind::Create(..) | EventKind::Modify(..) => {
                    // Renames report the destination last.
                    let path = event
                        .paths
                        .last()
                        .ok_or_else(|| format_err!("missing path for file save event"))?;

                    if self.is_watched(path) {
                        return Ok(Some(path.clone()));
                    }
                }
                EventKind::Remove(..) => {
                    let path = event
                        .paths
                        .get(0)
                        .ok_or_else(|| format_err!("missing path for file remove event"))?;

                    if path == &self.dir {
                        // The directory we were watching was removed; we're done.
                        let _ = self.stop();
                        return Ok(None);
                    }
                }
                _event_kind => {
                    // Other filesystem event. Ignore.
                }
            }
        }
    }

    /// Submit every saved document to `engine` until the watch ends or the
    /// engine shuts down.
    pub async fn forward(mut self, engine: &Engine) -> Result<()> {
        let cancel = engine.cancellation();

        loop {
            let path = tokio::select! {
                _ = cancel.cancelled() => break,
                path = self.next_document() => path?,
            };

            let path = match path {
                Some(path) => path,
                None => break,
            };

            if engine.submit_analysis_request(path.as_path()) {
                info!("queued analysis of {}", path.display());
            }
        }

        let _ = self.stop();
        Ok(())
    }
}
