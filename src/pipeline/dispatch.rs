use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info};

use super::{Entry, EntryContext, Recorder};

/// Levels dropped before dispatch unless another filter is installed.
pub const DEFAULT_IGNORED_LEVELS: [&str; 2] = ["info", "debug"];

type EntryFilter = Box<dyn Fn(&dyn Entry) -> bool + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No recorders configured, at least one is required")]
    NoRecorders,
}

/// Fans every entry out to all recorders, in order. A failing recorder is
/// logged and skipped; it never affects the others.
pub struct Dispatcher {
    recorders: Vec<Box<dyn Recorder>>,
    filter: EntryFilter,
    closed: AtomicBool,
}

impl Dispatcher {
    pub fn new(recorders: Vec<Box<dyn Recorder>>) -> Result<Self, DispatchError> {
        if recorders.is_empty() {
            return Err(DispatchError::NoRecorders);
        }
        Ok(Self {
            recorders,
            filter: Box::new(|entry: &dyn Entry| is_reportable(entry, &DEFAULT_IGNORED_LEVELS[..])),
            closed: AtomicBool::new(false),
        })
    }

    /// Replaces the predicate deciding which entries reach the recorders.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&dyn Entry) -> bool + Send + Sync + 'static,
    {
        self.filter = Box::new(filter);
        self
    }

    /// Drops entries whose level is one of `levels`.
    pub fn ignoring_levels(self, levels: Vec<String>) -> Self {
        self.with_filter(move |entry: &dyn Entry| is_reportable(entry, levels.as_slice()))
    }

    pub fn recorder_names(&self) -> Vec<&str> {
        self.recorders.iter().map(|r| r.name()).collect()
    }

    /// Returns whether the entry passed the filter.
    pub async fn dispatch(&self, entry: &dyn Entry, ctx: &EntryContext) -> bool {
        if !(self.filter)(entry) {
            debug!("Skipping {:?} entry from {}", entry.level(), ctx.container_id);
            return false;
        }

        for recorder in &self.recorders {
            if let Err(e) = recorder.record(entry, ctx).await {
                error!(
                    "Recorder {} failed to record entry from {}: {}",
                    recorder.name(),
                    ctx.container_id,
                    e
                );
            }
        }
        true
    }

    /// Closes every recorder. Later calls do nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for recorder in &self.recorders {
            match recorder.close().await {
                Ok(()) => info!("Closed recorder {}", recorder.name()),
                Err(e) => error!("Failed to close recorder {}: {}", recorder.name(), e),
            }
        }
    }
}

fn is_reportable<S: AsRef<str>>(entry: &dyn Entry, ignored: &[S]) -> bool {
    let level = entry.level();
    !ignored.iter().any(|ignored| ignored.as_ref() == level)
}
