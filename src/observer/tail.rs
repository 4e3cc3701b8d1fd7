use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;

use super::follow::{Follower, StartPosition, TailLine};
use crate::pipeline::{Dispatcher, DockerLogLine, EntryContext, Parser};

/// How a tail task starts reading its container's log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailOptions {
    /// Wait before looking for the log file.
    pub delay: Duration,
    pub start: StartPosition,
}

impl TailOptions {
    /// For containers that already exist at startup: no wait, and everything
    /// already in the file is recorded.
    pub fn replay() -> Self {
        Self {
            delay: Duration::ZERO,
            start: StartPosition::Beginning,
        }
    }

    /// For containers created while running. Docker creates the directory
    /// before the log file, so give it `delay` to appear. Only new lines are
    /// recorded.
    pub fn forward(delay: Duration) -> Self {
        Self {
            delay,
            start: StartPosition::End,
        }
    }
}

/// How a tail task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailEnd {
    /// The directory has no usable container ID.
    InvalidDirectory,
    /// The container's log file never showed up.
    MissingLogFile,
    /// The container was removed.
    Finished,
    /// The log file could not be read.
    Failed,
}

/// What every tail task shares.
#[derive(Clone)]
pub struct Pipeline {
    pub parser: Arc<dyn Parser>,
    pub dispatcher: Arc<Dispatcher>,
    pub poll_interval: Duration,
}

impl Pipeline {
    /// Starts tailing `<dir>/<container id>-json.log` in its own task.
    pub fn spawn_tail(&self, dir: PathBuf, options: TailOptions) -> JoinHandle<TailEnd> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.tail(&dir, options).await })
    }

    pub async fn tail(&self, dir: &Path, options: TailOptions) -> TailEnd {
        let Some(container_id) = dir.file_name().and_then(|name| name.to_str()) else {
            warn!("Cannot derive a container ID from {dir:?}");
            return TailEnd::InvalidDirectory;
        };
        let path = dir.join(format!("{container_id}-json.log"));

        if !options.delay.is_zero() {
            tokio::time::sleep(options.delay).await;
        }

        if let Err(e) = tokio::fs::metadata(&path).await {
            if e.kind() == std::io::ErrorKind::NotFound {
                info!("Container logfile {path:?} does not exist");
                return TailEnd::MissingLogFile;
            }
            error!("Inspecting {path:?}: {e}");
            return TailEnd::Failed;
        }

        let mut follower = match Follower::open(&path, options.start, self.poll_interval).await {
            Ok(follower) => follower,
            Err(e) => {
                error!("Opening {path:?}: {e}");
                return TailEnd::Failed;
            }
        };

        debug!("Tailing {path:?}");
        loop {
            match follower.next_line().await {
                Ok(Some(line)) => self.record(container_id, &path, line).await,
                Ok(None) => {
                    debug!("Done tailing {path:?}");
                    return TailEnd::Finished;
                }
                Err(e) => {
                    error!("Tailing {path:?}: {e}");
                    return TailEnd::Failed;
                }
            }
        }
    }

    /// Parses one line and hands it to the dispatcher. Bad lines are logged
    /// and dropped.
    pub async fn record(&self, container_id: &str, path: &Path, line: TailLine) {
        debug!("Got line: {}", line.text);

        let docker_line = match DockerLogLine::from_json(&line.text) {
            Ok(docker_line) => docker_line,
            Err(e) => {
                error!("Tailing {path:?}: {e}");
                return;
            }
        };

        let entry = match self.parser.parse(&docker_line) {
            Ok(entry) => entry,
            Err(e) => {
                error!("Parsing line from container {container_id} ({path:?}): {e}");
                return;
            }
        };

        let ctx = EntryContext::new(container_id, line.time);
        self.dispatcher.dispatch(entry.as_ref(), &ctx).await;
        debug!("Recorded line");
    }
}
