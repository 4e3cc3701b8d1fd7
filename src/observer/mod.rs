//! Watches Docker's container directory, tails the log file of every
//! container in it, and forwards the parsed entries to the recorders.

pub mod follow;
pub mod tail;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};

use crate::pipeline::{Dispatcher, Parser};
use tail::{Pipeline, TailOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverConfig {
    /// Wait before tailing a container created while running.
    pub new_container_delay: Duration,
    /// How often tail tasks check idle files for new content.
    pub poll_interval: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            new_container_delay: Duration::from_secs(1),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Why the observer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Signal(i32),
    WatcherClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("Watching directory: {0}")]
    Watch(#[from] notify::Error),
    #[error("Reading dir {0:?} to find existing container dirs: {1}")]
    ReadDir(PathBuf, #[source] std::io::Error),
}

/// Handle to a running observer.
pub struct Observer {
    watcher: Option<RecommendedWatcher>,
    done: Option<oneshot::Receiver<Shutdown>>,
}

impl Observer {
    /// Starts tailing every container directory already in `dir`, then
    /// watches it for new ones until a value arrives on `terminate` or the
    /// watcher is closed.
    pub fn start(
        dir: &Path,
        parser: Arc<dyn Parser>,
        dispatcher: Arc<Dispatcher>,
        config: ObserverConfig,
        terminate: mpsc::UnboundedReceiver<i32>,
    ) -> Result<Self, ObserverError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = events_tx.send(event);
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        let pipeline = Pipeline {
            parser,
            dispatcher,
            poll_interval: config.poll_interval,
        };

        let entries = std::fs::read_dir(dir).map_err(|e| ObserverError::ReadDir(dir.to_path_buf(), e))?;
        for entry in entries {
            match entry {
                Ok(entry) if entry.file_type().is_ok_and(|t| t.is_dir()) => {
                    pipeline.spawn_tail(entry.path(), TailOptions::replay());
                }
                Ok(_) => {}
                Err(e) => error!("Reading entry of {dir:?}: {e}"),
            }
        }

        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(observe(
            events_rx,
            terminate,
            pipeline,
            config.new_container_delay,
            done_tx,
        ));

        Ok(Self {
            watcher: Some(watcher),
            done: Some(done_rx),
        })
    }

    /// Resolves once the observer has stopped. `None` if an earlier call
    /// already received the reason.
    pub async fn done(&mut self) -> Option<Shutdown> {
        let done = self.done.take()?;
        Some(done.await.unwrap_or(Shutdown::WatcherClosed))
    }

    /// Closes the directory watcher. The observer stops once it notices.
    pub fn close(&mut self) {
        if self.watcher.take().is_some() {
            debug!("Closed container directory watcher");
        }
    }
}

/// The discovery loop. Sends exactly one value on `done` when it exits.
async fn observe(
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    mut terminate: mpsc::UnboundedReceiver<i32>,
    pipeline: Pipeline,
    new_container_delay: Duration,
    done: oneshot::Sender<Shutdown>,
) {
    debug!("Starting observer");
    let mut signals_open = true;

    let reason = loop {
        tokio::select! {
            signal = terminate.recv(), if signals_open => match signal {
                Some(signal) => break Shutdown::Signal(signal),
                None => signals_open = false,
            },
            event = events.recv() => match event {
                Some(Ok(event)) => {
                    handle_event(&pipeline, new_container_delay, event).await;
                }
                Some(Err(e)) => error!("Directory watcher error: {e}"),
                None => break Shutdown::WatcherClosed,
            },
        }
    };

    info!("Observer stopped: {reason:?}");
    let _ = done.send(reason);
}

/// Starts a tail for every directory the event created. Returns how many
/// were started.
async fn handle_event(pipeline: &Pipeline, new_container_delay: Duration, event: Event) -> usize {
    if !matches!(event.kind, EventKind::Create(_)) {
        return 0;
    }

    let mut started = 0;
    for path in event.paths {
        if path.as_os_str().is_empty() {
            continue;
        }
        debug!("Received create event for {path:?}");

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                error!("Inspecting {path:?}: {e}");
                continue;
            }
        };

        if metadata.is_dir() {
            pipeline.spawn_tail(path, TailOptions::forward(new_container_delay));
            started += 1;
        }
    }
    started
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{call_log, messages, CallLog, MockRecorder};
    use crate::pipeline::zap::ZapParser;
    use notify::event::{CreateKind, ModifyKind};
    use std::io::Write;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn config() -> ObserverConfig {
        ObserverConfig {
            new_container_delay: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn dispatcher(calls: &CallLog) -> Arc<Dispatcher> {
        Arc::new(
            Dispatcher::new(vec![Box::new(MockRecorder::new("mock", calls))])
                .expect("Failed to create dispatcher"),
        )
    }

    fn pipeline(calls: &CallLog) -> Pipeline {
        Pipeline {
            parser: Arc::new(ZapParser::new()),
            dispatcher: dispatcher(calls),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn created(path: PathBuf) -> Event {
        Event::new(EventKind::Create(CreateKind::Folder)).add_path(path)
    }

    fn append_entry(dir: &Path, msg: &str) {
        let id = dir.file_name().unwrap().to_str().unwrap();
        let log = format!(r#"{{"level":"error","msg":"{msg}"}}"#);
        let line = serde_json::json!({"log": log, "stream": "stderr", "time": "2018-01-17T23:31:03Z"});
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{id}-json.log")))
            .unwrap();
        writeln!(file, "{line}").unwrap();
    }

    async fn wait_for_calls(calls: &CallLog, count: usize) {
        timeout(WAIT, async {
            while calls.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Timed out waiting for recorder calls");
    }

    #[tokio::test]
    async fn test_replays_existing_and_follows_new_containers() {
        let root = tempfile::tempdir().unwrap();
        let existing = root.path().join("existing");
        std::fs::create_dir(&existing).unwrap();
        append_entry(&existing, "from before startup");

        let calls = call_log();
        let (_terminate_tx, terminate_rx) = mpsc::unbounded_channel();
        let mut observer = Observer::start(
            root.path(),
            Arc::new(ZapParser::new()),
            dispatcher(&calls),
            config(),
            terminate_rx,
        )
        .expect("Failed to start observer");

        wait_for_calls(&calls, 1).await;

        let created = root.path().join("created");
        std::fs::create_dir(&created).unwrap();
        append_entry(&created, "written before the tail started");
        // The forward-only tail seeks to the end after the delay.
        tokio::time::sleep(Duration::from_millis(400)).await;
        append_entry(&created, "from new container");
        wait_for_calls(&calls, 2).await;

        assert_eq!(
            messages(&calls),
            vec![
                ("mock".to_string(), "from before startup".to_string()),
                ("mock".to_string(), "from new container".to_string()),
            ]
        );

        observer.close();
        assert_eq!(
            timeout(WAIT, observer.done()).await.expect("Observer did not stop"),
            Some(Shutdown::WatcherClosed)
        );
    }

    #[tokio::test]
    async fn test_signal_stops_observer_once() {
        let root = tempfile::tempdir().unwrap();
        let calls = call_log();
        let (terminate_tx, terminate_rx) = mpsc::unbounded_channel();
        let mut observer = Observer::start(
            root.path(),
            Arc::new(ZapParser::new()),
            dispatcher(&calls),
            config(),
            terminate_rx,
        )
        .expect("Failed to start observer");

        terminate_tx.send(15).unwrap();
        terminate_tx.send(2).unwrap();

        assert_eq!(
            timeout(WAIT, observer.done()).await.expect("Observer did not stop"),
            Some(Shutdown::Signal(15))
        );
        assert_eq!(observer.done().await, None);
        observer.close();
    }

    #[tokio::test]
    async fn test_plain_files_are_ignored() {
        let root = tempfile::tempdir().unwrap();
        let calls = call_log();
        let (_terminate_tx, terminate_rx) = mpsc::unbounded_channel();
        let mut observer = Observer::start(
            root.path(),
            Arc::new(ZapParser::new()),
            dispatcher(&calls),
            config(),
            terminate_rx,
        )
        .expect("Failed to start observer");

        std::fs::write(root.path().join("stray-json.log"), "{}\n").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(calls.lock().unwrap().is_empty());

        observer.close();
        timeout(WAIT, observer.done()).await.expect("Observer did not stop");
    }

    #[tokio::test]
    async fn test_create_event_for_directory_starts_tail() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("created");
        std::fs::create_dir(&dir).unwrap();
        append_entry(&dir, "old");

        let calls = call_log();
        let started = handle_event(&pipeline(&calls), Duration::ZERO, created(dir.clone())).await;
        assert_eq!(started, 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        append_entry(&dir, "new");
        wait_for_calls(&calls, 1).await;
        assert_eq!(messages(&calls), vec![("mock".to_string(), "new".to_string())]);
    }

    #[tokio::test]
    async fn test_non_create_events_are_ignored() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("modified");
        std::fs::create_dir(&dir).unwrap();

        let calls = call_log();
        let event = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(dir.clone());
        assert_eq!(handle_event(&pipeline(&calls), Duration::ZERO, event).await, 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        append_entry(&dir, "should not be tailed");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_paths_are_skipped() {
        let calls = call_log();
        let started = handle_event(&pipeline(&calls), Duration::ZERO, created(PathBuf::new())).await;
        assert_eq!(started, 0);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vanished_paths_are_dropped() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("gone");
        std::fs::create_dir(&dir).unwrap();
        std::fs::remove_dir(&dir).unwrap();

        let calls = call_log();
        let started = handle_event(&pipeline(&calls), Duration::ZERO, created(dir)).await;
        assert_eq!(started, 0);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watcher_errors_do_not_stop_the_loop() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("after-error");
        std::fs::create_dir(&dir).unwrap();
        append_entry(&dir, "old");

        let calls = call_log();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (_terminate_tx, terminate_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(observe(
            events_rx,
            terminate_rx,
            pipeline(&calls),
            Duration::ZERO,
            done_tx,
        ));

        events_tx
            .send(Err(notify::Error::generic("watch queue overflowed")))
            .unwrap();
        events_tx.send(Ok(created(dir.clone()))).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        append_entry(&dir, "new");
        wait_for_calls(&calls, 1).await;
        assert_eq!(messages(&calls), vec![("mock".to_string(), "new".to_string())]);

        drop(events_tx);
        assert_eq!(
            timeout(WAIT, done_rx).await.expect("Loop did not stop").unwrap(),
            Shutdown::WatcherClosed
        );
    }

    #[tokio::test]
    async fn test_new_container_without_log_file_records_nothing() {
        let root = tempfile::tempdir().unwrap();
        let calls = call_log();
        let (_terminate_tx, terminate_rx) = mpsc::unbounded_channel();
        let mut observer = Observer::start(
            root.path(),
            Arc::new(ZapParser::new()),
            dispatcher(&calls),
            config(),
            terminate_rx,
        )
        .expect("Failed to start observer");

        let dir = root.path().join("short-lived");
        std::fs::create_dir(&dir).unwrap();
        // Past the grace delay the tail has already given up.
        tokio::time::sleep(Duration::from_millis(400)).await;
        append_entry(&dir, "too late");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(calls.lock().unwrap().is_empty());

        observer.close();
        assert_eq!(
            timeout(WAIT, observer.done()).await.expect("Observer did not stop"),
            Some(Shutdown::WatcherClosed)
        );
    }

    #[test]
    fn test_unreadable_root_fails_at_startup() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let calls = call_log();
        let (_terminate_tx, terminate_rx) = mpsc::unbounded_channel();
        let result = Observer::start(
            Path::new("/definitely/not/a/real/dir"),
            Arc::new(ZapParser::new()),
            dispatcher(&calls),
            config(),
            terminate_rx,
        );
        assert!(result.is_err());
    }
}
