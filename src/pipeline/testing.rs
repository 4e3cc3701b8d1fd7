use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Entry, EntryContext, Recorder, RecorderError};

/// A call observed by a [`MockRecorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub recorder: String,
    pub message: String,
    pub container_id: String,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// Records every call into a log shared between recorders, so tests can
/// check call order across them.
pub struct MockRecorder {
    name: String,
    fail: bool,
    calls: CallLog,
    closes: Arc<Mutex<usize>>,
}

impl MockRecorder {
    pub fn new(name: &str, calls: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            fail: false,
            calls: Arc::clone(calls),
            closes: Arc::new(Mutex::new(0)),
        }
    }

    pub fn failing(name: &str, calls: &CallLog) -> Self {
        Self {
            fail: true,
            ..Self::new(name, calls)
        }
    }

    pub fn closes(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.closes)
    }
}

#[async_trait]
impl Recorder for MockRecorder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn record(&self, entry: &dyn Entry, ctx: &EntryContext) -> Result<(), RecorderError> {
        self.calls.lock().unwrap().push(Call {
            recorder: self.name.clone(),
            message: entry.message().to_string(),
            container_id: ctx.container_id.clone(),
        });
        if self.fail {
            return Err(RecorderError::Rejected {
                status: 500,
                body: "mock failure".to_string(),
            });
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), RecorderError> {
        *self.closes.lock().unwrap() += 1;
        if self.fail {
            return Err(RecorderError::Token("mock failure".to_string()));
        }
        Ok(())
    }
}

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn messages(calls: &CallLog) -> Vec<(String, String)> {
    calls
        .lock()
        .unwrap()
        .iter()
        .map(|c| (c.recorder.clone(), c.message.clone()))
        .collect()
}
