//! The recorders entries can be forwarded to.

pub mod cloud_logging;
pub mod sentry;

use std::time::Duration;

use crate::cli::Args;
use crate::pipeline::{Recorder, RecorderError};

pub use cloud_logging::CloudLoggingRecorder;
pub use sentry::SentryRecorder;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds every recorder configured on the command line, Sentry first.
pub fn from_args(args: &Args) -> Result<Vec<Box<dyn Recorder>>, RecorderError> {
    let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    let mut recorders: Vec<Box<dyn Recorder>> = Vec::new();

    if let Some(value) = &args.sentry_dsn {
        let dsn = resolve_dsn(value)?;
        let sentry = SentryRecorder::new(client.clone(), &dsn)?;
        log::debug!("Sending Sentry events to {}", sentry.store_url());
        recorders.push(Box::new(sentry));
    }

    if let Some(project_id) = &args.gcp_project_id {
        recorders.push(Box::new(CloudLoggingRecorder::new(client, project_id)));
    }

    Ok(recorders)
}

/// Accepts either a DSN literal or the path of a file containing one.
pub fn resolve_dsn(value: &str) -> Result<String, RecorderError> {
    if value.starts_with("https://") || value.starts_with("http://") {
        return Ok(value.to_string());
    }

    std::fs::read_to_string(value)
        .map(|dsn| dsn.trim().to_string())
        .map_err(|e| RecorderError::Dsn(format!("reading {value}: {e}")))
}

/// Turns non-2xx responses into [`RecorderError::Rejected`].
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RecorderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RecorderError::Rejected {
        status: status.as_u16(),
        body,
    })
}
