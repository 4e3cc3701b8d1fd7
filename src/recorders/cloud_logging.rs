use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};

use super::ensure_success;
use crate::pipeline::timestamp::SOURCE_KEY;
use crate::pipeline::{Entry, EntryContext, Recorder, RecorderError};

const WRITE_URL: &str = "https://logging.googleapis.com/v2/entries:write";
const TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const DEFAULT_LOG_ID: &str = "default";
/// Tokens are refreshed this long before they expire.
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

/// One log within the project.
#[derive(Debug, PartialEq, Eq)]
struct CloudLogger {
    log_name: String,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Writes entries to Google Cloud Logging, one log per logger name.
pub struct CloudLoggingRecorder {
    client: reqwest::Client,
    project_id: String,
    loggers: Mutex<HashMap<String, Arc<CloudLogger>>>,
    token: tokio::sync::Mutex<Option<AccessToken>>,
}

impl CloudLoggingRecorder {
    pub fn new(client: reqwest::Client, project_id: &str) -> Self {
        Self {
            client,
            project_id: project_id.to_string(),
            loggers: Mutex::new(HashMap::new()),
            token: tokio::sync::Mutex::new(None),
        }
    }

    fn logger(&self, log_id: &str) -> Arc<CloudLogger> {
        let mut loggers = self.loggers.lock().unwrap_or_else(PoisonError::into_inner);
        let logger = loggers.entry(log_id.to_string()).or_insert_with(|| {
            debug!("Creating Cloud Logging logger {log_id}");
            Arc::new(CloudLogger {
                log_name: format!(
                    "projects/{}/logs/{}",
                    self.project_id,
                    urlencoding::encode(log_id)
                ),
            })
        });
        Arc::clone(logger)
    }

    fn write_request(&self, entry: &dyn Entry, ctx: &EntryContext) -> Value {
        let log_id = entry
            .diagnostic()
            .map(|diagnostic| diagnostic.logger())
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_LOG_ID);
        let logger = self.logger(log_id);

        let resolved = ctx.resolve_timestamp(entry);
        let mut payload = entry.data().clone();
        payload.insert(
            SOURCE_KEY.to_string(),
            Value::String(resolved.source.as_ref().to_string()),
        );

        json!({
            "entries": [{
                "logName": logger.log_name,
                "resource": {
                    "type": "global",
                    "labels": { "project_id": self.project_id },
                },
                "timestamp": resolved.time.to_rfc3339(),
                "severity": severity(entry.level()),
                "jsonPayload": payload,
                "labels": { "container": ctx.container_id },
            }]
        })
    }

    async fn access_token(&self) -> Result<String, RecorderError> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref() {
            if Instant::now() + TOKEN_MARGIN < current.expires_at {
                return Ok(current.value.clone());
            }
        }

        debug!("Fetching access token from the metadata server");
        let response = self
            .client
            .get(TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| RecorderError::Token(e.to_string()))?;
        let response: TokenResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| RecorderError::Token(e.to_string()))?;

        let value = response.access_token;
        *token = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        });
        Ok(value)
    }
}

/// Cloud Logging's severity names, case-insensitive, plus zap's own levels.
fn severity(level: &str) -> &'static str {
    match level.to_ascii_uppercase().as_str() {
        "DEBUG" => "DEBUG",
        "INFO" => "INFO",
        "NOTICE" => "NOTICE",
        "WARN" | "WARNING" => "WARNING",
        "ERROR" => "ERROR",
        "CRITICAL" | "DPANIC" => "CRITICAL",
        "ALERT" | "PANIC" => "ALERT",
        "EMERGENCY" | "FATAL" => "EMERGENCY",
        _ => "DEFAULT",
    }
}

#[async_trait]
impl Recorder for CloudLoggingRecorder {
    fn name(&self) -> &str {
        "gcp"
    }

    async fn record(&self, entry: &dyn Entry, ctx: &EntryContext) -> Result<(), RecorderError> {
        let body = self.write_request(entry, ctx);
        let token = self.access_token().await?;

        let response = self
            .client
            .post(WRITE_URL)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), RecorderError> {
        Ok(())
    }
}
