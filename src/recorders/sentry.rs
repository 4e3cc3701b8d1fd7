use std::collections::BTreeMap;

use async_trait::async_trait;
use log::debug;
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

use super::ensure_success;
use crate::pipeline::timestamp::SOURCE_KEY;
use crate::pipeline::{Entry, EntryContext, Recorder, RecorderError, Stacktrace};

const SENTRY_VERSION: u8 = 7;

/// Sends every entry to Sentry's store endpoint as one event.
pub struct SentryRecorder {
    client: reqwest::Client,
    store_url: Url,
    auth_header: String,
}

impl SentryRecorder {
    /// `dsn` has the form `https://<key>[:<secret>]@<host>[/<prefix>]/<project>`.
    pub fn new(client: reqwest::Client, dsn: &str) -> Result<Self, RecorderError> {
        let dsn = Url::parse(dsn).map_err(|e| RecorderError::Dsn(e.to_string()))?;

        let key = dsn.username();
        if key.is_empty() {
            return Err(RecorderError::Dsn("missing public key".to_string()));
        }
        let host = dsn
            .host_str()
            .ok_or_else(|| RecorderError::Dsn("missing host".to_string()))?;
        let host = match dsn.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let path = dsn.path().trim_matches('/');
        let (prefix, project) = match path.rsplit_once('/') {
            Some((prefix, project)) => (format!("/{prefix}"), project),
            None => (String::new(), path),
        };
        if project.is_empty() {
            return Err(RecorderError::Dsn("missing project ID".to_string()));
        }

        let store_url = Url::parse(&format!(
            "{}://{host}{prefix}/api/{project}/store/",
            dsn.scheme()
        ))
        .map_err(|e| RecorderError::Dsn(e.to_string()))?;

        let mut auth_header = format!(
            "Sentry sentry_version={SENTRY_VERSION}, sentry_client=logwatch/{}, sentry_key={key}",
            env!("CARGO_PKG_VERSION")
        );
        if let Some(secret) = dsn.password() {
            auth_header.push_str(&format!(", sentry_secret={secret}"));
        }

        Ok(Self {
            client,
            store_url,
            auth_header,
        })
    }

    pub fn store_url(&self) -> &Url {
        &self.store_url
    }
}

#[derive(Debug, Serialize)]
struct Event<'a> {
    event_id: String,
    message: &'a str,
    timestamp: String,
    level: &'static str,
    platform: &'static str,
    server_name: &'a str,
    extra: &'a Map<String, Value>,
    tags: BTreeMap<&'static str, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logger: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    culprit: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    release: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stacktrace: Option<Stacktrace>,
}

fn build_event<'a>(entry: &'a dyn Entry, ctx: &'a EntryContext) -> Event<'a> {
    let resolved = ctx.resolve_timestamp(entry);
    let mut event = Event {
        event_id: uuid::Uuid::now_v7().simple().to_string(),
        message: entry.message(),
        timestamp: resolved.time.to_rfc3339(),
        level: sentry_level(entry.level()),
        platform: "go",
        server_name: &ctx.container_id,
        extra: entry.data(),
        tags: BTreeMap::from([(SOURCE_KEY, resolved.source.as_ref().to_string())]),
        logger: None,
        culprit: None,
        release: None,
        stacktrace: None,
    };

    if let Some(diagnostic) = entry.diagnostic() {
        event.logger = non_empty(diagnostic.logger());
        event.culprit = non_empty(diagnostic.culprit());
        event.release = non_empty(diagnostic.release());
        event.stacktrace = Some(diagnostic.stacktrace()).filter(|st| !st.is_empty());
    }

    event
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value).filter(|v| !v.is_empty())
}

/// Zap levels to Sentry's. Anything unrecognized is reported as an error.
fn sentry_level(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warning",
        "dpanic" | "panic" | "fatal" => "fatal",
        _ => "error",
    }
}

#[async_trait]
impl Recorder for SentryRecorder {
    fn name(&self) -> &str {
        "sentry"
    }

    async fn record(&self, entry: &dyn Entry, ctx: &EntryContext) -> Result<(), RecorderError> {
        let event = build_event(entry, ctx);
        debug!("Sending event {} to Sentry", event.event_id);

        let response = self
            .client
            .post(self.store_url.clone())
            .header("X-Sentry-Auth", &self.auth_header)
            .json(&event)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), RecorderError> {
        Ok(())
    }
}
