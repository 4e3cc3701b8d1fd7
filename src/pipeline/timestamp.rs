use chrono::{DateTime, Utc};
use serde_json::Value;

/// Data key recording which source an entry's timestamp was taken from.
pub const SOURCE_KEY: &str = "timestamp_comes_from";

/// Where a resolved timestamp came from, in order of precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimestampSource {
    /// The numeric `ts` field written by the application's logger.
    ZapEntry,
    /// The `time` field the container runtime attached to the line.
    DockerEntry,
    /// The moment the tailer read the line.
    TailTime,
}

impl AsRef<str> for TimestampSource {
    fn as_ref(&self) -> &str {
        match self {
            Self::ZapEntry => "zap_entry",
            Self::DockerEntry => "docker_entry",
            Self::TailTime => "tail_time",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTimestamp {
    pub time: DateTime<Utc>,
    pub source: TimestampSource,
}

impl ResolvedTimestamp {
    pub fn new(time: DateTime<Utc>, source: TimestampSource) -> Self {
        Self { time, source }
    }
}

/// First two links of the chain: the embedded epoch seconds, then the
/// runtime's RFC3339 time. Sources that fail to decode are skipped.
pub fn resolve(embedded: Option<&Value>, runtime_time: &str) -> Option<ResolvedTimestamp> {
    if let Some(time) = embedded.and_then(from_epoch_seconds) {
        return Some(ResolvedTimestamp::new(time, TimestampSource::ZapEntry));
    }
    from_rfc3339(runtime_time).map(|time| ResolvedTimestamp::new(time, TimestampSource::DockerEntry))
}

/// Last link of the chain.
pub fn or_tail_time(resolved: Option<ResolvedTimestamp>, tail_time: DateTime<Utc>) -> ResolvedTimestamp {
    resolved.unwrap_or(ResolvedTimestamp::new(tail_time, TimestampSource::TailTime))
}

/// Decodes fractional seconds since the epoch, as zap writes them.
pub fn from_epoch_seconds(value: &Value) -> Option<DateTime<Utc>> {
    let seconds = value.as_f64()?;
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.trunc();
    let nanos = ((seconds - whole) * 1_000_000_000.0).round() as u32;
    let time = if nanos >= 1_000_000_000 {
        DateTime::from_timestamp(whole as i64 + 1, 0)?
    } else {
        DateTime::from_timestamp(whole as i64, nanos)?
    };
    non_zero(time)
}

pub fn from_rfc3339(text: &str) -> Option<DateTime<Utc>> {
    let time = DateTime::parse_from_rfc3339(text).ok()?;
    non_zero(time.with_timezone(&Utc))
}

// Loggers write zero values (epoch, or year 1) when they have no time.
fn non_zero(time: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (time.timestamp() > 0).then_some(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use quickcheck_macros::quickcheck;
    use serde_json::json;

    const DOCKER_TIME: &str = "2018-01-17T23:31:03.164678054Z";

    #[test]
    fn test_embedded_timestamp_wins() {
        let resolved = resolve(Some(&json!(1516231863.0)), DOCKER_TIME).expect("Expected a timestamp");
        assert_eq!(resolved.source, TimestampSource::ZapEntry);
        assert_eq!(resolved.time, Utc.timestamp_opt(1516231863, 0).unwrap());
    }

    #[test]
    fn test_fractional_seconds_are_kept() {
        let time = from_epoch_seconds(&json!(1516231863.5)).expect("Expected a timestamp");
        assert_eq!(time.timestamp(), 1516231863);
        assert_eq!(time.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_integer_seconds_are_accepted() {
        let time = from_epoch_seconds(&json!(1516491077)).expect("Expected a timestamp");
        assert_eq!(time, Utc.timestamp_opt(1516491077, 0).unwrap());
    }

    #[test]
    fn test_runtime_time_is_second() {
        let resolved = resolve(None, DOCKER_TIME).expect("Expected a timestamp");
        assert_eq!(resolved.source, TimestampSource::DockerEntry);
        assert_eq!(resolved.time.timestamp(), 1516231863);
        assert_eq!(resolved.time.timestamp_subsec_nanos(), 164678054);
    }

    #[test]
    fn test_undecodable_sources_fall_through() {
        let resolved = resolve(Some(&json!("yesterday")), DOCKER_TIME).expect("Expected a timestamp");
        assert_eq!(resolved.source, TimestampSource::DockerEntry);

        let resolved = resolve(Some(&json!(0.0)), DOCKER_TIME).expect("Expected a timestamp");
        assert_eq!(resolved.source, TimestampSource::DockerEntry);

        assert_eq!(resolve(Some(&json!(null)), "not a time"), None);
        assert_eq!(resolve(None, "0001-01-01T00:00:00Z"), None);
    }

    #[test]
    fn test_tail_time_is_last() {
        let tail_time = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        let resolved = or_tail_time(resolve(None, ""), tail_time);
        assert_eq!(resolved, ResolvedTimestamp::new(tail_time, TimestampSource::TailTime));
    }

    #[test]
    fn test_source_tags() {
        assert_eq!(TimestampSource::ZapEntry.as_ref(), "zap_entry");
        assert_eq!(TimestampSource::DockerEntry.as_ref(), "docker_entry");
        assert_eq!(TimestampSource::TailTime.as_ref(), "tail_time");
    }

    #[quickcheck]
    fn prop_embedded_seconds_take_precedence(seconds: u32) -> bool {
        if seconds == 0 {
            return true;
        }
        let resolved = resolve(Some(&json!(seconds)), DOCKER_TIME);
        resolved
            == Some(ResolvedTimestamp::new(
                Utc.timestamp_opt(seconds as i64, 0).unwrap(),
                TimestampSource::ZapEntry,
            ))
    }
}
