use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Cancelled,
}

// Accepts RFC 3339 plus the looser forms servers tend to send. A date-time
// without offset is local time; a bare date is midnight UTC.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|local| local.with_timezone(&Utc));
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Wait instant used when the server gave no retry hint.
pub fn fallback_instant(delay: Duration) -> String {
    let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(1));
    format_instant(Utc::now() + delay)
}

/// Time left until `instant`, or `None` if it is absent, malformed or already past.
pub fn delay_until(instant: Option<&str>) -> Option<Duration> {
    let target = parse_instant(instant?)?;
    (target - Utc::now()).to_std().ok().filter(|d| !d.is_zero())
}

/// Suspends until `instant` or until `cancel` fires, whichever comes first.
///
/// Absent, malformed and past instants resolve to [`WaitOutcome::Elapsed`] right away.
/// The timer is dropped on both paths.
pub async fn wait_until(instant: Option<&str>, cancel: &CancellationToken) -> WaitOutcome {
    let Some(delay) = delay_until(instant) else {
        return WaitOutcome::Elapsed;
    };

    tracing::debug!(delay_ms = delay.as_millis() as u64, "waiting before next poll");

    tokio::select! {
        biased;
        _ = cancel.cancelled() => WaitOutcome::Cancelled,
        _ = tokio::time::sleep(delay) => WaitOutcome::Elapsed,
    }
}
