//! Client-supplied timestamps.
//!
//! Messages and call requests carry a timestamp chosen by the browser. It is
//! stored verbatim and only interpreted here, so switching to server-assigned
//! time touches this module alone.

use chrono::{DateTime, TimeZone, Utc};

use crate::error::HubError;

/// Timestamp recorded for a message or call: the client's value as given.
pub fn accept_client_timestamp(raw: &str) -> Result<String, HubError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(HubError::missing("timestamp"));
    }
    Ok(raw.to_string())
}

/// Sort key for a stored timestamp. RFC 3339 strings and epoch milliseconds
/// are understood; anything else sorts as the epoch.
pub fn sort_key(raw: &str) -> DateTime<Utc> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(millis) = raw.parse::<i64>()
        && let Some(dt) = Utc.timestamp_millis_opt(millis).single()
    {
        return dt;
    }
    DateTime::UNIX_EPOCH
}
