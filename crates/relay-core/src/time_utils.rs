use chrono::{Local, TimeZone};

/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Formats the local calendar day (`YYYY-MM-DD`) containing `unix_ms`.
pub fn local_calendar_day(unix_ms: u64) -> String {
    let millis = i64::try_from(unix_ms).unwrap_or(i64::MAX);
    match Local.timestamp_millis_opt(millis).single() {
        Some(moment) => moment.format("%Y-%m-%d").to_string(),
        None => Local::now().format("%Y-%m-%d").to_string(),
    }
}

/// Maps `unix_ms` onto a fixed-width bucket index. A zero width collapses to one bucket.
pub fn time_bucket(unix_ms: u64, bucket_width_ms: u64) -> u64 {
    if bucket_width_ms == 0 {
        return 0;
    }
    unix_ms / bucket_width_ms
}
