use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};

const BASE_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF_SHIFT: u32 = 6;

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(1);
static JITTER_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Exponential backoff bounded by an attempt count and an optional wall budget.
pub(crate) struct RetryPolicy {
    pub max_retries: usize,
    /// Zero disables the budget.
    pub budget_ms: u64,
    pub jitter: bool,
}

impl RetryPolicy {
    /// Delay before retrying after `attempt` failed, or `None` once attempts or
    /// budget are spent. A provider `Retry-After` acts as a floor.
    pub(crate) fn delay_after(
        &self,
        attempt: usize,
        elapsed: Duration,
        retry_after_ms: Option<u64>,
    ) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let delay_ms = self
            .backoff_ms(attempt)
            .max(retry_after_ms.unwrap_or_default());
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        if self.budget_ms > 0 && elapsed_ms.saturating_add(delay_ms) > self.budget_ms {
            return None;
        }
        Some(Duration::from_millis(delay_ms))
    }

    fn backoff_ms(&self, attempt: usize) -> u64 {
        let shift = u32::try_from(attempt).map_or(MAX_BACKOFF_SHIFT, |a| a.min(MAX_BACKOFF_SHIFT));
        let full = BASE_BACKOFF_MS << shift;
        if !self.jitter {
            return full;
        }
        // uniform-ish in [full/2, full]
        let half = full / 2;
        let seed = JITTER_SEQ.fetch_add(1, Ordering::Relaxed);
        let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(29);
        half + mixed % (full - half + 1)
    }
}

/// Statuses worth another attempt: timeouts, conflicts, throttling, server errors.
pub(crate) fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 425 | 429) || status >= 500
}

pub(crate) fn is_transient_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

/// `Retry-After` as delta-seconds or an HTTP date; past dates mean "now".
pub(crate) fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1_000));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let remaining = at.signed_duration_since(Utc::now()).num_milliseconds();
    Some(u64::try_from(remaining).unwrap_or(0))
}

pub(crate) fn request_id() -> String {
    let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("relay-{}-{seq}", Utc::now().timestamp_millis())
}
