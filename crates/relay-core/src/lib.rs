//! Foundational low-level utilities shared across relay crates.
//!
//! Provides atomic file-write helpers, an append-only JSONL log, and time
//! utilities for welcome marks and order bucketing.

pub mod atomic_io;
pub mod jsonl_log;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use jsonl_log::JsonlEventLog;
pub use time_utils::{current_unix_timestamp_ms, local_calendar_day, time_bucket};
