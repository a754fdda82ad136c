//! Foundational low-level utilities shared across Veil crates.
//!
//! Provides atomic file-write helpers and unix-millisecond time utilities
//! used by queue scheduling, follow-up planning, and ledger timestamps.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::{append_line_creating_dir, write_bytes_atomic, write_text_atomic};
pub use time_utils::{
    current_unix_timestamp_ms, unix_ms_plus_days, unix_ms_plus_minutes, unix_ms_window_start,
};
