//! Low-level helpers shared by the bridge crates.
//!
//! Provides crash-safe state-file writes, JSON state loading, and the unix
//! clock helpers used for retry deadlines and status timestamps.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::{load_json_or_default, write_json_atomic, write_text_atomic};
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, unix_ms_after};
