//! Default values and functions for configuration

// Default constants
pub(crate) const DEFAULT_BACKEND: &str = "native";
pub(crate) const VALID_BACKENDS: [&str; 2] = ["native", "poll"];

pub(crate) fn default_coalesce_timeout_ms() -> u64 {
    2000
}

pub(crate) fn default_max_coalesce_delay_ms() -> u64 {
    10_000
}

pub(crate) fn default_shutdown_grace_ms() -> u64 {
    3000
}

pub(crate) fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

pub(crate) fn default_poll_interval_ms() -> u64 {
    2000
}

pub(crate) fn default_polling_fallback() -> bool {
    true
}

pub(crate) fn default_event_queue_capacity() -> usize {
    100_000
}
