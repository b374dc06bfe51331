use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Rotation threshold for per-script log files (300 KiB).
pub const DEFAULT_MAX_LOG_BYTES: u64 = 300 * 1024;

/// Default stderr filter expression for process diagnostics.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Default minimum severity written to per-script log files.
pub const DEFAULT_SCRIPT_LOG_LEVEL: &str = "debug";

/// Default template consulted by the name-error tier.
pub const DEFAULT_NAME_ERROR_TEMPLATE: &str = "nameerror.html";

/// Default directory for `<script>.log` files.
pub fn default_log_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("log")
}

/// Default directory for `<session>.dat` stores.
pub fn default_store_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("work")
}

/// Default template root.
pub fn default_template_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("templates")
}

/// Owned name-error template reference used where allocation is required
/// (e.g. serde).
pub fn default_name_error_template() -> String {
    DEFAULT_NAME_ERROR_TEMPLATE.to_owned()
}

/// Rotation threshold in bytes.
pub const fn default_max_log_bytes() -> u64 {
    DEFAULT_MAX_LOG_BYTES
}

/// Default stderr filter expression.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned stderr filter used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Owned script log level used where allocation is required (e.g. serde).
pub fn default_script_log_level() -> String {
    DEFAULT_SCRIPT_LOG_LEVEL.to_owned()
}

/// Default logging format for both sinks.
pub fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Request contexts are built without a session store unless enabled.
pub const fn default_session_store() -> bool {
    false
}
