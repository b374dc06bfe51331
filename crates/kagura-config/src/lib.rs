//! Shared configuration for the Kagura dispatch engine.
//!
//! [`Config`] is assembled by `ortho_config` from built-in defaults, an
//! optional TOML file (`--config-path` or `KAGURA_CONFIG_PATH`), `KAGURA_*`
//! environment variables and command-line flags, in increasing order of
//! precedence. The CGI entry point loads it without forwarding argv, so in
//! practice deployments configure the engine through files and the
//! environment set by the web server.
//!
//! [`Layout`] derives the concrete filesystem locations (log files, rotated
//! backups, session stores, templates) from a loaded configuration so every
//! component agrees on the directory structure.

mod defaults;
mod layout;
mod logging;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_MAX_LOG_BYTES, DEFAULT_NAME_ERROR_TEMPLATE,
    DEFAULT_SCRIPT_LOG_LEVEL, default_log_dir, default_log_filter, default_log_format,
    default_max_log_bytes, default_name_error_template, default_store_dir,
    default_template_dir,
};
pub use layout::{Layout, LayoutError};
pub use logging::{LogFormat, LogFormatParseError};

/// Runtime configuration for the dispatch engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "KAGURA")]
pub struct Config {
    /// Directory holding `<script>.log` and `<script>.bk.log`.
    #[serde(default = "defaults::default_log_dir")]
    pub log_dir: Utf8PathBuf,
    /// Directory holding `<session>.dat` stores and their lock files.
    #[serde(default = "defaults::default_store_dir")]
    pub store_dir: Utf8PathBuf,
    /// Root directory for template references.
    #[serde(default = "defaults::default_template_dir")]
    pub template_dir: Utf8PathBuf,
    /// Template rendered by the name-error tier when it exists.
    #[serde(default = "defaults::default_name_error_template")]
    pub name_error_template: String,
    /// Size in bytes above which a script log is rotated.
    #[serde(default = "defaults::default_max_log_bytes")]
    pub max_log_bytes: u64,
    /// Minimum severity written to per-script log files.
    #[serde(default = "defaults::default_script_log_level")]
    pub script_log_level: String,
    /// `EnvFilter` expression for process diagnostics on stderr.
    #[serde(default = "defaults::default_log_filter_string")]
    pub log_filter: String,
    /// Output format for both log sinks.
    #[serde(default = "defaults::default_log_format")]
    pub log_format: LogFormat,
    /// Whether request contexts are built with the session store requested.
    ///
    /// Left unset unless a source names it, so an absent CLI flag cannot mask
    /// a value from the file or the environment. Read it through
    /// [`Config::session_store`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_store: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: defaults::default_log_dir(),
            store_dir: defaults::default_store_dir(),
            template_dir: defaults::default_template_dir(),
            name_error_template: defaults::default_name_error_template(),
            max_log_bytes: defaults::default_max_log_bytes(),
            script_log_level: defaults::default_script_log_level(),
            log_filter: defaults::default_log_filter_string(),
            log_format: defaults::default_log_format(),
            session_store: None,
        }
    }
}

impl Config {
    /// Directory holding per-script log files.
    #[must_use]
    pub fn log_dir(&self) -> &Utf8Path {
        self.log_dir.as_path()
    }

    /// Directory holding session stores.
    #[must_use]
    pub fn store_dir(&self) -> &Utf8Path {
        self.store_dir.as_path()
    }

    /// Root directory for templates.
    #[must_use]
    pub fn template_dir(&self) -> &Utf8Path {
        self.template_dir.as_path()
    }

    /// Template reference used by the name-error tier.
    #[must_use]
    pub fn name_error_template(&self) -> &str {
        self.name_error_template.as_str()
    }

    /// Rotation threshold in bytes.
    #[must_use]
    pub const fn max_log_bytes(&self) -> u64 {
        self.max_log_bytes
    }

    /// Minimum severity for per-script log files.
    #[must_use]
    pub fn script_log_level(&self) -> &str {
        self.script_log_level.as_str()
    }

    /// Stderr filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Output format shared by both sinks.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Whether request contexts request the session store.
    #[must_use]
    pub fn session_store(&self) -> bool {
        self.session_store
            .unwrap_or_else(defaults::default_session_store)
    }
}
