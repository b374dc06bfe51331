//! Engine bootstrap orchestration.

use std::ffi::OsString;
use std::sync::Arc;

use kagura_config::{Config, Layout, LayoutError};
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;
use tracing::info;

use crate::dispatch::Engine;
use crate::logger::LoggerError;
use crate::registry::Catalog;
use crate::render::{FileTemplates, Renderer};
use crate::telemetry::{self, TelemetryError};

/// Tracing target for bootstrap diagnostics.
const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the engine configuration.
    ///
    /// # Errors
    ///
    /// Returns the aggregated loader error.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader reading defaults, the configuration file and `KAGURA_*` variables.
///
/// Command-line arguments are never consulted: CGI servers may pass query
/// words as argv, so only the program name is forwarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load_from_iter([OsString::from(env!("CARGO_PKG_NAME"))])
    }
}

/// Loader returning a fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Log or store directories could not be created.
    #[error("failed to prepare directories: {source}")]
    Layout {
        /// Underlying layout error.
        #[source]
        source: LayoutError,
    },
    /// The logger provider rejected the configuration.
    #[error("failed to prepare script logging: {source}")]
    Logger {
        /// Underlying logger error.
        #[source]
        source: LoggerError,
    },
}

/// Bootstraps an engine that renders templates from `template_dir`.
///
/// # Errors
///
/// Returns [`BootstrapError`] when any bootstrap step fails.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    catalog: Catalog,
) -> Result<Engine, BootstrapError> {
    bootstrap_with_renderer(loader, catalog, |config| {
        Arc::new(FileTemplates::new(Layout::from_config(config)))
    })
}

/// Bootstraps an engine with a caller-built renderer.
///
/// Loads configuration, initialises telemetry, prepares the log and store
/// directories and validates the script log level.
///
/// # Errors
///
/// Returns [`BootstrapError`] when any bootstrap step fails.
pub fn bootstrap_with_renderer(
    loader: &dyn ConfigLoader,
    catalog: Catalog,
    make_renderer: impl FnOnce(&Config) -> Arc<dyn Renderer>,
) -> Result<Engine, BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;

    telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;

    Layout::from_config(&config)
        .prepare_directories()
        .map_err(|source| BootstrapError::Layout { source })?;

    let renderer = make_renderer(&config);
    let scripts = catalog.len();
    let engine = Engine::new(config, catalog, renderer)
        .map_err(|source| BootstrapError::Logger { source })?;
    info!(target: BOOTSTRAP_TARGET, scripts, "engine ready");
    Ok(engine)
}
