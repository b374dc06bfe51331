//! Explicit component registry and the resolver that loads from it.
//!
//! Instead of scanning controller directories, each script registers a
//! [`ScriptManifest`] with the [`Catalog`]. A manifest lists the component
//! units that define its handlers and the names of the logic units it relies
//! on. The [`ModuleResolver`] loads those units on demand (at most once per
//! process) and then looks up the qualified name `Script::Mode`.
//!
//! Load order for a request is fixed: the script's controller units, then the
//! common unit, then the listed logic units.

mod definitions;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::logger::{LoggerError, LoggerHandle, LoggerProvider};
use crate::names::{Mode, NameError, ScriptName, qualified_name};

pub use self::definitions::{Component, Definitions, HandlerFactory, LogicTable};

/// Errors raised while building a [`Catalog`].
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A manifest for the script was registered twice.
    #[error("script '{script}' is already registered")]
    DuplicateScript {
        /// Script name.
        script: String,
    },
    /// A logic unit with the same name was provided twice.
    #[error("logic unit '{unit}' is already provided")]
    DuplicateLogicUnit {
        /// Unit name.
        unit: String,
    },
    /// A script name used to build the catalog failed validation.
    #[error(transparent)]
    InvalidScript(#[from] NameError),
}

/// Errors raised while resolving a component.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The mode (or script) failed identifier validation.
    #[error(transparent)]
    InvalidName(#[from] NameError),
    /// Loading finished without defining the qualified name.
    #[error("uninitialized constant {qualified}")]
    Unresolved {
        /// Qualified name that was looked up.
        qualified: String,
    },
    /// A logic unit listed by the script's manifest is not provided.
    #[error("NotFound: {unit} (listed by script '{script}')")]
    MissingComponent {
        /// Script whose manifest lists the unit.
        script: String,
        /// Name of the missing unit.
        unit: String,
    },
    /// The script logger could not be obtained.
    #[error(transparent)]
    Logger(#[from] LoggerError),
}

impl ResolveError {
    /// Returns `true` for failures that mean "no such component" and are
    /// therefore answered with the name-error page.
    #[must_use]
    pub const fn is_name_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidName(_) | Self::Unresolved { .. } | Self::MissingComponent { .. }
        )
    }
}

type Installer = Arc<dyn Fn(&mut Definitions) + Send + Sync>;

/// Named unit of definitions, loaded at most once per process.
#[derive(Clone)]
pub struct ComponentUnit {
    name: String,
    install: Installer,
}

impl ComponentUnit {
    /// Creates a unit whose `install` closure adds definitions when loaded.
    pub fn new(
        name: impl Into<String>,
        install: impl Fn(&mut Definitions) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            install: Arc::new(install),
        }
    }

    /// Unit name, unique within a catalog.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub(crate) fn install(&self, definitions: &mut Definitions) {
        (self.install)(definitions);
    }
}

impl fmt::Debug for ComponentUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentUnit")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Units belonging to one script.
#[derive(Debug, Clone)]
pub struct ScriptManifest {
    script: ScriptName,
    controllers: Vec<ComponentUnit>,
    logic: Vec<String>,
}

impl ScriptManifest {
    /// Creates an empty manifest for `script`.
    #[must_use]
    pub const fn new(script: ScriptName) -> Self {
        Self {
            script,
            controllers: Vec::new(),
            logic: Vec::new(),
        }
    }

    /// Adds a controller unit, loaded before anything else for this script.
    #[must_use]
    pub fn with_controller(mut self, unit: ComponentUnit) -> Self {
        self.controllers.push(unit);
        self
    }

    /// Lists a logic unit by name. It must be provided to the catalog.
    #[must_use]
    pub fn with_logic(mut self, unit: impl Into<String>) -> Self {
        self.logic.push(unit.into());
        self
    }

    /// Script this manifest belongs to.
    #[must_use]
    pub const fn script(&self) -> &ScriptName {
        &self.script
    }

    /// Controller units in load order.
    #[must_use]
    pub fn controllers(&self) -> &[ComponentUnit] {
        &self.controllers
    }

    /// Listed logic unit names in load order.
    #[must_use]
    pub fn logic(&self) -> &[String] {
        &self.logic
    }
}

/// Everything the resolver may load.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    scripts: HashMap<ScriptName, ScriptManifest>,
    common: Option<ComponentUnit>,
    logic_units: HashMap<String, ComponentUnit>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a script manifest.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::DuplicateScript`] when the script is already
    /// registered.
    pub fn register(&mut self, manifest: ScriptManifest) -> Result<(), CatalogError> {
        if self.scripts.contains_key(manifest.script()) {
            return Err(CatalogError::DuplicateScript {
                script: manifest.script().to_string(),
            });
        }
        self.scripts.insert(manifest.script().clone(), manifest);
        Ok(())
    }

    /// Sets the unit loaded for every script after its controllers.
    pub fn set_common(&mut self, unit: ComponentUnit) {
        self.common = Some(unit);
    }

    /// Provides a logic unit that manifests may list by name.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::DuplicateLogicUnit`] when a unit with the same
    /// name was already provided.
    pub fn provide_logic(&mut self, unit: ComponentUnit) -> Result<(), CatalogError> {
        if self.logic_units.contains_key(unit.name()) {
            return Err(CatalogError::DuplicateLogicUnit {
                unit: unit.name().to_owned(),
            });
        }
        self.logic_units.insert(unit.name().to_owned(), unit);
        Ok(())
    }

    /// Returns the manifest registered for `script`.
    #[must_use]
    pub fn manifest(&self, script: &ScriptName) -> Option<&ScriptManifest> {
        self.scripts.get(script)
    }

    /// Number of registered scripts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    /// Returns `true` when no script is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

/// Loads component units on demand and resolves `Script::Mode` names.
#[derive(Debug)]
pub struct ModuleResolver {
    catalog: Catalog,
    loggers: Arc<LoggerProvider>,
    definitions: Mutex<Definitions>,
}

impl ModuleResolver {
    /// Creates a resolver over `catalog` that logs through `loggers`.
    #[must_use]
    pub fn new(catalog: Catalog, loggers: Arc<LoggerProvider>) -> Self {
        Self {
            catalog,
            loggers,
            definitions: Mutex::new(Definitions::default()),
        }
    }

    /// Resolves the component for `script` and the raw `mode`.
    ///
    /// A mode that fails validation is rejected before any unit is loaded.
    /// Units already loaded by an earlier request are not reloaded.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::InvalidName`], [`ResolveError::Unresolved`] or
    /// [`ResolveError::MissingComponent`] when no component can be produced,
    /// and [`ResolveError::Logger`] when the script log cannot be opened.
    pub fn resolve(&self, script: &ScriptName, mode: &str) -> Result<Component, ResolveError> {
        let logger = self.loggers.logger(script)?;
        logger.info(format_args!("controller_name : {mode}"));
        logger.info(format_args!("script_name : {script}"));

        let parsed = Mode::parse(mode).inspect_err(|error| logger.debug(error))?;

        let mut definitions = self.lock();
        let manifest = self.catalog.manifest(script);

        if let Some(manifest) = manifest {
            for unit in manifest.controllers() {
                load_unit(&mut definitions, unit, &logger);
            }
        }
        if let Some(common) = &self.catalog.common {
            load_unit(&mut definitions, common, &logger);
        }
        if let Some(manifest) = manifest {
            logger.debug(format_args!("logic units : {}", manifest.logic().join(", ")));
            for name in manifest.logic() {
                let Some(unit) = self.catalog.logic_units.get(name) else {
                    let error = ResolveError::MissingComponent {
                        script: script.to_string(),
                        unit: name.clone(),
                    };
                    logger.error(&error);
                    return Err(error);
                };
                load_unit(&mut definitions, unit, &logger);
            }
        }

        let qualified = qualified_name(script, &parsed);
        logger.info(format_args!("create instance name : {qualified}"));
        definitions.lookup(&qualified).ok_or_else(|| {
            let error = ResolveError::Unresolved { qualified };
            logger.debug(&error);
            error
        })
    }

    /// Snapshot of the logic components loaded so far.
    #[must_use]
    pub fn logic(&self) -> LogicTable {
        self.lock().logic()
    }

    /// Names of the units loaded so far, in load order.
    #[must_use]
    pub fn loaded_units(&self) -> Vec<String> {
        self.lock().loaded_units().to_vec()
    }

    // Definitions are append-only and units merge only after installing, so a
    // guard poisoned by a panicking installer still holds a consistent set.
    fn lock(&self) -> MutexGuard<'_, Definitions> {
        self.definitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_unit(definitions: &mut Definitions, unit: &ComponentUnit, logger: &LoggerHandle) {
    if definitions.load(unit) {
        logger.debug(format_args!("loaded unit : {}", unit.name()));
    }
}

#[cfg(test)]
mod tests;
