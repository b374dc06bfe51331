//! Loaded definitions: handler constructors and shared logic components.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::handler::Handler;

use super::ComponentUnit;

/// No-argument constructor for a handler.
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn Handler> + Send + Sync>;

/// Shared logic components keyed by qualified name.
///
/// Logic components are the counterpart of helper classes: values such as a
/// clock or a calendar service that handlers look up by name instead of
/// constructing themselves.
#[derive(Clone, Default)]
pub struct LogicTable {
    entries: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl LogicTable {
    /// Returns the component registered under `name` when it has type `T`.
    #[must_use]
    pub fn get<T: Any>(&self, name: &str) -> Option<&T> {
        self.entries.get(name)?.downcast_ref::<T>()
    }

    /// Returns `true` when a component is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of registered components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no components are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for LogicTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("LogicTable").field("names", &names).finish()
    }
}

/// A resolved definition, ready for the execution phase.
///
/// Handlers are constructed by the dispatcher, outside the definitions lock.
#[derive(Clone)]
pub enum Component {
    /// A handler constructor.
    Handler {
        /// Qualified name the handler was resolved from.
        name: String,
        /// Constructor producing a fresh instance per request.
        factory: HandlerFactory,
    },
    /// A logic component; it does not satisfy the handler contract.
    Logic {
        /// Qualified name of the logic component.
        name: String,
    },
}

impl Component {
    /// Qualified name this component was resolved from.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Handler { name, .. } | Self::Logic { name } => name.as_str(),
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler { name, .. } => f.debug_struct("Handler").field("name", name).finish(),
            Self::Logic { name } => f.debug_struct("Logic").field("name", name).finish(),
        }
    }
}

/// Append-only set of definitions installed by component units.
#[derive(Default)]
pub struct Definitions {
    handlers: HashMap<String, HandlerFactory>,
    logic: LogicTable,
    loaded: HashSet<String>,
    load_order: Vec<String>,
}

impl Definitions {
    /// Defines a handler constructor under a qualified name such as
    /// `Kagura::Showday`.
    pub fn define_handler<F, H>(&mut self, qualified: impl Into<String>, factory: F)
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: Handler + 'static,
    {
        let factory: HandlerFactory = Arc::new(move || Box::new(factory()) as Box<dyn Handler>);
        self.handlers.insert(qualified.into(), factory);
    }

    /// Defines a shared logic component under a qualified name such as
    /// `Common::Clock`.
    pub fn define_logic<T: Any + Send + Sync>(&mut self, qualified: impl Into<String>, value: T) {
        self.logic.entries.insert(qualified.into(), Arc::new(value));
    }

    /// Unit names in the order they were first loaded.
    #[must_use]
    pub fn loaded_units(&self) -> &[String] {
        &self.load_order
    }

    /// Snapshot of the loaded logic components.
    #[must_use]
    pub fn logic(&self) -> LogicTable {
        self.logic.clone()
    }

    /// Installs `unit` unless it was loaded before. Returns `true` on first load.
    ///
    /// The unit installs into a staging set that is merged only once the
    /// installer returns, so a panicking installer leaves no partial
    /// definitions and the unit is retried on the next load.
    pub(crate) fn load(&mut self, unit: &ComponentUnit) -> bool {
        if self.loaded.contains(unit.name()) {
            return false;
        }
        let mut staged = Self::default();
        unit.install(&mut staged);

        self.handlers.extend(staged.handlers);
        self.logic.entries.extend(staged.logic.entries);
        self.loaded.insert(unit.name().to_owned());
        self.load_order.push(unit.name().to_owned());
        true
    }

    /// Looks up `qualified` without constructing anything.
    pub(crate) fn lookup(&self, qualified: &str) -> Option<Component> {
        if let Some(factory) = self.handlers.get(qualified) {
            return Some(Component::Handler {
                name: qualified.to_owned(),
                factory: Arc::clone(factory),
            });
        }
        self.logic.contains(qualified).then(|| Component::Logic {
            name: qualified.to_owned(),
        })
    }
}

impl fmt::Debug for Definitions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handlers: Vec<&String> = self.handlers.keys().collect();
        handlers.sort();
        f.debug_struct("Definitions")
            .field("handlers", &handlers)
            .field("logic", &self.logic)
            .field("loaded", &self.load_order)
            .finish()
    }
}
