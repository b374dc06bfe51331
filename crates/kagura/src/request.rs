//! Per-request data handed to handlers.
//!
//! A [`RequestContext`] bundles the decoded parameters, the transport
//! metadata, the session identity, the script logger and (when requested)
//! lazy access to the session store. It is created once per request by the
//! [`ContextBuilder`] and owned by the dispatcher for the request's lifetime.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::logger::{LoggerError, LoggerHandle, LoggerProvider};
use crate::names::{Mode, ScriptName, SessionId};
use crate::registry::LogicTable;
use crate::render::{RenderError, RenderScope, Renderer};
use crate::store::{Store, StoreAccessor, StoreError};

/// Request parameter that selects the handler.
pub const MODE_PARAM: &str = "mode";

/// Decoded request parameters. When a key repeats, the first value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    values: BTreeMap<String, String>,
}

impl Params {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` under `key` unless the key is already present.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.entry(key.into()).or_insert_with(|| value.into());
    }

    /// Returns the value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Raw mode selected by the request, or `default` when absent.
    #[must_use]
    pub fn mode(&self) -> &str {
        self.get(MODE_PARAM).unwrap_or(Mode::DEFAULT)
    }

    /// Iterates over parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when no parameters were supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (key, value) in iter {
            params.push(key, value);
        }
        params
    }
}

/// Transport metadata: request method, peer address and raw variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transport {
    method: String,
    remote_addr: Option<String>,
    variables: BTreeMap<String, String>,
}

impl Transport {
    /// Creates transport metadata for `method`.
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Self::default()
        }
    }

    /// Records the peer address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Records a raw transport variable such as `HTTP_USER_AGENT`.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Request method (`GET`, `POST`, ...).
    #[must_use]
    pub fn method(&self) -> &str {
        self.method.as_str()
    }

    /// Peer address, when known.
    #[must_use]
    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    /// Raw transport variable.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }
}

/// Session identity attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    is_new: bool,
}

impl Session {
    /// Session continued from an earlier request.
    #[must_use]
    pub const fn existing(id: SessionId) -> Self {
        Self { id, is_new: false }
    }

    /// Session created for this request.
    #[must_use]
    pub const fn fresh(id: SessionId) -> Self {
        Self { id, is_new: true }
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns `true` when the session was created for this request.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.is_new
    }
}

#[derive(Debug)]
enum StoreSlot {
    Disabled,
    Pending(StoreAccessor),
    Open(Store),
}

/// Everything a handler can see about the current request.
pub struct RequestContext {
    script: ScriptName,
    transport: Transport,
    session: Session,
    params: Params,
    logger: LoggerHandle,
    store: StoreSlot,
    logic: LogicTable,
    renderer: Arc<dyn Renderer>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("script", &self.script)
            .field("transport", &self.transport)
            .field("session", &self.session)
            .field("params", &self.params)
            .field("logger", &self.logger)
            .field("store", &self.store)
            .field("logic", &self.logic)
            .finish_non_exhaustive()
    }
}

impl RequestContext {
    /// Script serving the request.
    #[must_use]
    pub const fn script(&self) -> &ScriptName {
        &self.script
    }

    /// Transport metadata.
    #[must_use]
    pub const fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Session identity.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Decoded parameters.
    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// Shorthand for `params().get(key)`.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key)
    }

    /// Script logger.
    #[must_use]
    pub const fn logger(&self) -> &LoggerHandle {
        &self.logger
    }

    /// Returns the session store, opening and locking it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotRequested`] when the context was built without
    /// the store, or the error raised while opening it.
    pub fn store(&mut self) -> Result<&mut Store, StoreError> {
        if let StoreSlot::Pending(accessor) = &self.store {
            let opened = accessor.open(self.session.id())?;
            self.store = StoreSlot::Open(opened);
        }
        match &mut self.store {
            StoreSlot::Open(store) => Ok(store),
            StoreSlot::Disabled | StoreSlot::Pending(_) => Err(StoreError::NotRequested),
        }
    }

    /// Looks up a loaded logic component by qualified name.
    #[must_use]
    pub fn logic<T: Any>(&self, name: &str) -> Option<&T> {
        self.logic.get(name)
    }

    /// Renders `template` with `scope`.
    ///
    /// # Errors
    ///
    /// Returns the renderer's [`RenderError`].
    pub fn render(&self, template: &str, scope: &RenderScope) -> Result<String, RenderError> {
        self.renderer.render(template, scope)
    }

    pub(crate) fn attach_logic(&mut self, logic: LogicTable) {
        self.logic = logic;
    }
}

/// Request-independent parts of a context.
#[derive(Clone)]
pub struct ContextBuilder {
    loggers: Arc<LoggerProvider>,
    stores: StoreAccessor,
    renderer: Arc<dyn Renderer>,
}

impl std::fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("loggers", &self.loggers)
            .field("stores", &self.stores)
            .finish_non_exhaustive()
    }
}

impl ContextBuilder {
    /// Creates a builder sharing the engine's logger provider and renderer.
    #[must_use]
    pub fn new(
        loggers: Arc<LoggerProvider>,
        stores: StoreAccessor,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            loggers,
            stores,
            renderer,
        }
    }

    /// Assembles the context for one request.
    ///
    /// The script logger is always attached. When `with_store` is set the
    /// session store becomes available through [`RequestContext::store`],
    /// opened on first use.
    ///
    /// # Errors
    ///
    /// Returns a [`LoggerError`] when the script logger cannot be obtained.
    pub fn build(
        &self,
        script: &ScriptName,
        transport: Transport,
        session: Session,
        params: Params,
        with_store: bool,
    ) -> Result<RequestContext, LoggerError> {
        let logger = self.loggers.logger(script)?;
        let store = if with_store {
            StoreSlot::Pending(self.stores.clone())
        } else {
            StoreSlot::Disabled
        };
        Ok(RequestContext {
            script: script.clone(),
            transport,
            session,
            params,
            logger,
            store,
            logic: LogicTable::default(),
            renderer: Arc::clone(&self.renderer),
        })
    }
}
