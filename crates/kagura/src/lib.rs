//! Kagura: a per-request dispatch engine for CGI-style web applications.
//!
//! Each request names a script (derived from its entry point) and a mode
//! (the `mode` parameter, `default` when absent). The engine resolves the
//! handler `Script::Mode` from an explicit [`Catalog`] of component units,
//! runs it in two phases (`run`, then `response`) against a
//! [`RequestContext`], and returns the body. Every failure is answered with a
//! fallback page instead of an error:
//!
//! - unresolvable names render the name-error page (a template when present);
//! - handler failures render the embedded emergency page;
//! - anything else is reported in plain text by the outermost guard.
//!
//! Per-script logs rotate by size ([`LoggerProvider`]), and handlers may keep
//! per-session state in a locked, atomically committed [`Store`].

pub mod bootstrap;
pub mod dispatch;
pub mod handler;
pub mod logger;
pub mod names;
pub mod registry;
pub mod render;
pub mod request;
pub mod store;
pub mod telemetry;

pub use bootstrap::{
    BootstrapError, ConfigLoader, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
    bootstrap_with_renderer,
};
pub use dispatch::{
    ContentType, DispatchError, Engine, FailureKind, FailureReport, IncomingRequest, Outcome,
    Response, ResponseWriter,
};
pub use handler::{Handler, HandlerError};
pub use logger::{ENGINE_LOG_KEY, LoggerError, LoggerHandle, LoggerProvider, Severity};
pub use names::{Mode, NameError, ScriptName, SessionId};
pub use registry::{
    Catalog, CatalogError, Component, ComponentUnit, Definitions, LogicTable, ModuleResolver,
    ResolveError, ScriptManifest,
};
pub use render::{FileTemplates, RenderError, RenderScope, Renderer};
pub use request::{ContextBuilder, Params, RequestContext, Session, Transport};
pub use store::{Store, StoreAccessor, StoreError};

#[cfg(test)]
mod tests;
