//! The dispatch controller.
//!
//! [`Engine::dispatch`] drives one request through
//! `Init → Resolving → Executing → Responding → Done` and always returns a
//! [`Response`]. Failures are answered by one of three tiers:
//!
//! - resolution failures (invalid mode, unresolved name, missing component)
//!   render the name-error page;
//! - contract violations and handler failures render the embedded emergency
//!   page;
//! - everything else, including panics outside handlers, is caught by the
//!   outermost guard and answered in plain text.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use kagura_config::{Config, Layout};
use tracing::{debug, error};

use crate::handler::HandlerError;
use crate::logger::{LoggerError, LoggerHandle, LoggerProvider, Severity};
use crate::names::ScriptName;
use crate::registry::{Catalog, Component, ModuleResolver, ResolveError};
use crate::request::{ContextBuilder, RequestContext};
use crate::render::Renderer;
use crate::store::StoreAccessor;

use super::DISPATCH_TARGET;
use super::errors::{DispatchError, FailureKind, HandlerPhase};
use super::fallback::{
    FailureReport, emergency_page, name_error_scope, panic_message, plain_text_page,
};
use super::request::IncomingRequest;
use super::response::{Outcome, Response};

/// Pipeline position, traced on the script logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Deriving the script name and building the request context.
    Init,
    /// Loading units and resolving `Script::Mode`.
    Resolving,
    /// Running the handler.
    Executing,
    /// Emitting the body.
    Responding,
    /// Request finished.
    Done,
}

impl Phase {
    /// Phase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Resolving => "resolving",
            Self::Executing => "executing",
            Self::Responding => "responding",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Long-lived dispatcher shared by every request of the process.
pub struct Engine {
    config: Config,
    loggers: Arc<LoggerProvider>,
    resolver: ModuleResolver,
    contexts: ContextBuilder,
    renderer: Arc<dyn Renderer>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Assembles an engine from configuration, a catalog and a renderer.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Level`] when the script log level is invalid.
    pub fn new(
        config: Config,
        catalog: Catalog,
        renderer: Arc<dyn Renderer>,
    ) -> Result<Self, LoggerError> {
        let loggers = Arc::new(LoggerProvider::new(&config)?);
        let resolver = ModuleResolver::new(catalog, Arc::clone(&loggers));
        let stores = StoreAccessor::new(Layout::from_config(&config));
        let contexts = ContextBuilder::new(Arc::clone(&loggers), stores, Arc::clone(&renderer));
        Ok(Self {
            config,
            loggers,
            resolver,
            contexts,
            renderer,
        })
    }

    /// Shared configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Logger provider used for script and engine logs.
    #[must_use]
    pub fn loggers(&self) -> &LoggerProvider {
        &self.loggers
    }

    /// Module resolver holding the loaded definitions.
    #[must_use]
    pub const fn resolver(&self) -> &ModuleResolver {
        &self.resolver
    }

    /// Serves one request. Never fails and never lets a panic escape.
    pub fn dispatch(&self, request: IncomingRequest) -> Response {
        match panic::catch_unwind(AssertUnwindSafe(|| self.run_pipeline(request))) {
            Ok(Ok(response)) => response,
            Ok(Err(failure)) => self.fatal_response(&FailureReport::from_error(&failure)),
            Err(payload) => self.fatal_response(&FailureReport::from_panic(&*payload, "dispatch")),
        }
    }

    fn run_pipeline(&self, request: IncomingRequest) -> Result<Response, DispatchError> {
        let IncomingRequest {
            entry_point,
            transport,
            session,
            params,
        } = request;

        let script =
            ScriptName::from_entry_point(&entry_point).map_err(DispatchError::InvalidScript)?;
        let mode = params.mode().to_owned();
        let mut context = self.contexts.build(
            &script,
            transport,
            session,
            params,
            self.config.session_store(),
        )?;
        let logger = context.logger().clone();
        trace_phase(&logger, Phase::Init);

        trace_phase(&logger, Phase::Resolving);
        let component = match self.resolver.resolve(&script, &mode) {
            Ok(component) => component,
            Err(failure) if failure.is_name_error() => {
                return Ok(self.name_error_response(&logger, failure));
            }
            Err(failure) => return Err(failure.into()),
        };
        context.attach_logic(self.resolver.logic());

        trace_phase(&logger, Phase::Executing);
        let body = match execute(component, &mut context) {
            Ok(body) => body,
            Err(failure) => return Ok(execution_response(&logger, &failure)),
        };

        trace_phase(&logger, Phase::Responding);
        let response = Response::html(Outcome::Rendered, body);
        trace_phase(&logger, Phase::Done);
        Ok(response)
    }

    fn name_error_response(&self, logger: &LoggerHandle, unresolved: ResolveError) -> Response {
        let report = FailureReport::from_error(&DispatchError::from(unresolved));
        let severity = if report.kind() == FailureKind::MissingComponent {
            Severity::Error
        } else {
            Severity::Debug
        };
        log_report(logger, severity, &report);

        let template = self.config.name_error_template();
        if self.renderer.exists(template) {
            match self.renderer.render(template, &name_error_scope(&report)) {
                Ok(body) => return Response::html(Outcome::NameError, body),
                Err(render_error) => {
                    logger.warn(format_args!(
                        "name error template '{template}' failed: {render_error}"
                    ));
                }
            }
        }
        Response::html(Outcome::NameError, emergency_page(&report))
    }

    fn fatal_response(&self, report: &FailureReport) -> Response {
        error!(
            target: DISPATCH_TARGET,
            kind = %report.kind(),
            message = report.message(),
            "request failed outside handler"
        );
        match self.loggers.engine_logger() {
            Ok(logger) => log_report(&logger, Severity::Fatal, report),
            Err(logger_error) => {
                debug!(target: DISPATCH_TARGET, %logger_error, "engine log unavailable");
            }
        }
        Response::fatal(plain_text_page(report))
    }
}

fn trace_phase(logger: &LoggerHandle, phase: Phase) {
    logger.debug(format_args!("phase : {phase}"));
}

fn log_report(logger: &LoggerHandle, severity: Severity, report: &FailureReport) {
    logger.log(severity, report.summary());
    for frame in report.frames().iter().skip(1) {
        logger.log(severity, frame);
    }
}

fn execution_response(logger: &LoggerHandle, failure: &DispatchError) -> Response {
    let report = FailureReport::from_error(failure);
    log_report(logger, Severity::Error, &report);
    Response::html(Outcome::ExecutionError, emergency_page(&report))
}

fn execute(component: Component, context: &mut RequestContext) -> Result<String, DispatchError> {
    let (name, factory) = match component {
        Component::Handler { name, factory } => (name, factory),
        Component::Logic { name } => return Err(DispatchError::ContractViolation { name }),
    };
    let mut handler = invoke(&name, HandlerPhase::New, || Ok(factory()))?;
    invoke(&name, HandlerPhase::Run, || handler.run(context))?;
    invoke(&name, HandlerPhase::Response, || handler.response(context))
}

fn invoke<T>(
    handler: &str,
    phase: HandlerPhase,
    call: impl FnOnce() -> Result<T, HandlerError>,
) -> Result<T, DispatchError> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(DispatchError::Execution {
            handler: handler.to_owned(),
            phase,
            source,
        }),
        Err(payload) => Err(DispatchError::Panicked {
            handler: handler.to_owned(),
            phase,
            message: panic_message(&*payload),
        }),
    }
}
