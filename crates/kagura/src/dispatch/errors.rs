//! Error types for the dispatch pipeline.

use std::fmt;

use thiserror::Error;

use crate::handler::HandlerError;
use crate::logger::LoggerError;
use crate::names::NameError;
use crate::registry::ResolveError;

/// Failure taxonomy used to pick a fallback tier and label reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Script or mode failed identifier validation.
    InvalidName,
    /// Loading finished without defining the requested handler.
    Resolution,
    /// A listed logic unit is not provided.
    MissingComponent,
    /// The resolved definition is not a handler.
    ContractViolation,
    /// A handler returned an error or panicked.
    Execution,
    /// Anything caught only by the outermost guard.
    Fatal,
}

impl FailureKind {
    /// Label shown in reports and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidName => "InvalidNameFailure",
            Self::Resolution => "ResolutionFailure",
            Self::MissingComponent => "MissingComponentFailure",
            Self::ContractViolation => "ContractViolationFailure",
            Self::Execution => "ExecutionFailure",
            Self::Fatal => "FatalFailure",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handler method that was executing when a failure surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerPhase {
    /// The handler's constructor.
    New,
    /// [`crate::Handler::run`].
    Run,
    /// [`crate::Handler::response`].
    Response,
}

impl HandlerPhase {
    /// Method name used in report frames.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Run => "run",
            Self::Response => "response",
        }
    }
}

impl fmt::Display for HandlerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while dispatching a request.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The entry point does not yield a valid script name.
    #[error(transparent)]
    InvalidScript(NameError),
    /// The component could not be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// The script logger could not be obtained.
    #[error(transparent)]
    Logger(#[from] LoggerError),
    /// The resolved definition does not satisfy the handler contract.
    #[error("{name} is not a handler")]
    ContractViolation {
        /// Qualified name of the definition.
        name: String,
    },
    /// A handler method returned an error.
    #[error("{source}")]
    Execution {
        /// Qualified handler name.
        handler: String,
        /// Method that failed.
        phase: HandlerPhase,
        /// Error returned by the handler.
        #[source]
        source: HandlerError,
    },
    /// A handler constructor or method panicked.
    #[error("{message}")]
    Panicked {
        /// Qualified handler name.
        handler: String,
        /// Method that panicked.
        phase: HandlerPhase,
        /// Panic payload rendered as text.
        message: String,
    },
}

impl DispatchError {
    /// Maps the error onto the failure taxonomy.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Resolve(error) => match error {
                ResolveError::InvalidName(_) => FailureKind::InvalidName,
                ResolveError::Unresolved { .. } => FailureKind::Resolution,
                ResolveError::MissingComponent { .. } => FailureKind::MissingComponent,
                ResolveError::Logger(_) => FailureKind::Fatal,
            },
            Self::InvalidScript(_) | Self::Logger(_) => FailureKind::Fatal,
            Self::ContractViolation { .. } => FailureKind::ContractViolation,
            Self::Execution { .. } | Self::Panicked { .. } => FailureKind::Execution,
        }
    }

    /// Names the place where the failure surfaced; used as the first frame.
    #[must_use]
    pub fn site(&self) -> String {
        match self {
            Self::Execution { handler, phase, .. } | Self::Panicked { handler, phase, .. } => {
                format!("{handler}#{phase}")
            }
            Self::ContractViolation { name } => format!("{name}#new"),
            Self::Resolve(_) => "resolver".to_owned(),
            Self::InvalidScript(_) | Self::Logger(_) => "dispatch".to_owned(),
        }
    }
}
