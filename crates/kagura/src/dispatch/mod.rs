//! Request dispatch: the controller pipeline and its fallback tiers.
//!
//! The transport hands an [`IncomingRequest`] to [`Engine::dispatch`] and
//! writes the returned [`Response`] with a [`ResponseWriter`]. Every failure
//! is classified by [`DispatchError::kind`] and rendered from a
//! [`FailureReport`], so the transport never sees an error.

mod engine;
mod errors;
mod fallback;
mod request;
mod response;

pub use self::engine::{Engine, Phase};
pub use self::errors::{DispatchError, FailureKind, HandlerPhase};
pub use self::fallback::{
    FailureReport, emergency_page, name_error_scope, panic_message, plain_text_page,
};
pub use self::request::IncomingRequest;
pub use self::response::{ContentType, Outcome, Response, ResponseWriter};

/// Tracing target for dispatch diagnostics.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

#[cfg(test)]
mod tests;
