//! The two-phase handler contract.

use std::error::Error;

use crate::request::RequestContext;

/// Error type returned by handler code.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Component selected by script and mode.
///
/// The dispatcher calls [`Handler::run`] once and then [`Handler::response`]
/// once on a freshly constructed instance. Instances are never reused across
/// requests.
pub trait Handler {
    /// Performs side-effecting preparation (reading parameters, touching the
    /// session store, computing values for rendering).
    ///
    /// # Errors
    ///
    /// Any error is rendered by the execution fallback page.
    fn run(&mut self, context: &mut RequestContext) -> Result<(), HandlerError>;

    /// Produces the response body, typically by rendering a template.
    ///
    /// # Errors
    ///
    /// Any error is rendered by the execution fallback page.
    fn response(&mut self, context: &mut RequestContext) -> Result<String, HandlerError>;
}
