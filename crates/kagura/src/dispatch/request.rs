//! Transport-neutral description of an incoming request.

use crate::request::{Params, Session, Transport};

/// Everything the transport extracted from one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRequest {
    /// Entry-point path the script name is derived from (`SCRIPT_NAME`).
    pub entry_point: String,
    /// Transport metadata.
    pub transport: Transport,
    /// Session identity.
    pub session: Session,
    /// Decoded parameters.
    pub params: Params,
}

impl IncomingRequest {
    /// Creates a request for `entry_point`.
    #[must_use]
    pub fn new(
        entry_point: impl Into<String>,
        transport: Transport,
        session: Session,
        params: Params,
    ) -> Self {
        Self {
            entry_point: entry_point.into(),
            transport,
            session,
            params,
        }
    }
}
