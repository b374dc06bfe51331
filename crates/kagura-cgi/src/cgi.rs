//! CGI/1.1 request decoding.
//!
//! Reads the meta-variables set by the web server, decodes the query string
//! and `application/x-www-form-urlencoded` bodies, and recovers the session
//! from the `_session_id` cookie. A missing or malformed session id is
//! replaced by a fresh random one.

use std::collections::BTreeMap;
use std::io::{self, Read};

use kagura::{IncomingRequest, Params, Session, SessionId, Transport};
use thiserror::Error;
use url::form_urlencoded;

/// Cookie carrying the session identifier.
pub const SESSION_COOKIE: &str = "_session_id";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const SESSION_ID_BYTES: usize = 16;

/// Meta-variables forwarded into [`Transport`] besides method and peer.
const FORWARDED_VARIABLES: &[&str] = &[
    "CONTENT_TYPE",
    "HTTP_HOST",
    "HTTP_REFERER",
    "HTTP_USER_AGENT",
    "PATH_INFO",
    "SERVER_NAME",
    "SERVER_PORT",
    "SERVER_PROTOCOL",
];

/// Errors raised while decoding a CGI request.
#[derive(Debug, Error)]
pub enum CgiError {
    /// `CONTENT_LENGTH` is not a non-negative integer.
    #[error("invalid CONTENT_LENGTH '{value}'")]
    ContentLength {
        /// Raw header value.
        value: String,
    },
    /// The request body could not be read.
    #[error("failed to read request body: {source}")]
    Body {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The operating system refused to supply random bytes.
    #[error("failed to generate session id: {message}")]
    Random {
        /// Error reported by the random source.
        message: String,
    },
}

/// Snapshot of the CGI meta-variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CgiEnvironment {
    vars: BTreeMap<String, String>,
}

impl CgiEnvironment {
    /// Captures the current process environment. Non-UTF-8 entries are
    /// skipped.
    #[must_use]
    pub fn from_process() -> Self {
        std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect()
    }

    /// Returns the variable `name`.
    #[must_use]
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Entry-point path (`SCRIPT_NAME`), empty when unset.
    #[must_use]
    pub fn script_name(&self) -> &str {
        self.var("SCRIPT_NAME").unwrap_or_default()
    }

    /// Request method, `GET` when unset.
    #[must_use]
    pub fn method(&self) -> &str {
        self.var("REQUEST_METHOD").unwrap_or("GET")
    }

    /// Declared body length; zero when unset or empty.
    ///
    /// # Errors
    ///
    /// Returns [`CgiError::ContentLength`] for malformed values.
    pub fn content_length(&self) -> Result<u64, CgiError> {
        match self.var("CONTENT_LENGTH").map(str::trim) {
            None | Some("") => Ok(0),
            Some(raw) => raw.parse().map_err(|_| CgiError::ContentLength {
                value: raw.to_owned(),
            }),
        }
    }

    fn is_form_post(&self) -> bool {
        self.method().eq_ignore_ascii_case("POST")
            && self
                .var("CONTENT_TYPE")
                .is_some_and(|value| value.trim_start().starts_with(FORM_CONTENT_TYPE))
    }
}

impl<K, V> FromIterator<(K, V)> for CgiEnvironment
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// Decodes the query string and, for form posts, the request body.
///
/// Query parameters are read first; when a key repeats, its first value wins.
///
/// # Errors
///
/// Returns [`CgiError`] when the body length is malformed or the body cannot
/// be read.
pub fn read_params(env: &CgiEnvironment, body: impl Read) -> Result<Params, CgiError> {
    let mut params = Params::new();
    let query = env.var("QUERY_STRING").unwrap_or_default();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        params.push(key, value);
    }

    if env.is_form_post() {
        let mut bytes = Vec::new();
        body.take(env.content_length()?)
            .read_to_end(&mut bytes)
            .map_err(|source| CgiError::Body { source })?;
        for (key, value) in form_urlencoded::parse(&bytes) {
            params.push(key, value);
        }
    }
    Ok(params)
}

/// Extracts a cookie value from an `HTTP_COOKIE` header.
#[must_use]
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim())
}

/// Recovers the session from the cookie or starts a new one.
///
/// # Errors
///
/// Returns [`CgiError::Random`] when a fresh id cannot be generated.
pub fn session(env: &CgiEnvironment) -> Result<Session, CgiError> {
    let existing = env
        .var("HTTP_COOKIE")
        .and_then(|header| cookie_value(header, SESSION_COOKIE))
        .and_then(|raw| SessionId::parse(raw).ok());
    match existing {
        Some(id) => Ok(Session::existing(id)),
        None => generate_session_id().map(Session::fresh),
    }
}

/// Generates 32 random hexadecimal digits.
///
/// # Errors
///
/// Returns [`CgiError::Random`] when the random source fails.
pub fn generate_session_id() -> Result<SessionId, CgiError> {
    let mut bytes = [0_u8; SESSION_ID_BYTES];
    getrandom::fill(&mut bytes).map_err(|error| CgiError::Random {
        message: error.to_string(),
    })?;
    let hex: String = bytes.iter().map(|byte| format!("{byte:02x}")).collect();
    SessionId::parse(&hex).map_err(|error| CgiError::Random {
        message: error.to_string(),
    })
}

/// `Set-Cookie` value announcing `session` to the client.
#[must_use]
pub fn session_cookie(session: &Session) -> String {
    format!("{SESSION_COOKIE}={}; path=/", session.id())
}

/// Builds transport metadata from the meta-variables.
#[must_use]
pub fn transport(env: &CgiEnvironment) -> Transport {
    let mut transport = Transport::new(env.method().to_ascii_uppercase());
    if let Some(addr) = env.var("REMOTE_ADDR") {
        transport = transport.with_remote_addr(addr);
    }
    for name in FORWARDED_VARIABLES {
        if let Some(value) = env.var(name) {
            transport = transport.with_variable(*name, value);
        }
    }
    transport
}

/// Decodes the whole request.
///
/// # Errors
///
/// Returns [`CgiError`] when parameters or the session cannot be decoded.
pub fn incoming_request(env: &CgiEnvironment, body: impl Read) -> Result<IncomingRequest, CgiError> {
    let params = read_params(env, body)?;
    Ok(IncomingRequest::new(
        env.script_name(),
        transport(env),
        session(env)?,
        params,
    ))
}
