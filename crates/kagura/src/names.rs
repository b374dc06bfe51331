//! Validated identifiers used as namespaces, path segments and log keys.
//!
//! Script names, modes and session identifiers all end up in filesystem paths
//! or qualified component names, so they share one rule: a non-empty run of
//! ASCII letters, digits and underscores. Anything else is rejected before a
//! path is built or a component is looked up.

use std::fmt;
use std::path::Path;

use thiserror::Error;

/// Which identifier failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRole {
    /// Script (application) name derived from the entry point.
    Script,
    /// Caller-supplied mode (controller) name.
    Mode,
    /// Session identifier used as a store key.
    Session,
}

impl NameRole {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Script => "script name",
            Self::Mode => "controller name",
            Self::Session => "session id",
        }
    }
}

impl fmt::Display for NameRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when an identifier contains characters outside `[A-Za-z0-9_]`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{role} is bad value : {value:?}")]
pub struct NameError {
    /// Identifier kind that was rejected.
    pub role: NameRole,
    /// Raw rejected value.
    pub value: String,
}

impl NameError {
    fn new(role: NameRole, value: &str) -> Self {
        Self {
            role,
            value: value.to_owned(),
        }
    }
}

/// Returns `true` when `value` is a non-empty run of word characters.
#[must_use]
pub fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'_')
}

fn validate(role: NameRole, value: &str) -> Result<(), NameError> {
    if is_identifier(value) {
        Ok(())
    } else {
        Err(NameError::new(role, value))
    }
}

/// Upper-cases the first character and leaves the rest untouched.
///
/// `sample` becomes `Sample`, `z` becomes `Z`, and `showDay` becomes
/// `ShowDay`.
#[must_use]
pub fn title_case(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Application name used as component namespace and log key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptName(String);

impl ScriptName {
    /// Validates a raw script name.
    ///
    /// # Errors
    ///
    /// Returns [`NameError`] when the name is not a word-character identifier.
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        validate(NameRole::Script, raw)?;
        Ok(Self(raw.to_owned()))
    }

    /// Derives the script name from an entry point such as `/cgi-bin/kagura.cgi`.
    ///
    /// The base file name without its extension is used, then validated like
    /// any other script name.
    ///
    /// # Errors
    ///
    /// Returns [`NameError`] when the derived stem is not an identifier.
    pub fn from_entry_point(entry_point: &str) -> Result<Self, NameError> {
        let stem = Path::new(entry_point)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default();
        if stem.is_empty() {
            return Err(NameError::new(NameRole::Script, entry_point));
        }
        Self::parse(stem)
    }

    /// Returns the script name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the title-cased namespace (`kagura` becomes `Kagura`).
    #[must_use]
    pub fn namespace(&self) -> String {
        title_case(&self.0)
    }
}

impl fmt::Display for ScriptName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-selected action within a script.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mode(String);

impl Mode {
    /// Sentinel used when the request carries no `mode` parameter.
    pub const DEFAULT: &'static str = "default";

    /// Validates a raw mode.
    ///
    /// # Errors
    ///
    /// Returns [`NameError`] when the mode is not a word-character identifier.
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        validate(NameRole::Mode, raw)?;
        Ok(Self(raw.to_owned()))
    }

    /// Returns the mode.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the title-cased handler name (`showday` becomes `Showday`).
    #[must_use]
    pub fn handler_name(&self) -> String {
        title_case(&self.0)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session identifier safe for use as a store file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Validates a raw session identifier.
    ///
    /// # Errors
    ///
    /// Returns [`NameError`] when the id is not a word-character identifier.
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        validate(NameRole::Session, raw)?;
        Ok(Self(raw.to_owned()))
    }

    /// Returns the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the qualified component name `Script::Mode`.
#[must_use]
pub fn qualified_name(script: &ScriptName, mode: &Mode) -> String {
    format!("{}::{}", script.namespace(), mode.handler_name())
}
