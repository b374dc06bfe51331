//! Template rendering behind a small trait.
//!
//! [`FileTemplates`] reads templates from the configured template directory
//! and substitutes `{{ key }}` placeholders from a [`RenderScope`]. Values
//! inserted with [`RenderScope::insert`] are HTML-escaped; unknown keys render
//! as the empty string.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

use kagura_config::{Layout, LayoutError};
use thiserror::Error;

/// Errors raised while rendering a template.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The template reference escapes the template directory.
    #[error(transparent)]
    Reference(#[from] LayoutError),
    /// The template file could not be read.
    #[error("failed to read template '{path}': {source}")]
    Read {
        /// Template path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A placeholder was opened but never closed.
    #[error("unterminated placeholder in template '{template}'")]
    Unterminated {
        /// Template reference.
        template: String,
    },
}

/// Values available to a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderScope {
    values: BTreeMap<String, String>,
}

impl RenderScope {
    /// Creates an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` HTML-escaped.
    pub fn insert(&mut self, key: impl Into<String>, value: impl fmt::Display) -> &mut Self {
        self.values.insert(key.into(), escape_html(&value.to_string()));
        self
    }

    /// Inserts `value` verbatim. The caller is responsible for its markup.
    pub fn insert_raw(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Returns the rendered form of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Produces response bodies from named templates.
#[cfg_attr(test, mockall::automock)]
pub trait Renderer: Send + Sync {
    /// Returns `true` when `template` can be rendered.
    fn exists(&self, template: &str) -> bool;

    /// Renders `template` with `scope`.
    ///
    /// # Errors
    ///
    /// Returns a [`RenderError`] when the template cannot be loaded or parsed.
    fn render(&self, template: &str, scope: &RenderScope) -> Result<String, RenderError>;
}

/// Templates stored as files below the template directory.
#[derive(Debug, Clone)]
pub struct FileTemplates {
    layout: Layout,
}

impl FileTemplates {
    /// Creates a renderer rooted at the layout's template directory.
    #[must_use]
    pub const fn new(layout: Layout) -> Self {
        Self { layout }
    }
}

impl Renderer for FileTemplates {
    fn exists(&self, template: &str) -> bool {
        self.layout
            .template_path(template)
            .is_ok_and(|path| path.is_file())
    }

    fn render(&self, template: &str, scope: &RenderScope) -> Result<String, RenderError> {
        let path = self.layout.template_path(template)?;
        let source = fs::read_to_string(&path).map_err(|source| RenderError::Read {
            path: path.clone(),
            source,
        })?;
        substitute(template, &source, scope)
    }
}

/// Replaces every `{{ key }}` in `source` with its scope value.
///
/// # Errors
///
/// Returns [`RenderError::Unterminated`] when a `{{` has no matching `}}`.
pub fn substitute(template: &str, source: &str, scope: &RenderScope) -> Result<String, RenderError> {
    let mut output = String::with_capacity(source.len());
    let mut rest = source;
    while let Some((literal, opened)) = rest.split_once("{{") {
        output.push_str(literal);
        let Some((key, tail)) = opened.split_once("}}") else {
            return Err(RenderError::Unterminated {
                template: template.to_owned(),
            });
        };
        output.push_str(scope.get(key.trim()).unwrap_or_default());
        rest = tail;
    }
    output.push_str(rest);
    Ok(output)
}

/// Escapes the five HTML-significant characters.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
