//! Responses produced by the dispatcher and their CGI framing.
//!
//! The dispatcher always yields a [`Response`]; the [`ResponseWriter`] frames
//! it as a CGI document (headers, blank line, body) for the transport.

use std::io::{self, Write};

/// Media type of a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// `text/html; charset=UTF-8`.
    Html,
    /// `text/plain; charset=UTF-8`, used by the fatal tier.
    PlainText,
}

impl ContentType {
    /// Header value.
    #[must_use]
    pub const fn header_value(self) -> &'static str {
        match self {
            Self::Html => "text/html; charset=UTF-8",
            Self::PlainText => "text/plain; charset=UTF-8",
        }
    }
}

/// Which path through the pipeline produced the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The handler ran and produced the body.
    Rendered,
    /// Name-error tier.
    NameError,
    /// Execution tier (embedded emergency page).
    ExecutionError,
    /// Fatal tier (plain text).
    Fatal,
}

/// A complete response body with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    content_type: ContentType,
    outcome: Outcome,
    headers: Vec<(String, String)>,
    body: String,
}

impl Response {
    /// HTML response.
    #[must_use]
    pub fn html(outcome: Outcome, body: impl Into<String>) -> Self {
        Self {
            content_type: ContentType::Html,
            outcome,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Plain-text fatal response.
    #[must_use]
    pub fn fatal(body: impl Into<String>) -> Self {
        Self {
            content_type: ContentType::PlainText,
            outcome: Outcome::Fatal,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Adds an extra header, such as `Set-Cookie`.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Body media type.
    #[must_use]
    pub const fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// Pipeline path that produced the body.
    #[must_use]
    pub const fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Extra headers in insertion order.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Response body.
    #[must_use]
    pub fn body(&self) -> &str {
        self.body.as_str()
    }
}

/// Writes responses as CGI documents.
pub struct ResponseWriter<W> {
    writer: W,
}

impl<W: Write> ResponseWriter<W> {
    /// Wraps the output stream.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes headers, a blank line and the body, then flushes.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub fn write_response(&mut self, response: &Response) -> io::Result<()> {
        write!(
            self.writer,
            "Content-Type: {}\r\n",
            response.content_type().header_value()
        )?;
        write!(self.writer, "Content-Length: {}\r\n", response.body().len())?;
        for (name, value) in response.headers() {
            write!(self.writer, "{name}: {value}\r\n")?;
        }
        self.writer.write_all(b"\r\n")?;
        self.writer.write_all(response.body().as_bytes())?;
        self.writer.flush()
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
