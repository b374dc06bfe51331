//! Failure reports and the pages rendered from them.
//!
//! Three tiers answer failures: the name-error page (a template when one is
//! configured, otherwise the embedded page below), the embedded emergency
//! page for handler failures, and a plain-text page for everything caught by
//! the outermost guard. The embedded pages depend on nothing but the report,
//! so they cannot fail.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;

use crate::render::{RenderScope, escape_html};

use super::errors::{DispatchError, FailureKind};

/// What went wrong, where, and the trail that led there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    kind: FailureKind,
    message: String,
    frames: Vec<String>,
}

impl FailureReport {
    /// Creates a report from its parts. `frames` should start with the site.
    #[must_use]
    pub const fn new(kind: FailureKind, message: String, frames: Vec<String>) -> Self {
        Self {
            kind,
            message,
            frames,
        }
    }

    /// Builds a report from a dispatch error: the failure site, the error's
    /// `source()` chain and, when enabled, the captured backtrace.
    #[must_use]
    pub fn from_error(error: &DispatchError) -> Self {
        let message = error.to_string();
        let mut frames = vec![error.site()];
        let mut cause = error.source();
        while let Some(current) = cause {
            let text = current.to_string();
            if text != message {
                frames.push(format!("caused by: {text}"));
            }
            cause = current.source();
        }
        frames.extend(backtrace_frames());
        Self::new(error.kind(), message, frames)
    }

    /// Builds a fatal report from a panic payload caught at `site`.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send), site: &str) -> Self {
        let mut frames = vec![site.to_owned()];
        frames.extend(backtrace_frames());
        Self::new(FailureKind::Fatal, panic_message(payload), frames)
    }

    /// Failure category.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Site followed by causes and backtrace lines.
    #[must_use]
    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    /// `<site>: <message> (<kind>)`.
    #[must_use]
    pub fn summary(&self) -> String {
        let site = self.frames.first().map_or("unknown", String::as_str);
        format!("{site}: {} ({})", self.message, self.kind)
    }

    fn trailing_frames(&self) -> &[String] {
        self.frames.get(1..).unwrap_or_default()
    }
}

/// Extracts the text of a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "panic with non-text payload".to_owned()
    }
}

fn backtrace_frames() -> Vec<String> {
    let backtrace = Backtrace::capture();
    if backtrace.status() != BacktraceStatus::Captured {
        return Vec::new();
    }
    backtrace
        .to_string()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Embedded emergency page. Every interpolated value is HTML-escaped.
#[must_use]
pub fn emergency_page(report: &FailureReport) -> String {
    let trail = report
        .trailing_frames()
        .iter()
        .map(|frame| escape_html(frame))
        .collect::<Vec<_>>()
        .join("<br>");

    let mut page = String::from(concat!(
        "<html><head>",
        "<meta http-equiv=\"Content-Type\" content=\"text/html; charset=UTF-8\">",
        "<style>body { font-size: 12px; } div { padding: 5px; }</style>",
        "<title>Kagura Framework [EMERGENCY ERROR]</title>",
        "</head><body>\n",
        "<table align=\"center\"><tr><td style=\"width: 800px;\">",
        "EMERGENCY ERROR OCCUR!<br><br>\n",
        "STACKTRACE : <div style=\"color: #ff0000; border: 1px solid #ff6666\">\n",
    ));
    page.push_str(&escape_html(&report.summary()));
    page.push('\n');
    page.push_str(&trail);
    page.push_str("\n</div></td></tr></table></body></html>\n");
    page
}

/// Plain-text page written by the fatal tier.
#[must_use]
pub fn plain_text_page(report: &FailureReport) -> String {
    let mut page = report.summary();
    page.push('\n');
    for frame in report.trailing_frames() {
        page.push_str(frame);
        page.push('\n');
    }
    page
}

/// Scope offered to the name-error template.
///
/// Keys: `kind`, `message`, `site`, `summary` (escaped) and `frames` (escaped
/// frames joined with `<br>`).
#[must_use]
pub fn name_error_scope(report: &FailureReport) -> RenderScope {
    let frames = report
        .frames()
        .iter()
        .map(|frame| escape_html(frame))
        .collect::<Vec<_>>()
        .join("<br>");
    let mut scope = RenderScope::new();
    scope
        .insert("kind", report.kind())
        .insert("message", report.message())
        .insert("site", report.frames().first().map_or("", String::as_str))
        .insert("summary", report.summary())
        .insert_raw("frames", frames);
    scope
}
