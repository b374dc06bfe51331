//! CGI transport for the Kagura dispatch engine.
//!
//! The binary reads the CGI meta-variables and body, bootstraps an
//! [`Engine`](kagura::Engine) for the bundled [`app`], dispatches the request
//! and writes the framed response to standard output. Bootstrap or decoding
//! failures are answered with a plain-text fatal page so the web server
//! always receives a well-formed CGI document.

pub mod app;
pub mod cgi;

use std::error::Error;
use std::io::{self, Read, Write};

use kagura::dispatch::plain_text_page;
use kagura::{
    ConfigLoader, FailureKind, FailureReport, Response, ResponseWriter, SystemConfigLoader,
    bootstrap_with,
};
use tracing::error;

use crate::cgi::{CgiEnvironment, incoming_request, session_cookie};

/// Tracing target for transport diagnostics.
const CGI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::cgi");

/// Serves one CGI request with the system configuration and writes the
/// response to `out`.
///
/// # Errors
///
/// Returns the I/O error raised while writing the response.
pub fn run<R: Read, W: Write>(env: &CgiEnvironment, body: R, out: W) -> io::Result<()> {
    let response = serve(&SystemConfigLoader, env, body);
    ResponseWriter::new(out).write_response(&response)
}

/// Bootstraps the engine with `loader` and serves one request.
///
/// Never fails: bootstrap and request decoding errors become a plain-text
/// fatal response. New sessions are announced with a `Set-Cookie` header.
pub fn serve(loader: &dyn ConfigLoader, env: &CgiEnvironment, body: impl Read) -> Response {
    let engine = match app::catalog()
        .map_err(|failure| bootstrap_failure("catalog", &failure))
        .and_then(|catalog| {
            bootstrap_with(loader, catalog).map_err(|failure| bootstrap_failure("bootstrap", &failure))
        }) {
        Ok(engine) => engine,
        Err(response) => return response,
    };

    let request = match incoming_request(env, body) {
        Ok(request) => request,
        Err(failure) => return bootstrap_failure("request", &failure),
    };
    let cookie = request.session.is_new().then(|| session_cookie(&request.session));
    let response = engine.dispatch(request);
    match cookie {
        Some(value) => response.with_header("Set-Cookie", value),
        None => response,
    }
}

fn bootstrap_failure(site: &str, failure: &(dyn Error + 'static)) -> Response {
    let message = failure.to_string();
    let mut frames = vec![site.to_owned()];
    let mut cause = failure.source();
    while let Some(current) = cause {
        frames.push(format!("caused by: {current}"));
        cause = current.source();
    }
    error!(target: CGI_TARGET, site, %message, "request failed before dispatch");
    Response::fatal(plain_text_page(&FailureReport::new(
        FailureKind::Fatal,
        message,
        frames,
    )))
}

#[cfg(test)]
mod tests {
    use kagura::{ContentType, Outcome, StaticConfigLoader};
    use kagura_config::Config;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    struct Site {
        _dir: TempDir,
        loader: StaticConfigLoader,
    }

    #[fixture]
    fn site() -> Site {
        let dir = TempDir::new().expect("temp dir");
        let root = dir.path().to_str().expect("utf8 temp dir");
        let config = Config {
            log_dir: format!("{root}/log").into(),
            store_dir: format!("{root}/work").into(),
            template_dir: concat!(env!("CARGO_MANIFEST_DIR"), "/templates").into(),
            ..Config::default()
        };
        Site {
            _dir: dir,
            loader: StaticConfigLoader::new(config),
        }
    }

    fn env(pairs: &[(&str, &str)]) -> CgiEnvironment {
        pairs.iter().copied().collect()
    }

    #[rstest]
    fn new_sessions_receive_a_cookie(site: Site) {
        let response = serve(
            &site.loader,
            &env(&[("SCRIPT_NAME", "/cgi-bin/kagura.cgi")]),
            io::empty(),
        );
        assert_eq!(response.outcome(), Outcome::Rendered);
        let cookie = response
            .headers()
            .iter()
            .find(|(name, _)| name == "Set-Cookie")
            .map(|(_, value)| value.as_str())
            .expect("cookie header");
        assert!(cookie.starts_with("_session_id="));
        assert!(cookie.ends_with("; path=/"));
    }

    #[rstest]
    fn existing_sessions_are_not_reissued(site: Site) {
        let response = serve(
            &site.loader,
            &env(&[
                ("SCRIPT_NAME", "/cgi-bin/kagura.cgi"),
                ("HTTP_COOKIE", "_session_id=cafe01"),
            ]),
            io::empty(),
        );
        assert!(response.headers().is_empty());
    }

    #[rstest]
    fn malformed_content_length_is_fatal(site: Site) {
        let response = serve(
            &site.loader,
            &env(&[
                ("SCRIPT_NAME", "/cgi-bin/kagura.cgi"),
                ("REQUEST_METHOD", "POST"),
                ("CONTENT_TYPE", "application/x-www-form-urlencoded"),
                ("CONTENT_LENGTH", "-1"),
            ]),
            io::empty(),
        );
        assert_eq!(response.content_type(), ContentType::PlainText);
        assert!(response.body().starts_with("request: invalid CONTENT_LENGTH '-1' (FatalFailure)"));
    }

    #[rstest]
    fn bootstrap_failures_are_fatal(site: Site) {
        let mut config = site.loader.load().expect("config");
        config.script_log_level = "loud".to_owned();
        let response = serve(&StaticConfigLoader::new(config), &env(&[]), io::empty());
        assert_eq!(response.outcome(), Outcome::Fatal);
        assert!(response.body().starts_with("bootstrap: failed to prepare script logging"));
    }

    #[rstest]
    fn run_writes_a_framed_document(site: Site) {
        let mut out = Vec::new();
        let response = serve(
            &site.loader,
            &env(&[
                ("SCRIPT_NAME", "/cgi-bin/kagura.cgi"),
                ("QUERY_STRING", "mode=showday"),
                ("HTTP_COOKIE", "_session_id=cafe02"),
            ]),
            io::empty(),
        );
        ResponseWriter::new(&mut out).write_response(&response).expect("write");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("Content-Type: text/html; charset=UTF-8\r\n"));
        assert!(text.contains("\r\n\r\n"));
        assert!(text.contains("Today is day"));
    }
}
