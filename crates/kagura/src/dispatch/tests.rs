//! Unit tests for the dispatch pipeline and its fallback tiers.

use std::fs;
use std::sync::Arc;

use kagura_config::Config;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::handler::{Handler, HandlerError};
use crate::names::{ScriptName, SessionId};
use crate::registry::{Catalog, ComponentUnit, ScriptManifest};
use crate::render::{MockRenderer, RenderError, Renderer};
use crate::request::{Params, RequestContext, Session, Transport};

struct Echo;

impl Handler for Echo {
    fn run(&mut self, _context: &mut RequestContext) -> Result<(), HandlerError> {
        Ok(())
    }

    fn response(&mut self, context: &mut RequestContext) -> Result<String, HandlerError> {
        Ok(format!("hello {}", context.param("name").unwrap_or("world")))
    }
}

struct Failing;

impl Handler for Failing {
    fn run(&mut self, _context: &mut RequestContext) -> Result<(), HandlerError> {
        Err("boom <b>".into())
    }

    fn response(&mut self, _context: &mut RequestContext) -> Result<String, HandlerError> {
        Ok("unreachable".to_owned())
    }
}

struct Panicking;

impl Handler for Panicking {
    fn run(&mut self, _context: &mut RequestContext) -> Result<(), HandlerError> {
        Ok(())
    }

    fn response(&mut self, _context: &mut RequestContext) -> Result<String, HandlerError> {
        panic!("kaboom");
    }
}

#[derive(Default)]
struct Counter {
    visits: u32,
}

impl Handler for Counter {
    fn run(&mut self, context: &mut RequestContext) -> Result<(), HandlerError> {
        let store = context.store()?;
        self.visits = store.get::<u32>("visits")?.unwrap_or_default().saturating_add(1);
        store.insert("visits", &self.visits)?;
        store.commit()?;
        Ok(())
    }

    fn response(&mut self, _context: &mut RequestContext) -> Result<String, HandlerError> {
        Ok(self.visits.to_string())
    }
}

struct Calendar;

impl Handler for Calendar {
    fn run(&mut self, _context: &mut RequestContext) -> Result<(), HandlerError> {
        Ok(())
    }

    fn response(&mut self, context: &mut RequestContext) -> Result<String, HandlerError> {
        let days = context
            .logic::<u8>("Common::Days")
            .ok_or("Common::Days is not loaded")?;
        Ok(format!("{days} days"))
    }
}

fn catalog() -> Catalog {
    let manifest = ScriptManifest::new(ScriptName::parse("kagura").expect("script"))
        .with_controller(ComponentUnit::new("controller/kagura/default", |definitions| {
            definitions.define_handler("Kagura::Default", || Echo);
            definitions.define_handler("Kagura::Broken", || Failing);
            definitions.define_handler("Kagura::Explode", || Panicking);
            definitions.define_handler("Kagura::Visits", Counter::default);
            definitions.define_handler("Kagura::Calendar", || Calendar);
            definitions.define_handler("Kagura::Fragile", || -> Echo {
                panic!("constructor failed")
            });
        }))
        .with_logic("logic/kagura/helper");
    let orphan = ScriptManifest::new(ScriptName::parse("orphan").expect("script"))
        .with_logic("logic/orphan/absent");

    let mut catalog = Catalog::new();
    catalog.register(manifest).expect("kagura");
    catalog.register(orphan).expect("orphan");
    catalog.set_common(ComponentUnit::new("logic/common", |definitions| {
        definitions.define_logic("Common::Days", 31_u8);
    }));
    catalog
        .provide_logic(ComponentUnit::new("logic/kagura/helper", |definitions| {
            definitions.define_logic("Kagura::Helper", "assist".to_owned());
        }))
        .expect("helper");
    catalog
}

struct Harness {
    dir: TempDir,
    config: Config,
}

impl Harness {
    fn engine_with(&self, renderer: impl Renderer + 'static) -> Engine {
        Engine::new(self.config.clone(), catalog(), Arc::new(renderer)).expect("engine")
    }

    fn engine(&self) -> Engine {
        let mut renderer = MockRenderer::new();
        renderer.expect_exists().return_const(false);
        self.engine_with(renderer)
    }

    fn log(&self, key: &str) -> String {
        fs::read_to_string(self.dir.path().join("log").join(format!("{key}.log")))
            .unwrap_or_default()
    }
}

#[fixture]
fn harness() -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let root = dir.path().to_str().expect("utf8 temp dir");
    let config = Config {
        log_dir: format!("{root}/log").into(),
        store_dir: format!("{root}/work").into(),
        template_dir: format!("{root}/templates").into(),
        session_store: Some(true),
        ..Config::default()
    };
    Harness { dir, config }
}

fn request(entry: &str, pairs: &[(&str, &str)]) -> IncomingRequest {
    IncomingRequest::new(
        entry,
        Transport::new("GET"),
        Session::existing(SessionId::parse("s1").expect("session")),
        pairs.iter().copied().collect::<Params>(),
    )
}

#[rstest]
fn default_mode_renders_handler_body(harness: Harness) {
    let response = harness
        .engine()
        .dispatch(request("/cgi-bin/kagura.cgi", &[("name", "kagura")]));

    assert_eq!(response.outcome(), Outcome::Rendered);
    assert_eq!(response.content_type(), ContentType::Html);
    assert_eq!(response.body(), "hello kagura");
    assert!(harness.log("kagura").contains("create instance name : Kagura::Default"));
}

#[rstest]
fn handler_error_renders_escaped_emergency_page(harness: Harness) {
    let response = harness
        .engine()
        .dispatch(request("/kagura.cgi", &[("mode", "broken")]));

    assert_eq!(response.outcome(), Outcome::ExecutionError);
    assert!(response.body().contains("EMERGENCY ERROR"));
    assert!(
        response
            .body()
            .contains("Kagura::Broken#run: boom &lt;b&gt; (ExecutionFailure)")
    );
    assert!(!response.body().contains("boom <b>"));
    assert!(harness.log("kagura").contains("Kagura::Broken#run: boom <b>"));
}

#[rstest]
fn handler_panic_is_an_execution_failure(harness: Harness) {
    let response = harness
        .engine()
        .dispatch(request("/kagura.cgi", &[("mode", "explode")]));

    assert_eq!(response.outcome(), Outcome::ExecutionError);
    assert!(response.body().contains("Kagura::Explode#response: kaboom"));
}

#[rstest]
fn constructor_panic_does_not_disable_later_requests(harness: Harness) {
    let engine = harness.engine();

    let failed = engine.dispatch(request("/kagura.cgi", &[("mode", "fragile")]));
    let next = engine.dispatch(request("/kagura.cgi", &[]));

    assert_eq!(failed.outcome(), Outcome::ExecutionError);
    assert!(
        failed
            .body()
            .contains("Kagura::Fragile#new: constructor failed (ExecutionFailure)")
    );
    assert_eq!(next.outcome(), Outcome::Rendered);
    assert_eq!(next.body(), "hello world");
}

#[rstest]
fn unknown_mode_falls_back_to_embedded_page_without_template(harness: Harness) {
    let response = harness
        .engine()
        .dispatch(request("/kagura.cgi", &[("mode", "nosuch")]));

    assert_eq!(response.outcome(), Outcome::NameError);
    assert!(response.body().contains("uninitialized constant Kagura::Nosuch"));
    assert!(response.body().contains("(ResolutionFailure)"));
}

#[rstest]
fn name_error_template_renders_when_present(harness: Harness) {
    let mut renderer = MockRenderer::new();
    renderer
        .expect_exists()
        .withf(|template| template == "nameerror.html")
        .return_const(true);
    renderer
        .expect_render()
        .withf(|template, scope| {
            template == "nameerror.html" && scope.get("kind") == Some("InvalidNameFailure")
        })
        .times(1)
        .returning(|_, scope| Ok(format!("custom: {}", scope.get("message").unwrap_or(""))));

    let response = harness
        .engine_with(renderer)
        .dispatch(request("/kagura.cgi", &[("mode", "../etc")]));

    assert_eq!(response.outcome(), Outcome::NameError);
    assert!(response.body().starts_with("custom: controller name is bad value"));
}

#[rstest]
fn failing_name_error_template_falls_back_and_warns(harness: Harness) {
    let mut renderer = MockRenderer::new();
    renderer.expect_exists().return_const(true);
    renderer.expect_render().returning(|template, _| {
        Err(RenderError::Unterminated {
            template: template.to_owned(),
        })
    });

    let response = harness
        .engine_with(renderer)
        .dispatch(request("/kagura.cgi", &[("mode", "nosuch")]));

    assert_eq!(response.outcome(), Outcome::NameError);
    assert!(response.body().contains("EMERGENCY ERROR"));
    assert!(harness.log("kagura").contains("name error template 'nameerror.html' failed"));
}

#[rstest]
fn missing_logic_unit_is_a_name_error_logged_at_error(harness: Harness) {
    let response = harness.engine().dispatch(request("/orphan.cgi", &[]));

    assert_eq!(response.outcome(), Outcome::NameError);
    assert!(response.body().contains("MissingComponentFailure"));
    let log = harness.log("orphan");
    assert!(log.contains("ERROR"));
    assert!(log.contains("logic/orphan/absent"));
}

#[rstest]
fn logic_definition_named_by_mode_violates_the_contract(harness: Harness) {
    let response = harness
        .engine()
        .dispatch(request("/kagura.cgi", &[("mode", "helper")]));

    assert_eq!(response.outcome(), Outcome::ExecutionError);
    assert!(response.body().contains("Kagura::Helper#new"));
    assert!(response.body().contains("ContractViolationFailure"));
}

#[rstest]
fn invalid_entry_point_is_fatal_plain_text(harness: Harness) {
    let response = harness.engine().dispatch(request("/cgi-bin/my-app.cgi", &[]));

    assert_eq!(response.outcome(), Outcome::Fatal);
    assert_eq!(response.content_type(), ContentType::PlainText);
    assert!(response.body().starts_with("dispatch: script name is bad value"));
    assert!(response.body().contains("(FatalFailure)"));
    assert!(!response.body().contains("InvalidNameFailure"));
    assert!(harness.log("kagura").contains("fatal"));
}

#[rstest]
fn session_store_persists_across_requests(harness: Harness) {
    let engine = harness.engine();

    let first = engine.dispatch(request("/kagura.cgi", &[("mode", "visits")]));
    let second = engine.dispatch(request("/kagura.cgi", &[("mode", "visits")]));

    assert_eq!(first.body(), "1");
    assert_eq!(second.body(), "2");
    assert!(harness.dir.path().join("work/s1.dat").is_file());
}

#[rstest]
fn store_not_requested_is_an_execution_failure(harness: Harness) {
    let config = Config {
        session_store: Some(false),
        ..harness.config.clone()
    };
    let mut renderer = MockRenderer::new();
    renderer.expect_exists().return_const(false);
    let engine = Engine::new(config, catalog(), Arc::new(renderer)).expect("engine");

    let response = engine.dispatch(request("/kagura.cgi", &[("mode", "visits")]));

    assert_eq!(response.outcome(), Outcome::ExecutionError);
    assert!(response.body().contains("session store was not requested"));
}

#[rstest]
fn handlers_see_common_logic(harness: Harness) {
    let response = harness
        .engine()
        .dispatch(request("/kagura.cgi", &[("mode", "calendar")]));

    assert_eq!(response.body(), "31 days");
}

#[rstest]
fn phases_are_traced_in_order(harness: Harness) {
    harness.engine().dispatch(request("/kagura.cgi", &[]));

    let log = harness.log("kagura");
    let positions: Vec<usize> = ["init", "resolving", "executing", "responding", "done"]
        .iter()
        .map(|phase| {
            log.find(&format!("phase : {phase}"))
                .unwrap_or_else(|| panic!("phase {phase} traced"))
        })
        .collect();
    assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn failure_kinds_label_reports() {
    let error = DispatchError::ContractViolation {
        name: "Kagura::Helper".to_owned(),
    };
    let report = FailureReport::from_error(&error);

    assert_eq!(report.kind(), FailureKind::ContractViolation);
    assert_eq!(report.frames().first().map(String::as_str), Some("Kagura::Helper#new"));
    assert_eq!(
        report.summary(),
        "Kagura::Helper#new: Kagura::Helper is not a handler (ContractViolationFailure)"
    );
}

#[test]
fn emergency_page_escapes_every_frame() {
    let report = FailureReport::new(
        FailureKind::Execution,
        "<script>".to_owned(),
        vec!["Kagura::X#run".to_owned(), "caused by: <img>".to_owned()],
    );
    let page = emergency_page(&report);

    assert!(page.contains("&lt;script&gt;"));
    assert!(page.contains("caused by: &lt;img&gt;"));
    assert!(!page.contains("<script>"));
    assert!(!page.contains("<img>"));
}

#[test]
fn plain_text_page_lists_frames_on_lines() {
    let report = FailureReport::new(
        FailureKind::Fatal,
        "disk full".to_owned(),
        vec!["dispatch".to_owned(), "caused by: os error 28".to_owned()],
    );
    assert_eq!(
        plain_text_page(&report),
        "dispatch: disk full (FatalFailure)\ncaused by: os error 28\n"
    );
}
