//! Unit tests for the catalog and the module resolver.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use kagura_config::Config;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::handler::{Handler, HandlerError};
use crate::request::RequestContext;

struct Greeting;

impl Handler for Greeting {
    fn run(&mut self, _context: &mut RequestContext) -> Result<(), HandlerError> {
        Ok(())
    }

    fn response(&mut self, _context: &mut RequestContext) -> Result<String, HandlerError> {
        Ok("hello".to_owned())
    }
}

struct Harness {
    _dir: TempDir,
    loggers: Arc<LoggerProvider>,
    installs: Arc<AtomicUsize>,
}

impl Harness {
    fn resolver(&self, catalog: Catalog) -> ModuleResolver {
        ModuleResolver::new(catalog, Arc::clone(&self.loggers))
    }

    fn counting_unit(&self, name: &str, install: fn(&mut Definitions)) -> ComponentUnit {
        let installs = Arc::clone(&self.installs);
        ComponentUnit::new(name, move |definitions| {
            installs.fetch_add(1, Ordering::SeqCst);
            install(definitions);
        })
    }

    fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }
}

#[fixture]
fn harness() -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let root = dir.path().to_str().expect("utf8 temp dir").to_owned();
    let config = Config {
        log_dir: root.into(),
        ..Config::default()
    };
    let loggers = Arc::new(LoggerProvider::new(&config).expect("provider"));
    Harness {
        _dir: dir,
        loggers,
        installs: Arc::new(AtomicUsize::new(0)),
    }
}

fn script(name: &str) -> ScriptName {
    ScriptName::parse(name).expect("valid script")
}

fn kagura_catalog(harness: &Harness) -> Catalog {
    let manifest = ScriptManifest::new(script("kagura"))
        .with_controller(harness.counting_unit("controller/kagura/default", |definitions| {
            definitions.define_handler("Kagura::Default", || Greeting);
            definitions.define_handler("Kagura::ShowDay", || Greeting);
        }))
        .with_logic("logic/kagura/calendar");

    let mut catalog = Catalog::new();
    catalog.register(manifest).expect("register kagura");
    catalog.set_common(ComponentUnit::new("logic/common", |definitions| {
        definitions.define_logic("Common::Motto", "slow and steady".to_owned());
    }));
    catalog
        .provide_logic(ComponentUnit::new("logic/kagura/calendar", |definitions| {
            definitions.define_logic("Kagura::Calendar", 31_u8);
        }))
        .expect("provide calendar");
    catalog
}

#[rstest]
fn resolves_handler_after_loading_units_in_order(harness: Harness) {
    let resolver = harness.resolver(kagura_catalog(&harness));

    let component = resolver
        .resolve(&script("kagura"), "default")
        .expect("default resolves");

    assert!(matches!(component, Component::Handler { ref name, .. } if name == "Kagura::Default"));
    assert_eq!(
        resolver.loaded_units(),
        vec![
            "controller/kagura/default",
            "logic/common",
            "logic/kagura/calendar"
        ]
    );
}

#[rstest]
fn units_load_once_across_requests(harness: Harness) {
    let resolver = harness.resolver(kagura_catalog(&harness));

    for _ in 0..3 {
        resolver
            .resolve(&script("kagura"), "default")
            .expect("default resolves");
    }

    assert_eq!(harness.installs(), 1);
}

#[rstest]
fn mode_casing_only_changes_first_character(harness: Harness) {
    let resolver = harness.resolver(kagura_catalog(&harness));

    let component = resolver
        .resolve(&script("kagura"), "showDay")
        .expect("showDay resolves");

    assert_eq!(component.name(), "Kagura::ShowDay");
}

#[rstest]
#[case("../etc/passwd")]
#[case("show day")]
#[case("")]
fn invalid_mode_loads_nothing(harness: Harness, #[case] mode: &str) {
    let resolver = harness.resolver(kagura_catalog(&harness));

    let error = resolver
        .resolve(&script("kagura"), mode)
        .expect_err("mode rejected");

    assert!(matches!(error, ResolveError::InvalidName(_)));
    assert!(error.is_name_error());
    assert!(resolver.loaded_units().is_empty());
    assert_eq!(harness.installs(), 0);
}

#[rstest]
fn unknown_mode_is_unresolved(harness: Harness) {
    let resolver = harness.resolver(kagura_catalog(&harness));

    let error = resolver
        .resolve(&script("kagura"), "nosuch")
        .expect_err("nothing defines Kagura::Nosuch");

    assert!(matches!(error, ResolveError::Unresolved { ref qualified } if qualified == "Kagura::Nosuch"));
    assert!(error.is_name_error());
}

#[rstest]
fn unknown_script_is_unresolved(harness: Harness) {
    let resolver = harness.resolver(kagura_catalog(&harness));

    let error = resolver
        .resolve(&script("ghost"), "default")
        .expect_err("no manifest for ghost");

    assert!(matches!(error, ResolveError::Unresolved { ref qualified } if qualified == "Ghost::Default"));
}

#[rstest]
fn listed_but_missing_logic_unit_is_reported(harness: Harness) {
    let manifest = ScriptManifest::new(script("orphan")).with_logic("logic/orphan/absent");
    let mut catalog = Catalog::new();
    catalog.register(manifest).expect("register orphan");
    let resolver = harness.resolver(catalog);

    let error = resolver
        .resolve(&script("orphan"), "default")
        .expect_err("missing unit");

    assert!(matches!(
        error,
        ResolveError::MissingComponent { ref unit, .. } if unit == "logic/orphan/absent"
    ));
    assert!(error.is_name_error());
}

#[rstest]
fn mode_naming_logic_component_resolves_to_logic(harness: Harness) {
    let resolver = harness.resolver(kagura_catalog(&harness));

    let component = resolver
        .resolve(&script("kagura"), "calendar")
        .expect("Kagura::Calendar is defined");

    assert!(matches!(component, Component::Logic { ref name } if name == "Kagura::Calendar"));
}

#[rstest]
fn logic_snapshot_exposes_typed_components(harness: Harness) {
    let resolver = harness.resolver(kagura_catalog(&harness));
    resolver
        .resolve(&script("kagura"), "default")
        .expect("default resolves");

    let logic = resolver.logic();

    assert_eq!(logic.get::<u8>("Kagura::Calendar"), Some(&31));
    assert_eq!(
        logic.get::<String>("Common::Motto").map(String::as_str),
        Some("slow and steady")
    );
    assert!(logic.get::<u32>("Kagura::Calendar").is_none(), "wrong type");
}

#[test]
fn duplicate_registrations_are_rejected() {
    let mut catalog = Catalog::new();
    catalog
        .register(ScriptManifest::new(script("kagura")))
        .expect("first registration");
    let error = catalog
        .register(ScriptManifest::new(script("kagura")))
        .expect_err("second registration");
    assert!(matches!(error, CatalogError::DuplicateScript { .. }));

    catalog
        .provide_logic(ComponentUnit::new("logic/shared", |_| {}))
        .expect("first unit");
    let error = catalog
        .provide_logic(ComponentUnit::new("logic/shared", |_| {}))
        .expect_err("second unit");
    assert!(matches!(error, CatalogError::DuplicateLogicUnit { .. }));
}

#[rstest]
fn panicking_installer_leaves_no_partial_unit(harness: Harness) {
    let failed_once = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&failed_once);
    let manifest = ScriptManifest::new(script("kagura")).with_controller(ComponentUnit::new(
        "controller/kagura/default",
        move |definitions| {
            definitions.define_handler("Kagura::Default", || Greeting);
            assert!(flag.swap(true, Ordering::SeqCst), "installer failed");
        },
    ));
    let mut catalog = Catalog::new();
    catalog.register(manifest).expect("register kagura");
    let resolver = harness.resolver(catalog);

    let first = panic::catch_unwind(AssertUnwindSafe(|| {
        resolver.resolve(&script("kagura"), "default")
    }));
    assert!(first.is_err());
    assert!(resolver.loaded_units().is_empty());

    let component = resolver
        .resolve(&script("kagura"), "default")
        .expect("retried unit resolves");
    assert_eq!(component.name(), "Kagura::Default");
    assert_eq!(resolver.loaded_units(), vec!["controller/kagura/default".to_owned()]);
}
