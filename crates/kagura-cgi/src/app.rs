//! The bundled `kagura` sample application.
//!
//! Three handlers live in the `controller/kagura/default` unit:
//!
//! | Mode      | Handler           | Template              |
//! |-----------|-------------------|-----------------------|
//! | `default` | `Kagura::Default` | `kagura/default.html` |
//! | `showday` | `Kagura::Showday` | `kagura/showday.html` |
//! | `visits`  | `Kagura::Visits`  | `kagura/visits.html`  |
//!
//! Handlers read the time through the `Common::Clock` logic component so a
//! fixed clock can replace the system clock.

use std::sync::Arc;

use kagura::{
    Catalog, CatalogError, ComponentUnit, Handler, HandlerError, RenderScope, RequestContext,
    ScriptManifest, ScriptName,
};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Script name of the sample application.
pub const SCRIPT: &str = "kagura";
/// Qualified name of the shared clock.
pub const CLOCK: &str = "Common::Clock";
/// Qualified name of the greeting logic component.
pub const GREETING: &str = "Kagura::Greeting";

const VISITS_KEY: &str = "visits";

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> OffsetDateTime;
}

/// Clock shared through the logic table.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}

fn clock(context: &RequestContext) -> Result<SharedClock, HandlerError> {
    context
        .logic::<SharedClock>(CLOCK)
        .cloned()
        .ok_or_else(|| format!("{CLOCK} is not loaded").into())
}

/// `Kagura::Default`: greets and shows the current time.
#[derive(Debug, Default)]
pub struct DefaultPage {
    now: String,
}

impl Handler for DefaultPage {
    fn run(&mut self, context: &mut RequestContext) -> Result<(), HandlerError> {
        self.now = clock(context)?.now().format(&Rfc3339)?;
        context.logger().debug(format_args!("rendering time {}", self.now));
        Ok(())
    }

    fn response(&mut self, context: &mut RequestContext) -> Result<String, HandlerError> {
        let greeting = context
            .logic::<String>(GREETING)
            .map_or("Welcome", String::as_str);
        let mut scope = RenderScope::new();
        scope.insert("greeting", greeting).insert("now", &self.now);
        Ok(context.render("kagura/default.html", &scope)?)
    }
}

/// `Kagura::Showday`: shows the day of the month.
#[derive(Debug, Default)]
pub struct Showday {
    day: u8,
}

impl Handler for Showday {
    fn run(&mut self, context: &mut RequestContext) -> Result<(), HandlerError> {
        self.day = clock(context)?.now().day();
        Ok(())
    }

    fn response(&mut self, context: &mut RequestContext) -> Result<String, HandlerError> {
        let mut scope = RenderScope::new();
        scope.insert("day", self.day);
        Ok(context.render("kagura/showday.html", &scope)?)
    }
}

/// `Kagura::Visits`: counts visits per session in the session store.
#[derive(Debug, Default)]
pub struct Visits {
    count: u64,
}

impl Handler for Visits {
    fn run(&mut self, context: &mut RequestContext) -> Result<(), HandlerError> {
        let count = context.store()?.transaction(|store| {
            let next = store.get::<u64>(VISITS_KEY)?.unwrap_or_default().saturating_add(1);
            store.insert(VISITS_KEY, &next)?;
            Ok::<_, kagura::StoreError>(next)
        })?;
        self.count = count;
        context.logger().info(format_args!("visit {count}"));
        Ok(())
    }

    fn response(&mut self, context: &mut RequestContext) -> Result<String, HandlerError> {
        let mut scope = RenderScope::new();
        scope
            .insert("visits", self.count)
            .insert("session", context.session().id());
        Ok(context.render("kagura/visits.html", &scope)?)
    }
}

/// Catalog for the sample application using the system clock.
///
/// # Errors
///
/// Returns [`CatalogError`] if the catalog cannot be assembled.
pub fn catalog() -> Result<Catalog, CatalogError> {
    catalog_with_clock(Arc::new(SystemClock))
}

/// Catalog for the sample application using `clock`.
///
/// # Errors
///
/// Returns [`CatalogError`] if the catalog cannot be assembled.
pub fn catalog_with_clock(clock: SharedClock) -> Result<Catalog, CatalogError> {
    let manifest = ScriptManifest::new(ScriptName::parse(SCRIPT)?)
        .with_controller(ComponentUnit::new("controller/kagura/default", |definitions| {
            definitions.define_handler("Kagura::Default", DefaultPage::default);
            definitions.define_handler("Kagura::Showday", Showday::default);
            definitions.define_handler("Kagura::Visits", Visits::default);
        }))
        .with_logic("logic/kagura/greeting");

    let mut catalog = Catalog::new();
    catalog.register(manifest)?;
    catalog.set_common(ComponentUnit::new("logic/common", move |definitions| {
        definitions.define_logic(CLOCK, Arc::clone(&clock));
    }));
    catalog.provide_logic(ComponentUnit::new("logic/kagura/greeting", |definitions| {
        definitions.define_logic(GREETING, "Welcome to Kagura".to_owned());
    }))?;
    Ok(catalog)
}
