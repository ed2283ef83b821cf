//! End-to-end UI suite for the Nawat school management ERP.
//!
//! The suite drives the Odoo "Accès / Carte Scolaire / Apprenant" screens
//! through Chromium: login and language switching, the class sidebar sweep,
//! status filters, the enrolled-students roster and the XLSX/CSV export.
//! Page objects are written against the [`browser::PageDriver`] trait so the
//! same flows run against [`runtime::ChromiumoxidePage`] or an in-memory fake.

pub mod browser;
pub mod config;
pub mod dom_scripts;
pub mod logging;
pub mod page;
pub mod preflight;
pub mod runtime;
pub mod scenario;
pub mod session;

#[cfg(test)]
mod testing;

pub use browser::{BrowserRuntime, BrowserRuntimeError, ElementRef, LaunchPlan, PageDriver};
pub use config::{ConfigError, SuiteConfig, SuiteConfigOverrides, TestUser, UserData};
pub use logging::{SuiteLogger, Verbosity};
pub use page::{ErpPage, PageError, WaitState};
pub use runtime::{ChromiumoxidePage, ChromiumoxideRuntime};
pub use scenario::{Outcome, Scenario, ScenarioReport, SuiteSummary, run_scenario};
pub use session::{Session, SessionError};
