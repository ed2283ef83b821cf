//! Scenario scripts run against a live (or fake) page.
//!
//! Each scenario drives the page objects through one user journey and
//! returns a [`ScenarioReport`]: the checks it made, soft warnings and a
//! verdict. Hard checks decide the verdict. Soft checks only add warnings,
//! which is how the class/student consistency findings are reported.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tokio::time::Duration;

use crate::browser::PageDriver;
use crate::config::{TestUser, UserData};
use crate::logging::SuiteLogger;
use crate::page::class_filter::{ClassFilterPage, MismatchedStudent};
use crate::page::list_actions::{ExportFormat, ListActionsPage};
use crate::page::login::{Language, LoginPage};
use crate::page::roster::RosterPage;
use crate::page::student_filter::{StatusFilter, StudentFilterPage};
use crate::page::{ACTION_MANAGER, ErpPage, WaitState, file_stem};

/// Top-level modules visited by the navigation scenario.
pub const MODULES: &[&str] = &[
    "Accès",
    "Finance",
    "Planification",
    "Communication",
    "Vie scolaire",
    "Transport",
    "Préinscription",
    "Discussion",
];

pub const ACTION_VIEW: &str = ".o_action";

/// Share of discovered classes that must be clicked without error.
pub const CLASS_SWEEP_THRESHOLD: f64 = 0.7;

/// Enrolled students listed in the roster summary.
pub const ROSTER_SAMPLE: usize = 10;

const MODULE_SETTLE: Duration = Duration::from_secs(1);
const MODULE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Skipped(String),
    Failed(String),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Passed => f.write_str("PASSED"),
            Outcome::Skipped(reason) => write!(f, "SKIPPED ({reason})"),
            Outcome::Failed(reason) => write!(f, "FAILED ({reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    /// Soft checks never fail the scenario.
    pub soft: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub outcome: Outcome,
    pub checks: Vec<Check>,
    pub warnings: Vec<String>,
}

impl ScenarioReport {
    pub fn new(name: impl Into<String>) -> Self {
        ScenarioReport {
            name: name.into(),
            outcome: Outcome::Passed,
            checks: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Record a hard check and hand back its result.
    pub fn check(&mut self, name: impl Into<String>, passed: bool) -> bool {
        self.checks.push(Check {
            name: name.into(),
            passed,
            soft: false,
        });
        passed
    }

    /// Record a soft check; a failure becomes a warning.
    pub fn observe(&mut self, name: impl Into<String>, passed: bool) -> bool {
        let name = name.into();
        if !passed {
            self.warn(format!("{name}: not observed"));
        }
        self.checks.push(Check {
            name,
            passed,
            soft: true,
        });
        passed
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn skip(mut self, reason: impl Into<String>) -> Self {
        self.outcome = Outcome::Skipped(reason.into());
        self
    }

    pub fn fail(mut self, reason: impl Into<String>) -> Self {
        self.outcome = Outcome::Failed(reason.into());
        self
    }

    pub fn failed_checks(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|check| !check.passed && !check.soft)
            .map(|check| check.name.as_str())
            .collect()
    }

    /// Settle the verdict from the hard checks.
    pub fn finish(mut self) -> Self {
        if self.outcome == Outcome::Passed {
            let failed = self.failed_checks().join("; ");
            if !failed.is_empty() {
                self.outcome = Outcome::Failed(failed);
            }
        }
        self
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }

    /// Emit the report through `logger` under the scenario's name: one
    /// record per check and warning, then the verdict with the checks as
    /// payload.
    pub fn publish(&self, logger: &SuiteLogger) {
        let category = Some(self.name.as_str());
        for check in &self.checks {
            match (check.passed, check.soft) {
                (true, _) => logger.debug(format!("ok: {}", check.name), category, None),
                (false, false) => logger.error(format!("failed: {}", check.name), category, None),
                (false, true) => {}
            }
        }
        for warning in &self.warnings {
            logger.warn(warning.clone(), category, None);
        }

        let checks = serde_json::to_value(&self.checks).ok();
        match self.outcome {
            Outcome::Failed(_) => logger.error(self.outcome.to_string(), category, checks),
            _ => logger.info(self.outcome.to_string(), category, checks),
        }
    }
}

/// Reports of a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteSummary {
    pub reports: Vec<ScenarioReport>,
}

impl SuiteSummary {
    pub fn extend(&mut self, reports: impl IntoIterator<Item = ScenarioReport>) {
        self.reports.extend(reports);
    }

    pub fn count(&self, wanted: fn(&Outcome) -> bool) -> usize {
        self.reports.iter().filter(|r| wanted(&r.outcome)).count()
    }

    pub fn passed(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Passed))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Failed(_)))
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for report in &self.reports {
            out.push_str(&format!("{:<48} {}\n", report.name, report.outcome));
            for warning in &report.warnings {
                out.push_str(&format!("    warning: {warning}\n"));
            }
        }
        out.push_str(&format!(
            "\n{} passed, {} skipped, {} failed\n",
            self.passed(),
            self.skipped(),
            self.failed()
        ));
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Scenario {
    Login,
    Modules,
    ClassFilters,
    StudentFilters,
    Roster,
    Search,
    Export,
}

impl Scenario {
    pub const ALL: [Scenario; 7] = [
        Scenario::Login,
        Scenario::Modules,
        Scenario::ClassFilters,
        Scenario::StudentFilters,
        Scenario::Roster,
        Scenario::Search,
        Scenario::Export,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Scenario::Login => "login",
            Scenario::Modules => "modules",
            Scenario::ClassFilters => "class-filters",
            Scenario::StudentFilters => "student-filters",
            Scenario::Roster => "roster",
            Scenario::Search => "search",
            Scenario::Export => "export",
        }
    }

    /// Everything but the login matrix starts from an authenticated page.
    pub fn needs_login(self) -> bool {
        !matches!(self, Scenario::Login)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.name() == value)
            .ok_or_else(|| format!("unknown scenario '{value}'"))
    }
}

/// Run `scenario` on `page`. Scenarios with sub-cases (filters, export
/// formats) return one report per case.
pub async fn run_scenario<D: PageDriver>(
    scenario: Scenario,
    page: &ErpPage<D>,
    users: &UserData,
) -> Vec<ScenarioReport> {
    log::info!("running scenario {scenario}");
    let reports = match scenario {
        Scenario::Login => vec![run_login_matrix(page, users).await],
        Scenario::Modules => vec![run_module_navigation(page).await],
        Scenario::ClassFilters => vec![run_class_sweep(page).await.0],
        Scenario::StudentFilters => run_status_filters(page).await,
        Scenario::Roster => vec![run_roster(page).await],
        Scenario::Search => vec![run_search(page).await],
        Scenario::Export => {
            let mut reports = Vec::with_capacity(2);
            for format in [ExportFormat::Xlsx, ExportFormat::Csv] {
                reports.push(run_export(page, format).await);
            }
            reports
        }
    };
    for report in &reports {
        report.publish(page.logger());
    }
    reports
}

async fn screenshot<D: PageDriver>(page: &ErpPage<D>, name: &str) {
    if let Err(err) = page.take_screenshot(name).await {
        log::warn!("failed to capture {name}: {err}");
    }
}

/// Language switching, invalid logins per language, then one valid login.
pub async fn run_login_matrix<D: PageDriver>(page: &ErpPage<D>, users: &UserData) -> ScenarioReport {
    let mut report = ScenarioReport::new("login");
    let invalid = users.invalid_users.first();
    if invalid.is_none() {
        report.warn("no invalid user configured, rejection checks skipped");
    }

    for language in Language::ALL {
        let code = language.code();
        let mut login = LoginPage::new(page);
        if let Err(err) = login.navigate().await {
            report.check(format!("login page opens ({code}): {err}"), false);
            continue;
        }
        screenshot(page, &format!("login_initial_{code}")).await;

        if !report.check(
            format!("switch to {code}"),
            login.switch_language(language).await,
        ) {
            continue;
        }
        screenshot(page, &format!("language_{code}")).await;

        let labels = login.verify_login_form_elements().await;
        page.logger().attach(
            &format!("form labels ({code})"),
            format!("{labels:?}"),
        );
        report.check(
            format!("form labels in {code}"),
            labels.values().all(|ok| *ok),
        );

        let Some(user) = invalid else {
            continue;
        };
        page.logger()
            .attach("invalid credentials", user.description.clone());
        let logged_in = login.login(&user.username, &user.password).await;
        screenshot(page, &format!("invalid_login_result_{code}")).await;
        report.check(format!("invalid login rejected ({code})"), !logged_in);
        report.check(
            format!("error message in {code}"),
            login.verify_error_message().await,
        );
    }

    let fallback;
    let valid = match users.valid_users.first() {
        Some(user) => user,
        None => {
            report.warn("no valid user configured, using the configured credentials");
            fallback = TestUser {
                username: page.config().username.clone(),
                password: page.config().password.clone(),
                description: "configured credentials".to_string(),
            };
            &fallback
        }
    };
    let login = LoginPage::new(page);
    match login.navigate().await {
        Ok(()) => {
            let logged_in = login.login(&valid.username, &valid.password).await;
            screenshot(page, "valid_login_result").await;
            report.check("valid login succeeds", logged_in);
            report.check("main navbar visible", login.is_logged_in().await);
        }
        Err(err) => {
            report.check(format!("login page opens: {err}"), false);
        }
    }

    report.finish()
}

/// Open every top-level module and check the action view renders.
pub async fn run_module_navigation<D: PageDriver>(page: &ErpPage<D>) -> ScenarioReport {
    let mut report = ScenarioReport::new("module navigation");
    for module in MODULES {
        if let Err(err) = page.navigate_to_module(module).await {
            log::error!("navigation to {module} failed: {err}");
            page.capture_failure(&format!("navigation_{}_error", file_stem(module)))
                .await;
            report.check(format!("{module} opens"), false);
            continue;
        }
        if let Err(err) = page
            .wait_for_selector(ACTION_VIEW, WaitState::Visible, MODULE_TIMEOUT)
            .await
        {
            log::warn!("{module}: action view not visible: {err}");
        }
        page.settle(MODULE_SETTLE).await;
        screenshot(page, &format!("navigation_{}", file_stem(module))).await;
        let visible = page
            .is_element_visible(ACTION_MANAGER, Duration::from_secs(1))
            .await;
        report.check(format!("{module} opens"), visible);
    }
    report.finish()
}

/// What the class sweep saw.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassSweepSummary {
    pub discovered: usize,
    pub tested: Vec<String>,
    pub with_students: Vec<String>,
    pub without_students: Vec<String>,
    pub mismatches: BTreeMap<String, Vec<MismatchedStudent>>,
    pub errors: Vec<String>,
}

impl ClassSweepSummary {
    /// Share of discovered classes clicked without error.
    pub fn clicked_ratio(&self) -> f64 {
        if self.discovered == 0 {
            return 0.0;
        }
        self.tested.len() as f64 / self.discovered as f64
    }

    pub fn meets_threshold(&self) -> bool {
        !self.tested.is_empty() && self.clicked_ratio() >= CLASS_SWEEP_THRESHOLD
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "Classes discovered: {}\nClasses tested ({}): {}\nWith students ({}): {}\nWithout students ({}): {}\nWith mismatches ({}): {}\n",
            self.discovered,
            self.tested.len(),
            self.tested.join(", "),
            self.with_students.len(),
            self.with_students.join(", "),
            self.without_students.len(),
            self.without_students.join(", "),
            self.mismatches.len(),
            self.mismatches.keys().cloned().collect::<Vec<_>>().join(", "),
        );
        for (class_name, students) in &self.mismatches {
            out.push_str(&format!("\nClass: {class_name} ({} mismatched)\n", students.len()));
            for student in students {
                out.push_str(&format!(
                    "- #{} {} (ID: {}): expected {}, got {}\n",
                    student.index,
                    student.name,
                    student.id,
                    student.expected_class,
                    student.actual_class
                ));
            }
        }
        if !self.errors.is_empty() {
            out.push_str(&format!("\nErrors ({}):\n", self.errors.len()));
            for error in &self.errors {
                out.push_str(&format!("- {error}\n"));
            }
        }
        out
    }
}

/// Click every class in the sidebar and compare the cards against it.
pub async fn run_class_sweep<D: PageDriver>(page: &ErpPage<D>) -> (ScenarioReport, ClassSweepSummary) {
    let mut report = ScenarioReport::new("class filters");
    let mut summary = ClassSweepSummary::default();
    let classes = ClassFilterPage::new(page);

    if let Err(err) = classes.navigate_from_login().await {
        page.capture_failure("class_filters_navigation").await;
        return (report.fail(format!("student page unreachable: {err}")), summary);
    }

    let items: Vec<_> = classes
        .discover_items()
        .await
        .into_iter()
        .filter(|item| item.is_class)
        .collect();
    summary.discovered = items.len();
    if items.is_empty() {
        classes.debug_sidebar_structure().await;
        return (report.fail("no class found in the sidebar"), summary);
    }

    for item in &items {
        if let Err(err) = classes.click_sidebar_item(item).await {
            summary.errors.push(format!("{}: {err}", item.title));
            continue;
        }
        summary.tested.push(item.title.clone());
        classes.wait_for_page_loaded().await;

        if !classes.has_students().await {
            summary.without_students.push(item.title.clone());
            continue;
        }
        summary.with_students.push(item.title.clone());
        match classes.verify_students_match_class(&item.title).await {
            Ok(verification) if verification.is_success() => {}
            Ok(verification) => {
                report.warn(format!(
                    "{}: {} of {} students show another class",
                    item.title,
                    verification.mismatched.len(),
                    verification.total
                ));
                summary
                    .mismatches
                    .insert(item.title.clone(), verification.mismatched);
            }
            Err(err) => summary.errors.push(format!("{}: {err}", item.title)),
        }
    }

    page.logger().attach("class sweep summary", summary.render());
    screenshot(page, "class_sweep_complete").await;

    report.check("at least one class tested", !summary.tested.is_empty());
    report.check(
        format!(
            "{:.0}% of classes clicked (need {:.0}%)",
            summary.clicked_ratio() * 100.0,
            CLASS_SWEEP_THRESHOLD * 100.0
        ),
        summary.meets_threshold(),
    );
    (report.finish(), summary)
}

/// Apply one status filter and observe the cards and detail view.
pub async fn run_status_filter<D: PageDriver>(page: &ErpPage<D>, filter: StatusFilter) -> ScenarioReport {
    let mut report = ScenarioReport::new(format!("status filter: {filter}"));
    let filters = StudentFilterPage::new(page);
    if let Err(err) = filters.navigate_from_login().await {
        page.capture_failure("student_filters_navigation").await;
        return report.skip(format!("student page unreachable: {err}"));
    }

    filters.apply_filter(filter).await;
    let facet = filters.get_filter_facet_text().await;
    if facet.as_deref() != Some(filter.facet_label()) {
        filters.remove_filter().await;
        return report.skip(format!(
            "facet shows {:?} instead of '{}'",
            facet.unwrap_or_default(),
            filter.facet_label()
        ));
    }

    for check in filter.card_checks() {
        let seen = filters.run_card_check(*check).await;
        report.observe(check.to_string(), seen);
    }
    if let Some(detail) = filter.detail_check() {
        match filters.run_detail_check(detail).await {
            Some(seen) => {
                report.observe(detail.to_string(), seen);
            }
            None => report.warn("no student card to open"),
        }
    }

    filters.remove_filter().await;
    report.finish()
}

pub async fn run_status_filters<D: PageDriver>(page: &ErpPage<D>) -> Vec<ScenarioReport> {
    let mut reports = Vec::with_capacity(StatusFilter::ALL.len());
    for filter in StatusFilter::ALL {
        reports.push(run_status_filter(page, filter).await);
    }
    reports
}

/// Walk the roster pages, count enrolled students and check paging.
pub async fn run_roster<D: PageDriver>(page: &ErpPage<D>) -> ScenarioReport {
    let mut report = ScenarioReport::new("enrolled students");
    let roster = RosterPage::new(page);
    if let Err(err) = roster.navigate_from_login().await {
        page.capture_failure("roster_navigation").await;
        return report.fail(format!("student page unreachable: {err}"));
    }
    report.check("student page displayed", roster.is_student_page_displayed().await);

    let on_first_page = match roster.verify_pagination_round_trip().await {
        Ok(Some(round_trip)) => {
            report.check("next page shows other students", round_trip.moved());
            report.check("previous page restores the first page", round_trip.restored())
        }
        Ok(None) => {
            report.warn("single page of students, pagination not exercised");
            true
        }
        Err(err) => report.check(format!("pagination round trip: {err}"), false),
    };
    if !on_first_page {
        log::warn!("pager did not return to the first page, reopening the student list");
        if let Err(err) = roster.navigate_from_login().await {
            report.check(format!("student page reopened: {err}"), false);
            return report.finish();
        }
    }

    let scan = roster.get_all_enrolled_students().await;
    let total_students = roster.get_total_students_count().await;
    let total_enrolled = scan.total_enrolled();

    let mut summary = format!(
        "Total students: {total_students}\nEnrolled students: {total_enrolled}\nPages visited: {}\n\n",
        scan.pages_visited
    );
    for (index, student) in scan.students.iter().take(ROSTER_SAMPLE).enumerate() {
        summary.push_str(&format!(
            "Enrolled student {}: {} - {}\n",
            index + 1,
            student.name,
            student.class_label
        ));
    }
    if total_enrolled > ROSTER_SAMPLE {
        summary.push_str(&format!("... and {} more\n", total_enrolled - ROSTER_SAMPLE));
    }
    page.logger().attach("enrolled students", summary);

    let duplicates = scan.duplicate_ids();
    if !duplicates.is_empty() {
        report.warn(format!("{} ids listed on more than one page", duplicates.len()));
    }

    report.check("enrolled students found", total_enrolled > 0);
    report.check(
        format!("enrolled ({total_enrolled}) within total ({total_students})"),
        total_enrolled <= total_students,
    );
    screenshot(page, "enrolled_students_final").await;
    report.finish()
}

/// Search by the first word of the first student's name.
pub async fn run_search<D: PageDriver>(page: &ErpPage<D>) -> ScenarioReport {
    let mut report = ScenarioReport::new("student search");
    let roster = RosterPage::new(page);
    if let Err(err) = roster.navigate_from_login().await {
        page.capture_failure("search_navigation").await;
        return report.fail(format!("student page unreachable: {err}"));
    }

    let students = roster.get_students_info().await;
    let Some(term) = students
        .first()
        .and_then(|student| student.name.split_whitespace().next())
        .map(str::to_string)
    else {
        return report.skip("no students available to search for");
    };
    screenshot(page, "before_search").await;

    if let Err(err) = roster.search_student(&term).await {
        page.capture_failure("search_error").await;
        return report.fail(format!("search for '{term}' failed: {err}"));
    }

    let matching: Vec<String> = roster
        .get_students_info()
        .await
        .into_iter()
        .map(|student| student.name)
        .filter(|name| name.contains(&term))
        .collect();
    page.logger()
        .attach(&format!("results for '{term}'"), matching.join("\n"));
    report.check(format!("results contain '{term}'"), !matching.is_empty());
    report.finish()
}

/// Export every student in `format` and check the downloaded file.
pub async fn run_export<D: PageDriver>(page: &ErpPage<D>, format: ExportFormat) -> ScenarioReport {
    let mut report = ScenarioReport::new(format!("export {format}"));
    let result = ListActionsPage::new(page).complete_export(format).await;
    match serde_json::to_string_pretty(&result) {
        Ok(json) => page.logger().attach(&format!("export {format} result"), json),
        Err(err) => log::warn!("could not serialise export result: {err}"),
    }

    if let Some(step) = result.failed_step() {
        report.check(step, false);
        return report.finish();
    }
    report.check(
        format!("{} is not empty", format.default_filename()),
        result.file_size > 0,
    );
    report.finish()
}
