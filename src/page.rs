//! Base page object shared by every screen.
//!
//! [`ErpPage`] wraps a [`PageDriver`] with the waits and conveniences the
//! screen workflows are written against: bounded selector waits, Odoo
//! loading-indicator waits, click-with-retry, screenshots and the main menu
//! navigation into the student records.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use thiserror::Error;
use tokio::time::{Duration, Instant, sleep};

use crate::browser::{BrowserRuntimeError, ElementRef, PageDriver};
use crate::config::{SuiteConfig, Timeouts};
use crate::logging::SuiteLogger;

pub mod class_filter;
pub mod list_actions;
pub mod login;
pub mod roster;
pub mod student_filter;

pub const LOADING_INDICATOR: &str = ".o_loading";
pub const ACTION_MANAGER: &str = "//div[contains(@class,'o_action_manager')]";
pub const NOTIFICATION: &str = ".o_notification";
pub const NOTIFICATION_CONTENT: &str = ".o_notification_content";

pub const WORKSPACE_BUTTON: &str = "//button[@title='Espace de travail']";
pub const ACCESS_MODULE: &str = "(//a[@data-menu-xmlid='acces.acces'])[3]";
pub const CARTE_SCOLAIRE_MENU: &str = "(//span[text()='Carte Scolaire'])[2]";
pub const CARTE_SCOLAIRE_TOGGLE: &str = "(//button[@class='dropdown-toggle']//span)[1]";
pub const APPRENANT_SUBMENU: &str = "(//a[@href='#menu_id=108&action=405'])[2]";

pub const DEFAULT_CLICK_RETRIES: usize = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1_000);

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const CLICK_SETTLE: Duration = Duration::from_millis(500);
const LOADING_APPEAR_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Element state awaited by [`ErpPage::wait_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Attached,
    Visible,
    Hidden,
}

impl fmt::Display for WaitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WaitState::Attached => "attached",
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum PageError {
    #[error(transparent)]
    Browser(#[from] BrowserRuntimeError),
    #[error("timed out after {timeout:?} waiting for {element} to be {state}")]
    Timeout {
        element: ElementRef,
        state: WaitState,
        timeout: Duration,
    },
    #[error("unexpected page state: {0}")]
    Unexpected(String),
}

/// Quote `value` as an XPath string literal.
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    if !value.contains('"') {
        return format!("\"{value}\"");
    }
    let parts: Vec<String> = value.split('\'').map(|part| format!("'{part}'")).collect();
    format!("concat({})", parts.join(", \"'\", "))
}

/// Turn a selector or label into something usable inside a file name.
pub fn file_stem(raw: &str) -> String {
    let mut stem: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    stem.truncate(stem.char_indices().nth(80).map_or(stem.len(), |(i, _)| i));
    stem
}

pub struct ErpPage<D: PageDriver> {
    driver: D,
    config: Arc<SuiteConfig>,
    logger: Arc<SuiteLogger>,
}

impl<D: PageDriver> ErpPage<D> {
    pub fn new(driver: D, config: Arc<SuiteConfig>, logger: Arc<SuiteLogger>) -> Self {
        Self {
            driver,
            config,
            logger,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    pub fn logger(&self) -> &SuiteLogger {
        &self.logger
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.config.timeouts
    }

    pub async fn goto(&self, url: &str) -> Result<(), PageError> {
        log::debug!("navigating to {url}");
        self.driver.goto(url).await?;
        Ok(())
    }

    pub async fn go_back(&self) -> Result<(), PageError> {
        self.driver.go_back().await?;
        Ok(())
    }

    pub async fn current_url(&self) -> Result<String, PageError> {
        Ok(self.driver.current_url().await?)
    }

    pub async fn count(&self, selector: &str) -> Result<usize, PageError> {
        Ok(self.driver.count(selector).await?)
    }

    pub async fn settle(&self, duration: Duration) {
        sleep(duration).await;
    }

    async fn check_state(&self, element: &ElementRef, state: WaitState) -> Result<bool, PageError> {
        let satisfied = match state {
            WaitState::Attached => self.driver.count(&element.selector).await? > element.index,
            WaitState::Visible => self.driver.is_visible(element).await?,
            WaitState::Hidden => !self.driver.is_visible(element).await?,
        };
        Ok(satisfied)
    }

    /// Poll until `element` reaches `state`. Driver errors while polling are
    /// treated as "not yet" since the DOM is frequently mid-render.
    pub async fn wait_for(
        &self,
        element: &ElementRef,
        state: WaitState,
        timeout: Duration,
    ) -> Result<(), PageError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.check_state(element, state).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(err) => log::debug!("polling {element} for {state}: {err}"),
            }
            if Instant::now() >= deadline {
                return Err(PageError::Timeout {
                    element: element.clone(),
                    state,
                    timeout,
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn wait_for_selector(
        &self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> Result<(), PageError> {
        self.wait_for(&ElementRef::first(selector), state, timeout)
            .await
    }

    /// Wait until one of `selectors` is visible and return its position.
    pub async fn wait_for_any(&self, selectors: &[&str], timeout: Duration) -> Result<usize, PageError> {
        let deadline = Instant::now() + timeout;
        loop {
            for (position, selector) in selectors.iter().enumerate() {
                if let Ok(true) = self.driver.is_visible(&ElementRef::first(*selector)).await {
                    return Ok(position);
                }
            }
            if Instant::now() >= deadline {
                return Err(PageError::Timeout {
                    element: ElementRef::first(selectors.join(" | ")),
                    state: WaitState::Visible,
                    timeout,
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait for the Odoo loading indicator to come and go, then for the
    /// document to finish loading. Never fails.
    pub async fn wait_for_loading(&self, timeout: Duration) {
        let indicator = ElementRef::first(LOADING_INDICATOR);
        let appear = LOADING_APPEAR_TIMEOUT.min(timeout);
        if self
            .wait_for(&indicator, WaitState::Visible, appear)
            .await
            .is_ok()
        {
            if let Err(err) = self.wait_for(&indicator, WaitState::Hidden, timeout).await {
                log::warn!("loading indicator still visible: {err}");
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            match self.driver.evaluate("document.readyState").await {
                Ok(state) if state.as_str() == Some("complete") => return,
                Ok(_) => {}
                Err(err) => log::debug!("reading document.readyState: {err}"),
            }
            if Instant::now() >= deadline {
                log::warn!("document did not finish loading within {timeout:?}");
                return;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn wait_for_default_loading(&self) {
        self.wait_for_loading(Duration::from_millis(self.timeouts().loading_ms))
            .await;
    }

    /// Click `element` once it is visible, retrying up to `max_retries` times
    /// with `retry_delay` as both the visibility budget and the pause between
    /// attempts. The last failure is screenshotted and returned.
    pub async fn click_element_with_retry(
        &self,
        element: &ElementRef,
        max_retries: usize,
        retry_delay: Duration,
    ) -> Result<(), PageError> {
        let attempts = max_retries.max(1);
        let mut attempt = 1;
        loop {
            let outcome = match self.wait_for(element, WaitState::Visible, retry_delay).await {
                Ok(()) => self.driver.click(element).await.map_err(PageError::from),
                Err(err) => Err(err),
            };

            match outcome {
                Ok(()) => {
                    sleep(CLICK_SETTLE).await;
                    return Ok(());
                }
                Err(err) if attempt >= attempts => {
                    log::warn!("click on {element} failed after {attempts} attempts: {err}");
                    let name = format!("click_retry_failure_{}", file_stem(&element.selector));
                    if let Err(shot) = self.take_screenshot(&name).await {
                        log::warn!("failed to capture {name}: {shot}");
                    }
                    return Err(err);
                }
                Err(err) => {
                    log::debug!("click attempt {attempt}/{attempts} on {element} failed: {err}");
                    attempt += 1;
                    sleep(retry_delay).await;
                }
            }
        }
    }

    pub async fn click_with_retry(
        &self,
        selector: &str,
        max_retries: usize,
        retry_delay: Duration,
    ) -> Result<(), PageError> {
        self.click_element_with_retry(&ElementRef::first(selector), max_retries, retry_delay)
            .await
    }

    /// [`Self::click_with_retry`] with three attempts and a one second delay.
    pub async fn click(&self, selector: &str) -> Result<(), PageError> {
        self.click_with_retry(selector, DEFAULT_CLICK_RETRIES, DEFAULT_RETRY_DELAY)
            .await
    }

    pub async fn get_element_text(&self, selector: &str, timeout: Duration) -> Option<String> {
        let element = ElementRef::first(selector);
        self.wait_for(&element, WaitState::Visible, timeout).await.ok()?;
        match self.driver.text(&element).await {
            Ok(text) => text.map(|text| text.trim().to_string()),
            Err(err) => {
                log::debug!("reading text of {element}: {err}");
                None
            }
        }
    }

    pub async fn is_element_visible(&self, selector: &str, timeout: Duration) -> bool {
        self.wait_for_selector(selector, WaitState::Visible, timeout)
            .await
            .is_ok()
    }

    /// Poll for `selector` to show up visible inside `scope`.
    pub async fn is_visible_within(&self, scope: &ElementRef, selector: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.driver.visible_within(scope, selector).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(err) => log::debug!("polling {selector} within {scope}: {err}"),
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn is_element_enabled(&self, selector: &str) -> bool {
        self.driver
            .is_enabled(&ElementRef::first(selector))
            .await
            .unwrap_or(false)
    }

    /// Save a full-page PNG as `{screenshots}/{name}_{YYYYmmdd_HHMMSS}.png`.
    pub async fn take_screenshot(&self, name: &str) -> Result<PathBuf, PageError> {
        self.wait_for_default_loading().await;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = self
            .config
            .screenshots_dir()
            .join(format!("{name}_{timestamp}.png"));
        self.driver.screenshot(&path).await?;
        log::info!("screenshot saved to {}", path.display());
        Ok(path)
    }

    /// Screenshot taken on an unexpected error. Skipped in CI.
    pub async fn capture_failure(&self, name: &str) -> Option<PathBuf> {
        if self.config.ci {
            return None;
        }
        match self.take_screenshot(name).await {
            Ok(path) => Some(path),
            Err(err) => {
                log::warn!("failed to capture {name}: {err}");
                None
            }
        }
    }

    pub async fn fill_field(
        &self,
        selector: &str,
        value: &str,
        clear_first: bool,
    ) -> Result<(), PageError> {
        let element = ElementRef::first(selector);
        self.wait_for(
            &element,
            WaitState::Visible,
            Duration::from_millis(self.timeouts().default_ms),
        )
        .await?;
        if clear_first {
            self.driver.fill(&element, "").await?;
        }
        self.driver.fill(&element, value).await?;
        Ok(())
    }

    pub async fn press(&self, selector: &str, key: &str) -> Result<(), PageError> {
        self.driver.press(&ElementRef::first(selector), key).await?;
        Ok(())
    }

    pub async fn select_dropdown_option(
        &self,
        dropdown_selector: &str,
        option_text: &str,
    ) -> Result<(), PageError> {
        self.driver
            .click(&ElementRef::first(dropdown_selector))
            .await?;
        sleep(Duration::from_millis(500)).await;
        let option = format!(
            "//li[contains(@class, 'ui-menu-item')]/a[contains(text(), {})]",
            xpath_literal(option_text)
        );
        self.driver.click(&ElementRef::first(option)).await?;
        Ok(())
    }

    /// Wait for a notification and, when `expected_text` is given, check it
    /// appears in the notification body (case-insensitive).
    pub async fn wait_for_notification(&self, expected_text: Option<&str>, timeout: Duration) -> bool {
        if self
            .wait_for_selector(NOTIFICATION, WaitState::Visible, timeout)
            .await
            .is_err()
        {
            return false;
        }
        let Some(expected) = expected_text else {
            return true;
        };
        match self
            .driver
            .text(&ElementRef::first(NOTIFICATION_CONTENT))
            .await
        {
            Ok(Some(actual)) => actual.to_lowercase().contains(&expected.to_lowercase()),
            _ => false,
        }
    }

    /// Open a top-level module from the side menu.
    pub async fn navigate_to_module(&self, module_name: &str) -> Result<(), PageError> {
        let navigation = Duration::from_millis(self.timeouts().navigation_ms);
        let selector = format!(
            "//span[@class='nav-title text-truncate ms-3' and @title={}]",
            xpath_literal(module_name)
        );
        self.wait_for_selector(&selector, WaitState::Visible, navigation)
            .await?;
        self.driver.click(&ElementRef::first(&selector)).await?;
        self.wait_for_default_loading().await;
        self.wait_for_selector(ACTION_MANAGER, WaitState::Visible, navigation)
            .await
    }

    /// Workspace → Accès → Carte Scolaire → Apprenant.
    pub async fn open_apprenant_menu(&self) -> Result<(), PageError> {
        self.click(WORKSPACE_BUTTON).await?;
        self.click(ACCESS_MODULE).await?;
        if let Err(err) = self.click(CARTE_SCOLAIRE_MENU).await {
            log::warn!("Carte Scolaire menu not found ({err}), trying the dropdown toggle");
            self.click(CARTE_SCOLAIRE_TOGGLE).await?;
        }
        self.click(APPRENANT_SUBMENU).await
    }
}
