//! Session bootstrap.
//!
//! A [`Session`] owns one browser runtime and one page wrapped in an
//! [`ErpPage`]. It replaces per-test fixtures: scenarios call
//! [`Session::launch`] (or [`Session::with_runtime`] in tests), optionally
//! [`Session::logged_in`], run against [`Session::page`], then
//! [`Session::close`].

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::time::Duration;

use crate::browser::{BrowserRuntime, BrowserRuntimeError, LaunchPlan};
use crate::config::{SuiteConfig, TestUser};
use crate::logging::SuiteLogger;
use crate::page::login::LoginPage;
use crate::page::{ErpPage, PageError};
use crate::runtime::{ChromiumoxideRuntime, temp_profile_dir};

pub const MAIN_MENU_BAR: &str = ".o_main_navbar";
pub const MAIN_CONTENT: &str = ".o_content";

const BLANK_PAGE: &str = "about:blank";
const HOME_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Browser(#[from] BrowserRuntimeError),
    #[error(transparent)]
    Page(#[from] PageError),
    #[error("login as {username} failed: {message}")]
    Login { username: String, message: String },
    #[error("home screen incomplete after login: {missing} not visible")]
    HomeScreen { missing: &'static str },
}

pub struct Session<R: BrowserRuntime> {
    runtime: R,
    page: ErpPage<R::Page>,
    profile_dir: Option<PathBuf>,
}

impl Session<ChromiumoxideRuntime> {
    /// Launch Chromium with a throwaway profile and open a blank page.
    pub async fn launch(config: SuiteConfig, logger: SuiteLogger) -> Result<Self, SessionError> {
        let profile_dir = temp_profile_dir("nawat-e2e");
        let plan = LaunchPlan::from_config(&config).with_user_data_dir(profile_dir.clone());
        let mut session =
            Session::start(ChromiumoxideRuntime::new(), &plan, config, logger).await?;
        session.profile_dir = Some(profile_dir);
        Ok(session)
    }
}

impl<R: BrowserRuntime> Session<R> {
    /// Start a session on an arbitrary runtime using the plan derived from
    /// `config`.
    pub async fn with_runtime(
        runtime: R,
        config: SuiteConfig,
        logger: SuiteLogger,
    ) -> Result<Self, SessionError> {
        let plan = LaunchPlan::from_config(&config);
        Session::start(runtime, &plan, config, logger).await
    }

    async fn start(
        runtime: R,
        plan: &LaunchPlan,
        config: SuiteConfig,
        logger: SuiteLogger,
    ) -> Result<Self, SessionError> {
        log::info!(
            "starting session against {} (ci: {}, headless: {})",
            config.base_url,
            config.ci,
            plan.headless
        );
        runtime.launch(plan).await?;
        let driver = match runtime.new_page(BLANK_PAGE).await {
            Ok(driver) => driver,
            Err(err) => {
                if let Err(shutdown) = runtime.shutdown().await {
                    log::warn!("shutdown after failed page creation: {shutdown}");
                }
                return Err(err.into());
            }
        };
        let page = ErpPage::new(driver, Arc::new(config), Arc::new(logger));
        Ok(Session {
            runtime,
            page,
            profile_dir: None,
        })
    }

    pub fn page(&self) -> &ErpPage<R::Page> {
        &self.page
    }

    pub fn config(&self) -> &SuiteConfig {
        self.page.config()
    }

    /// Log in as `user` (the configured credentials when `None`) and check
    /// the home screen rendered. A failed login is screenshotted.
    pub async fn logged_in(&self, user: Option<&TestUser>) -> Result<(), SessionError> {
        let (username, password) = match user {
            Some(user) => (user.username.as_str(), user.password.as_str()),
            None => (
                self.config().username.as_str(),
                self.config().password.as_str(),
            ),
        };

        let login = LoginPage::new(&self.page);
        login.navigate().await?;
        if !login.login(username, password).await {
            self.page.capture_failure("session_login_failed").await;
            let message = login
                .get_error_message()
                .await
                .unwrap_or_else(|| "unknown error (possible timeout)".to_string());
            return Err(SessionError::Login {
                username: username.to_string(),
                message,
            });
        }

        for selector in [MAIN_MENU_BAR, MAIN_CONTENT] {
            if !self.page.is_element_visible(selector, HOME_CHECK_TIMEOUT).await {
                self.page.capture_failure("session_home_incomplete").await;
                return Err(SessionError::HomeScreen { missing: selector });
            }
        }
        log::info!("logged in as {username}");
        if let Err(err) = self.page.take_screenshot("successful_login").await {
            log::warn!("failed to capture successful_login: {err}");
        }
        Ok(())
    }

    /// Shut the browser down and remove the temporary profile.
    pub async fn close(self) -> Result<(), SessionError> {
        let outcome = self.runtime.shutdown().await;
        if let Some(dir) = self.profile_dir {
            if let Err(err) = tokio::fs::remove_dir_all(&dir).await {
                log::debug!("could not remove profile {}: {err}", dir.display());
            }
        }
        outcome.map_err(SessionError::from)
    }
}
