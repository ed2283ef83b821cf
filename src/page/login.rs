//! Login screen.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use tokio::time::Duration;

use super::{ACTION_MANAGER, ErpPage, PageError, WaitState, xpath_literal};
use crate::browser::{ElementRef, PageDriver};

pub const USERNAME_INPUT: &str = "input[name='login']";
pub const PASSWORD_INPUT: &str = "input[name='password']";
pub const LOGIN_BUTTON: &str = "button[type='submit']";
pub const ERROR_MESSAGE: &str = ".o_error_detail";
pub const MAIN_NAVBAR: &str = "//span[@class='nav-title text-truncate ms-3' ]";
pub const USERNAME_LABEL: &str = "label[for='login']";
pub const PASSWORD_LABEL: &str = "label[for='password']";
pub const LANGUAGE_TOGGLE: &str = ".js_language_selector .dropdown-toggle";

const LOGIN_SETTLE: Duration = Duration::from_secs(3);
const NAVBAR_RECHECK: Duration = Duration::from_secs(2);

/// Interface languages offered on the login page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Language {
    En,
    Fr,
    Ar,
}

/// Accepted renderings of the login form strings for one language.
#[derive(Debug, Clone, Copy)]
pub struct LoginLabels {
    pub username: &'static [&'static str],
    pub password: &'static [&'static str],
    pub submit: &'static [&'static str],
    pub error: &'static [&'static str],
}

impl Language {
    pub const ALL: [Language; 3] = [Language::En, Language::Fr, Language::Ar];

    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Fr => "fr",
            Language::Ar => "ar",
        }
    }

    pub fn labels(self) -> LoginLabels {
        match self {
            Language::En => LoginLabels {
                username: &["Email", "Login"],
                password: &["Password"],
                submit: &["Log in", "Login"],
                error: &["Wrong login/password"],
            },
            Language::Fr => LoginLabels {
                username: &["Email", "Courriel", "Identifiant"],
                password: &["Mot de passe"],
                submit: &["Se connecter", "Connexion"],
                error: &[
                    "Identifiant/mot de passe incorrect",
                    "Nom d'utilisateur/mot de passe incorrect",
                ],
            },
            Language::Ar => LoginLabels {
                username: &["البريد الإلكتروني", "تسجيل الدخول"],
                password: &["كلمة المرور"],
                submit: &["تسجيل الدخول", "دخول"],
                error: &[
                    "اسم المستخدم/كلمة المرور غير صحيحة",
                    "بيانات الدخول غير صحيحة",
                ],
            },
        }
    }

    /// Selector of the entry picking this language in the selector dropdown.
    pub fn option_selector(self) -> String {
        format!(
            "//a[contains(@class,'js_change_lang') and starts-with(@data-url_code, {})]",
            xpath_literal(self.code())
        )
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = PageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Language::En),
            "fr" => Ok(Language::Fr),
            "ar" => Ok(Language::Ar),
            other => Err(PageError::Unexpected(format!("unsupported language '{other}'"))),
        }
    }
}

fn matches_any(rendered: &str, accepted: &[&str]) -> bool {
    let rendered = rendered.to_lowercase();
    accepted
        .iter()
        .any(|candidate| rendered.contains(&candidate.to_lowercase()))
}

pub struct LoginPage<'p, D: PageDriver> {
    page: &'p ErpPage<D>,
    language: Language,
}

impl<'p, D: PageDriver> LoginPage<'p, D> {
    pub fn new(page: &'p ErpPage<D>) -> Self {
        Self {
            page,
            language: Language::En,
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Open the login form and wait for its controls.
    pub async fn navigate(&self) -> Result<(), PageError> {
        let timeout = Duration::from_millis(self.page.timeouts().navigation_ms);
        self.page.goto(&self.page.config().login_url()).await?;
        for selector in [USERNAME_INPUT, PASSWORD_INPUT, LOGIN_BUTTON] {
            self.page
                .wait_for_selector(selector, WaitState::Visible, timeout)
                .await?;
        }
        Ok(())
    }

    /// Submit credentials and report whether the main navbar shows up before
    /// a login error does.
    pub async fn login(&self, username: &str, password: &str) -> bool {
        match self.try_login(username, password).await {
            Ok(logged_in) => logged_in,
            Err(err) => {
                log::error!("login failed with error: {err}");
                self.page.capture_failure("login_failure").await;
                false
            }
        }
    }

    async fn try_login(&self, username: &str, password: &str) -> Result<bool, PageError> {
        let login_timeout = Duration::from_millis(self.page.timeouts().login_ms);

        self.page.fill_field(USERNAME_INPUT, username, false).await?;
        self.page.fill_field(PASSWORD_INPUT, password, false).await?;
        self.page.click(LOGIN_BUTTON).await?;

        let first = self
            .page
            .wait_for_any(&[ERROR_MESSAGE, MAIN_NAVBAR], login_timeout)
            .await?;
        if first == 0 {
            log::info!("login rejected for {username}");
            if let Err(err) = self.page.take_screenshot("login_rejected").await {
                log::warn!("failed to capture login_rejected: {err}");
            }
            return Ok(false);
        }

        self.page
            .wait_for_selector(ACTION_MANAGER, WaitState::Visible, login_timeout)
            .await?;
        self.page.settle(LOGIN_SETTLE).await;
        Ok(self.page.is_element_visible(MAIN_NAVBAR, NAVBAR_RECHECK).await)
    }

    pub async fn get_error_message(&self) -> Option<String> {
        self.page
            .get_element_text(
                ERROR_MESSAGE,
                Duration::from_millis(self.page.timeouts().default_ms),
            )
            .await
    }

    /// Switch the login page language and confirm the document language.
    pub async fn switch_language(&mut self, language: Language) -> bool {
        match self.try_switch_language(language).await {
            Ok(switched) => {
                if switched {
                    self.language = language;
                }
                switched
            }
            Err(err) => {
                log::warn!("switching to {language} failed: {err}");
                self.page
                    .capture_failure(&format!("language_switch_{language}"))
                    .await;
                false
            }
        }
    }

    async fn try_switch_language(&self, language: Language) -> Result<bool, PageError> {
        let quick = Duration::from_millis(self.page.timeouts().quick_ms);
        if self.document_language().await?.starts_with(language.code()) {
            return Ok(true);
        }

        if self.page.is_element_visible(LANGUAGE_TOGGLE, quick).await {
            self.page.click(LANGUAGE_TOGGLE).await?;
            self.page.click(&language.option_selector()).await?;
        } else {
            let url = format!(
                "{}/{}{}",
                self.page.config().base_url.trim_end_matches('/'),
                language.code(),
                crate::config::LOGIN_PATH
            );
            log::debug!("no language selector rendered, loading {url}");
            self.page.goto(&url).await?;
        }

        self.page.wait_for_default_loading().await;
        self.page
            .wait_for_selector(
                USERNAME_INPUT,
                WaitState::Visible,
                Duration::from_millis(self.page.timeouts().navigation_ms),
            )
            .await?;
        Ok(self.document_language().await?.starts_with(language.code()))
    }

    async fn document_language(&self) -> Result<String, PageError> {
        let value = self
            .page
            .driver()
            .evaluate("document.documentElement.lang || ''")
            .await?;
        Ok(value.as_str().unwrap_or_default().to_ascii_lowercase())
    }

    /// Compare rendered form labels against the dictionary of the current
    /// language. Keys name the checked element.
    pub async fn verify_login_form_elements(&self) -> BTreeMap<&'static str, bool> {
        let labels = self.language.labels();
        let quick = Duration::from_millis(self.page.timeouts().quick_ms);
        let mut results = BTreeMap::new();

        for (key, selector) in [("username_input", USERNAME_INPUT), ("password_input", PASSWORD_INPUT)] {
            results.insert(key, self.page.is_element_visible(selector, quick).await);
        }

        for (key, selector, accepted) in [
            ("username_label", USERNAME_LABEL, labels.username),
            ("password_label", PASSWORD_LABEL, labels.password),
            ("login_button", LOGIN_BUTTON, labels.submit),
        ] {
            let rendered = self.page.get_element_text(selector, quick).await;
            let ok = rendered
                .as_deref()
                .is_some_and(|text| matches_any(text, accepted));
            if !ok {
                log::warn!(
                    "{key} rendered as {rendered:?}, expected one of {accepted:?} ({})",
                    self.language
                );
            }
            results.insert(key, ok);
        }

        results
    }

    /// Whether the login error matches the current language's wording.
    pub async fn verify_error_message(&self) -> bool {
        match self.get_error_message().await {
            Some(text) => matches_any(&text, self.language.labels().error),
            None => false,
        }
    }

    pub async fn is_logged_in(&self) -> bool {
        self.page
            .driver()
            .is_visible(&ElementRef::first(MAIN_NAVBAR))
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::page::test_support::erp_page;
    use crate::testing::{FakeDom, FakeElement, FakePage};

    fn login_form(fake: &FakePage) {
        fake.show(USERNAME_INPUT);
        fake.show(PASSWORD_INPUT);
        fake.show_text(LOGIN_BUTTON, "Log in");
    }

    #[tokio::test(start_paused = true)]
    async fn navigate_opens_login_url() {
        let reports = tempfile::tempdir().unwrap();
        let fake = FakePage::new();
        login_form(&fake);
        let page = erp_page(&fake, &reports);

        LoginPage::new(&page).navigate().await.unwrap();
        assert_eq!(
            fake.current_url().await.unwrap(),
            "https://dev.nawat.ma/web/login"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn valid_credentials_reach_navbar() {
        let reports = tempfile::tempdir().unwrap();
        let fake = FakePage::new();
        login_form(&fake);
        fake.on_click(ElementRef::first(LOGIN_BUTTON), |dom: &mut FakeDom| {
            dom.set(MAIN_NAVBAR, vec![FakeElement::text("Accès")]);
            dom.set(ACTION_MANAGER, vec![FakeElement::shown()]);
        });
        let page = erp_page(&fake, &reports);

        let login = LoginPage::new(&page);
        assert!(login.login("ecole.e2a", "1@ayouris2").await);
        assert!(login.is_logged_in().await);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_credentials_return_false_with_screenshot() {
        let reports = tempfile::tempdir().unwrap();
        let fake = FakePage::new();
        login_form(&fake);
        fake.on_click(ElementRef::first(LOGIN_BUTTON), |dom: &mut FakeDom| {
            dom.set(ERROR_MESSAGE, vec![FakeElement::text("Wrong login/password")]);
        });
        let page = erp_page(&fake, &reports);

        let login = LoginPage::new(&page);
        assert!(!login.login("wrong_user", "wrong_pass").await);
        assert_eq!(
            login.get_error_message().await.as_deref(),
            Some("Wrong login/password")
        );
        assert!(login.verify_error_message().await);
        assert_eq!(fake.screenshots().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_page_times_out_to_false() {
        let reports = tempfile::tempdir().unwrap();
        let fake = FakePage::new();
        login_form(&fake);
        let page = erp_page(&fake, &reports);

        assert!(!LoginPage::new(&page).login("admin", "123456").await);
        let shot = &fake.screenshots()[0];
        assert!(
            shot.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("login_failure_")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn switch_language_uses_selector_and_checks_document_lang() {
        let reports = tempfile::tempdir().unwrap();
        let fake = FakePage::new();
        login_form(&fake);
        fake.show(LANGUAGE_TOGGLE);
        fake.show(&Language::Fr.option_selector());
        fake.script("document.documentElement.lang", json!("en-US"));
        fake.on_click(ElementRef::first(Language::Fr.option_selector()), |dom: &mut FakeDom| {
            dom.script("document.documentElement.lang", json!("fr-FR"));
            dom.set(USERNAME_LABEL, vec![FakeElement::text("Courriel")]);
            dom.set(PASSWORD_LABEL, vec![FakeElement::text("Mot de passe")]);
            dom.set(LOGIN_BUTTON, vec![FakeElement::text("Se connecter")]);
        });
        let page = erp_page(&fake, &reports);

        let mut login = LoginPage::new(&page);
        assert!(login.switch_language(Language::Fr).await);
        assert_eq!(login.language(), Language::Fr);

        let results = login.verify_login_form_elements().await;
        assert_eq!(results.len(), 5);
        assert!(results.values().all(|ok| *ok), "{results:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn switch_language_falls_back_to_prefixed_url() {
        let reports = tempfile::tempdir().unwrap();
        let fake = FakePage::new();
        login_form(&fake);
        fake.script("document.documentElement.lang", json!("en-US"));
        let page = erp_page(&fake, &reports);

        let mut login = LoginPage::new(&page);
        assert!(!login.switch_language(Language::Ar).await);
        assert_eq!(login.language(), Language::En);
        assert_eq!(
            fake.current_url().await.unwrap(),
            "https://dev.nawat.ma/ar/web/login"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn mismatched_labels_are_reported() {
        let reports = tempfile::tempdir().unwrap();
        let fake = FakePage::new();
        login_form(&fake);
        fake.show_text(USERNAME_LABEL, "Email");
        fake.show_text(PASSWORD_LABEL, "Mot de passe");
        let page = erp_page(&fake, &reports);

        let results = LoginPage::new(&page).verify_login_form_elements().await;
        assert_eq!(results["username_label"], true);
        assert_eq!(results["password_label"], false);
        assert_eq!(results["login_button"], true);
    }

    #[test]
    fn language_codes_parse() {
        assert_eq!("FR".parse::<Language>().unwrap(), Language::Fr);
        assert!("de".parse::<Language>().is_err());
        assert_eq!(Language::Ar.to_string(), "ar");
    }
}
