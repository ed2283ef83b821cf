//! Strongly-typed configuration for the end-to-end suite.
//!
//! Values come from three layers, applied in order: the JSON configuration
//! file (or a hardcoded default mapping when the file is missing), `NAWAT_*`
//! environment variables (with optional `.env` support), and CI detection,
//! which forces headless mode and switches to the longer timeout profile.

use std::env;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};

use dotenvy::dotenv;
use serde::de::{Deserializer, Error as DeError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Application instance targeted when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "https://dev.nawat.ma";
pub const DEFAULT_USERNAME: &str = "admin";
pub const DEFAULT_PASSWORD: &str = "123456";
pub const DEFAULT_SLOW_MO_MS: u64 = 50;

/// Location of the configuration file relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "data/config.json";
/// Location of the test user fixtures relative to the working directory.
pub const DEFAULT_USERS_PATH: &str = "data/users.json";
/// Root of every diagnostic artifact written by the suite.
pub const DEFAULT_REPORTS_DIR: &str = "reports";

/// Path appended to the base URL to reach the login form.
pub const LOGIN_PATH: &str = "/web/login";

/// Environment variables whose presence marks a CI / Jenkins run.
pub const CI_MARKERS: &[&str] = &[
    "JENKINS_URL",
    "CI",
    "BUILD_NUMBER",
    "BUILD_ID",
    "JOB_NAME",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
];

/// Extra Chromium flags used when running inside CI containers.
pub const CI_BROWSER_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
];

/// Timeout profile, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Budget for ordinary selector waits.
    pub default_ms: u64,
    /// Budget for the navbar to show up after submitting credentials.
    pub login_ms: u64,
    /// Budget for page transitions and menu navigation.
    pub navigation_ms: u64,
    /// Budget for the Odoo loading indicator to disappear.
    pub loading_ms: u64,
    /// Short probes (optional controls, facet chips).
    pub quick_ms: u64,
    /// Polling budget for an exported file to land on disk.
    pub download_ms: u64,
}

impl Timeouts {
    pub fn local() -> Self {
        Self {
            default_ms: 5_000,
            login_ms: 15_000,
            navigation_ms: 10_000,
            loading_ms: 20_000,
            quick_ms: 1_500,
            download_ms: 10_000,
        }
    }

    pub fn ci() -> Self {
        Self {
            default_ms: 10_000,
            login_ms: 30_000,
            navigation_ms: 20_000,
            loading_ms: 30_000,
            quick_ms: 3_000,
            download_ms: 30_000,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts::local()
    }
}

/// Browser viewport dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport {
            width: 1920,
            height: 1080,
        }
    }
}

/// Shape of `data/config.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct ConfigFile {
    base_url: String,
    username: String,
    password: String,
    #[serde(deserialize_with = "lenient_bool")]
    headless: bool,
    slow_mo: u64,
}

impl Default for ConfigFile {
    fn default() -> Self {
        ConfigFile {
            base_url: DEFAULT_BASE_URL.to_string(),
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            headless: false,
            slow_mo: DEFAULT_SLOW_MO_MS,
        }
    }
}

/// Accept `true`/`false` as JSON booleans or as strings.
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::Bool(value) => Ok(value),
        JsonValue::String(value) => parse_bool("headless", &value).map_err(DeError::custom),
        JsonValue::Null => Ok(false),
        other => Err(DeError::custom(format!(
            "invalid headless value {other}; expected a boolean"
        ))),
    }
}

/// Configuration values for one suite session.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub headless: bool,
    pub slow_mo_ms: u64,
    pub reports_dir: PathBuf,
    pub downloads_dir: Option<PathBuf>,
    pub chrome_executable: Option<PathBuf>,
    pub viewport: Viewport,
    pub ci: bool,
    pub timeouts: Timeouts,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        SuiteConfig::from_file_values(ConfigFile::default())
    }
}

impl SuiteConfig {
    fn from_file_values(file: ConfigFile) -> Self {
        SuiteConfig {
            base_url: file.base_url,
            username: file.username,
            password: file.password,
            headless: file.headless,
            slow_mo_ms: file.slow_mo,
            reports_dir: PathBuf::from(DEFAULT_REPORTS_DIR),
            downloads_dir: None,
            chrome_executable: None,
            viewport: Viewport::default(),
            ci: false,
            timeouts: Timeouts::local(),
        }
    }

    /// Load the JSON configuration file. A missing file yields the default
    /// mapping; any other read or parse failure is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                log::warn!(
                    "configuration file {} not found, using defaults",
                    path.display()
                );
                return Ok(SuiteConfig::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let file: ConfigFile =
            serde_json::from_str(&raw).map_err(|source| ConfigError::InvalidFile {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(SuiteConfig::from_file_values(file))
    }

    /// Construct the session configuration: `.env`, the configuration file
    /// (`NAWAT_CONFIG` or `data/config.json`), `NAWAT_*` overrides, then CI
    /// detection.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv();
        let path = env_var("NAWAT_CONFIG").unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        SuiteConfig::from_env_at(path)
    }

    /// Like [`SuiteConfig::from_env`] with an explicit configuration file.
    pub fn from_env_at(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let _ = dotenv();
        let mut config = SuiteConfig::load(path)?;
        config.apply_env()?;
        config.apply_ci(detect_ci().is_some());
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_var("NAWAT_BASE_URL") {
            self.base_url = value;
        }

        if let Some(value) = env_var("NAWAT_USERNAME") {
            self.username = value;
        }

        if let Some(value) = env_var("NAWAT_PASSWORD") {
            self.password = value;
        }

        if let Some(value) = env_var("NAWAT_HEADLESS") {
            self.headless = parse_bool("NAWAT_HEADLESS", &value)?;
        }

        if let Some(value) = env_var("NAWAT_SLOW_MO") {
            self.slow_mo_ms = parse_u64("NAWAT_SLOW_MO", &value)?;
        }

        if let Some(value) = env_var("NAWAT_REPORTS_DIR") {
            self.reports_dir = PathBuf::from(value);
        }

        if let Some(value) = env_var("NAWAT_DOWNLOADS_DIR") {
            self.downloads_dir = Some(PathBuf::from(value));
        }

        if let Some(value) = env_var("NAWAT_CHROME_BIN") {
            self.chrome_executable = Some(PathBuf::from(value));
        }

        Ok(())
    }

    /// Switch to the CI profile: headless browser, no slow motion, longer
    /// timeouts.
    pub fn apply_ci(&mut self, ci: bool) {
        self.ci = ci;
        if ci {
            self.headless = true;
            self.slow_mo_ms = 0;
            self.timeouts = Timeouts::ci();
        }
    }

    pub fn login_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), LOGIN_PATH)
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.reports_dir.join("screenshots")
    }

    /// Directory the browser saves exports into: the explicit override, the
    /// platform download directory, or `~/Downloads`.
    pub fn resolved_downloads_dir(&self) -> PathBuf {
        if let Some(dir) = &self.downloads_dir {
            return dir.clone();
        }
        dirs::download_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
            .unwrap_or_else(|| PathBuf::from("Downloads"))
    }

    /// Chromium arguments implied by the environment.
    pub fn browser_args(&self) -> Vec<String> {
        let mut args = vec![format!(
            "--window-size={},{}",
            self.viewport.width, self.viewport.height
        )];
        if self.ci {
            args.extend(CI_BROWSER_ARGS.iter().map(|arg| arg.to_string()));
        }
        args
    }

    /// Create a new configuration with explicit field overrides applied.
    pub fn with_overrides(&self, overrides: SuiteConfigOverrides) -> SuiteConfig {
        let mut next = self.clone();

        if let Some(value) = overrides.base_url {
            next.base_url = value;
        }
        if let Some(value) = overrides.username {
            next.username = value;
        }
        if let Some(value) = overrides.password {
            next.password = value;
        }
        if let Some(value) = overrides.headless {
            next.headless = value;
        }
        if let Some(value) = overrides.slow_mo_ms {
            next.slow_mo_ms = value;
        }
        if let Some(value) = overrides.reports_dir {
            next.reports_dir = value;
        }
        if let Some(value) = overrides.downloads_dir {
            next.downloads_dir = value;
        }
        if let Some(value) = overrides.chrome_executable {
            next.chrome_executable = value;
        }
        if let Some(value) = overrides.timeouts {
            next.timeouts = value;
        }

        next
    }
}

impl fmt::Debug for SuiteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuiteConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("headless", &self.headless)
            .field("slow_mo_ms", &self.slow_mo_ms)
            .field("reports_dir", &self.reports_dir)
            .field("downloads_dir", &self.downloads_dir)
            .field("chrome_executable", &self.chrome_executable)
            .field("viewport", &self.viewport)
            .field("ci", &self.ci)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

/// Field-level overrides for [`SuiteConfig::with_overrides`].
#[derive(Debug, Default, Clone)]
pub struct SuiteConfigOverrides {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub headless: Option<bool>,
    pub slow_mo_ms: Option<u64>,
    pub reports_dir: Option<PathBuf>,
    pub downloads_dir: Option<Option<PathBuf>>,
    pub chrome_executable: Option<Option<PathBuf>>,
    pub timeouts: Option<Timeouts>,
}

impl SuiteConfigOverrides {
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = Some(headless);
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Return the name of the first CI marker variable that is set, if any.
pub fn detect_ci() -> Option<&'static str> {
    CI_MARKERS.iter().copied().find(|key| match env_var(key) {
        Some(value) => !matches!(value.to_ascii_lowercase().as_str(), "false" | "0"),
        None => false,
    })
}

/// One credential pair from the users fixture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub description: String,
}

impl TestUser {
    fn new(username: &str, password: &str, description: &str) -> Self {
        TestUser {
            username: username.to_string(),
            password: password.to_string(),
            description: description.to_string(),
        }
    }
}

/// Shape of `data/users.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserData {
    #[serde(default)]
    pub valid_users: Vec<TestUser>,
    #[serde(default)]
    pub invalid_users: Vec<TestUser>,
}

impl Default for UserData {
    fn default() -> Self {
        UserData {
            valid_users: vec![TestUser::new(
                "ecole.e2a",
                "1@ayouris2",
                "Valid school admin credentials",
            )],
            invalid_users: vec![
                TestUser::new(
                    "wrong_user",
                    "wrong_pass",
                    "Completely invalid credentials",
                ),
                TestUser::new(
                    "ecole.e2a",
                    "wrong_pass",
                    "Valid username, invalid password",
                ),
                TestUser::new(
                    "wrong_user",
                    "1@ayouris2",
                    "Invalid username, valid password",
                ),
            ],
        }
    }
}

impl UserData {
    /// Load the users fixture, falling back to the built-in set when the file
    /// cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let parsed = fs::read_to_string(path)
            .map_err(|err| err.to_string())
            .and_then(|raw| serde_json::from_str::<UserData>(&raw).map_err(|err| err.to_string()));
        match parsed {
            Ok(users) => users,
            Err(err) => {
                log::warn!(
                    "error loading test users from {}: {err}; using built-in users",
                    path.display()
                );
                UserData::default()
            }
        }
    }

    /// Load from `NAWAT_USERS` or `data/users.json`.
    pub fn from_env() -> Self {
        let path = env_var("NAWAT_USERS").unwrap_or_else(|| DEFAULT_USERS_PATH.to_string());
        UserData::load(path)
    }
}

/// Errors that can arise while constructing a [`SuiteConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration file {path}: {source}")]
    InvalidFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid boolean '{value}' for {field}")]
    InvalidBool { field: &'static str, value: String },
    #[error("invalid number '{value}' for {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

fn env_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|source| ConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Debug)]
    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(vars: &[(&str, Option<&str>)]) -> Self {
            let saved = vars
                .iter()
                .map(|(key, value)| {
                    let original = env::var(key).ok();
                    match value {
                        Some(v) => unsafe {
                            env::set_var(key, v);
                        },
                        None => unsafe {
                            env::remove_var(key);
                        },
                    };
                    ((*key).to_string(), original)
                })
                .collect();
            EnvGuard { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => unsafe {
                        env::set_var(&key, v);
                    },
                    None => unsafe {
                        env::remove_var(&key);
                    },
                }
            }
        }
    }

    fn cleared_ci() -> Vec<(&'static str, Option<&'static str>)> {
        CI_MARKERS.iter().map(|key| (*key, None)).collect()
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).expect("create file");
        file.write_all(body.as_bytes()).expect("write file");
        path
    }

    #[test]
    fn missing_file_falls_back_to_default_mapping() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SuiteConfig::load(dir.path().join("absent.json")).expect("load");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.username, "admin");
        assert_eq!(config.password, "123456");
        assert!(!config.headless);
        assert_eq!(config.slow_mo_ms, 50);
        assert_eq!(config.timeouts, Timeouts::local());
    }

    #[test]
    fn headless_accepts_strings_and_booleans() {
        let dir = tempfile::tempdir().expect("tempdir");
        let as_string = write_file(
            &dir,
            "string.json",
            r#"{"base_url":"https://erp.test","headless":"true","slow_mo":0}"#,
        );
        let config = SuiteConfig::load(&as_string).expect("load");
        assert!(config.headless);
        assert_eq!(config.base_url, "https://erp.test");
        assert_eq!(config.slow_mo_ms, 0);

        let as_bool = write_file(&dir, "bool.json", r#"{"headless":false}"#);
        assert!(!SuiteConfig::load(&as_bool).expect("load").headless);

        let invalid = write_file(&dir, "bad.json", r#"{"headless":"maybe"}"#);
        let err = SuiteConfig::load(&invalid).expect_err("should reject");
        assert!(matches!(err, ConfigError::InvalidFile { .. }));
    }

    #[test]
    fn example_credentials_file_parses() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(
            &dir,
            "config.json",
            r#"{"username":"ecole.e2a","password":"1@ayouris2","headless":true}"#,
        );
        let config = SuiteConfig::load(&path).expect("load");
        assert_eq!(config.username, "ecole.e2a");
        assert_eq!(config.password, "1@ayouris2");
        assert!(config.headless);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeouts.login_ms, 15_000);
    }

    #[test]
    #[serial_test::serial]
    fn from_env_applies_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(&dir, "config.json", r#"{"username":"file-user"}"#);
        let path_str = path.to_string_lossy().into_owned();

        let mut vars = cleared_ci();
        vars.extend([
            ("NAWAT_CONFIG", Some(path_str.as_str())),
            ("NAWAT_BASE_URL", Some("https://staging.nawat.ma")),
            ("NAWAT_PASSWORD", Some("secret")),
            ("NAWAT_HEADLESS", Some("yes")),
            ("NAWAT_SLOW_MO", Some("120")),
            ("NAWAT_DOWNLOADS_DIR", Some("/tmp/exports")),
            ("NAWAT_USERNAME", None),
        ]);
        let _guard = EnvGuard::new(&vars);

        let config = SuiteConfig::from_env().expect("config from env");
        assert_eq!(config.username, "file-user");
        assert_eq!(config.base_url, "https://staging.nawat.ma");
        assert_eq!(config.password, "secret");
        assert!(config.headless);
        assert_eq!(config.slow_mo_ms, 120);
        assert!(!config.ci);
        assert_eq!(config.resolved_downloads_dir(), PathBuf::from("/tmp/exports"));
        assert_eq!(config.login_url(), "https://staging.nawat.ma/web/login");
    }

    #[test]
    #[serial_test::serial]
    fn invalid_env_number_is_reported() {
        let mut vars = cleared_ci();
        vars.extend([("NAWAT_CONFIG", Some("/nonexistent/config.json")), ("NAWAT_SLOW_MO", Some("fast"))]);
        let _guard = EnvGuard::new(&vars);

        let err = SuiteConfig::from_env().expect_err("should fail");
        assert!(err.to_string().contains("NAWAT_SLOW_MO"));
    }

    #[test]
    #[serial_test::serial]
    fn jenkins_marker_switches_to_ci_profile() {
        let mut vars = cleared_ci();
        vars.extend([
            ("NAWAT_CONFIG", Some("/nonexistent/config.json")),
            ("NAWAT_HEADLESS", Some("false")),
            ("JENKINS_URL", Some("https://jenkins.internal")),
        ]);
        let _guard = EnvGuard::new(&vars);

        assert_eq!(detect_ci(), Some("JENKINS_URL"));
        let config = SuiteConfig::from_env().expect("config");
        assert!(config.ci);
        assert!(config.headless);
        assert_eq!(config.timeouts, Timeouts::ci());
        assert!(config.browser_args().contains(&"--no-sandbox".to_string()));
    }

    #[test]
    #[serial_test::serial]
    fn ci_false_is_not_a_ci_run() {
        let mut vars = cleared_ci();
        vars.push(("CI", Some("false")));
        let _guard = EnvGuard::new(&vars);
        assert_eq!(detect_ci(), None);
    }

    #[test]
    fn overrides_replace_selected_fields() {
        let base = SuiteConfig::default();
        let overrides = SuiteConfigOverrides::default()
            .headless(true)
            .credentials("ecole.e2a", "1@ayouris2");
        let overrides = SuiteConfigOverrides {
            downloads_dir: Some(Some(PathBuf::from("/data/dl"))),
            ..overrides
        };

        let updated = base.with_overrides(overrides);
        assert!(updated.headless);
        assert_eq!(updated.username, "ecole.e2a");
        assert_eq!(updated.downloads_dir, Some(PathBuf::from("/data/dl")));
        assert_eq!(updated.base_url, base.base_url);
    }

    #[test]
    fn debug_output_redacts_password() {
        let config = SuiteConfig::default();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("123456"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn users_fixture_falls_back_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let users = UserData::load(dir.path().join("users.json"));
        assert_eq!(users.valid_users.len(), 1);
        assert_eq!(users.invalid_users.len(), 3);
        assert_eq!(users.valid_users[0].username, "ecole.e2a");

        let path = write_file(
            &dir,
            "custom.json",
            r#"{"valid_users":[{"username":"a","password":"b","description":"c"}],"invalid_users":[]}"#,
        );
        let users = UserData::load(&path);
        assert_eq!(users.valid_users[0].username, "a");
        assert!(users.invalid_users.is_empty());
    }
}
