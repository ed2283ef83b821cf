//! Browser capability primitives.
//!
//! This module turns the suite configuration into a launch plan and defines
//! the two seams every workflow is written against: [`BrowserRuntime`], which
//! launches a browser and opens pages, and [`PageDriver`], the selector-level
//! capability set (navigate, click, fill, query, evaluate, screenshot) that
//! page objects consume.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::config::{SuiteConfig, Viewport};

/// Normalised launch parameters derived from a [`SuiteConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
    pub headless: bool,
    pub slow_mo: Duration,
    pub args: Vec<String>,
    pub viewport: Viewport,
    pub chrome_executable: Option<PathBuf>,
    pub downloads_dir: PathBuf,
    pub user_data_dir: Option<PathBuf>,
}

impl LaunchPlan {
    pub fn from_config(config: &SuiteConfig) -> Self {
        LaunchPlan {
            headless: config.headless,
            slow_mo: Duration::from_millis(config.slow_mo_ms),
            args: config.browser_args(),
            viewport: config.viewport,
            chrome_executable: config.chrome_executable.clone(),
            downloads_dir: config.resolved_downloads_dir(),
            user_data_dir: None,
        }
    }

    pub fn with_user_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_data_dir = Some(dir.into());
        self
    }
}

/// The n-th (zero-based) match of a selector.
///
/// Selectors starting with `/` or `(` are XPath expressions, anything else is
/// CSS. The reference is re-resolved against the live DOM on every use.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef {
    pub selector: String,
    pub index: usize,
}

impl ElementRef {
    pub fn first(selector: impl Into<String>) -> Self {
        Self::nth(selector, 0)
    }

    pub fn nth(selector: impl Into<String>, index: usize) -> Self {
        ElementRef {
            selector: selector.into(),
            index,
        }
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.selector, self.index)
    }
}

/// Whether a selector is an XPath expression.
pub fn is_xpath(selector: &str) -> bool {
    let trimmed = selector.trim_start();
    trimmed.starts_with('/') || trimmed.starts_with('(')
}

/// Selector-level page capability consumed by every page object.
///
/// Implementations perform a single attempt per call; waiting and retrying
/// live in [`crate::page::ErpPage`].
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), BrowserRuntimeError>;

    async fn current_url(&self) -> Result<String, BrowserRuntimeError>;

    async fn go_back(&self) -> Result<(), BrowserRuntimeError>;

    /// Number of elements currently matching `selector`.
    async fn count(&self, selector: &str) -> Result<usize, BrowserRuntimeError>;

    /// `false` when the element does not exist.
    async fn is_visible(&self, element: &ElementRef) -> Result<bool, BrowserRuntimeError>;

    /// `false` when the element does not exist or carries `disabled`.
    async fn is_enabled(&self, element: &ElementRef) -> Result<bool, BrowserRuntimeError>;

    /// Trimmed text content, `None` when the element does not exist.
    async fn text(&self, element: &ElementRef) -> Result<Option<String>, BrowserRuntimeError>;

    async fn click(&self, element: &ElementRef) -> Result<(), BrowserRuntimeError>;

    /// Replace the value of an input.
    async fn fill(&self, element: &ElementRef, value: &str) -> Result<(), BrowserRuntimeError>;

    async fn press(&self, element: &ElementRef, key: &str) -> Result<(), BrowserRuntimeError>;

    /// Number of `selector` matches inside `scope`.
    async fn count_within(
        &self,
        scope: &ElementRef,
        selector: &str,
    ) -> Result<usize, BrowserRuntimeError>;

    /// Text of the first `selector` match inside `scope`.
    async fn text_within(
        &self,
        scope: &ElementRef,
        selector: &str,
    ) -> Result<Option<String>, BrowserRuntimeError>;

    /// Visibility of the first `selector` match inside `scope`.
    async fn visible_within(
        &self,
        scope: &ElementRef,
        selector: &str,
    ) -> Result<bool, BrowserRuntimeError>;

    /// Evaluate a JavaScript expression and return its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<JsonValue, BrowserRuntimeError>;

    /// Capture a PNG of the full page at `path`, creating parent directories.
    async fn screenshot(&self, path: &Path) -> Result<(), BrowserRuntimeError>;
}

/// Launches a browser and opens pages.
#[async_trait]
pub trait BrowserRuntime: Send + Sync {
    type Page: PageDriver;

    async fn launch(&self, plan: &LaunchPlan) -> Result<(), BrowserRuntimeError>;

    async fn new_page(&self, url: &str) -> Result<Self::Page, BrowserRuntimeError>;

    async fn shutdown(&self) -> Result<(), BrowserRuntimeError> {
        Err(BrowserRuntimeError::Unsupported(
            "runtime shutdown not implemented".to_string(),
        ))
    }
}

#[derive(Debug, Error)]
pub enum BrowserRuntimeError {
    #[error("browser runtime error: {0}")]
    Message(String),
    #[error("browser runtime not initialized")]
    NotInitialized,
    #[error("no element matches {0}")]
    NotFound(ElementRef),
    #[error("browser runtime feature unsupported: {0}")]
    Unsupported(String),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_follows_configuration() {
        let mut config = SuiteConfig::default();
        config.headless = true;
        config.slow_mo_ms = 75;
        config.downloads_dir = Some(PathBuf::from("/tmp/exports"));
        config.chrome_executable = Some(PathBuf::from("/usr/bin/chromium"));

        let plan = LaunchPlan::from_config(&config);
        assert!(plan.headless);
        assert_eq!(plan.slow_mo, Duration::from_millis(75));
        assert_eq!(plan.downloads_dir, PathBuf::from("/tmp/exports"));
        assert_eq!(
            plan.chrome_executable.as_deref(),
            Some(Path::new("/usr/bin/chromium"))
        );
        assert_eq!(plan.viewport, Viewport::default());
        assert!(plan.args.contains(&"--window-size=1920,1080".to_string()));
        assert!(!plan.args.contains(&"--no-sandbox".to_string()));
    }

    #[test]
    fn ci_plan_adds_container_flags() {
        let mut config = SuiteConfig::default();
        config.apply_ci(true);
        let plan = LaunchPlan::from_config(&config);
        assert!(plan.headless);
        assert_eq!(plan.slow_mo, Duration::ZERO);
        for flag in ["--no-sandbox", "--disable-dev-shm-usage", "--disable-gpu"] {
            assert!(plan.args.contains(&flag.to_string()), "missing {flag}");
        }
    }

    #[test]
    fn selector_kind_detection() {
        assert!(is_xpath("//div[@class='x']"));
        assert!(is_xpath("(//a[@href='#'])[2]"));
        assert!(!is_xpath("button.o_pager_next"));
        assert!(!is_xpath("input[name='login']"));
    }

    #[test]
    fn element_ref_display_names_index() {
        let element = ElementRef::nth("button.o_pager_next", 2);
        assert_eq!(element.to_string(), "button.o_pager_next[2]");
        assert_eq!(ElementRef::first("a").index, 0);
    }
}
