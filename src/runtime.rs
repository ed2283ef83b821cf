//! Chromiumoxide-based browser runtime.
//!
//! Provides the [`BrowserRuntime`] and [`PageDriver`] implementations backed by
//! the `chromiumoxide` crate. Queries go through the bundled DOM helper script
//! so XPath and CSS selectors behave the same way; clicks, typing and key
//! presses use real CDP input events with the configured slow-motion delay
//! applied after each action.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::element::Element;
use chromiumoxide::page::{Page as ChromiumPage, ScreenshotParams};
use chromiumoxide::{
    browser::{Browser, BrowserConfig},
    handler::viewport::Viewport as ChromiumViewport,
};
use futures_util::StreamExt;
use serde_json::Value as JsonValue;
use tokio::{fs, sync::Mutex, task::JoinHandle, time::sleep};

use crate::browser::{BrowserRuntime, BrowserRuntimeError, ElementRef, LaunchPlan, PageDriver, is_xpath};
use crate::dom_scripts::{DomOp, DomReply, dom_query};

pub struct ChromiumoxideRuntime {
    state: Arc<Mutex<Option<RuntimeState>>>,
}

struct RuntimeState {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
    slow_mo: Duration,
}

impl ChromiumoxideRuntime {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(None)),
        }
    }

    async fn current(&self) -> Result<(Arc<Browser>, Duration), BrowserRuntimeError> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(BrowserRuntimeError::NotInitialized)?;
        Ok((state.browser.clone(), state.slow_mo))
    }
}

impl Default for ChromiumoxideRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserRuntime for ChromiumoxideRuntime {
    type Page = ChromiumoxidePage;

    async fn launch(&self, plan: &LaunchPlan) -> Result<(), BrowserRuntimeError> {
        if self.state.lock().await.is_some() {
            return Ok(());
        }

        let config = build_config(plan)?;

        fs::create_dir_all(&plan.downloads_dir)
            .await
            .map_err(|source| BrowserRuntimeError::Io {
                path: plan.downloads_dir.clone(),
                source,
            })?;

        log::info!(
            "launching chromium (headless: {}, slow_mo: {:?})",
            plan.headless,
            plan.slow_mo
        );
        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(map_chromiumoxide_error)?;
        let handler = spawn_handler(handler);

        let download_params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(plan.downloads_dir.to_string_lossy().into_owned())
            .build()
            .map_err(BrowserRuntimeError::Message)?;
        if let Err(err) = browser.execute(download_params).await {
            log::warn!("failed to set download directory: {err}");
        }

        let new_state = RuntimeState {
            browser: Arc::new(browser),
            handler,
            slow_mo: plan.slow_mo,
        };

        let old_state = {
            let mut guard = self.state.lock().await;
            guard.replace(new_state)
        };
        if let Some(state) = old_state {
            cleanup_state(state);
        }

        Ok(())
    }

    async fn new_page(&self, url: &str) -> Result<ChromiumoxidePage, BrowserRuntimeError> {
        let (browser, slow_mo) = self.current().await?;
        let page = browser
            .new_page(url)
            .await
            .map_err(map_chromiumoxide_error)?;
        Ok(ChromiumoxidePage { page, slow_mo })
    }

    async fn shutdown(&self) -> Result<(), BrowserRuntimeError> {
        let state = {
            let mut guard = self.state.lock().await;
            guard.take()
        };

        if let Some(state) = state {
            cleanup_state(state);
        }
        Ok(())
    }
}

/// A chromiumoxide page implementing [`PageDriver`].
#[derive(Debug, Clone)]
pub struct ChromiumoxidePage {
    page: ChromiumPage,
    slow_mo: Duration,
}

impl ChromiumoxidePage {
    pub fn inner(&self) -> &ChromiumPage {
        &self.page
    }

    async fn query(
        &self,
        op: DomOp,
        element: &ElementRef,
        scope: Option<&ElementRef>,
    ) -> Result<DomReply, BrowserRuntimeError> {
        let value = self.evaluate(&dom_query(op, element, scope)).await?;
        let reply: DomReply = serde_json::from_value(value).map_err(map_chromiumoxide_error)?;
        reply.into_result()
    }

    async fn resolve(&self, element: &ElementRef) -> Result<Element, BrowserRuntimeError> {
        let matches = if is_xpath(&element.selector) {
            self.page.find_xpaths(element.selector.as_str()).await
        } else {
            self.page.find_elements(element.selector.as_str()).await
        }
        .map_err(map_chromiumoxide_error)?;

        matches
            .into_iter()
            .nth(element.index)
            .ok_or_else(|| BrowserRuntimeError::NotFound(element.clone()))
    }

    async fn pause(&self) {
        if !self.slow_mo.is_zero() {
            sleep(self.slow_mo).await;
        }
    }
}

#[async_trait]
impl PageDriver for ChromiumoxidePage {
    async fn goto(&self, url: &str) -> Result<(), BrowserRuntimeError> {
        self.page.goto(url).await.map_err(map_chromiumoxide_error)?;
        self.pause().await;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserRuntimeError> {
        let url = self.page.url().await.map_err(map_chromiumoxide_error)?;
        Ok(url.unwrap_or_default())
    }

    async fn go_back(&self) -> Result<(), BrowserRuntimeError> {
        self.evaluate("window.history.back()").await?;
        self.pause().await;
        Ok(())
    }

    async fn count(&self, selector: &str) -> Result<usize, BrowserRuntimeError> {
        let reply = self
            .query(DomOp::Count, &ElementRef::first(selector), None)
            .await?;
        Ok(reply.value.as_u64().unwrap_or(0) as usize)
    }

    async fn is_visible(&self, element: &ElementRef) -> Result<bool, BrowserRuntimeError> {
        let reply = self.query(DomOp::Visible, element, None).await?;
        Ok(reply.value.as_bool().unwrap_or(false))
    }

    async fn is_enabled(&self, element: &ElementRef) -> Result<bool, BrowserRuntimeError> {
        let reply = self.query(DomOp::Enabled, element, None).await?;
        Ok(reply.value.as_bool().unwrap_or(false))
    }

    async fn text(&self, element: &ElementRef) -> Result<Option<String>, BrowserRuntimeError> {
        let reply = self.query(DomOp::Text, element, None).await?;
        Ok(reply.value.as_str().map(str::to_string))
    }

    async fn click(&self, element: &ElementRef) -> Result<(), BrowserRuntimeError> {
        let target = self.resolve(element).await?;
        if let Err(err) = target.click().await {
            // Elements without a clickable point (zero-size labels, overlays)
            // still accept a synthetic click.
            log::debug!("native click on {element} failed ({err}), dispatching DOM click");
            let reply = self.query(DomOp::Click, element, None).await?;
            if !reply.found {
                return Err(BrowserRuntimeError::NotFound(element.clone()));
            }
        }
        self.pause().await;
        Ok(())
    }

    async fn fill(&self, element: &ElementRef, value: &str) -> Result<(), BrowserRuntimeError> {
        let reply = self.query(DomOp::Clear, element, None).await?;
        if !reply.found {
            return Err(BrowserRuntimeError::NotFound(element.clone()));
        }
        if !value.is_empty() {
            let target = self.resolve(element).await?;
            target
                .type_str(value)
                .await
                .map_err(map_chromiumoxide_error)?;
        }
        self.pause().await;
        Ok(())
    }

    async fn press(&self, element: &ElementRef, key: &str) -> Result<(), BrowserRuntimeError> {
        let target = self.resolve(element).await?;
        target.focus().await.map_err(map_chromiumoxide_error)?;
        target
            .press_key(key)
            .await
            .map_err(map_chromiumoxide_error)?;
        self.pause().await;
        Ok(())
    }

    async fn count_within(
        &self,
        scope: &ElementRef,
        selector: &str,
    ) -> Result<usize, BrowserRuntimeError> {
        let reply = self
            .query(DomOp::Count, &ElementRef::first(selector), Some(scope))
            .await?;
        Ok(reply.value.as_u64().unwrap_or(0) as usize)
    }

    async fn text_within(
        &self,
        scope: &ElementRef,
        selector: &str,
    ) -> Result<Option<String>, BrowserRuntimeError> {
        let reply = self
            .query(DomOp::Text, &ElementRef::first(selector), Some(scope))
            .await?;
        Ok(reply.value.as_str().map(str::to_string))
    }

    async fn visible_within(
        &self,
        scope: &ElementRef,
        selector: &str,
    ) -> Result<bool, BrowserRuntimeError> {
        let reply = self
            .query(DomOp::Visible, &ElementRef::first(selector), Some(scope))
            .await?;
        Ok(reply.value.as_bool().unwrap_or(false))
    }

    async fn evaluate(&self, expression: &str) -> Result<JsonValue, BrowserRuntimeError> {
        let result = self
            .page
            .evaluate(expression)
            .await
            .map_err(map_chromiumoxide_error)?;
        Ok(result.value().cloned().unwrap_or(JsonValue::Null))
    }

    async fn screenshot(&self, path: &Path) -> Result<(), BrowserRuntimeError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| BrowserRuntimeError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        let bytes = self
            .page
            .screenshot(params)
            .await
            .map_err(map_chromiumoxide_error)?;
        fs::write(path, bytes)
            .await
            .map_err(|source| BrowserRuntimeError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

fn build_config(plan: &LaunchPlan) -> Result<BrowserConfig, BrowserRuntimeError> {
    let viewport = ChromiumViewport {
        width: plan.viewport.width,
        height: plan.viewport.height,
        device_scale_factor: None,
        emulating_mobile: false,
        is_landscape: plan.viewport.width >= plan.viewport.height,
        has_touch: false,
    };

    let mut builder = BrowserConfig::builder();

    if let Some(path) = &plan.chrome_executable {
        builder = builder.chrome_executable(path);
    }

    let builder = builder.viewport(viewport).args(plan.args.clone());

    let builder = if plan.headless {
        builder
    } else {
        builder.with_head()
    };

    let builder = match &plan.user_data_dir {
        Some(dir) => builder.user_data_dir(dir),
        None => builder,
    };

    builder.build().map_err(BrowserRuntimeError::Message)
}

fn map_chromiumoxide_error<E: std::fmt::Display>(err: E) -> BrowserRuntimeError {
    BrowserRuntimeError::Message(err.to_string())
}

fn spawn_handler(mut handler: chromiumoxide::handler::Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(result) = handler.next().await {
            if let Err(err) = result {
                log::debug!("chromiumoxide handler error: {err}");
            }
        }
    })
}

fn cleanup_state(state: RuntimeState) {
    state.handler.abort();
}

/// Directory used for a throwaway browser profile.
pub fn temp_profile_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{prefix}-{}", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_page_requires_launch() {
        let runtime = ChromiumoxideRuntime::new();
        let err = runtime
            .new_page("about:blank")
            .await
            .expect_err("should fail before launch");
        assert!(matches!(err, BrowserRuntimeError::NotInitialized));
    }

    #[tokio::test]
    async fn shutdown_without_launch_is_a_no_op() {
        let runtime = ChromiumoxideRuntime::new();
        runtime.shutdown().await.expect("shutdown");
    }

    #[test]
    fn temp_profile_dir_is_under_tmp() {
        let dir = temp_profile_dir("nawat-e2e-test");
        assert!(dir.starts_with(std::env::temp_dir()));
    }
}
