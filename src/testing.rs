//! In-memory [`PageDriver`] used by the unit tests.
//!
//! The fake keeps a map of selector → matched elements. Elements can carry
//! scoped children (for card-level queries), and clicks or key presses can
//! trigger hooks that rewrite the DOM, which is how tests model navigation,
//! pagination and filter application.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::browser::{BrowserRuntimeError, ElementRef, PageDriver};

type Hook = Arc<dyn Fn(&mut FakeDom) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum FakeAction {
    Goto(String),
    Back,
    Click(ElementRef),
    Fill(ElementRef, String),
    Press(ElementRef, String),
    Screenshot(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FakeElement {
    pub text: Option<String>,
    pub visible: bool,
    pub enabled: bool,
    pub children: HashMap<String, Vec<FakeElement>>,
}

impl FakeElement {
    pub fn shown() -> Self {
        FakeElement {
            text: None,
            visible: true,
            enabled: true,
            children: HashMap::new(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        FakeElement {
            text: Some(text.into()),
            ..FakeElement::shown()
        }
    }

    pub fn hidden() -> Self {
        FakeElement {
            visible: false,
            ..FakeElement::shown()
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn child(mut self, selector: &str, element: FakeElement) -> Self {
        self.children
            .entry(selector.to_string())
            .or_default()
            .push(element);
        self
    }
}

/// Mutable DOM state, exposed to hooks.
#[derive(Default)]
pub struct FakeDom {
    pub url: String,
    history: Vec<String>,
    elements: HashMap<String, Vec<FakeElement>>,
    scripts: Vec<(String, JsonValue)>,
    click_hooks: HashMap<ElementRef, Vec<Hook>>,
    press_hooks: HashMap<String, Vec<Hook>>,
    failing_clicks: HashMap<ElementRef, usize>,
    actions: Vec<FakeAction>,
}

impl FakeDom {
    pub fn set(&mut self, selector: &str, elements: Vec<FakeElement>) {
        self.elements.insert(selector.to_string(), elements);
    }

    pub fn remove(&mut self, selector: &str) {
        self.elements.remove(selector);
    }

    pub fn script(&mut self, needle: &str, value: JsonValue) {
        self.scripts.retain(|(existing, _)| existing != needle);
        self.scripts.push((needle.to_string(), value));
    }

    fn lookup(&self, element: &ElementRef) -> Option<&FakeElement> {
        self.elements
            .get(&element.selector)
            .and_then(|matches| matches.get(element.index))
    }

    fn lookup_within(&self, scope: &ElementRef, selector: &str) -> Option<&Vec<FakeElement>> {
        self.lookup(scope)
            .and_then(|parent| parent.children.get(selector))
    }
}

/// Cloneable handle onto a shared [`FakeDom`].
#[derive(Clone, Default)]
pub struct FakePage {
    dom: Arc<Mutex<FakeDom>>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(url: &str) -> Self {
        let page = Self::new();
        page.dom.lock().unwrap().url = url.to_string();
        page
    }

    pub fn set(&self, selector: &str, elements: Vec<FakeElement>) -> &Self {
        self.dom.lock().unwrap().set(selector, elements);
        self
    }

    pub fn show(&self, selector: &str) -> &Self {
        self.set(selector, vec![FakeElement::shown()])
    }

    pub fn show_text(&self, selector: &str, text: &str) -> &Self {
        self.set(selector, vec![FakeElement::text(text)])
    }

    pub fn script(&self, needle: &str, value: JsonValue) -> &Self {
        self.dom.lock().unwrap().script(needle, value);
        self
    }

    /// Edit the DOM directly, with the same access hooks get.
    pub fn update<F: FnOnce(&mut FakeDom)>(&self, edit: F) -> &Self {
        edit(&mut self.dom.lock().unwrap());
        self
    }

    pub fn on_click<F>(&self, element: ElementRef, hook: F) -> &Self
    where
        F: Fn(&mut FakeDom) + Send + Sync + 'static,
    {
        self.dom
            .lock()
            .unwrap()
            .click_hooks
            .entry(element)
            .or_default()
            .push(Arc::new(hook));
        self
    }

    pub fn on_press<F>(&self, selector: &str, hook: F) -> &Self
    where
        F: Fn(&mut FakeDom) + Send + Sync + 'static,
    {
        self.dom
            .lock()
            .unwrap()
            .press_hooks
            .entry(selector.to_string())
            .or_default()
            .push(Arc::new(hook));
        self
    }

    /// Make the next `times` clicks on `element` fail.
    pub fn fail_clicks(&self, element: ElementRef, times: usize) -> &Self {
        self.dom
            .lock()
            .unwrap()
            .failing_clicks
            .insert(element, times);
        self
    }

    pub fn actions(&self) -> Vec<FakeAction> {
        self.dom.lock().unwrap().actions.clone()
    }

    pub fn clicks(&self) -> Vec<ElementRef> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                FakeAction::Click(element) => Some(element),
                _ => None,
            })
            .collect()
    }

    pub fn clicked(&self, selector: &str) -> usize {
        self.clicks()
            .iter()
            .filter(|element| element.selector == selector)
            .count()
    }

    pub fn screenshots(&self) -> Vec<PathBuf> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                FakeAction::Screenshot(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    fn record(&self, action: FakeAction) {
        self.dom.lock().unwrap().actions.push(action);
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str) -> Result<(), BrowserRuntimeError> {
        let mut dom = self.dom.lock().unwrap();
        let previous = std::mem::replace(&mut dom.url, url.to_string());
        dom.history.push(previous);
        dom.actions.push(FakeAction::Goto(url.to_string()));
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserRuntimeError> {
        Ok(self.dom.lock().unwrap().url.clone())
    }

    async fn go_back(&self) -> Result<(), BrowserRuntimeError> {
        let mut dom = self.dom.lock().unwrap();
        if let Some(previous) = dom.history.pop() {
            dom.url = previous;
        }
        dom.actions.push(FakeAction::Back);
        Ok(())
    }

    async fn count(&self, selector: &str) -> Result<usize, BrowserRuntimeError> {
        let dom = self.dom.lock().unwrap();
        Ok(dom.elements.get(selector).map_or(0, Vec::len))
    }

    async fn is_visible(&self, element: &ElementRef) -> Result<bool, BrowserRuntimeError> {
        let dom = self.dom.lock().unwrap();
        Ok(dom.lookup(element).is_some_and(|found| found.visible))
    }

    async fn is_enabled(&self, element: &ElementRef) -> Result<bool, BrowserRuntimeError> {
        let dom = self.dom.lock().unwrap();
        Ok(dom.lookup(element).is_some_and(|found| found.enabled))
    }

    async fn text(&self, element: &ElementRef) -> Result<Option<String>, BrowserRuntimeError> {
        let dom = self.dom.lock().unwrap();
        Ok(dom
            .lookup(element)
            .map(|found| found.text.clone().unwrap_or_default().trim().to_string()))
    }

    async fn click(&self, element: &ElementRef) -> Result<(), BrowserRuntimeError> {
        let hooks = {
            let mut dom = self.dom.lock().unwrap();
            if dom.lookup(element).is_none() {
                return Err(BrowserRuntimeError::NotFound(element.clone()));
            }
            if let Some(remaining) = dom.failing_clicks.get_mut(element) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(BrowserRuntimeError::Message(format!(
                        "element {element} is not clickable"
                    )));
                }
            }
            dom.actions.push(FakeAction::Click(element.clone()));
            dom.click_hooks.get(element).cloned().unwrap_or_default()
        };

        let mut dom = self.dom.lock().unwrap();
        for hook in hooks {
            hook(&mut dom);
        }
        Ok(())
    }

    async fn fill(&self, element: &ElementRef, value: &str) -> Result<(), BrowserRuntimeError> {
        let mut dom = self.dom.lock().unwrap();
        if dom.lookup(element).is_none() {
            return Err(BrowserRuntimeError::NotFound(element.clone()));
        }
        dom.actions
            .push(FakeAction::Fill(element.clone(), value.to_string()));
        Ok(())
    }

    async fn press(&self, element: &ElementRef, key: &str) -> Result<(), BrowserRuntimeError> {
        let hooks = {
            let mut dom = self.dom.lock().unwrap();
            if dom.lookup(element).is_none() {
                return Err(BrowserRuntimeError::NotFound(element.clone()));
            }
            dom.actions
                .push(FakeAction::Press(element.clone(), key.to_string()));
            dom.press_hooks
                .get(&element.selector)
                .cloned()
                .unwrap_or_default()
        };

        let mut dom = self.dom.lock().unwrap();
        for hook in hooks {
            hook(&mut dom);
        }
        Ok(())
    }

    async fn count_within(
        &self,
        scope: &ElementRef,
        selector: &str,
    ) -> Result<usize, BrowserRuntimeError> {
        let dom = self.dom.lock().unwrap();
        Ok(dom.lookup_within(scope, selector).map_or(0, Vec::len))
    }

    async fn text_within(
        &self,
        scope: &ElementRef,
        selector: &str,
    ) -> Result<Option<String>, BrowserRuntimeError> {
        let dom = self.dom.lock().unwrap();
        Ok(dom
            .lookup_within(scope, selector)
            .and_then(|matches| matches.first())
            .map(|found| found.text.clone().unwrap_or_default().trim().to_string()))
    }

    async fn visible_within(
        &self,
        scope: &ElementRef,
        selector: &str,
    ) -> Result<bool, BrowserRuntimeError> {
        let dom = self.dom.lock().unwrap();
        Ok(dom
            .lookup_within(scope, selector)
            .and_then(|matches| matches.first())
            .is_some_and(|found| found.visible))
    }

    async fn evaluate(&self, expression: &str) -> Result<JsonValue, BrowserRuntimeError> {
        let dom = self.dom.lock().unwrap();
        if let Some((_, value)) = dom
            .scripts
            .iter()
            .find(|(needle, _)| expression.contains(needle.as_str()))
        {
            return Ok(value.clone());
        }
        if expression.contains("document.readyState") {
            return Ok(JsonValue::String("complete".to_string()));
        }
        Ok(JsonValue::Null)
    }

    async fn screenshot(&self, path: &Path) -> Result<(), BrowserRuntimeError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| BrowserRuntimeError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, b"\x89PNG").map_err(|source| BrowserRuntimeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.record(FakeAction::Screenshot(path.to_path_buf()));
        Ok(())
    }
}
