//! Page-context helper scripts.
//!
//! The JavaScript lives in `scripts/` so editors highlight it properly; it is
//! bundled as string slices at compile time. [`dom_query`] wraps the query
//! helper into a self-contained expression so no injection step is needed
//! before a page can be queried.

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::browser::{BrowserRuntimeError, ElementRef};

/// Function expression resolving XPath/CSS selectors (optionally inside a
/// scope element) and answering one query.
pub const DOM_QUERY_SCRIPT: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/scripts/dom_query.js"));

/// Expression clicking every fold toggle of the search panel; evaluates to the
/// number of toggles clicked.
pub const EXPAND_SEARCH_PANEL_SCRIPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/scripts/expand_search_panel.js"
));

/// Operations understood by [`DOM_QUERY_SCRIPT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomOp {
    Count,
    Visible,
    Enabled,
    Text,
    Clear,
    Click,
}

/// Reply envelope produced by [`DOM_QUERY_SCRIPT`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DomReply {
    pub ok: bool,
    #[serde(default)]
    pub found: bool,
    #[serde(default)]
    pub value: JsonValue,
    #[serde(default)]
    pub error: Option<String>,
}

impl DomReply {
    pub fn into_result(self) -> Result<Self, BrowserRuntimeError> {
        if self.ok {
            Ok(self)
        } else {
            Err(BrowserRuntimeError::Message(format!(
                "dom query failed: {}",
                self.error.unwrap_or_else(|| "unknown error".to_string())
            )))
        }
    }
}

/// Build an expression running `op` against `element`, optionally resolved
/// inside `scope`.
pub fn dom_query(op: DomOp, element: &ElementRef, scope: Option<&ElementRef>) -> String {
    let request = json!({
        "op": op,
        "selector": element.selector,
        "index": element.index,
        "scope": scope.map(|scope| json!({
            "selector": scope.selector,
            "index": scope.index,
        })),
    });
    format!("({})({})", DOM_QUERY_SCRIPT.trim(), request)
}
