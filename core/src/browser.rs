//! Seam to the browser hosting the target service tabs.
//!
//! The orchestrator and the per-service modules only ever talk to
//! [`Browser`] and [`Tab`]; production wires these to a real browser
//! backend, tests and the cli demo use the scripted [`crate::sim`]
//! implementation. Within one tab all operations are sequential; across
//! tabs they run concurrently.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;

#[derive(Error, Debug)]
pub enum BrowserError {
    /// The browser refused to open a new tab.
    #[error("the browser refused to open a new tab")]
    PopupBlocked,

    #[error("the tab was closed")]
    TabGone,

    #[error("navigation failed: {0}")]
    Navigation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabId(pub u64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab#{}", self.0)
    }
}

/// How a page's query input accepts text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// `<input>`/`<textarea>`: has a `value` property.
    Value,
    /// A `contenteditable` region: text content only, no value setter.
    ContentEditable,
}

/// Read-only view of one DOM element.
#[derive(Debug, Clone, Default)]
pub struct NodeView {
    pub text: String,
    /// Hrefs of anchor children, in document order.
    pub links: Vec<String>,
    pub attrs: HashMap<String, String>,
    pub disabled: bool,
    /// When the element was attached, if the backend can tell. `None`
    /// means unknown and is treated as current.
    pub appeared_at: Option<Instant>,
}

/// One batch of DOM mutations under an observed selector.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    pub selector: String,
    pub at: Instant,
}

#[async_trait]
pub trait Tab: Send + Sync {
    fn id(&self) -> TabId;

    fn is_alive(&self) -> bool;

    async fn current_url(&self) -> String;

    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    /// Resolves once the document reaches the `complete` ready-state.
    /// Callers bound this with a grace period.
    async fn wait_ready(&self);

    /// First element matching `selector`.
    async fn query(&self, selector: &str) -> Option<NodeView>;

    /// All elements matching `selector`, in document order.
    async fn query_all(&self, selector: &str) -> Vec<NodeView>;

    /// `Some` iff `selector` resolves to a text-input element.
    async fn input_kind(&self, selector: &str) -> Option<InputKind>;

    async fn focus(&self, selector: &str) -> bool;

    /// Set the `value` property. Fails on contenteditable regions, which
    /// have no such property.
    async fn set_value(&self, selector: &str, text: &str) -> bool;

    /// Set the text content of a contenteditable region.
    async fn set_text_content(&self, selector: &str, text: &str) -> bool;

    /// Dispatch an `input` event on the element.
    async fn dispatch_input(&self, selector: &str) -> bool;

    /// Current text of the input element (value or text content).
    async fn input_text(&self, selector: &str) -> Option<String>;

    /// Native click. `false` when the element does not exist.
    async fn click(&self, selector: &str) -> bool;

    /// Dispatch an Enter keypress on the element.
    async fn press_enter(&self, selector: &str) -> bool;

    /// Subscribe to DOM mutations. Events for other selectors may be
    /// delivered on the same channel; filter on [`MutationEvent::selector`].
    fn observe(&self, selector: &str) -> broadcast::Receiver<MutationEvent>;
}

#[async_trait]
pub trait Browser: Send + Sync {
    async fn open_tab(&self, url: &str) -> Result<Arc<dyn Tab>, BrowserError>;

    /// A live tab whose current URL matches the wildcard `origin_pattern`.
    async fn find_tab(&self, origin_pattern: &str) -> Option<Arc<dyn Tab>>;
}
