// Poisoned mutex should fail the program
#![allow(clippy::unwrap_used)]

//! Scripted in-process implementation of [`Browser`]/[`Tab`].
//!
//! Real service pages are non-deterministic; the test suites and the cli
//! demo drive the orchestrator against these instead. A [`PageScript`]
//! declares the page's input/send elements and a timed reply playback
//! (chunks, spinner lifecycle, sentinel attribute, citations), all on the
//! tokio clock so paused-time tests are exact.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::Instant;
use wildmatch::WildMatch;

use crate::browser::Browser;
use crate::browser::BrowserError;
use crate::browser::InputKind;
use crate::browser::MutationEvent;
use crate::browser::NodeView;
use crate::browser::Tab;
use crate::browser::TabId;

#[derive(Debug, Clone)]
pub struct InputSpec {
    pub selector: String,
    pub kind: InputKind,
}

#[derive(Debug, Clone)]
pub struct SendSpec {
    pub selector: String,
    pub clears_input: bool,
    pub disables_while_replying: bool,
    pub starts_disabled: bool,
}

#[derive(Debug, Clone)]
pub struct SpinnerSpec {
    pub selector: String,
    pub visible_for: Duration,
}

#[derive(Debug, Clone)]
pub struct CitationSpec {
    pub selector: String,
    pub at: Duration,
    pub links: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SentinelSpec {
    pub attr: String,
    pub streaming_value: String,
    pub done_value: String,
    pub done_at: Duration,
}

/// Timed reply playback, offsets relative to the send click.
#[derive(Debug, Clone)]
pub struct ReplySpec {
    pub container: String,
    pub chunks: Vec<(Duration, String)>,
    pub spinner: Option<SpinnerSpec>,
    pub citations: Option<CitationSpec>,
    pub sentinel: Option<SentinelSpec>,
    pub reenable_send_at: Option<Duration>,
}

/// Everything a simulated page does. Built fluently:
///
/// `PageScript::new("https://svc-a.example")
///     .with_input("#prompt", InputKind::Value)
///     .with_send("#send")
///     .with_reply("#reply")
///     .reply_chunk(Duration::from_millis(800), "world A")`
#[derive(Debug, Clone)]
pub struct PageScript {
    pub url_prefix: String,
    pub load_delay: Duration,
    pub inputs: Vec<InputSpec>,
    /// Inputs that only attach after a delay (client-rendered composers).
    pub late_inputs: Vec<(InputSpec, Duration)>,
    pub send: Option<SendSpec>,
    pub reply: Option<ReplySpec>,
    pub preexisting_reply: Option<String>,
    pub enter_submits: bool,
}

impl PageScript {
    pub fn new(url_prefix: impl Into<String>) -> Self {
        Self {
            url_prefix: url_prefix.into(),
            load_delay: Duration::ZERO,
            inputs: Vec::new(),
            late_inputs: Vec::new(),
            send: None,
            reply: None,
            preexisting_reply: None,
            enter_submits: false,
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn with_input(mut self, selector: impl Into<String>, kind: InputKind) -> Self {
        self.inputs.push(InputSpec {
            selector: selector.into(),
            kind,
        });
        self
    }

    /// The input only attaches `delay` after the tab opens.
    pub fn with_late_input(
        mut self,
        selector: impl Into<String>,
        kind: InputKind,
        delay: Duration,
    ) -> Self {
        self.late_inputs.push((
            InputSpec {
                selector: selector.into(),
                kind,
            },
            delay,
        ));
        self
    }

    pub fn with_send(mut self, selector: impl Into<String>) -> Self {
        self.send = Some(SendSpec {
            selector: selector.into(),
            clears_input: true,
            disables_while_replying: true,
            starts_disabled: false,
        });
        self
    }

    pub fn send_starts_disabled(mut self) -> Self {
        if let Some(send) = &mut self.send {
            send.starts_disabled = true;
        }
        self
    }

    pub fn send_keeps_input(mut self) -> Self {
        if let Some(send) = &mut self.send {
            send.clears_input = false;
        }
        self
    }

    /// The send control swallows the click with no observable reaction.
    pub fn send_never_reacts(mut self) -> Self {
        if let Some(send) = &mut self.send {
            send.clears_input = false;
            send.disables_while_replying = false;
        }
        self
    }

    pub fn with_reply(mut self, container: impl Into<String>) -> Self {
        self.reply = Some(ReplySpec {
            container: container.into(),
            chunks: Vec::new(),
            spinner: None,
            citations: None,
            sentinel: None,
            reenable_send_at: None,
        });
        self
    }

    /// Append `text` to the reply element `offset` after the send click.
    pub fn reply_chunk(mut self, offset: Duration, text: impl Into<String>) -> Self {
        if let Some(reply) = &mut self.reply {
            reply.chunks.push((offset, text.into()));
        }
        self
    }

    pub fn with_spinner(mut self, selector: impl Into<String>, visible_for: Duration) -> Self {
        if let Some(reply) = &mut self.reply {
            reply.spinner = Some(SpinnerSpec {
                selector: selector.into(),
                visible_for,
            });
        }
        self
    }

    pub fn with_citations(
        mut self,
        selector: impl Into<String>,
        at: Duration,
        links: Vec<String>,
    ) -> Self {
        if let Some(reply) = &mut self.reply {
            reply.citations = Some(CitationSpec {
                selector: selector.into(),
                at,
                links,
            });
        }
        self
    }

    pub fn with_sentinel(
        mut self,
        attr: impl Into<String>,
        streaming_value: impl Into<String>,
        done_value: impl Into<String>,
        done_at: Duration,
    ) -> Self {
        if let Some(reply) = &mut self.reply {
            reply.sentinel = Some(SentinelSpec {
                attr: attr.into(),
                streaming_value: streaming_value.into(),
                done_value: done_value.into(),
                done_at,
            });
        }
        self
    }

    pub fn reenable_send_at(mut self, at: Duration) -> Self {
        if let Some(reply) = &mut self.reply {
            reply.reenable_send_at = Some(at);
        }
        self
    }

    pub fn with_preexisting_reply(mut self, text: impl Into<String>) -> Self {
        self.preexisting_reply = Some(text.into());
        self
    }

    pub fn enter_submits(mut self) -> Self {
        self.enter_submits = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
struct SimElement {
    text: String,
    attrs: HashMap<String, String>,
    links: Vec<String>,
    disabled: bool,
    appeared_at: Option<Instant>,
    input_kind: Option<InputKind>,
    input_events: u64,
}

impl SimElement {
    fn view(&self) -> NodeView {
        NodeView {
            text: self.text.clone(),
            links: self.links.clone(),
            attrs: self.attrs.clone(),
            disabled: self.disabled,
            appeared_at: self.appeared_at,
        }
    }
}

#[derive(Default)]
struct Dom {
    elements: HashMap<String, SimElement>,
    /// Response-container matches, document order.
    replies: Vec<SimElement>,
}

pub struct SimTab {
    weak_self: std::sync::Weak<SimTab>,
    id: TabId,
    url: Mutex<String>,
    alive: AtomicBool,
    ready_at: Instant,
    script: PageScript,
    dom: Mutex<Dom>,
    mutations: broadcast::Sender<MutationEvent>,
}

enum PlaybackAction {
    Chunk(String),
    SpinnerGone(String),
    Citations(CitationSpec),
    SentinelDone,
    ReenableSend,
}

impl SimTab {
    fn new(id: TabId, url: String, script: PageScript) -> Arc<Self> {
        let (mutations, _) = broadcast::channel(256);
        let now = Instant::now();
        let mut dom = Dom::default();
        for input in &script.inputs {
            dom.elements.insert(
                input.selector.clone(),
                SimElement {
                    input_kind: Some(input.kind),
                    appeared_at: Some(now),
                    ..Default::default()
                },
            );
        }
        if let Some(send) = &script.send {
            dom.elements.insert(
                send.selector.clone(),
                SimElement {
                    disabled: send.starts_disabled,
                    appeared_at: Some(now),
                    ..Default::default()
                },
            );
        }
        if let Some(text) = &script.preexisting_reply {
            dom.replies.push(SimElement {
                text: text.clone(),
                appeared_at: Some(now),
                ..Default::default()
            });
        }
        let tab = Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            id,
            url: Mutex::new(url),
            alive: AtomicBool::new(true),
            ready_at: now + script.load_delay,
            script,
            dom: Mutex::new(dom),
            mutations,
        });
        for (input, delay) in tab.script.late_inputs.clone() {
            let tab = Arc::clone(&tab);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if !tab.is_alive() {
                    return;
                }
                tab.dom.lock().unwrap().elements.insert(
                    input.selector.clone(),
                    SimElement {
                        input_kind: Some(input.kind),
                        appeared_at: Some(Instant::now()),
                        ..Default::default()
                    },
                );
                tab.emit(&input.selector);
            });
        }
        tab
    }

    /// Close the tab out from under the orchestrator.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// How many `input` events the element has received.
    pub fn input_event_count(&self, selector: &str) -> u64 {
        self.dom
            .lock()
            .unwrap()
            .elements
            .get(selector)
            .map(|e| e.input_events)
            .unwrap_or(0)
    }

    pub fn url_snapshot(&self) -> String {
        self.url.lock().unwrap().clone()
    }

    fn emit(&self, selector: &str) {
        let _ = self.mutations.send(MutationEvent {
            selector: selector.to_string(),
            at: Instant::now(),
        });
    }

    fn trigger_send(&self) {
        {
            let mut dom = self.dom.lock().unwrap();
            // Enter-submitted pages (no visible button) clear the draft
            // the same way a clicked send does.
            let clears_input = self
                .script
                .send
                .as_ref()
                .map(|s| s.clears_input)
                .unwrap_or(true);
            if clears_input {
                for input in &self.script.inputs {
                    if let Some(el) = dom.elements.get_mut(&input.selector) {
                        el.text.clear();
                    }
                }
                for (input, _) in &self.script.late_inputs {
                    if let Some(el) = dom.elements.get_mut(&input.selector) {
                        el.text.clear();
                    }
                }
            }
            if let Some(send) = &self.script.send
                && send.disables_while_replying
                && let Some(el) = dom.elements.get_mut(&send.selector)
            {
                el.disabled = true;
            }
        }
        if let Some(tab) = self.weak_self.upgrade() {
            tokio::spawn(async move { tab.playback().await });
        }
    }

    async fn playback(self: Arc<Self>) {
        let Some(reply) = self.script.reply.clone() else {
            return;
        };
        let t0 = Instant::now();

        if let Some(spinner) = &reply.spinner {
            self.dom.lock().unwrap().elements.insert(
                spinner.selector.clone(),
                SimElement {
                    appeared_at: Some(t0),
                    ..Default::default()
                },
            );
            self.emit(&spinner.selector);
        }

        let mut schedule: Vec<(Duration, PlaybackAction)> = Vec::new();
        for (offset, text) in &reply.chunks {
            schedule.push((*offset, PlaybackAction::Chunk(text.clone())));
        }
        if let Some(spinner) = &reply.spinner {
            schedule.push((
                spinner.visible_for,
                PlaybackAction::SpinnerGone(spinner.selector.clone()),
            ));
        }
        if let Some(citations) = &reply.citations {
            schedule.push((citations.at, PlaybackAction::Citations(citations.clone())));
        }
        if let Some(sentinel) = &reply.sentinel {
            schedule.push((sentinel.done_at, PlaybackAction::SentinelDone));
        }
        if let Some(at) = reply.reenable_send_at {
            schedule.push((at, PlaybackAction::ReenableSend));
        }
        schedule.sort_by_key(|(offset, _)| *offset);

        let mut started = false;
        for (offset, action) in schedule {
            tokio::time::sleep_until(t0 + offset).await;
            if !self.is_alive() {
                return;
            }
            match action {
                PlaybackAction::Chunk(text) => {
                    {
                        let mut dom = self.dom.lock().unwrap();
                        if !started {
                            let mut attrs = HashMap::new();
                            if let Some(sentinel) = &reply.sentinel {
                                attrs.insert(
                                    sentinel.attr.clone(),
                                    sentinel.streaming_value.clone(),
                                );
                            }
                            dom.replies.push(SimElement {
                                text,
                                attrs,
                                appeared_at: Some(Instant::now()),
                                ..Default::default()
                            });
                            started = true;
                        } else if let Some(last) = dom.replies.last_mut() {
                            last.text.push_str(&text);
                        }
                    }
                    self.emit(&reply.container);
                }
                PlaybackAction::SpinnerGone(selector) => {
                    self.dom.lock().unwrap().elements.remove(&selector);
                    self.emit(&selector);
                }
                PlaybackAction::Citations(citations) => {
                    self.dom.lock().unwrap().elements.insert(
                        citations.selector.clone(),
                        SimElement {
                            text: "Sources".to_string(),
                            links: citations.links.clone(),
                            appeared_at: Some(Instant::now()),
                            ..Default::default()
                        },
                    );
                    // The citations node is a child of the container, so
                    // the container mutates too.
                    self.emit(&citations.selector);
                    self.emit(&reply.container);
                }
                PlaybackAction::SentinelDone => {
                    if let Some(sentinel) = &reply.sentinel {
                        let mut dom = self.dom.lock().unwrap();
                        if let Some(last) = dom.replies.last_mut() {
                            last.attrs
                                .insert(sentinel.attr.clone(), sentinel.done_value.clone());
                        }
                        drop(dom);
                        self.emit(&reply.container);
                    }
                }
                PlaybackAction::ReenableSend => {
                    if let Some(send) = &self.script.send {
                        let mut dom = self.dom.lock().unwrap();
                        if let Some(el) = dom.elements.get_mut(&send.selector) {
                            el.disabled = false;
                        }
                        drop(dom);
                        self.emit(&send.selector);
                    }
                }
            }
        }
    }

    fn is_reply_container(&self, selector: &str) -> bool {
        self.script
            .reply
            .as_ref()
            .map(|r| r.container == selector)
            .unwrap_or(false)
    }
}

#[async_trait]
impl Tab for SimTab {
    fn id(&self) -> TabId {
        self.id
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn current_url(&self) -> String {
        self.url_snapshot()
    }

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        if !self.is_alive() {
            return Err(BrowserError::TabGone);
        }
        *self.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn wait_ready(&self) {
        tokio::time::sleep_until(self.ready_at).await;
    }

    async fn query(&self, selector: &str) -> Option<NodeView> {
        let dom = self.dom.lock().unwrap();
        if self.is_reply_container(selector) {
            return dom.replies.first().map(SimElement::view);
        }
        dom.elements.get(selector).map(SimElement::view)
    }

    async fn query_all(&self, selector: &str) -> Vec<NodeView> {
        let dom = self.dom.lock().unwrap();
        if self.is_reply_container(selector) {
            return dom.replies.iter().map(SimElement::view).collect();
        }
        dom.elements
            .get(selector)
            .map(|e| vec![e.view()])
            .unwrap_or_default()
    }

    async fn input_kind(&self, selector: &str) -> Option<InputKind> {
        self.dom
            .lock()
            .unwrap()
            .elements
            .get(selector)
            .and_then(|e| e.input_kind)
    }

    async fn focus(&self, selector: &str) -> bool {
        self.dom.lock().unwrap().elements.contains_key(selector)
    }

    async fn set_value(&self, selector: &str, text: &str) -> bool {
        let mut dom = self.dom.lock().unwrap();
        match dom.elements.get_mut(selector) {
            // Contenteditable regions have no value property.
            Some(el) if el.input_kind == Some(InputKind::Value) => {
                el.text = text.to_string();
                true
            }
            _ => false,
        }
    }

    async fn set_text_content(&self, selector: &str, text: &str) -> bool {
        let mut dom = self.dom.lock().unwrap();
        match dom.elements.get_mut(selector) {
            Some(el) if el.input_kind == Some(InputKind::ContentEditable) => {
                el.text = text.to_string();
                true
            }
            _ => false,
        }
    }

    async fn dispatch_input(&self, selector: &str) -> bool {
        let mut dom = self.dom.lock().unwrap();
        match dom.elements.get_mut(selector) {
            Some(el) => {
                el.input_events += 1;
                true
            }
            None => false,
        }
    }

    async fn input_text(&self, selector: &str) -> Option<String> {
        self.dom
            .lock()
            .unwrap()
            .elements
            .get(selector)
            .map(|e| e.text.clone())
    }

    async fn click(&self, selector: &str) -> bool {
        if !self.is_alive() {
            return false;
        }
        let is_send = self
            .script
            .send
            .as_ref()
            .map(|s| s.selector == selector)
            .unwrap_or(false);
        let (exists, disabled) = {
            let dom = self.dom.lock().unwrap();
            match dom.elements.get(selector) {
                Some(el) => (true, el.disabled),
                None => (false, false),
            }
        };
        if !exists {
            return false;
        }
        // A click on a disabled control lands but does nothing.
        if is_send && !disabled {
            self.trigger_send();
        }
        true
    }

    async fn press_enter(&self, selector: &str) -> bool {
        let exists = self
            .dom
            .lock()
            .unwrap()
            .elements
            .contains_key(selector);
        if !exists {
            return false;
        }
        if self.script.enter_submits {
            self.trigger_send();
        }
        true
    }

    fn observe(&self, _selector: &str) -> broadcast::Receiver<MutationEvent> {
        self.mutations.subscribe()
    }
}

/// Scripted [`Browser`]: hands out [`SimTab`]s whose behavior comes from
/// the registered [`PageScript`] matching the opened URL.
pub struct SimBrowser {
    scripts: Mutex<Vec<PageScript>>,
    tabs: Mutex<Vec<Arc<SimTab>>>,
    refuse_new_tabs: AtomicBool,
    next_tab_id: AtomicU64,
    opened: AtomicU64,
}

impl SimBrowser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(Vec::new()),
            tabs: Mutex::new(Vec::new()),
            refuse_new_tabs: AtomicBool::new(false),
            next_tab_id: AtomicU64::new(1),
            opened: AtomicU64::new(0),
        })
    }

    pub fn register(&self, script: PageScript) {
        self.scripts.lock().unwrap().push(script);
    }

    /// Simulate a popup blocker: every subsequent open fails.
    pub fn set_refuse_new_tabs(&self, refuse: bool) {
        self.refuse_new_tabs.store(refuse, Ordering::SeqCst);
    }

    /// How many tabs have been opened so far.
    pub fn open_count(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn tabs(&self) -> Vec<Arc<SimTab>> {
        self.tabs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Browser for SimBrowser {
    async fn open_tab(&self, url: &str) -> Result<Arc<dyn Tab>, BrowserError> {
        if self.refuse_new_tabs.load(Ordering::SeqCst) {
            return Err(BrowserError::PopupBlocked);
        }
        let script = {
            let scripts = self.scripts.lock().unwrap();
            scripts
                .iter()
                .find(|s| url.starts_with(&s.url_prefix))
                .cloned()
                .unwrap_or_else(|| PageScript::new(url.to_string()))
        };
        let id = TabId(self.next_tab_id.fetch_add(1, Ordering::SeqCst));
        let tab = SimTab::new(id, url.to_string(), script);
        self.tabs.lock().unwrap().push(Arc::clone(&tab));
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(tab)
    }

    async fn find_tab(&self, origin_pattern: &str) -> Option<Arc<dyn Tab>> {
        let matcher = WildMatch::new(origin_pattern);
        let tabs = self.tabs.lock().unwrap();
        tabs.iter()
            .rev()
            .find(|t| t.is_alive() && matcher.matches(&t.url_snapshot()))
            .map(|t| Arc::clone(t) as Arc<dyn Tab>)
    }
}
