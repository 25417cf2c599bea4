// Not every test binary uses every helper.
#![allow(dead_code)]

//! Shared harness for the orchestrator integration tests: synthetic
//! descriptors paired with scripted sim pages, plus event-stream
//! collection helpers.

use std::sync::Arc;
use std::time::Duration;

use samay_core::Samay;
use samay_core::browser::Browser;
use samay_core::browser::InputKind;
use samay_core::config::Config;
use samay_core::config::ConfigOverrides;
use samay_core::protocol::Event;
use samay_core::protocol::EventMsg;
use samay_core::protocol::Op;
use samay_core::protocol::ServicePhase;
use samay_core::protocol::ServiceProgressEvent;
use samay_core::protocol::ServiceResponseEvent;
use samay_core::protocol::SessionCompleteEvent;
use samay_core::protocol::SessionOptions;
use samay_core::protocol::SessionSnapshot;
use samay_core::service_descriptor::CompletionHeuristic;
use samay_core::service_descriptor::SelectorSet;
use samay_core::service_descriptor::ServiceDescriptor;
use samay_core::service_descriptor::ServiceRegistry;
use samay_core::services::AutomationSet;
use samay_core::sim::PageScript;
use samay_core::sim::SimBrowser;
use tempfile::TempDir;

pub struct Harness {
    pub samay: Samay,
    pub browser: Arc<SimBrowser>,
    _home: TempDir,
}

/// Descriptor for a synthetic service living at `https://<id>.example/`.
pub fn sim_descriptor(
    id: &str,
    timeout_ms: u64,
    heuristic: CompletionHeuristic,
) -> ServiceDescriptor {
    ServiceDescriptor {
        id: id.to_string(),
        display_name: id.to_uppercase(),
        origin_pattern: format!("https://{id}.example/*"),
        launch_url: format!("https://{id}.example/"),
        selectors: SelectorSet {
            input: vec!["#prompt".into()],
            send_button: vec!["#send".into()],
            response_container: vec!["#reply".into()],
            loading_indicator: vec!["#spinner".into()],
            citations: vec!["#sources".into()],
        },
        typing_chars_per_second: 1_000,
        injection_settle_ms: 10,
        per_service_timeout_ms: timeout_ms,
        completion_heuristic: heuristic,
    }
}

/// Page script matching [`sim_descriptor`]'s selectors.
pub fn sim_page(id: &str) -> PageScript {
    PageScript::new(format!("https://{id}.example"))
        .with_input("#prompt", InputKind::Value)
        .with_send("#send")
        .with_reply("#reply")
}

pub fn spawn_harness(descriptors: Vec<ServiceDescriptor>, scripts: Vec<PageScript>) -> Harness {
    let home = TempDir::new().expect("tempdir");
    let config = Config::load_with_overrides(ConfigOverrides {
        samay_home: Some(home.path().to_path_buf()),
        tab_ready_grace: Some(Duration::from_millis(200)),
        session_gc_grace: Some(Duration::from_secs(10)),
        ..Default::default()
    })
    .expect("config");

    let browser = SimBrowser::new();
    for script in scripts {
        browser.register(script);
    }
    let ids: Vec<String> = descriptors.iter().map(|d| d.id.clone()).collect();
    let registry = ServiceRegistry::from_descriptors(descriptors);
    let automations = AutomationSet::generic_for(ids);
    let samay = Samay::spawn_with(
        config,
        Arc::clone(&browser) as Arc<dyn Browser>,
        registry,
        automations,
    );
    Harness {
        samay,
        browser,
        _home: home,
    }
}

pub async fn start_session(
    samay: &Samay,
    query: &str,
    services: &[&str],
    session_id: Option<&str>,
) -> String {
    samay
        .submit(Op::StartSession {
            query: query.to_string(),
            services: services.iter().map(|s| s.to_string()).collect(),
            session_id: session_id.map(|s| s.to_string()),
            options: SessionOptions::default(),
        })
        .await
        .expect("submit start")
}

/// Everything a session emitted, collected until its terminal event.
pub struct SessionEvents {
    pub events: Vec<Event>,
    pub complete: SessionCompleteEvent,
}

impl SessionEvents {
    pub fn progress(&self) -> Vec<&ServiceProgressEvent> {
        self.events
            .iter()
            .filter_map(|event| match &event.msg {
                EventMsg::ServiceProgress(progress) => Some(progress),
                _ => None,
            })
            .collect()
    }

    pub fn phases_for(&self, service_id: &str) -> Vec<(ServicePhase, ServicePhase)> {
        self.progress()
            .into_iter()
            .filter(|p| p.service_id == service_id)
            .map(|p| (p.from_phase, p.to_phase))
            .collect()
    }

    pub fn responses(&self) -> Vec<&ServiceResponseEvent> {
        self.events
            .iter()
            .filter_map(|event| match &event.msg {
                EventMsg::ServiceResponse(response) => Some(response),
                _ => None,
            })
            .collect()
    }

    /// Property check: every recorded transition is a legal DAG edge.
    pub fn assert_transitions_legal(&self) {
        for progress in self.progress() {
            assert!(
                progress.from_phase.can_transition_to(progress.to_phase),
                "illegal transition {} -> {} for {}",
                progress.from_phase,
                progress.to_phase,
                progress.service_id
            );
        }
    }
}

/// Read events for the submission `sub_id` until its `SessionComplete`.
/// Events for other submissions are collected too (callers inspecting
/// interleavings want them), but only `sub_id`'s terminal event stops
/// the loop.
pub async fn collect_session(samay: &Samay, sub_id: &str) -> SessionEvents {
    let mut events = Vec::new();
    loop {
        let event = samay.next_event().await.expect("event stream");
        let done = event.id == sub_id
            && matches!(event.msg, EventMsg::SessionComplete(_));
        events.push(event);
        if done {
            break;
        }
    }
    let complete = events
        .iter()
        .rev()
        .find_map(|event| match &event.msg {
            EventMsg::SessionComplete(complete) if event.id == sub_id => Some(complete.clone()),
            _ => None,
        })
        .expect("terminal event");
    SessionEvents { events, complete }
}

/// Issue `get-automation-status` and wait for the snapshot reply.
pub async fn fetch_snapshot(samay: &Samay, session_id: &str) -> (SessionSnapshot, Vec<Event>) {
    let sub_id = samay
        .submit(Op::GetStatus {
            session_id: Some(session_id.to_string()),
        })
        .await
        .expect("submit status");
    let mut buffered = Vec::new();
    loop {
        let event = samay.next_event().await.expect("event stream");
        if event.id == sub_id {
            match event.msg {
                EventMsg::SessionStatus(snapshot) => return (snapshot, buffered),
                other => panic!("unexpected status reply: {other:?}"),
            }
        }
        buffered.push(event);
    }
}
