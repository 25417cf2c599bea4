//! The session orchestrator.
//!
//! [`Samay`] is the queue-pair handle: submissions in, events out. The
//! spawned submission loop owns every piece of mutable state (sessions,
//! tabs, per-service queues), so state transitions are serialized without
//! locks beyond the per-session record mutex.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_channel::Receiver;
use async_channel::Sender;
use chrono::DateTime;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use samay_protocol::protocol::ErrorEvent;
use samay_protocol::protocol::Event;
use samay_protocol::protocol::EventMsg;
use samay_protocol::protocol::Op;
use samay_protocol::protocol::OrchestratorStatusEvent;
use samay_protocol::protocol::PongEvent;
use samay_protocol::protocol::ServicePhase;
use samay_protocol::protocol::SessionOptions;
use samay_protocol::protocol::SessionStartedEvent;
use samay_protocol::protocol::SessionStoppedEvent;
use samay_protocol::protocol::Submission;

use crate::browser::Browser;
use crate::config::Config;
use crate::error::Result;
use crate::error::SamayErr;
use crate::pipeline;
use crate::service_descriptor::ServiceRegistry;
use crate::services::AutomationSet;
use crate::session::Housekeeping;
use crate::session::SessionHandle;
use crate::tabs::TabManager;

/// The high-level interface to the automation system. It operates as a
/// queue pair: send [`Submission`]s, receive [`Event`]s.
pub struct Samay {
    next_id: AtomicU64,
    tx_sub: Sender<Submission>,
    rx_event: Receiver<Event>,
}

impl Samay {
    /// Spawn the orchestrator with built-in descriptors (plus config
    /// overrides) and the built-in service modules.
    pub fn spawn(config: Config, browser: Arc<dyn Browser>) -> Samay {
        let registry = ServiceRegistry::with_overrides(&config.service_overrides);
        let automations = AutomationSet::built_in();
        Self::spawn_with(config, browser, registry, automations)
    }

    /// Spawn with an explicit registry and module set (test harnesses
    /// pair synthetic descriptors with scripted pages this way).
    pub fn spawn_with(
        config: Config,
        browser: Arc<dyn Browser>,
        registry: ServiceRegistry,
        automations: AutomationSet,
    ) -> Samay {
        let (tx_sub, rx_sub) = async_channel::bounded(64);
        // Events are pushed synchronously under session locks, so this
        // side is unbounded.
        let (tx_event, rx_event) = async_channel::unbounded();
        tokio::spawn(submission_loop(
            config,
            browser,
            registry,
            automations,
            rx_sub,
            tx_event,
        ));
        Samay {
            next_id: AtomicU64::new(0),
            tx_sub,
            rx_event,
        }
    }

    /// Submit the `op` wrapped in a [`Submission`] with a unique id.
    pub async fn submit(&self, op: Op) -> Result<String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let sub = Submission { id: id.clone(), op };
        self.submit_with_id(sub).await?;
        Ok(id)
    }

    /// Use sparingly: prefer [`Samay::submit`] so ids stay unique.
    pub async fn submit_with_id(&self, sub: Submission) -> Result<()> {
        self.tx_sub
            .send(sub)
            .await
            .map_err(|_| SamayErr::InternalOrchestratorDied)?;
        Ok(())
    }

    pub async fn next_event(&self) -> Result<Event> {
        self.rx_event
            .recv()
            .await
            .map_err(|_| SamayErr::InternalOrchestratorDied)
    }
}

struct Orchestrator {
    config: Config,
    registry: ServiceRegistry,
    automations: AutomationSet,
    tabs: Arc<TabManager>,
    sessions: HashMap<String, Arc<SessionHandle>>,
    service_locks: HashMap<String, Arc<Semaphore>>,
    started_at: DateTime<Utc>,
    tx_event: Sender<Event>,
    tx_house: mpsc::UnboundedSender<Housekeeping>,
}

async fn submission_loop(
    config: Config,
    browser: Arc<dyn Browser>,
    registry: ServiceRegistry,
    automations: AutomationSet,
    rx_sub: Receiver<Submission>,
    tx_event: Sender<Event>,
) {
    let (tx_house, mut rx_house) = mpsc::unbounded_channel();
    let mut orchestrator = Orchestrator {
        config,
        registry,
        automations,
        tabs: Arc::new(TabManager::new(browser)),
        sessions: HashMap::new(),
        service_locks: HashMap::new(),
        started_at: Utc::now(),
        tx_event,
        tx_house,
    };

    loop {
        tokio::select! {
            sub = rx_sub.recv() => {
                let sub = match sub {
                    Ok(sub) => sub,
                    Err(_) => break,
                };
                debug!(id = %sub.id, "submission");
                if orchestrator.handle_submission(sub) {
                    break;
                }
            }
            Some(note) = rx_house.recv() => {
                orchestrator.handle_housekeeping(note);
            }
        }
    }
    debug!("orchestrator loop exited");
}

impl Orchestrator {
    fn emit(&self, sub_id: &str, msg: EventMsg) {
        let event = Event {
            id: sub_id.to_string(),
            msg,
        };
        if self.tx_event.try_send(event).is_err() {
            warn!("event queue closed; dropping orchestrator event");
        }
    }

    fn emit_error(&self, sub_id: &str, err: &SamayErr, session_id: Option<String>) {
        self.emit(
            sub_id,
            EventMsg::Error(ErrorEvent {
                kind: err.kind(),
                message: err.to_string(),
                session_id,
            }),
        );
    }

    /// Returns true when the loop should exit.
    fn handle_submission(&mut self, sub: Submission) -> bool {
        match sub.op {
            Op::StartSession {
                query,
                services,
                session_id,
                options,
            } => {
                self.handle_start(&sub.id, query, services, session_id, options);
                false
            }
            Op::StopSession { session_id } => {
                self.handle_stop(&sub.id, &session_id);
                false
            }
            Op::GetStatus { session_id } => {
                self.handle_status(&sub.id, session_id);
                false
            }
            Op::Ping => {
                self.emit(
                    &sub.id,
                    EventMsg::Pong(PongEvent {
                        alive: true,
                        since: self.started_at,
                    }),
                );
                false
            }
            Op::Shutdown => {
                info!("shutting down; abandoning live sessions");
                for handle in self.sessions.values() {
                    if !handle.is_finished() {
                        handle.cancel_all();
                    }
                }
                self.emit(&sub.id, EventMsg::ShutdownComplete);
                true
            }
        }
    }

    fn handle_start(
        &mut self,
        sub_id: &str,
        query: String,
        services: Vec<String>,
        session_id: Option<String>,
        options: SessionOptions,
    ) {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.sessions.contains_key(&session_id) {
            let err = SamayErr::DuplicateSession(session_id.clone());
            warn!(%session_id, "rejecting duplicate session");
            self.emit_error(sub_id, &err, Some(session_id));
            return;
        }

        // Duplicate service ids are silently coalesced; the set is
        // lexicographically ordered, which fixes the emission order of
        // the initial transitions.
        let requested: BTreeSet<String> = services.into_iter().collect();

        let handle = SessionHandle::new(
            session_id.clone(),
            sub_id.to_string(),
            query,
            options,
            requested.iter().cloned(),
            self.tx_event.clone(),
            self.tx_house.clone(),
        );
        self.sessions.insert(session_id.clone(), Arc::clone(&handle));
        info!(%session_id, services = requested.len(), "session started");

        self.emit(
            sub_id,
            EventMsg::SessionStarted(SessionStartedEvent {
                session_id,
                services: requested.iter().cloned().collect(),
            }),
        );

        for service_id in &requested {
            match self.registry.get(service_id) {
                Err(err) => {
                    // Fatal for this service only; the others proceed.
                    handle.fail(service_id, err.kind(), err.to_string());
                }
                Ok(descriptor) => {
                    let service_lock = Arc::clone(
                        self.service_locks
                            .entry(service_id.clone())
                            .or_insert_with(|| Arc::new(Semaphore::new(1))),
                    );
                    tokio::spawn(pipeline::run_service(
                        Arc::clone(&handle),
                        service_id.clone(),
                        descriptor.clone(),
                        self.automations.resolve(service_id),
                        Arc::clone(&self.tabs),
                        service_lock,
                        self.config.tab_ready_grace,
                    ));
                }
            }
        }

        // Zero requested services resolve immediately as complete.
        handle.finish_if_done();
    }

    fn handle_stop(&mut self, sub_id: &str, session_id: &str) {
        match self.sessions.get(session_id) {
            Some(handle) => {
                handle.cancel_all();
                self.emit(
                    sub_id,
                    EventMsg::SessionStopped(SessionStoppedEvent {
                        session_id: session_id.to_string(),
                    }),
                );
            }
            None => {
                let err = SamayErr::SessionNotFound(session_id.to_string());
                self.emit_error(sub_id, &err, Some(session_id.to_string()));
            }
        }
    }

    fn handle_status(&self, sub_id: &str, session_id: Option<String>) {
        match session_id {
            Some(session_id) => match self.sessions.get(&session_id) {
                Some(handle) => {
                    self.emit(sub_id, EventMsg::SessionStatus(handle.snapshot()));
                }
                None => {
                    let err = SamayErr::SessionNotFound(session_id.clone());
                    self.emit_error(sub_id, &err, Some(session_id));
                }
            },
            None => {
                let mut phase_counts: BTreeMap<ServicePhase, usize> = BTreeMap::new();
                let mut live_sessions = 0usize;
                for handle in self.sessions.values() {
                    if handle.is_finished() {
                        continue;
                    }
                    live_sessions += 1;
                    for state in handle.snapshot().services.values() {
                        *phase_counts.entry(state.phase).or_default() += 1;
                    }
                }
                self.emit(
                    sub_id,
                    EventMsg::OrchestratorStatus(OrchestratorStatusEvent {
                        alive: true,
                        since: self.started_at,
                        live_sessions,
                        phase_counts,
                    }),
                );
            }
        }
    }

    fn handle_housekeeping(&mut self, note: Housekeeping) {
        match note {
            Housekeeping::SessionFinished(session_id) => {
                // Keep the record queryable for a grace window, then GC.
                let tx_house = self.tx_house.clone();
                let grace = self.config.session_gc_grace;
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    let _ = tx_house.send(Housekeeping::GcSession(session_id));
                });
            }
            Housekeeping::GcSession(session_id) => {
                let finished = self
                    .sessions
                    .get(&session_id)
                    .map(|handle| handle.is_finished())
                    .unwrap_or(false);
                if finished {
                    debug!(%session_id, "garbage-collecting session");
                    self.sessions.remove(&session_id);
                }
            }
        }
    }
}
