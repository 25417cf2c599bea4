// Poisoned mutex should fail the program
#![allow(clippy::unwrap_used)]

//! Per-session state: one record per user query, guarded by a single
//! lock. Phase transitions are validated against the DAG and their
//! events are pushed onto the (unbounded) event queue while the lock is
//! held, so the event stream order always equals the transition order
//! and nothing is emitted after the terminal event.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use samay_protocol::protocol::ErrorKind;
use samay_protocol::protocol::Event;
use samay_protocol::protocol::EventMsg;
use samay_protocol::protocol::ExtractedReply;
use samay_protocol::protocol::OverallStatus;
use samay_protocol::protocol::ServiceError;
use samay_protocol::protocol::ServicePhase;
use samay_protocol::protocol::ServiceProgressEvent;
use samay_protocol::protocol::ServiceResponseEvent;
use samay_protocol::protocol::ServiceStateSnapshot;
use samay_protocol::protocol::SessionCompleteEvent;
use samay_protocol::protocol::SessionOptions;
use samay_protocol::protocol::SessionSnapshot;

use crate::browser::TabId;

/// Orchestrator-internal notifications that must round-trip through the
/// submission loop (which owns the sessions map).
#[derive(Debug)]
pub(crate) enum Housekeeping {
    /// A session reached its terminal event; schedule garbage collection.
    SessionFinished(String),
    /// The grace window elapsed; drop the session record.
    GcSession(String),
}

#[derive(Debug)]
pub(crate) struct ServiceStateRecord {
    pub phase: ServicePhase,
    pub attempts: u32,
    pub tab_id: Option<TabId>,
    pub last_phase_change_at: DateTime<Utc>,
    pub error: Option<ServiceError>,
}

#[derive(Debug)]
pub(crate) struct SessionRecord {
    pub session_id: String,
    pub query: String,
    pub options: SessionOptions,
    pub started_at: DateTime<Utc>,
    pub services: BTreeMap<String, ServiceStateRecord>,
    pub aggregate: BTreeMap<String, ExtractedReply>,
    pub explicitly_cancelled: bool,
    /// The terminal `SessionComplete` has been emitted; every later
    /// mutation or emission attempt is refused.
    pub finished: bool,
}

pub(crate) struct SessionHandle {
    /// Submission id the session's events are correlated with.
    sub_id: String,
    record: Mutex<SessionRecord>,
    cancel: CancellationToken,
    tx_event: async_channel::Sender<Event>,
    tx_house: mpsc::UnboundedSender<Housekeeping>,
}

impl SessionHandle {
    pub fn new(
        session_id: String,
        sub_id: String,
        query: String,
        options: SessionOptions,
        services: impl IntoIterator<Item = String>,
        tx_event: async_channel::Sender<Event>,
        tx_house: mpsc::UnboundedSender<Housekeeping>,
    ) -> Arc<Self> {
        let now = Utc::now();
        let services = services
            .into_iter()
            .map(|id| {
                (
                    id,
                    ServiceStateRecord {
                        phase: ServicePhase::Pending,
                        attempts: 0,
                        tab_id: None,
                        last_phase_change_at: now,
                        error: None,
                    },
                )
            })
            .collect();
        Arc::new(Self {
            sub_id,
            record: Mutex::new(SessionRecord {
                session_id,
                query,
                options,
                started_at: now,
                services,
                aggregate: BTreeMap::new(),
                explicitly_cancelled: false,
                finished: false,
            }),
            cancel: CancellationToken::new(),
            tx_event,
            tx_house,
        })
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn query(&self) -> String {
        self.record.lock().unwrap().query.clone()
    }

    pub fn session_id(&self) -> String {
        self.record.lock().unwrap().session_id.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.record.lock().unwrap().finished
    }

    /// Emission is a non-blocking push onto the unbounded event queue so
    /// it can happen under the record lock.
    fn send(&self, msg: EventMsg) {
        let event = Event {
            id: self.sub_id.clone(),
            msg,
        };
        if self.tx_event.try_send(event).is_err() {
            warn!("event queue closed; dropping session event");
        }
    }

    /// Advance one service along the DAG, emitting the progress event.
    /// Returns false (and does nothing) when the session is finished,
    /// the service is unknown, or the edge is illegal.
    pub fn transition(&self, service_id: &str, to: ServicePhase) -> bool {
        let mut record = self.record.lock().unwrap();
        if record.finished {
            return false;
        }
        let advanced = self.advance_locked(&mut record, service_id, to, None);
        if advanced && to.is_terminal() {
            self.maybe_finish(&mut record);
        }
        advanced
    }

    /// Terminal failure with an error attached.
    pub fn fail(&self, service_id: &str, kind: ErrorKind, message: impl Into<String>) {
        self.terminal_with_error(service_id, ServicePhase::Failed, kind, message.into());
    }

    /// Deadline expiry in the named stage.
    pub fn timeout(&self, service_id: &str, during: &str) {
        self.terminal_with_error(
            service_id,
            ServicePhase::Timeout,
            ErrorKind::ExtractionTimeout,
            format!("deadline exceeded during {during}"),
        );
    }

    fn terminal_with_error(
        &self,
        service_id: &str,
        phase: ServicePhase,
        kind: ErrorKind,
        message: String,
    ) {
        let mut record = self.record.lock().unwrap();
        if record.finished {
            return;
        }
        if self.advance_locked(&mut record, service_id, phase, Some(ServiceError { kind, message }))
        {
            self.maybe_finish(&mut record);
        }
    }

    /// Store the reply and advance to `done` atomically (the aggregate
    /// holds an entry iff the phase is `done`).
    pub fn complete_service(&self, service_id: &str, reply: ExtractedReply) {
        let mut record = self.record.lock().unwrap();
        if record.finished {
            return;
        }
        let Some(state) = record.services.get(service_id) else {
            return;
        };
        if !state.phase.can_transition_to(ServicePhase::Done) {
            warn!(
                service_id,
                phase = %state.phase,
                "refusing reply for service not in an extracting phase"
            );
            return;
        }
        record
            .aggregate
            .insert(service_id.to_string(), reply.clone());
        self.send(EventMsg::ServiceResponse(ServiceResponseEvent {
            session_id: record.session_id.clone(),
            service_id: service_id.to_string(),
            reply,
        }));
        if self.advance_locked(&mut record, service_id, ServicePhase::Done, None) {
            self.maybe_finish(&mut record);
        }
    }

    pub fn set_tab(&self, service_id: &str, tab_id: TabId) {
        let mut record = self.record.lock().unwrap();
        if let Some(state) = record.services.get_mut(service_id) {
            state.tab_id = Some(tab_id);
        }
    }

    /// Stop the session: every non-terminal service transitions to
    /// `cancelled` (in lexicographic order), the terminal event is
    /// emitted once, and the cancellation token releases every pipeline
    /// at its next suspension point.
    pub fn cancel_all(&self) {
        {
            let mut record = self.record.lock().unwrap();
            if !record.finished {
                record.explicitly_cancelled = true;
                let pending: Vec<String> = record
                    .services
                    .iter()
                    .filter(|(_, state)| !state.phase.is_terminal())
                    .map(|(id, _)| id.clone())
                    .collect();
                for service_id in pending {
                    self.advance_locked(&mut record, &service_id, ServicePhase::Cancelled, None);
                }
                self.maybe_finish(&mut record);
            }
        }
        self.cancel.cancel();
    }

    /// Terminal path for a session with no services to run.
    pub fn finish_if_done(&self) {
        let mut record = self.record.lock().unwrap();
        self.maybe_finish(&mut record);
    }

    fn advance_locked(
        &self,
        record: &mut SessionRecord,
        service_id: &str,
        to: ServicePhase,
        error: Option<ServiceError>,
    ) -> bool {
        let session_id = record.session_id.clone();
        let Some(state) = record.services.get_mut(service_id) else {
            warn!(service_id, "transition for unknown service");
            return false;
        };
        let from = state.phase;
        if !from.can_transition_to(to) {
            warn!(service_id, %from, %to, "refusing illegal phase transition");
            return false;
        }
        state.phase = to;
        state.last_phase_change_at = Utc::now();
        if to == ServicePhase::Injecting {
            state.attempts += 1;
        }
        if let Some(error) = error {
            state.error = Some(error);
        }
        self.send(EventMsg::ServiceProgress(ServiceProgressEvent {
            session_id,
            service_id: service_id.to_string(),
            from_phase: from,
            to_phase: to,
            at: state.last_phase_change_at,
        }));
        true
    }

    fn maybe_finish(&self, record: &mut SessionRecord) {
        if record.finished {
            return;
        }
        if !record.services.values().all(|s| s.phase.is_terminal()) {
            return;
        }
        record.finished = true;
        let overall_status = OverallStatus::derive(
            record.services.values().map(|s| s.phase),
            record.explicitly_cancelled,
        );
        self.send(EventMsg::SessionComplete(SessionCompleteEvent {
            session_id: record.session_id.clone(),
            overall_status,
            aggregate: record.aggregate.clone(),
        }));
        let _ = self
            .tx_house
            .send(Housekeeping::SessionFinished(record.session_id.clone()));
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let record = self.record.lock().unwrap();
        let overall_status = OverallStatus::derive(
            record.services.values().map(|s| s.phase),
            record.explicitly_cancelled,
        );
        SessionSnapshot {
            session_id: record.session_id.clone(),
            query: record.query.clone(),
            started_at: record.started_at,
            options: record.options,
            overall_status,
            services: record
                .services
                .iter()
                .map(|(id, state)| {
                    (
                        id.clone(),
                        ServiceStateSnapshot {
                            service_id: id.clone(),
                            phase: state.phase,
                            attempts: state.attempts,
                            tab_id: state.tab_id.map(|t| t.0),
                            last_phase_change_at: state.last_phase_change_at,
                            error: state.error.clone(),
                        },
                    )
                })
                .collect(),
            aggregate: record.aggregate.clone(),
        }
    }
}
