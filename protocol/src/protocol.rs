//! Protocol for an automation session between a client and the orchestrator.
//!
//! Uses a submission queue / event queue pair: the client sends
//! [`Submission`]s and receives [`Event`]s, correlated by submission id.
//! Push-style events (progress, per-service replies) reuse the id of the
//! submission that started the session.

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;
use ts_rs::TS;

/// Submission queue entry - a request into the orchestrator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Submission {
    /// Unique id for this submission, echoed on correlated events.
    pub id: String,
    /// Payload.
    pub op: Op,
}

/// Submission operation.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Op {
    /// Create a session for one user query and begin processing it
    /// immediately. Replies with [`EventMsg::SessionStarted`] (or
    /// [`EventMsg::Error`] with kind `duplicate-session`).
    StartSession {
        query: String,
        /// Requested service ids. Duplicates are coalesced; an empty list
        /// resolves immediately as a complete session with an empty
        /// aggregate.
        services: Vec<String>,
        /// Host-provided session id. Generated when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default)]
        options: SessionOptions,
    },

    /// Cancel every non-terminal service of the session and emit a single
    /// terminal [`EventMsg::SessionComplete`] with status `cancelled`.
    StopSession { session_id: String },

    /// Pure read. With a session id, replies with
    /// [`EventMsg::SessionStatus`]; without one, replies with
    /// [`EventMsg::OrchestratorStatus`].
    GetStatus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    /// Liveness probe; replies with [`EventMsg::Pong`].
    Ping,

    /// Shut the orchestrator down. Live sessions are abandoned.
    Shutdown,
}

/// Per-session behavior flags supplied by the host.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    /// Whether the host intends to drive follow-up questions afterwards.
    /// Advisory: the orchestrator records it in the snapshot, nothing else.
    #[serde(default)]
    pub allow_follow_up: bool,
    /// Whether the host intends to synthesize the aggregate downstream.
    #[serde(default = "default_true")]
    pub synthesize: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            allow_follow_up: false,
            synthesize: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Event queue entry - events from the orchestrator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Event {
    /// Submission `id` that this event is correlated with.
    pub id: String,
    /// Payload.
    pub msg: EventMsg,
}

/// Response event from the orchestrator.
#[derive(Debug, Clone, Deserialize, Serialize, Display)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventMsg {
    /// The session was accepted and per-service processing has begun.
    SessionStarted(SessionStartedEvent),

    /// A per-service phase transition.
    ServiceProgress(ServiceProgressEvent),

    /// One service produced a reply (possibly partial).
    ServiceResponse(ServiceResponseEvent),

    /// Terminal event: the session aggregate and final status.
    SessionComplete(SessionCompleteEvent),

    /// Ack for [`Op::StopSession`]. The terminal
    /// [`EventMsg::SessionComplete`] for the cancelled session is emitted
    /// separately, correlated with the submission that started it.
    SessionStopped(SessionStoppedEvent),

    /// Reply to [`Op::GetStatus`] for a single session.
    SessionStatus(SessionSnapshot),

    /// Reply to [`Op::GetStatus`] without a session id.
    OrchestratorStatus(OrchestratorStatusEvent),

    /// Reply to [`Op::Ping`].
    Pong(PongEvent),

    /// Error while executing a submission, or a session-scoped failure.
    Error(ErrorEvent),

    /// The orchestrator is shutting down.
    ShutdownComplete,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartedEvent {
    pub session_id: String,
    /// The coalesced, lexicographically sorted service set actually run.
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProgressEvent {
    pub session_id: String,
    pub service_id: String,
    pub from_phase: ServicePhase,
    pub to_phase: ServicePhase,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResponseEvent {
    pub session_id: String,
    pub service_id: String,
    pub reply: ExtractedReply,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct SessionCompleteEvent {
    pub session_id: String,
    pub overall_status: OverallStatus,
    /// Service id -> reply, present exactly for services in phase `done`.
    pub aggregate: BTreeMap<String, ExtractedReply>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct SessionStoppedEvent {
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatusEvent {
    pub alive: bool,
    pub since: DateTime<Utc>,
    pub live_sessions: usize,
    /// Phase -> count across every live session's services.
    pub phase_counts: BTreeMap<ServicePhase, usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct PongEvent {
    pub alive: bool,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// A discrete state in the per-service processing DAG.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    Display,
    TS,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ServicePhase {
    Pending,
    TabOpening,
    Injecting,
    Submitted,
    AwaitingReply,
    Extracting,
    Done,
    Failed,
    Timeout,
    Cancelled,
}

impl ServicePhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ServicePhase::Done
                | ServicePhase::Failed
                | ServicePhase::Timeout
                | ServicePhase::Cancelled
        )
    }

    /// Legal edges of the phase DAG.
    ///
    /// `cancelled` and `timeout` are reachable from any non-terminal phase
    /// (cancellation is cooperative, the deadline timer may fire in any
    /// phase). `injecting -> injecting` is the single-retry marker.
    pub fn can_transition_to(self, next: ServicePhase) -> bool {
        use ServicePhase::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Cancelled | Timeout) {
            return true;
        }
        matches!(
            (self, next),
            (Pending, TabOpening)
                | (Pending, Failed)
                | (TabOpening, Injecting)
                | (TabOpening, Failed)
                | (Injecting, Injecting)
                | (Injecting, Submitted)
                | (Injecting, Failed)
                | (Submitted, AwaitingReply)
                | (AwaitingReply, Extracting)
                | (Extracting, Done)
                | (Extracting, Failed)
        )
    }
}

/// Session-level status, derived from the multiset of per-service phases.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display, TS,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OverallStatus {
    Starting,
    Running,
    Complete,
    Partial,
    Error,
    Cancelled,
}

impl OverallStatus {
    /// Derive the session status from its per-service phases.
    ///
    /// A phase of `done` counts toward `complete` whether or not the reply
    /// was a partial harvest; `partial` on the reply is metadata for the
    /// synthesizer, not a status demotion.
    pub fn derive<I>(phases: I, explicitly_cancelled: bool) -> Self
    where
        I: IntoIterator<Item = ServicePhase>,
    {
        if explicitly_cancelled {
            return OverallStatus::Cancelled;
        }
        let mut total = 0usize;
        let mut done = 0usize;
        let mut terminal = 0usize;
        let mut pending = 0usize;
        for phase in phases {
            total += 1;
            if phase == ServicePhase::Pending {
                pending += 1;
            }
            if phase.is_terminal() {
                terminal += 1;
            }
            if phase == ServicePhase::Done {
                done += 1;
            }
        }
        if total == 0 {
            return OverallStatus::Complete;
        }
        if terminal < total {
            if pending == total {
                return OverallStatus::Starting;
            }
            return OverallStatus::Running;
        }
        if done == total {
            OverallStatus::Complete
        } else if done > 0 {
            OverallStatus::Partial
        } else {
            OverallStatus::Error
        }
    }
}

/// Text and metadata harvested from one service's reply DOM.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedReply {
    pub service_id: String,
    /// Trimmed at both ends; internal whitespace preserved.
    pub text: String,
    pub word_count: usize,
    /// True when the deadline expired before the completion heuristic
    /// fired, and this is whatever text was visible at that point.
    pub partial: bool,
    pub extracted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStateSnapshot {
    pub service_id: String,
    pub phase: ServicePhase,
    /// Injection attempts so far (at most two).
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<u64>,
    pub last_phase_change_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ServiceError>,
}

/// Point-in-time view of one session. Repeated snapshots for the same
/// session are monotone in the phase DAG.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub query: String,
    pub started_at: DateTime<Utc>,
    pub options: SessionOptions,
    pub overall_status: OverallStatus,
    pub services: BTreeMap<String, ServiceStateSnapshot>,
    pub aggregate: BTreeMap<String, ExtractedReply>,
}

/// Error taxonomy surfaced in events and per-service states.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display, TS,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    DescriptorNotFound,
    TabOpenFailed,
    InjectionFailed,
    ExtractionTimeout,
    ContextInvalidated,
    ProtocolViolation,
    DuplicateSession,
    Internal,
}

impl ErrorKind {
    /// Human-readable reason string shown by the host UI next to a failed
    /// service.
    pub fn human_reason(self) -> &'static str {
        match self {
            ErrorKind::DescriptorNotFound => "service is not configured",
            ErrorKind::TabOpenFailed => "the browser refused to open a tab for the service",
            ErrorKind::InjectionFailed => "could not locate the service's input field",
            ErrorKind::ExtractionTimeout => "the service did not produce a reply in time",
            ErrorKind::ContextInvalidated => "the extension was reloaded mid-session",
            ErrorKind::ProtocolViolation => "malformed message",
            ErrorKind::DuplicateSession => "a session with this id is already running",
            ErrorKind::Internal => "internal orchestrator error",
        }
    }
}
