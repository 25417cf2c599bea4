//! Translation between the page's bridge envelopes and the
//! orchestrator's submission/event queues.
//!
//! Request kinds become submissions; the submission id is remembered
//! against the originating `messageId` so the matching orchestrator
//! event can be posted back as a correlated reply. Push events carry no
//! `messageId`. Malformed traffic is a protocol violation: logged and
//! dropped, never escalated.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use tracing::warn;

use samay_bridge::WindowSender;
use samay_core::Samay;
use samay_protocol::bridge::AutomationStatusBody;
use samay_protocol::bridge::BridgeErrorBody;
use samay_protocol::bridge::BridgeMessage;
use samay_protocol::bridge::BridgePayload;
use samay_protocol::bridge::BridgeSource;
use samay_protocol::protocol::ErrorKind;
use samay_protocol::protocol::Event;
use samay_protocol::protocol::EventMsg;
use samay_protocol::protocol::Op;

use crate::RelayConfig;
use crate::heartbeat::HeartbeatAction;
use crate::heartbeat::HeartbeatState;

pub(crate) struct MessageProcessor {
    samay: Arc<Samay>,
    window: WindowSender,
    config: RelayConfig,
    /// Submission id -> the page `messageId` awaiting the reply.
    pending: HashMap<String, String>,
    /// Submission ids of relay-originated liveness pings.
    heartbeat_subs: HashSet<String>,
    heartbeat: HeartbeatState,
    ready_emitted: bool,
    /// Session ids the host announced via `session-created`.
    advised_sessions: HashSet<String>,
}

impl MessageProcessor {
    pub fn new(samay: Arc<Samay>, window: WindowSender, config: RelayConfig) -> Self {
        let heartbeat = HeartbeatState::new(config.heartbeat_misses_before_disconnect);
        Self {
            samay,
            window,
            config,
            pending: HashMap::new(),
            heartbeat_subs: HashSet::new(),
            heartbeat,
            ready_emitted: false,
            advised_sessions: HashSet::new(),
        }
    }

    fn post(&self, message: BridgeMessage) {
        if let Ok(value) = serde_json::to_value(&message) {
            self.window.post(value);
        }
    }

    fn push(&self, payload: BridgePayload) {
        self.post(BridgeMessage::push(payload));
    }

    fn reply(&self, message_id: String, payload: BridgePayload) {
        self.post(BridgeMessage::reply(message_id, payload));
    }

    fn emit_ready(&mut self) {
        self.ready_emitted = true;
        self.push(BridgePayload::ExtensionReady {
            extension_id: self.config.extension_id.clone(),
            version: self.config.version.clone(),
            timestamp: Utc::now().timestamp_millis(),
        });
    }

    fn emit_disconnected(&self, reason: &str) {
        self.push(BridgePayload::ExtensionDisconnected {
            reason: reason.to_string(),
        });
    }

    async fn submit(&mut self, op: Op, message_id: Option<String>) {
        match self.samay.submit(op).await {
            Ok(sub_id) => {
                if let Some(message_id) = message_id {
                    self.pending.insert(sub_id, message_id);
                }
            }
            Err(err) => {
                warn!("orchestrator rejected submission: {err}");
                if let Some(message_id) = message_id {
                    self.reply(
                        message_id,
                        BridgePayload::AutomationError {
                            session_id: None,
                            error: BridgeErrorBody {
                                kind: ErrorKind::ContextInvalidated,
                                message: ErrorKind::ContextInvalidated.human_reason().to_string(),
                            },
                        },
                    );
                }
            }
        }
    }

    pub async fn send_heartbeat_ping(&mut self) {
        if let Ok(sub_id) = self.samay.submit(Op::Ping).await {
            self.heartbeat_subs.insert(sub_id);
        }
    }

    pub async fn heartbeat_tick(&mut self) {
        match self.heartbeat.tick() {
            HeartbeatAction::PingAndReportDisconnect => {
                warn!("heartbeat missed; reporting extension as disconnected");
                self.emit_disconnected("heartbeat missed");
                self.send_heartbeat_ping().await;
            }
            _ => self.send_heartbeat_ping().await,
        }
    }

    /// One raw `postMessage` value from the page.
    pub async fn process_page_message(&mut self, raw: serde_json::Value) {
        let message: BridgeMessage = match serde_json::from_value(raw) {
            Ok(message) => message,
            Err(err) => {
                warn!("protocol violation: unparseable message: {err}");
                return;
            }
        };
        if message.source != BridgeSource::WebApp {
            warn!("protocol violation: unexpected source on page message");
            return;
        }
        if message.payload.is_request() && message.message_id.is_none() {
            warn!(
                kind = %message.payload.kind_str(),
                "protocol violation: request without messageId"
            );
            return;
        }

        // The relay reinitializes on the next event after a disconnect:
        // probe the orchestrator right away rather than waiting out the
        // ping cadence.
        if !self.heartbeat.is_connected() {
            self.send_heartbeat_ping().await;
        }

        let message_id = message.message_id;
        match message.payload {
            BridgePayload::ExtensionPing { timestamp } => {
                debug!(timestamp, "extension-ping");
                self.submit(Op::Ping, message_id).await;
            }
            BridgePayload::StartAutomation {
                query,
                services,
                session_id,
                options,
            } => {
                self.submit(
                    Op::StartSession {
                        query,
                        services,
                        session_id,
                        options,
                    },
                    message_id,
                )
                .await;
            }
            BridgePayload::StopAutomation { session_id } => {
                self.submit(Op::StopSession { session_id }, message_id).await;
            }
            BridgePayload::GetAutomationStatus { session_id } => {
                self.submit(Op::GetStatus { session_id }, message_id).await;
            }
            BridgePayload::SessionCreated { session_id } => {
                // Advisory only: remember the host's id for correlation.
                debug!(%session_id, "session-created advisory");
                self.advised_sessions.insert(session_id);
            }
            other => {
                warn!(
                    kind = %other.kind_str(),
                    "protocol violation: extension-side kind from the page"
                );
            }
        }
    }

    /// One orchestrator event: either the reply to a pending request or
    /// a push event for the page.
    pub fn process_event(&mut self, event: Event) {
        let Event { id: sub_id, msg } = event;

        // Relay-originated liveness pings never reach the page.
        if self.heartbeat_subs.remove(&sub_id) {
            if let EventMsg::Pong(_) = &msg {
                match self.heartbeat.pong() {
                    HeartbeatAction::ReportReconnect => self.emit_ready(),
                    _ if !self.ready_emitted => self.emit_ready(),
                    _ => {}
                }
            }
            return;
        }

        match msg {
            EventMsg::Pong(_) => {
                if let Some(message_id) = self.pending.remove(&sub_id) {
                    self.reply(
                        message_id,
                        BridgePayload::ExtensionPong {
                            received_timestamp: Utc::now().timestamp_millis(),
                            extension_id: self.config.extension_id.clone(),
                        },
                    );
                }
            }
            EventMsg::SessionStarted(started) => {
                if let Some(message_id) = self.pending.remove(&sub_id) {
                    self.reply(
                        message_id,
                        BridgePayload::AutomationStarted {
                            accepted: true,
                            session_id: started.session_id,
                        },
                    );
                }
            }
            EventMsg::SessionStopped(stopped) => {
                if let Some(message_id) = self.pending.remove(&sub_id) {
                    self.reply(
                        message_id,
                        BridgePayload::AutomationStopped {
                            session_id: stopped.session_id,
                        },
                    );
                }
            }
            EventMsg::SessionStatus(snapshot) => {
                if let Some(message_id) = self.pending.remove(&sub_id) {
                    self.reply(
                        message_id,
                        BridgePayload::AutomationStatus(AutomationStatusBody {
                            session: Some(snapshot),
                            orchestrator: None,
                        }),
                    );
                }
            }
            EventMsg::OrchestratorStatus(status) => {
                if let Some(message_id) = self.pending.remove(&sub_id) {
                    self.reply(
                        message_id,
                        BridgePayload::AutomationStatus(AutomationStatusBody {
                            session: None,
                            orchestrator: Some(status),
                        }),
                    );
                }
            }
            EventMsg::Error(error) => {
                let payload = BridgePayload::AutomationError {
                    session_id: error.session_id,
                    error: BridgeErrorBody {
                        kind: error.kind,
                        message: error.message,
                    },
                };
                // Correlated failures resolve the pending callback with a
                // typed error; uncorrelated ones are push events.
                match self.pending.remove(&sub_id) {
                    Some(message_id) => self.reply(message_id, payload),
                    None => self.push(payload),
                }
            }
            EventMsg::ServiceProgress(progress) => {
                self.push(BridgePayload::AutomationProgress(progress));
            }
            EventMsg::ServiceResponse(response) => {
                self.push(BridgePayload::ServiceResponse(response));
            }
            EventMsg::SessionComplete(complete) => {
                self.push(BridgePayload::AutomationComplete(complete));
            }
            EventMsg::ShutdownComplete => {
                self.emit_disconnected("orchestrator shut down");
            }
        }
    }

    /// The orchestrator queue died under us: reject every pending
    /// correlation and tell the page the context is gone.
    pub fn context_invalidated(&mut self) {
        warn!(
            pending = self.pending.len(),
            advised = self.advised_sessions.len(),
            "orchestrator context invalidated; abandoning live correlations"
        );
        let pending: Vec<String> = self.pending.drain().map(|(_, id)| id).collect();
        for message_id in pending {
            self.reply(
                message_id,
                BridgePayload::AutomationError {
                    session_id: None,
                    error: BridgeErrorBody {
                        kind: ErrorKind::ContextInvalidated,
                        message: ErrorKind::ContextInvalidated.human_reason().to_string(),
                    },
                },
            );
        }
        self.push(BridgePayload::AutomationError {
            session_id: None,
            error: BridgeErrorBody {
                kind: ErrorKind::ContextInvalidated,
                message: ErrorKind::ContextInvalidated.human_reason().to_string(),
            },
        });
        self.emit_disconnected("context invalidated");
    }
}
