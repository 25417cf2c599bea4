//! The `postMessage` envelope spoken between the host web page and the
//! extension side.
//!
//! Every message carries a `source` discriminating the two directions, a
//! kebab-case `kind`, and - for request-shaped kinds only - a `messageId`
//! echoed verbatim on the matching reply. Push-shaped kinds never carry a
//! `messageId`. Field names are camelCase because the peer is a TypeScript
//! web app; the [`ts_rs::TS`] derives generate its bindings.

use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;
use ts_rs::TS;

use crate::protocol::ErrorKind;
use crate::protocol::OrchestratorStatusEvent;
use crate::protocol::ServiceProgressEvent;
use crate::protocol::ServiceResponseEvent;
use crate::protocol::SessionCompleteEvent;
use crate::protocol::SessionOptions;
use crate::protocol::SessionSnapshot;

/// Originator tag carried by every bridge message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, TS)]
pub enum BridgeSource {
    #[serde(rename = "samay-web-app")]
    WebApp,
    #[serde(rename = "samay-extension")]
    Extension,
}

/// One `postMessage` payload.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct BridgeMessage {
    pub source: BridgeSource,
    /// Present iff this is a request or the reply to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(flatten)]
    pub payload: BridgePayload,
}

impl BridgeMessage {
    /// A request from the page, carrying a fresh `messageId`.
    pub fn request(message_id: impl Into<String>, payload: BridgePayload) -> Self {
        Self {
            source: BridgeSource::WebApp,
            message_id: Some(message_id.into()),
            payload,
        }
    }

    /// The extension's reply to a correlated request.
    pub fn reply(message_id: impl Into<String>, payload: BridgePayload) -> Self {
        Self {
            source: BridgeSource::Extension,
            message_id: Some(message_id.into()),
            payload,
        }
    }

    /// A fire-and-forget push event from the extension.
    pub fn push(payload: BridgePayload) -> Self {
        Self {
            source: BridgeSource::Extension,
            message_id: None,
            payload,
        }
    }
}

/// Error body attached to `automation-error`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct BridgeErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

/// Combined reply body for `automation-status`: a single session snapshot
/// or the global orchestrator summary, depending on what was asked.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct AutomationStatusBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestrator: Option<OrchestratorStatusEvent>,
}

/// Every `kind` the bridge understands. The wire strings are fixed by the
/// host app; renaming a variant is a protocol break.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Display, TS)]
#[serde(tag = "kind", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
#[strum(serialize_all = "kebab-case")]
pub enum BridgePayload {
    // ---- page -> extension, request-shaped ----
    ExtensionPing {
        timestamp: i64,
    },
    StartAutomation {
        query: String,
        #[serde(default)]
        services: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default)]
        options: SessionOptions,
    },
    StopAutomation {
        session_id: String,
    },
    GetAutomationStatus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    // ---- page -> extension, advisory (no reply) ----
    SessionCreated {
        session_id: String,
    },

    // ---- extension -> page, correlated replies ----
    ExtensionPong {
        received_timestamp: i64,
        extension_id: String,
    },
    AutomationStarted {
        accepted: bool,
        session_id: String,
    },
    AutomationStopped {
        session_id: String,
    },
    AutomationStatus(AutomationStatusBody),

    // ---- extension -> page, push events ----
    AutomationProgress(ServiceProgressEvent),
    ServiceResponse(ServiceResponseEvent),
    AutomationComplete(SessionCompleteEvent),
    AutomationError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        error: BridgeErrorBody,
    },
    ExtensionReady {
        extension_id: String,
        version: String,
        timestamp: i64,
    },
    ExtensionDisconnected {
        reason: String,
    },
}

impl BridgePayload {
    /// Request-shaped kinds must carry a `messageId` and receive exactly
    /// one correlated reply (or a bounded-timeout rejection).
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            BridgePayload::ExtensionPing { .. }
                | BridgePayload::StartAutomation { .. }
                | BridgePayload::StopAutomation { .. }
                | BridgePayload::GetAutomationStatus { .. }
        )
    }

    /// The kebab-case `kind` string as it appears on the wire.
    pub fn kind_str(&self) -> String {
        self.to_string()
    }
}
