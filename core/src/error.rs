use samay_protocol::protocol::ErrorKind;
use thiserror::Error;

use crate::browser::BrowserError;

pub type Result<T> = std::result::Result<T, SamayErr>;

#[derive(Error, Debug)]
pub enum SamayErr {
    /// The requested service has no registered descriptor. Fatal for that
    /// service only; the rest of the session proceeds.
    #[error("no descriptor registered for service `{0}`")]
    DescriptorNotFound(String),

    /// The browser refused to open or navigate a tab (popup blocker,
    /// closed window). Fatal for that service.
    #[error("could not open a tab for `{service_id}`: {source}")]
    TabOpenFailed {
        service_id: String,
        #[source]
        source: BrowserError,
    },

    /// The input element could not be located, or the send control did
    /// not accept the click.
    #[error("injection failed for `{service_id}`: {reason}")]
    InjectionFailed { service_id: String, reason: String },

    /// Deadline exceeded with an empty reply container.
    #[error("deadline exceeded for `{0}` with an empty reply container")]
    ExtractionTimeout(String),

    /// A second start was issued for a session id already in use.
    #[error("session `{0}` is already running")]
    DuplicateSession(String),

    #[error("unknown session `{0}`")]
    SessionNotFound(String),

    /// The orchestrator loop is gone; live sessions cannot be recovered.
    #[error("the orchestrator context was invalidated")]
    ContextInvalidated,

    /// A malformed message arrived over the bridge.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("internal error; orchestrator loop died unexpectedly")]
    InternalOrchestratorDied,

    #[error("invalid config: {0}")]
    Config(String),

    // -----------------------------------------------------------------
    // Automatic conversions for common external error types
    // -----------------------------------------------------------------
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SamayErr {
    /// The taxonomy kind surfaced on wire events for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SamayErr::DescriptorNotFound(_) => ErrorKind::DescriptorNotFound,
            SamayErr::TabOpenFailed { .. } | SamayErr::Browser(_) => ErrorKind::TabOpenFailed,
            SamayErr::InjectionFailed { .. } => ErrorKind::InjectionFailed,
            SamayErr::ExtractionTimeout(_) => ErrorKind::ExtractionTimeout,
            SamayErr::DuplicateSession(_) => ErrorKind::DuplicateSession,
            SamayErr::ContextInvalidated | SamayErr::InternalOrchestratorDied => {
                ErrorKind::ContextInvalidated
            }
            SamayErr::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            SamayErr::SessionNotFound(_)
            | SamayErr::Config(_)
            | SamayErr::Io(_)
            | SamayErr::Json(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_taxonomy() {
        assert_eq!(
            SamayErr::DescriptorNotFound("x".into()).kind(),
            ErrorKind::DescriptorNotFound
        );
        assert_eq!(
            SamayErr::DuplicateSession("s".into()).kind(),
            ErrorKind::DuplicateSession
        );
        assert_eq!(
            SamayErr::ContextInvalidated.kind(),
            ErrorKind::ContextInvalidated
        );
    }
}
