//! Liveness bookkeeping for the relay-to-orchestrator ping loop.
//!
//! The relay is stateless between messages apart from this counter: it
//! pings on a fixed cadence, and after the configured number of
//! consecutive unanswered pings reports the extension as disconnected.
//! The next answered ping re-establishes the link.

/// What a heartbeat tick or pong asks the relay to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping, nothing else.
    Ping,
    /// Send a ping and announce the disconnect (threshold just crossed).
    PingAndReportDisconnect,
    /// A pong after a disconnect: announce recovery.
    ReportReconnect,
    /// A pong in the normal state: nothing to announce.
    None,
}

#[derive(Debug)]
pub struct HeartbeatState {
    outstanding: u32,
    misses_before_disconnect: u32,
    connected: bool,
}

impl HeartbeatState {
    pub fn new(misses_before_disconnect: u32) -> Self {
        Self {
            outstanding: 0,
            misses_before_disconnect: misses_before_disconnect.max(1),
            connected: true,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// A cadence tick: the previous ping (if any) went unanswered.
    pub fn tick(&mut self) -> HeartbeatAction {
        self.outstanding = self.outstanding.saturating_add(1);
        if self.connected && self.outstanding > self.misses_before_disconnect {
            self.connected = false;
            return HeartbeatAction::PingAndReportDisconnect;
        }
        HeartbeatAction::Ping
    }

    /// The orchestrator answered.
    pub fn pong(&mut self) -> HeartbeatAction {
        self.outstanding = 0;
        if self.connected {
            HeartbeatAction::None
        } else {
            self.connected = true;
            HeartbeatAction::ReportReconnect
        }
    }
}
