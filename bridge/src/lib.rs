// Poisoned mutex should fail the program
#![allow(clippy::unwrap_used)]

//! The page-context bridge stub.
//!
//! [`Bridge`] is the one object the host page talks to: it posts
//! request-shaped kinds with a fresh `messageId`, keeps the pending
//! callback in a correlator table, resolves each exactly once (matching
//! reply, bounded timeout, or disconnect - never more than one of them),
//! and re-broadcasts push events. `is_available` only turns true once
//! the relay has acknowledged itself; until then every send is rejected
//! synchronously.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use samay_protocol::bridge::BridgeMessage;
use samay_protocol::bridge::BridgePayload;
use samay_protocol::bridge::BridgeSource;

pub mod window;

pub use window::PageWindow;
pub use window::WindowSender;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How the stub got onto the page: the normal external script resource,
/// or the stripped-down object the relay builds when the resource is
/// blocked. Both honor the same contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeType {
    External,
    Fallback,
}

/// Payload of the `ready` event dispatched when the bridge first comes up.
#[derive(Debug, Clone, Copy)]
pub struct BridgeReady {
    pub timestamp: i64,
    pub bridge_type: BridgeType,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The relay has not completed its handshake (or has dropped).
    /// Raised synchronously by [`Bridge::send_message`].
    #[error("bridge is not available")]
    Unavailable,

    /// No reply arrived within the bounded timeout.
    #[error("request timed out")]
    Timeout,

    /// The extension side went away with the request in flight.
    #[error("extension disconnected")]
    Disconnected,
}

/// Correlator entry for one in-flight request.
struct PendingRequest {
    kind: String,
    issued_at: chrono::DateTime<Utc>,
    resolver: oneshot::Sender<Result<BridgeMessage, BridgeError>>,
    timeout: JoinHandle<()>,
}

pub struct Bridge {
    available: AtomicBool,
    bridge_type: BridgeType,
    next_id: AtomicU64,
    pending: Mutex<HashMap<String, PendingRequest>>,
    window: WindowSender,
    events: broadcast::Sender<BridgeMessage>,
    ready: broadcast::Sender<BridgeReady>,
    request_timeout: Duration,
}

impl Bridge {
    /// Install the stub over the page window (normal path).
    pub fn install(window: PageWindow) -> Arc<Bridge> {
        Self::install_with(window, BridgeType::External, DEFAULT_REQUEST_TIMEOUT)
    }

    /// The relay-built fallback stub; same contract, distinguished only
    /// in the `ready` event.
    pub fn install_fallback(window: PageWindow) -> Arc<Bridge> {
        Self::install_with(window, BridgeType::Fallback, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn install_with(
        window: PageWindow,
        bridge_type: BridgeType,
        request_timeout: Duration,
    ) -> Arc<Bridge> {
        let (window_tx, window_rx) = window.split();
        let (events, _) = broadcast::channel(64);
        let (ready, _) = broadcast::channel(4);
        let bridge = Arc::new(Bridge {
            available: AtomicBool::new(false),
            bridge_type,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            window: window_tx,
            events,
            ready,
            request_timeout,
        });
        tokio::spawn(listener(Arc::downgrade(&bridge), window_rx));
        bridge
    }

    /// True once the relay's handshake has been observed.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn bridge_type(&self) -> BridgeType {
        self.bridge_type
    }

    /// Push events from the extension (no `messageId`).
    pub fn events(&self) -> broadcast::Receiver<BridgeMessage> {
        self.events.subscribe()
    }

    /// `ready` events: fired when the bridge first becomes available and
    /// again after every reconnect.
    pub fn ready_events(&self) -> broadcast::Receiver<BridgeReady> {
        self.ready.subscribe()
    }

    /// Post a request-shaped kind and register its callback. Returns the
    /// generated `messageId` and the receiver that resolves exactly once.
    /// Rejects synchronously while the bridge is unavailable.
    pub fn send_message(
        self: &Arc<Self>,
        payload: BridgePayload,
    ) -> Result<(String, oneshot::Receiver<Result<BridgeMessage, BridgeError>>), BridgeError>
    {
        if !self.is_available() {
            return Err(BridgeError::Unavailable);
        }
        debug_assert!(payload.is_request(), "push kinds go through notify()");

        let message_id = format!("msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let (resolver, receiver) = oneshot::channel();

        let timeout = {
            let bridge = Arc::downgrade(self);
            let message_id = message_id.clone();
            let after = self.request_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                if let Some(bridge) = bridge.upgrade() {
                    bridge.resolve(&message_id, Err(BridgeError::Timeout));
                }
            })
        };

        self.pending.lock().unwrap().insert(
            message_id.clone(),
            PendingRequest {
                kind: payload.kind_str(),
                issued_at: Utc::now(),
                resolver,
                timeout,
            },
        );

        let message = BridgeMessage::request(message_id.clone(), payload);
        if !self.window.post(serde_json::to_value(&message).unwrap_or_default()) {
            self.resolve(&message_id, Err(BridgeError::Disconnected));
        }
        Ok((message_id, receiver))
    }

    /// Post an advisory kind (`session-created`): no `messageId`, no
    /// reply expected.
    pub fn notify(&self, payload: BridgePayload) -> Result<(), BridgeError> {
        if !self.is_available() {
            return Err(BridgeError::Unavailable);
        }
        let message = BridgeMessage {
            source: BridgeSource::WebApp,
            message_id: None,
            payload,
        };
        self.window
            .post(serde_json::to_value(&message).unwrap_or_default());
        Ok(())
    }

    /// Resolve a pending request exactly once; later resolutions for the
    /// same id are no-ops because the entry is gone.
    fn resolve(&self, message_id: &str, result: Result<BridgeMessage, BridgeError>) {
        let entry = self.pending.lock().unwrap().remove(message_id);
        match entry {
            Some(request) => {
                request.timeout.abort();
                debug!(
                    message_id,
                    kind = %request.kind,
                    elapsed_ms = (Utc::now() - request.issued_at).num_milliseconds(),
                    "resolving pending request"
                );
                let _ = request.resolver.send(result);
            }
            None => {
                debug!(message_id, "no pending request (already resolved)");
            }
        }
    }

    fn mark_available(&self) {
        if !self.available.swap(true, Ordering::SeqCst) {
            let _ = self.ready.send(BridgeReady {
                timestamp: Utc::now().timestamp_millis(),
                bridge_type: self.bridge_type,
            });
        }
    }

    fn mark_unavailable(&self) {
        self.available.store(false, Ordering::SeqCst);
    }

    /// Reject everything in flight (relay gone).
    fn flush_pending(&self, error: BridgeError) {
        let drained: Vec<String> = self.pending.lock().unwrap().keys().cloned().collect();
        for message_id in drained {
            self.resolve(&message_id, Err(error.clone()));
        }
    }
}

async fn listener(
    bridge: Weak<Bridge>,
    mut window_rx: mpsc::UnboundedReceiver<serde_json::Value>,
) {
    while let Some(raw) = window_rx.recv().await {
        let Some(bridge) = bridge.upgrade() else {
            return;
        };
        let message: BridgeMessage = match serde_json::from_value(raw) {
            Ok(message) => message,
            Err(err) => {
                warn!("discarding unparseable window message: {err}");
                continue;
            }
        };
        // Only extension-sourced traffic is ours; the page's own posts
        // echo on the same window in the real thing.
        if message.source != BridgeSource::Extension {
            continue;
        }

        match &message.payload {
            BridgePayload::ExtensionDisconnected { .. } => {
                bridge.mark_unavailable();
                bridge.flush_pending(BridgeError::Disconnected);
                let _ = bridge.events.send(message);
                continue;
            }
            BridgePayload::ExtensionReady { .. } => {
                bridge.mark_available();
                let _ = bridge.events.send(message);
                continue;
            }
            _ => {}
        }

        // Any extension traffic implies the relay handshake happened.
        bridge.mark_available();

        match message.message_id.clone() {
            Some(message_id) => bridge.resolve(&message_id, Ok(message)),
            None => {
                let _ = bridge.events.send(message);
            }
        }
    }

    // Window gone: relay side dropped.
    if let Some(bridge) = bridge.upgrade() {
        bridge.mark_unavailable();
        bridge.flush_pending(BridgeError::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ready_message() -> serde_json::Value {
        json!({
            "source": "samay-extension",
            "kind": "extension-ready",
            "extensionId": "samay-extension",
            "version": "0.1.0",
            "timestamp": 1_700_000_000_000i64,
        })
    }

    async fn available_bridge() -> (Arc<Bridge>, PageWindow) {
        let (page_side, relay_side) = PageWindow::pair();
        let bridge = Bridge::install_with(
            page_side,
            BridgeType::External,
            Duration::from_millis(500),
        );
        relay_side.post(ready_message());
        let mut ready = bridge.ready_events();
        // Wait for the listener to process the handshake.
        while !bridge.is_available() {
            tokio::task::yield_now().await;
        }
        let _ = ready.try_recv();
        (bridge, relay_side)
    }

    #[tokio::test]
    async fn unavailable_bridge_rejects_synchronously() {
        let (page_side, _relay_side) = PageWindow::pair();
        let bridge = Bridge::install(page_side);
        let err = bridge
            .send_message(BridgePayload::ExtensionPing { timestamp: 1 })
            .err();
        assert_eq!(err, Some(BridgeError::Unavailable));
    }

    #[tokio::test]
    async fn ready_event_carries_bridge_type() {
        let (page_side, relay_side) = PageWindow::pair();
        let bridge =
            Bridge::install_with(page_side, BridgeType::Fallback, Duration::from_secs(1));
        let mut ready = bridge.ready_events();
        relay_side.post(ready_message());
        let info = ready.recv().await.expect("ready event");
        assert_eq!(info.bridge_type, BridgeType::Fallback);
        assert!(info.timestamp > 0);
    }

    #[tokio::test]
    async fn reply_resolves_the_matching_callback_exactly_once() {
        let (bridge, relay_side) = available_bridge().await;

        let (id_one, rx_one) = bridge
            .send_message(BridgePayload::ExtensionPing { timestamp: 1 })
            .expect("send m1");
        let (id_two, rx_two) = bridge
            .send_message(BridgePayload::ExtensionPing { timestamp: 2 })
            .expect("send m2");
        assert_ne!(id_one, id_two);

        // Answer in reverse order; each callback gets its own reply.
        for id in [&id_two, &id_one] {
            relay_side.post(json!({
                "source": "samay-extension",
                "messageId": id,
                "kind": "extension-pong",
                "receivedTimestamp": 7,
                "extensionId": "samay-extension",
            }));
        }

        let reply_one = rx_one.await.expect("resolved").expect("ok");
        assert_eq!(reply_one.message_id.as_deref(), Some(id_one.as_str()));
        let reply_two = rx_two.await.expect("resolved").expect("ok");
        assert_eq!(reply_two.message_id.as_deref(), Some(id_two.as_str()));

        // A duplicate reply for an already-resolved id is dropped.
        relay_side.post(json!({
            "source": "samay-extension",
            "messageId": id_one,
            "kind": "extension-pong",
            "receivedTimestamp": 8,
            "extensionId": "samay-extension",
        }));
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out() {
        let (page_side, relay_side) = PageWindow::pair();
        let bridge = Bridge::install_with(
            page_side,
            BridgeType::External,
            Duration::from_millis(200),
        );
        relay_side.post(ready_message());
        while !bridge.is_available() {
            tokio::task::yield_now().await;
        }

        let (_, rx) = bridge
            .send_message(BridgePayload::ExtensionPing { timestamp: 1 })
            .expect("send");
        let result = rx.await.expect("resolved");
        assert_eq!(result, Err(BridgeError::Timeout));
    }

    #[tokio::test]
    async fn relay_drop_rejects_in_flight_requests() {
        let (bridge, relay_side) = available_bridge().await;
        let (_, rx) = bridge
            .send_message(BridgePayload::ExtensionPing { timestamp: 1 })
            .expect("send");
        drop(relay_side);
        let result = rx.await.expect("resolved");
        assert_eq!(result, Err(BridgeError::Disconnected));
        assert!(!bridge.is_available());
    }

    #[tokio::test]
    async fn push_events_reach_subscribers_not_correlators() {
        let (bridge, relay_side) = available_bridge().await;
        let mut events = bridge.events();
        relay_side.post(json!({
            "source": "samay-extension",
            "kind": "extension-disconnected",
            "reason": "heartbeat missed",
        }));
        let event = events.recv().await.expect("event");
        assert!(matches!(
            event.payload,
            BridgePayload::ExtensionDisconnected { .. }
        ));
        assert!(!bridge.is_available());
    }

    #[tokio::test]
    async fn page_sourced_echo_is_ignored() {
        let (bridge, relay_side) = available_bridge().await;
        // The bridge must not treat a web-app-sourced echo as a reply.
        let (id, mut rx) = bridge
            .send_message(BridgePayload::ExtensionPing { timestamp: 1 })
            .expect("send");
        relay_side.post(json!({
            "source": "samay-web-app",
            "messageId": id,
            "kind": "extension-ping",
            "timestamp": 1,
        }));
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err(), "echo must not resolve the request");
    }
}
