//! In-process stand-in for same-origin `window.postMessage`.
//!
//! [`PageWindow::pair`] yields the two connected endpoints: the host page
//! holds one, the content-script relay holds the other. Traffic is raw
//! JSON values - parsing (and therefore protocol-violation handling)
//! happens at the receiver, exactly like real message events.

use tokio::sync::mpsc;

/// One endpoint of the duplex channel.
pub struct PageWindow {
    tx: mpsc::UnboundedSender<serde_json::Value>,
    rx: mpsc::UnboundedReceiver<serde_json::Value>,
}

/// Cloneable send half, split off so a listener task can own the
/// receive half.
#[derive(Clone)]
pub struct WindowSender {
    tx: mpsc::UnboundedSender<serde_json::Value>,
}

impl WindowSender {
    /// Fire-and-forget. `false` when the peer is gone.
    pub fn post(&self, message: serde_json::Value) -> bool {
        self.tx.send(message).is_ok()
    }
}

impl PageWindow {
    pub fn pair() -> (PageWindow, PageWindow) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (
            PageWindow { tx: tx_a, rx: rx_b },
            PageWindow { tx: tx_b, rx: rx_a },
        )
    }

    pub fn post(&self, message: serde_json::Value) -> bool {
        self.tx.send(message).is_ok()
    }

    /// `None` once the peer endpoint is dropped.
    pub async fn recv(&mut self) -> Option<serde_json::Value> {
        self.rx.recv().await
    }

    pub fn split(self) -> (WindowSender, mpsc::UnboundedReceiver<serde_json::Value>) {
        (WindowSender { tx: self.tx }, self.rx)
    }
}
