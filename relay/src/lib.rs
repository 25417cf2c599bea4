//! The content-script relay.
//!
//! Sits between the host page's bridge (one end of a [`PageWindow`])
//! and the orchestrator's queue pair: it validates and translates page
//! requests into submissions, mirrors orchestrator events back as
//! correlated replies or push events, and keeps a heartbeat on the
//! orchestrator so the page can render liveness.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use samay_bridge::PageWindow;
use samay_core::Samay;
use samay_core::config::Config;

pub mod heartbeat;
mod message_processor;

use message_processor::MessageProcessor;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Identifier advertised in `extension-pong` / `extension-ready`.
    pub extension_id: String,
    pub version: String,
    pub heartbeat_interval: Duration,
    pub heartbeat_misses_before_disconnect: u32,
}

impl RelayConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            extension_id: config.extension_id.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            heartbeat_interval: config.heartbeat_interval,
            heartbeat_misses_before_disconnect: config.heartbeat_misses_before_disconnect,
        }
    }
}

pub struct Relay {
    handle: JoinHandle<()>,
}

impl Relay {
    /// Spawn the relay over the extension-side window endpoint.
    pub fn spawn(samay: Arc<Samay>, window: PageWindow, config: RelayConfig) -> Relay {
        let handle = tokio::spawn(run(samay, window, config));
        Relay { handle }
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn run(samay: Arc<Samay>, window: PageWindow, config: RelayConfig) {
    let heartbeat_interval = config.heartbeat_interval;
    let (window_tx, mut window_rx) = window.split();
    let mut processor = MessageProcessor::new(Arc::clone(&samay), window_tx, config);

    // Initial handshake: the first answered ping emits `extension-ready`.
    processor.send_heartbeat_ping().await;

    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + heartbeat_interval,
        heartbeat_interval,
    );

    loop {
        tokio::select! {
            maybe_raw = window_rx.recv() => match maybe_raw {
                Some(raw) => processor.process_page_message(raw).await,
                None => {
                    debug!("page window closed; relay exiting");
                    break;
                }
            },
            event = samay.next_event() => match event {
                Ok(event) => processor.process_event(event),
                Err(_) => {
                    // The background context is gone; this is terminal.
                    processor.context_invalidated();
                    break;
                }
            },
            _ = heartbeat.tick() => processor.heartbeat_tick().await,
        }
    }
}
