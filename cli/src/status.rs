//! `samay status`: the read-only status surface.
//!
//! Deliberately goes the long way around - through the page bridge and
//! the relay, not the orchestrator handle - because that is the exact
//! path the popup uses: `get-automation-status` out, `automation-status`
//! back, render counts per phase.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::bail;
use clap::Parser;

use samay_bridge::Bridge;
use samay_bridge::PageWindow;
use samay_core::Samay;
use samay_core::browser::Browser;
use samay_core::config::Config;
use samay_core::sim::SimBrowser;
use samay_protocol::bridge::BridgePayload;
use samay_relay::Relay;
use samay_relay::RelayConfig;

#[derive(Debug, Parser)]
pub struct StatusCli {}

pub async fn run_main(_cli: StatusCli) -> anyhow::Result<()> {
    let config = Config::load_default().context("loading config")?;

    let browser = SimBrowser::new();
    let samay = Arc::new(Samay::spawn(
        config.clone(),
        Arc::clone(&browser) as Arc<dyn Browser>,
    ));

    let (page_side, extension_side) = PageWindow::pair();
    let _relay = Relay::spawn(
        Arc::clone(&samay),
        extension_side,
        RelayConfig::from_config(&config),
    );
    let bridge = Bridge::install(page_side);

    // Wait for the relay handshake, bounded. The ready event may already
    // have fired, so poll the flag rather than the event stream.
    let handshake_deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !bridge.is_available() {
        if tokio::time::Instant::now() > handshake_deadline {
            bail!("bridge never became available");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let (_, reply) = bridge
        .send_message(BridgePayload::GetAutomationStatus { session_id: None })
        .context("bridge rejected the request")?;
    let message = tokio::time::timeout(Duration::from_secs(5), reply)
        .await
        .context("status request timed out")?
        .context("bridge dropped the callback")?
        .context("request failed")?;

    match message.payload {
        BridgePayload::AutomationStatus(body) => {
            let status = body
                .orchestrator
                .context("expected the global orchestrator summary")?;
            println!(
                "alive: {}  live sessions: {}  since: {}",
                status.alive, status.live_sessions, status.since
            );
            if status.phase_counts.is_empty() {
                println!("no live services");
            } else {
                for (phase, count) in &status.phase_counts {
                    println!("{phase:>16}  {count}");
                }
            }
            Ok(())
        }
        other => bail!("unexpected reply: {other:?}"),
    }
}
