//! `samay proto`: speak the Submission/Event protocol over stdio.
//!
//! A host process embedding the orchestrator writes [`Submission`] JSON
//! lines to stdin and reads [`Event`] JSON lines from stdout. The
//! backing browser is the scripted demo (same shape as `samay exec`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tracing::warn;

use samay_core::Samay;
use samay_core::browser::Browser;
use samay_core::browser::InputKind;
use samay_core::config::Config;
use samay_core::protocol::EventMsg;
use samay_core::protocol::Op;
use samay_core::protocol::Submission;
use samay_core::service_descriptor::ServiceRegistry;
use samay_core::sim::PageScript;
use samay_core::sim::SimBrowser;

#[derive(Debug, Parser)]
pub struct ProtoCli {}

pub async fn run_main(_cli: ProtoCli) -> anyhow::Result<()> {
    let config = Config::load_default().context("loading config")?;
    let registry = ServiceRegistry::with_overrides(&config.service_overrides);

    // Generic scripted pages for every configured service.
    let browser = SimBrowser::new();
    for service_id in registry.ids() {
        let descriptor = registry.get(service_id).context("descriptor")?;
        let script = PageScript::new(descriptor.launch_url.trim_end_matches('/'))
            .with_input(
                descriptor
                    .selectors
                    .input
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "#prompt".to_string()),
                InputKind::ContentEditable,
            )
            .with_send(
                descriptor
                    .selectors
                    .send_button
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "#send".to_string()),
            )
            .with_reply(
                descriptor
                    .selectors
                    .response_container
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "#reply".to_string()),
            )
            .reply_chunk(
                Duration::from_millis(400),
                format!("[{}] simulated protocol-mode reply", descriptor.display_name),
            )
            .reenable_send_at(Duration::from_millis(700));
        browser.register(script);
    }

    let samay = Arc::new(Samay::spawn(
        config,
        Arc::clone(&browser) as Arc<dyn Browser>,
    ));

    // Writer: every orchestrator event becomes one stdout line.
    let writer = {
        let samay = Arc::clone(&samay);
        tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Ok(event) = samay.next_event().await {
                let shutdown = matches!(event.msg, EventMsg::ShutdownComplete);
                if let Ok(mut line) = serde_json::to_string(&event) {
                    line.push('\n');
                    if stdout.write_all(line.as_bytes()).await.is_err() {
                        break;
                    }
                    let _ = stdout.flush().await;
                }
                if shutdown {
                    break;
                }
            }
        })
    };

    // Reader: one Submission per stdin line.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Submission>(&line) {
            Ok(submission) => {
                if samay.submit_with_id(submission).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!("invalid submission: {err}");
            }
        }
    }

    // Stdin is gone: wind the orchestrator down so the writer drains the
    // shutdown ack and exits.
    let _ = samay.submit(Op::Shutdown).await;
    writer.await.ok();
    Ok(())
}
