//! `samay exec`: run one query end-to-end against scripted stand-ins for
//! the configured services and print what each one answered.
//!
//! The scripted pages are derived from the real descriptors (same
//! selectors, same completion heuristics), so this is the full pipeline
//! minus a live browser.

use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::bail;
use clap::Parser;
use owo_colors::OwoColorize;
use owo_colors::Style;

use samay_core::Samay;
use samay_core::browser::Browser;
use samay_core::browser::InputKind;
use samay_core::config::Config;
use samay_core::protocol::Event;
use samay_core::protocol::EventMsg;
use samay_core::protocol::Op;
use samay_core::protocol::ServicePhase;
use samay_core::protocol::SessionOptions;
use samay_core::service_descriptor::CompletionHeuristic;
use samay_core::service_descriptor::ServiceDescriptor;
use samay_core::service_descriptor::ServiceRegistry;
use samay_core::sim::PageScript;
use samay_core::sim::SimBrowser;

#[derive(Debug, Parser)]
pub struct ExecCli {
    /// The query to fan out.
    #[arg(long, short = 'q')]
    pub query: String,

    /// Services to drive (defaults to all four built-ins).
    #[arg(long, short = 's', value_delimiter = ',')]
    pub services: Vec<String>,

    /// Override every service's reply deadline, in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Print raw protocol events as JSON lines instead of styled text.
    #[arg(long)]
    pub json: bool,
}

pub async fn run_main(cli: ExecCli) -> anyhow::Result<()> {
    let config = Config::load_default().context("loading config")?;
    let registry = ServiceRegistry::with_overrides(&config.service_overrides);

    let services: Vec<String> = if cli.services.is_empty() {
        let mut ids: Vec<String> = registry.ids().map(str::to_string).collect();
        ids.sort();
        ids
    } else {
        cli.services.clone()
    };

    // One scripted page per requested service, shaped like the real one.
    let browser = SimBrowser::new();
    for service_id in &services {
        let Ok(descriptor) = registry.get(service_id) else {
            bail!("unknown service `{service_id}`");
        };
        browser.register(scripted_page(descriptor, &cli.query));
    }

    let mut config = config;
    if let Some(timeout_ms) = cli.timeout_ms {
        for service_id in &services {
            config
                .service_overrides
                .entry(service_id.clone())
                .or_default()
                .per_service_timeout_ms = Some(timeout_ms);
        }
    }

    let samay = Arc::new(Samay::spawn(
        config,
        Arc::clone(&browser) as Arc<dyn Browser>,
    ));

    let sub_id = samay
        .submit(Op::StartSession {
            query: cli.query.clone(),
            services,
            session_id: None,
            options: SessionOptions::default(),
        })
        .await
        .context("starting session")?;

    let mut processor = EventProcessor::new(std::io::stdout().is_terminal(), cli.json);
    let mut session_id: Option<String> = None;
    loop {
        let event = tokio::select! {
            event = samay.next_event() => event.context("orchestrator died")?,
            _ = tokio::signal::ctrl_c() => {
                if let Some(session_id) = &session_id {
                    let _ = samay
                        .submit(Op::StopSession {
                            session_id: session_id.clone(),
                        })
                        .await;
                    continue;
                }
                bail!("interrupted");
            }
        };
        if let EventMsg::SessionStarted(started) = &event.msg {
            session_id = Some(started.session_id.clone());
        }
        let finished = event.id == sub_id && matches!(event.msg, EventMsg::SessionComplete(_));
        processor.process_event(event);
        if finished {
            break;
        }
    }
    Ok(())
}

/// A scripted page matching the descriptor's selectors and heuristic.
fn scripted_page(descriptor: &ServiceDescriptor, query: &str) -> PageScript {
    let origin = descriptor
        .launch_url
        .trim_end_matches('/')
        .to_string();
    let input = descriptor
        .selectors
        .input
        .first()
        .cloned()
        .unwrap_or_else(|| "#prompt".to_string());
    let send = descriptor
        .selectors
        .send_button
        .first()
        .cloned()
        .unwrap_or_else(|| "#send".to_string());
    let container = descriptor
        .selectors
        .response_container
        .first()
        .cloned()
        .unwrap_or_else(|| "#reply".to_string());

    let kind = match descriptor.id.as_str() {
        // These composers are contenteditable in the real pages.
        "chatgpt" | "claude" | "gemini" => InputKind::ContentEditable,
        _ => InputKind::Value,
    };

    let reply_text = format!(
        "[{}] Here is a simulated answer to: {query}",
        descriptor.display_name
    );
    let mut script = PageScript::new(origin)
        .with_load_delay(Duration::from_millis(120))
        .with_input(input, kind)
        .with_send(send)
        .with_reply(container)
        .reply_chunk(Duration::from_millis(300), reply_text)
        .reply_chunk(Duration::from_millis(650), " (streamed tail.)");

    match &descriptor.completion_heuristic {
        CompletionHeuristic::StableDom { .. } => {}
        CompletionHeuristic::SpinnerAbsent => {
            if let Some(spinner) = descriptor.selectors.loading_indicator.first() {
                script = script.with_spinner(spinner.clone(), Duration::from_millis(900));
            }
        }
        CompletionHeuristic::SourceCitation => {
            if let Some(citations) = descriptor.selectors.citations.first() {
                script = script.with_citations(
                    citations.clone(),
                    Duration::from_millis(900),
                    vec![
                        "https://example.com/source-1".to_string(),
                        "https://example.com/source-2".to_string(),
                    ],
                );
            }
        }
        CompletionHeuristic::StreamingDone {
            sentinel_attr,
            done_value,
        } => {
            script = script
                .with_sentinel(
                    sentinel_attr.clone(),
                    "streaming",
                    done_value.clone(),
                    Duration::from_millis(900),
                )
                .reenable_send_at(Duration::from_millis(900));
        }
    }
    script
}

/// Styled (or JSON) renderer for the event stream, plus the per-phase
/// summary table.
struct EventProcessor {
    json: bool,
    bold: Style,
    dimmed: Style,
    green: Style,
    red: Style,
    phases: BTreeMap<String, ServicePhase>,
}

impl EventProcessor {
    fn new(with_ansi: bool, json: bool) -> Self {
        if with_ansi && !json {
            Self {
                json,
                bold: Style::new().bold(),
                dimmed: Style::new().dimmed(),
                green: Style::new().green(),
                red: Style::new().red(),
                phases: BTreeMap::new(),
            }
        } else {
            Self {
                json,
                bold: Style::new(),
                dimmed: Style::new(),
                green: Style::new(),
                red: Style::new(),
                phases: BTreeMap::new(),
            }
        }
    }

    fn process_event(&mut self, event: Event) {
        if self.json {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{line}");
            }
            return;
        }
        match event.msg {
            EventMsg::SessionStarted(started) => {
                println!(
                    "session {} -> {}",
                    started.session_id.style(self.bold),
                    started.services.join(", ")
                );
            }
            EventMsg::ServiceProgress(progress) => {
                self.phases
                    .insert(progress.service_id.clone(), progress.to_phase);
                let line = format!(
                    "{}: {} -> {}",
                    progress.service_id, progress.from_phase, progress.to_phase
                );
                println!("{}", line.style(self.dimmed));
            }
            EventMsg::ServiceResponse(response) => {
                let marker = if response.reply.partial {
                    " (partial)"
                } else {
                    ""
                };
                println!(
                    "{}{} [{} words]:",
                    response.service_id.style(self.bold),
                    marker,
                    response.reply.word_count
                );
                println!("{}", response.reply.text);
                if !response.reply.citations.is_empty() {
                    println!(
                        "{}",
                        format!("sources: {}", response.reply.citations.join(", "))
                            .style(self.dimmed)
                    );
                }
            }
            EventMsg::SessionComplete(complete) => {
                let status = complete.overall_status.to_string();
                let styled = match status.as_str() {
                    "complete" => status.style(self.green).to_string(),
                    "error" | "cancelled" => status.style(self.red).to_string(),
                    _ => status,
                };
                println!("\noverall: {styled}");
                println!("{}", render_phase_summary(&self.phases));
            }
            EventMsg::Error(error) => {
                println!("{} {}", "ERROR:".style(self.red), error.message);
            }
            EventMsg::SessionStatus(_)
            | EventMsg::OrchestratorStatus(_)
            | EventMsg::SessionStopped(_)
            | EventMsg::Pong(_)
            | EventMsg::ShutdownComplete => {}
        }
    }
}

/// The popup-style summary: one line per phase with a count.
pub(crate) fn render_phase_summary(phases: &BTreeMap<String, ServicePhase>) -> String {
    let mut counts: BTreeMap<ServicePhase, usize> = BTreeMap::new();
    for phase in phases.values() {
        *counts.entry(*phase).or_default() += 1;
    }
    let mut out = String::new();
    for (phase, count) in counts {
        out.push_str(&format!("{phase:>16}  {count}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_summary_counts_per_phase() {
        let mut phases = BTreeMap::new();
        phases.insert("a".to_string(), ServicePhase::Done);
        phases.insert("b".to_string(), ServicePhase::Done);
        phases.insert("c".to_string(), ServicePhase::Timeout);
        let summary = render_phase_summary(&phases);
        assert!(summary.contains("done  2"));
        assert!(summary.contains("timeout  1"));
    }

    #[test]
    fn scripted_page_matches_descriptor_selectors() {
        let registry = ServiceRegistry::built_in();
        let descriptor = registry.get("perplexity").expect("descriptor");
        let script = scripted_page(descriptor, "hi");
        assert_eq!(
            script.inputs[0].selector,
            descriptor.selectors.input[0]
        );
        assert!(script.reply.is_some());
        let reply = script.reply.expect("reply script");
        assert!(reply.citations.is_some(), "research page needs sources");
    }
}
