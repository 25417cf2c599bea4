//! Reply extraction from a service tab.
//!
//! [`HeuristicExtractor`] waits for the descriptor's completion heuristic
//! to fire, bounded by an absolute deadline, then harvests the latest
//! assistant reply. When the deadline expires first, whatever non-empty
//! text is visible is returned as a partial reply; an empty container at
//! the deadline is a timeout.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

use samay_protocol::protocol::ExtractedReply;

use crate::browser::NodeView;
use crate::browser::Tab;
use crate::service_descriptor::CompletionHeuristic;
use crate::service_descriptor::ServiceDescriptor;

/// Poll cadence for the heuristics that cannot ride the mutation stream.
const POLL_INTERVAL: Duration = Duration::from_millis(120);

#[derive(Error, Debug)]
pub enum ExtractError {
    /// Deadline exceeded and the reply container was still empty.
    #[error("deadline exceeded with an empty reply container")]
    Timeout,

    #[error("tab closed during extraction")]
    TabGone,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// `deadline` is absolute; `injected_at` separates this turn's reply
    /// from older messages in the same container.
    async fn extract(
        &self,
        tab: &dyn Tab,
        descriptor: &ServiceDescriptor,
        deadline: Instant,
        injected_at: Instant,
    ) -> Result<ExtractedReply, ExtractError>;
}

/// The latest reply as read off the page, before trimming.
#[derive(Debug, Clone)]
pub struct ReplyView {
    pub text: String,
    pub links: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicExtractor;

impl HeuristicExtractor {
    /// Last element matching a response-container selector (fallbacks in
    /// priority order) with non-empty text appearing after `injected_at`.
    /// Elements without an attach timestamp are treated as current.
    pub async fn latest_reply(
        tab: &dyn Tab,
        descriptor: &ServiceDescriptor,
        injected_at: Instant,
    ) -> Option<ReplyView> {
        for selector in &descriptor.selectors.response_container {
            let nodes = tab.query_all(selector).await;
            let found = nodes
                .into_iter()
                .rev()
                .find(|node| Self::is_current_reply(node, injected_at));
            if let Some(node) = found {
                return Some(ReplyView {
                    text: node.text,
                    links: node.links,
                });
            }
        }
        None
    }

    fn is_current_reply(node: &NodeView, injected_at: Instant) -> bool {
        if node.text.trim().is_empty() {
            return false;
        }
        match node.appeared_at {
            Some(at) => at > injected_at,
            None => true,
        }
    }

    /// Source links: the citation selectors first, the reply's own anchor
    /// children as fallback. Order-preserving dedupe.
    pub async fn harvest_citations(
        tab: &dyn Tab,
        descriptor: &ServiceDescriptor,
        reply: &ReplyView,
    ) -> Vec<String> {
        let mut citations: Vec<String> = Vec::new();
        for selector in &descriptor.selectors.citations {
            for node in tab.query_all(selector).await {
                citations.extend(node.links);
            }
        }
        if citations.is_empty() {
            citations.extend(reply.links.iter().cloned());
        }
        let mut seen = std::collections::HashSet::new();
        citations.retain(|link| seen.insert(link.clone()));
        citations
    }

    /// Package the latest reply, if any.
    async fn harvest(
        tab: &dyn Tab,
        descriptor: &ServiceDescriptor,
        injected_at: Instant,
        partial: bool,
    ) -> Option<ExtractedReply> {
        let view = Self::latest_reply(tab, descriptor, injected_at).await?;
        let citations = Self::harvest_citations(tab, descriptor, &view).await;
        // Trim the ends only; internal whitespace is content.
        let text = view.text.trim().to_string();
        if text.is_empty() {
            return None;
        }
        Some(ExtractedReply {
            service_id: descriptor.id.clone(),
            word_count: text.split_whitespace().count(),
            text,
            partial,
            extracted_at: Utc::now(),
            citations,
        })
    }

    /// Resolves when the descriptor's completion heuristic fires. Runs
    /// unbounded; the caller wraps it in the deadline.
    async fn wait_complete(
        tab: &dyn Tab,
        descriptor: &ServiceDescriptor,
        injected_at: Instant,
    ) -> Result<(), ExtractError> {
        match &descriptor.completion_heuristic {
            CompletionHeuristic::StableDom { quiet_window_ms } => {
                Self::wait_stable_dom(tab, descriptor, Duration::from_millis(*quiet_window_ms))
                    .await
            }
            CompletionHeuristic::SpinnerAbsent => {
                Self::wait_spinner_absent(tab, descriptor, injected_at).await
            }
            CompletionHeuristic::SourceCitation => {
                Self::wait_source_citation(tab, descriptor, injected_at).await
            }
            CompletionHeuristic::StreamingDone {
                sentinel_attr,
                done_value,
            } => {
                Self::wait_streaming_done(tab, descriptor, injected_at, sentinel_attr, done_value)
                    .await
            }
        }
    }

    /// Quiescence: complete once no container mutation has arrived for
    /// `quiet_window` after the first one.
    async fn wait_stable_dom(
        tab: &dyn Tab,
        descriptor: &ServiceDescriptor,
        quiet_window: Duration,
    ) -> Result<(), ExtractError> {
        let container = descriptor
            .selectors
            .response_container
            .first()
            .cloned()
            .unwrap_or_default();
        let mut rx = tab.observe(&container);

        // Phase one: wait for the reply to start mutating the container.
        loop {
            match rx.recv().await {
                Ok(event) if event.selector == container => break,
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => break,
                Err(RecvError::Closed) => return Err(ExtractError::TabGone),
            }
        }

        // Phase two: a full quiet window with no further mutations.
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) if event.selector == container => continue,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return Err(ExtractError::TabGone),
                },
                _ = tokio::time::sleep(quiet_window) => return Ok(()),
            }
        }
    }

    /// Complete once every loading-indicator selector is gone and the
    /// container has text.
    async fn wait_spinner_absent(
        tab: &dyn Tab,
        descriptor: &ServiceDescriptor,
        injected_at: Instant,
    ) -> Result<(), ExtractError> {
        loop {
            if !tab.is_alive() {
                return Err(ExtractError::TabGone);
            }
            let mut spinner_present = false;
            for selector in &descriptor.selectors.loading_indicator {
                if tab.query(selector).await.is_some() {
                    spinner_present = true;
                    break;
                }
            }
            if !spinner_present
                && Self::latest_reply(tab, descriptor, injected_at).await.is_some()
            {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Complete once a citations/sources node shows up alongside a
    /// non-empty reply.
    async fn wait_source_citation(
        tab: &dyn Tab,
        descriptor: &ServiceDescriptor,
        injected_at: Instant,
    ) -> Result<(), ExtractError> {
        loop {
            if !tab.is_alive() {
                return Err(ExtractError::TabGone);
            }
            let mut citations_present = false;
            for selector in &descriptor.selectors.citations {
                if tab.query(selector).await.is_some() {
                    citations_present = true;
                    break;
                }
            }
            if citations_present
                && Self::latest_reply(tab, descriptor, injected_at).await.is_some()
            {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Complete once the sentinel attribute reads its done value, or the
    /// send control has come back enabled after the reply started.
    async fn wait_streaming_done(
        tab: &dyn Tab,
        descriptor: &ServiceDescriptor,
        injected_at: Instant,
        sentinel_attr: &str,
        done_value: &str,
    ) -> Result<(), ExtractError> {
        loop {
            if !tab.is_alive() {
                return Err(ExtractError::TabGone);
            }
            let reply_started = Self::latest_reply(tab, descriptor, injected_at).await.is_some();
            if reply_started {
                for selector in &descriptor.selectors.response_container {
                    let nodes = tab.query_all(selector).await;
                    if let Some(node) = nodes.last()
                        && node.attrs.get(sentinel_attr).map(String::as_str) == Some(done_value)
                    {
                        return Ok(());
                    }
                }
                for selector in &descriptor.selectors.send_button {
                    if let Some(node) = tab.query(selector).await
                        && !node.disabled
                    {
                        return Ok(());
                    }
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl Extractor for HeuristicExtractor {
    async fn extract(
        &self,
        tab: &dyn Tab,
        descriptor: &ServiceDescriptor,
        deadline: Instant,
        injected_at: Instant,
    ) -> Result<ExtractedReply, ExtractError> {
        let completed =
            tokio::time::timeout_at(deadline, Self::wait_complete(tab, descriptor, injected_at))
                .await;
        match completed {
            Ok(Ok(())) => Self::harvest(tab, descriptor, injected_at, false)
                .await
                .ok_or(ExtractError::Timeout),
            Ok(Err(err)) => Err(err),
            // Deadline first: a partial harvest if anything is visible.
            Err(_elapsed) => Self::harvest(tab, descriptor, injected_at, true)
                .await
                .ok_or(ExtractError::Timeout),
        }
    }
}
