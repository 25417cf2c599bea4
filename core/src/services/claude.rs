//! Claude automation.
//!
//! The composer is a contenteditable ProseMirror region; the send button
//! only materializes once the draft is non-empty. Replies stream into a
//! container that keeps `data-is-streaming="true"` until the turn ends,
//! so a clean (non-partial) harvest additionally waits for that marker to
//! clear even after DOM quiescence fired.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use samay_protocol::protocol::ExtractedReply;

use crate::browser::Tab;
use crate::extract::ExtractError;
use crate::extract::Extractor;
use crate::extract::HeuristicExtractor;
use crate::inject::DomInjector;
use crate::inject::InjectError;
use crate::inject::Injector;
use crate::service_descriptor::ServiceDescriptor;

const SEND_APPEAR_WAIT: Duration = Duration::from_secs(2);
const STREAM_MARKER_POLL: Duration = Duration::from_millis(120);

pub struct ClaudeInjector;

#[async_trait]
impl Injector for ClaudeInjector {
    async fn inject(
        &self,
        tab: &dyn Tab,
        query: &str,
        descriptor: &ServiceDescriptor,
    ) -> Result<(), InjectError> {
        let (input_selector, kind) =
            DomInjector::resolve_input(tab, &descriptor.selectors.input).await?;
        tab.focus(&input_selector).await;
        DomInjector::clear_input(tab, &input_selector, kind).await?;
        DomInjector::type_query(
            tab,
            &input_selector,
            kind,
            query,
            descriptor.typing_chars_per_second,
        )
        .await?;
        // The send button does not exist until the draft has text.
        let send_selector = DomInjector::wait_send_enabled(
            tab,
            &descriptor.selectors.send_button,
            SEND_APPEAR_WAIT,
        )
        .await
        .ok_or(InjectError::SendRejected)?;
        DomInjector::submit(tab, descriptor, &input_selector, &send_selector).await
    }
}

pub struct ClaudeExtractor;

impl ClaudeExtractor {
    /// True while any streaming marker is still attached.
    async fn still_streaming(tab: &dyn Tab, descriptor: &ServiceDescriptor) -> bool {
        for selector in &descriptor.selectors.loading_indicator {
            if tab.query(selector).await.is_some() {
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl Extractor for ClaudeExtractor {
    async fn extract(
        &self,
        tab: &dyn Tab,
        descriptor: &ServiceDescriptor,
        deadline: Instant,
        injected_at: Instant,
    ) -> Result<ExtractedReply, ExtractError> {
        let reply = HeuristicExtractor
            .extract(tab, descriptor, deadline, injected_at)
            .await?;
        if reply.partial {
            return Ok(reply);
        }
        // Quiescence can fire during a long internal pause; trust the
        // streaming marker over the quiet window, deadline permitting.
        while Self::still_streaming(tab, descriptor).await {
            if Instant::now() + STREAM_MARKER_POLL >= deadline {
                let mut late = reply;
                late.partial = true;
                return Ok(late);
            }
            tokio::time::sleep(STREAM_MARKER_POLL).await;
        }
        // Re-harvest: more text may have landed between quiescence and
        // the marker clearing.
        match HeuristicExtractor::latest_reply(tab, descriptor, injected_at).await {
            Some(view) => {
                let citations =
                    HeuristicExtractor::harvest_citations(tab, descriptor, &view).await;
                let text = view.text.trim().to_string();
                Ok(ExtractedReply {
                    service_id: descriptor.id.clone(),
                    word_count: text.split_whitespace().count(),
                    text,
                    partial: false,
                    extracted_at: chrono::Utc::now(),
                    citations,
                })
            }
            None => Ok(reply),
        }
    }
}
