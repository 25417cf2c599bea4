//! Gemini automation.
//!
//! The composer is a `rich-textarea` web component wrapping a
//! contenteditable; focus occasionally lands on the wrapper instead of
//! the editable region, so the injector verifies the draft actually
//! took before submitting. Replies render progressively and the page
//! swaps the raw stream for formatted markdown right after the spinner
//! disappears, so the extractor lets the swap settle before harvesting.

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

const SEND_ENABLE_WAIT: Duration = Duration::from_secs(2);
const RENDER_SETTLE: Duration = Duration::from_millis(200);

pub struct GeminiInjector;

#[async_trait]
impl Injector for GeminiInjector {
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
        // Focus may have landed on the web-component wrapper; verify the
        // draft took and retype once if it did not.
        let draft = tab.input_text(&input_selector).await;
        if draft.as_deref() != Some(query) {
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
        }
        let send_selector =
            DomInjector::wait_send_enabled(tab, &descriptor.selectors.send_button, SEND_ENABLE_WAIT)
                .await
                .ok_or(InjectError::SendRejected)?;
        DomInjector::submit(tab, descriptor, &input_selector, &send_selector).await
    }
}

pub struct GeminiExtractor;

#[async_trait]
impl Extractor for GeminiExtractor {
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
        if reply.partial || Instant::now() + RENDER_SETTLE >= deadline {
            return Ok(reply);
        }
        // Let the formatted-markdown swap land, then re-read.
        tokio::time::sleep(RENDER_SETTLE).await;
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
