//! ChatGPT automation.
//!
//! The composer is a ProseMirror contenteditable (paragraph children, no
//! value property) and the send button only enables once an input event
//! lands. While a reply streams, the send control is replaced by a stop
//! control; its reappearance doubles as the streaming-done fallback the
//! descriptor heuristic relies on.

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

/// How long the composer gets to enable the send button after typing.
const SEND_ENABLE_WAIT: std::time::Duration = std::time::Duration::from_secs(2);

pub struct ChatGptInjector;

#[async_trait]
impl Injector for ChatGptInjector {
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
        // The button stays disabled until ProseMirror has digested the
        // input events.
        let send_selector =
            DomInjector::wait_send_enabled(tab, &descriptor.selectors.send_button, SEND_ENABLE_WAIT)
                .await
                .ok_or(InjectError::SendRejected)?;
        DomInjector::submit(tab, descriptor, &input_selector, &send_selector).await
    }
}

pub struct ChatGptExtractor;

/// Assistant messages embed copy-to-clipboard affordances whose labels
/// leak into `innerText`.
fn strip_copy_artifacts(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let trimmed = line.trim();
            trimmed != "Copy code" && trimmed != "Copy"
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Extractor for ChatGptExtractor {
    async fn extract(
        &self,
        tab: &dyn Tab,
        descriptor: &ServiceDescriptor,
        deadline: Instant,
        injected_at: Instant,
    ) -> Result<ExtractedReply, ExtractError> {
        let mut reply = HeuristicExtractor
            .extract(tab, descriptor, deadline, injected_at)
            .await?;
        let cleaned = strip_copy_artifacts(&reply.text);
        if cleaned != reply.text {
            reply.word_count = cleaned.split_whitespace().count();
            reply.text = cleaned;
        }
        Ok(reply)
    }
}
