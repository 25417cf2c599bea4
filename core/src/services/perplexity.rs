//! Perplexity automation.
//!
//! The composer is a plain textarea (value + input events). Submission
//! falls back to an Enter keypress when no submit button resolves, which
//! the search-style layout sometimes hides. Answers are research-style:
//! completion is signalled by the sources block, whose links become
//! [`ExtractedReply::citations`], and the trailing related-questions
//! block must not leak into the reply text.

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

pub struct PerplexityInjector;

#[async_trait]
impl Injector for PerplexityInjector {
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
        tokio::time::sleep(descriptor.injection_settle()).await;
        match DomInjector::resolve_send(tab, &descriptor.selectors.send_button).await {
            Some(send_selector) => {
                if !tab.click(&send_selector).await {
                    return Err(InjectError::SendRejected);
                }
                tokio::time::sleep(Duration::from_millis(150)).await;
                if DomInjector::confirm_sent(tab, &input_selector, &send_selector).await {
                    Ok(())
                } else {
                    Err(InjectError::SendRejected)
                }
            }
            // No visible submit control: the textarea submits on Enter.
            None => {
                if !tab.press_enter(&input_selector).await {
                    return Err(InjectError::SendRejected);
                }
                tokio::time::sleep(Duration::from_millis(150)).await;
                let cleared = tab
                    .input_text(&input_selector)
                    .await
                    .map(|text| text.is_empty())
                    .unwrap_or(true);
                if cleared {
                    Ok(())
                } else {
                    Err(InjectError::SendRejected)
                }
            }
        }
    }
}

pub struct PerplexityExtractor;

/// Cut the related-questions block the page appends under the answer.
fn strip_related_block(text: &str) -> &str {
    for marker in ["\nRelated\n", "\nRelated questions\n"] {
        if let Some(index) = text.find(marker) {
            return &text[..index];
        }
    }
    text
}

#[async_trait]
impl Extractor for PerplexityExtractor {
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
        let stripped = strip_related_block(&reply.text).trim_end().to_string();
        if stripped != reply.text {
            reply.word_count = stripped.split_whitespace().count();
            reply.text = stripped;
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn related_block_is_cut() {
        let raw = "The answer.\nWith details.\nRelated\nWhat about X?\nWhat about Y?";
        assert_eq!(strip_related_block(raw), "The answer.\nWith details.");
    }

    #[test]
    fn text_without_related_block_is_untouched() {
        let raw = "Just the answer.";
        assert_eq!(strip_related_block(raw), raw);
    }
}
