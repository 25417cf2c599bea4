//! Human-like query injection into a service tab.
//!
//! The generic [`DomInjector`] is fully descriptor-driven; the per-service
//! modules in [`crate::services`] reuse its pieces and layer page quirks
//! on top. Injection never retries on its own - the single retry on a
//! missing input element belongs to the orchestrator pipeline.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::browser::InputKind;
use crate::browser::Tab;
use crate::service_descriptor::ServiceDescriptor;
use crate::util;

#[derive(Error, Debug)]
pub enum InjectError {
    /// No input selector (primary or fallback) resolved to an element.
    /// The only failure the pipeline may retry.
    #[error("input element not found")]
    InputNotFound,

    /// The send control did not respond to the click: the input kept its
    /// text and the control never disabled.
    #[error("send control did not accept the click")]
    SendRejected,

    #[error("tab closed during injection")]
    TabGone,
}

#[async_trait]
pub trait Injector: Send + Sync {
    async fn inject(
        &self,
        tab: &dyn Tab,
        query: &str,
        descriptor: &ServiceDescriptor,
    ) -> Result<(), InjectError>;
}

/// Descriptor-driven injection: resolve the input via the fallback list,
/// clear it, type the query character by character with jittered cadence,
/// settle, click send, confirm the send was accepted.
#[derive(Debug, Default, Clone, Copy)]
pub struct DomInjector;

impl DomInjector {
    /// First selector from the fallback list that resolves to an input
    /// element, together with its kind.
    pub async fn resolve_input(
        tab: &dyn Tab,
        selectors: &[String],
    ) -> Result<(String, InputKind), InjectError> {
        for selector in selectors {
            if let Some(kind) = tab.input_kind(selector).await {
                return Ok((selector.clone(), kind));
            }
        }
        Err(InjectError::InputNotFound)
    }

    /// Replace the element's current text with the empty string, routed
    /// through the kind-appropriate mutation (contenteditable regions have
    /// no value setter).
    pub async fn clear_input(
        tab: &dyn Tab,
        selector: &str,
        kind: InputKind,
    ) -> Result<(), InjectError> {
        let ok = match kind {
            InputKind::Value => tab.set_value(selector, "").await,
            InputKind::ContentEditable => tab.set_text_content(selector, "").await,
        };
        if !ok || !tab.dispatch_input(selector).await {
            return Err(InjectError::TabGone);
        }
        Ok(())
    }

    /// Type `query` one character at a time at the descriptor's rate
    /// (±20% jitter), dispatching an input event after every character.
    pub async fn type_query(
        tab: &dyn Tab,
        selector: &str,
        kind: InputKind,
        query: &str,
        chars_per_second: u32,
    ) -> Result<(), InjectError> {
        let mut typed = String::with_capacity(query.len());
        for ch in query.chars() {
            typed.push(ch);
            let ok = match kind {
                InputKind::Value => tab.set_value(selector, &typed).await,
                InputKind::ContentEditable => tab.set_text_content(selector, &typed).await,
            };
            if !ok || !tab.dispatch_input(selector).await {
                return Err(InjectError::TabGone);
            }
            tokio::time::sleep(util::typing_delay(chars_per_second)).await;
        }
        Ok(())
    }

    /// First send selector that resolves to an element right now.
    pub async fn resolve_send(tab: &dyn Tab, selectors: &[String]) -> Option<String> {
        for selector in selectors {
            if tab.query(selector).await.is_some() {
                return Some(selector.clone());
            }
        }
        None
    }

    /// Wait (bounded) for the send control to be present and enabled.
    /// Several services keep it disabled until the input is non-empty.
    pub async fn wait_send_enabled(
        tab: &dyn Tab,
        selectors: &[String],
        within: Duration,
    ) -> Option<String> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            for selector in selectors {
                if let Some(node) = tab.query(selector).await
                    && !node.disabled
                {
                    return Some(selector.clone());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// The send "responded" iff the input cleared or the control disabled
    /// itself.
    pub async fn confirm_sent(tab: &dyn Tab, input_selector: &str, send_selector: &str) -> bool {
        let cleared = tab
            .input_text(input_selector)
            .await
            .map(|text| text.is_empty())
            .unwrap_or(true);
        if cleared {
            return true;
        }
        tab.query(send_selector)
            .await
            .map(|node| node.disabled)
            .unwrap_or(false)
    }

    /// Shared tail of every injection: settle, click, confirm.
    pub async fn submit(
        tab: &dyn Tab,
        descriptor: &ServiceDescriptor,
        input_selector: &str,
        send_selector: &str,
    ) -> Result<(), InjectError> {
        tokio::time::sleep(descriptor.injection_settle()).await;
        if !tab.click(send_selector).await {
            return Err(InjectError::SendRejected);
        }
        // Give the page a beat to react before judging the click.
        tokio::time::sleep(Duration::from_millis(150)).await;
        if Self::confirm_sent(tab, input_selector, send_selector).await {
            Ok(())
        } else {
            Err(InjectError::SendRejected)
        }
    }
}

#[async_trait]
impl Injector for DomInjector {
    async fn inject(
        &self,
        tab: &dyn Tab,
        query: &str,
        descriptor: &ServiceDescriptor,
    ) -> Result<(), InjectError> {
        let (input_selector, kind) =
            Self::resolve_input(tab, &descriptor.selectors.input).await?;
        tab.focus(&input_selector).await;
        Self::clear_input(tab, &input_selector, kind).await?;
        Self::type_query(
            tab,
            &input_selector,
            kind,
            query,
            descriptor.typing_chars_per_second,
        )
        .await?;
        let send_selector = Self::resolve_send(tab, &descriptor.selectors.send_button)
            .await
            .ok_or(InjectError::SendRejected)?;
        Self::submit(tab, descriptor, &input_selector, &send_selector).await
    }
}
