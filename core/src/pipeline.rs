//! The per-service processing pipeline.
//!
//! One task per (session, service): queue permit → tab → inject →
//! extract → terminal phase. The absolute deadline is armed before the
//! first suspension point; cancellation is observed at every await; the
//! tab-map cleanup runs in a guarded exit path regardless of how the
//! pipeline ended.

use std::cmp;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio::time::timeout_at;
use tracing::debug;

use samay_protocol::protocol::ErrorKind;
use samay_protocol::protocol::ServicePhase;

use crate::inject::InjectError;
use crate::service_descriptor::ServiceDescriptor;
use crate::services::ServiceAutomation;
use crate::session::SessionHandle;
use crate::tabs::TabManager;
use crate::util;

pub(crate) async fn run_service(
    sess: Arc<SessionHandle>,
    service_id: String,
    descriptor: ServiceDescriptor,
    automation: ServiceAutomation,
    tabs: Arc<TabManager>,
    service_lock: Arc<Semaphore>,
    tab_ready_grace: Duration,
) {
    // At most one live session drives a given service; later sessions
    // queue here (FIFO) and advance when the live one terminates.
    let _permit = tokio::select! {
        _ = sess.cancel_token().cancelled() => return,
        permit = Arc::clone(&service_lock).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };

    let deadline = Instant::now() + descriptor.per_service_timeout();
    tokio::select! {
        _ = sess.cancel_token().cancelled() => {
            debug!(service_id, "pipeline cancelled");
        }
        _ = drive(
            &sess,
            &service_id,
            &descriptor,
            &automation,
            &tabs,
            tab_ready_grace,
            deadline,
        ) => {}
    }

    // Guarded exit: runs on success, failure, and cancellation alike.
    tabs.drop_if_dead(&service_id).await;
}

async fn drive(
    sess: &SessionHandle,
    service_id: &str,
    descriptor: &ServiceDescriptor,
    automation: &ServiceAutomation,
    tabs: &TabManager,
    tab_ready_grace: Duration,
    deadline: Instant,
) {
    let query = sess.query();

    if !sess.transition(service_id, ServicePhase::TabOpening) {
        return;
    }
    let tab = match timeout_at(deadline, tabs.acquire(descriptor)).await {
        Err(_elapsed) => {
            sess.timeout(service_id, "tab-opening");
            return;
        }
        Ok(Err(err)) => {
            sess.fail(service_id, ErrorKind::TabOpenFailed, err.to_string());
            return;
        }
        Ok(Ok(tab)) => tab,
    };
    sess.set_tab(service_id, tab.id());

    // Wait for the document, but only so long: a stuck loading bar must
    // not eat the whole service budget.
    let ready_deadline = cmp::min(deadline, Instant::now() + tab_ready_grace);
    let _ = timeout_at(ready_deadline, tab.wait_ready()).await;

    if !sess.transition(service_id, ServicePhase::Injecting) {
        return;
    }
    let injected_at = Instant::now();
    let mut injection = timeout_at(
        deadline,
        automation.injector.inject(tab.as_ref(), &query, descriptor),
    )
    .await;

    // One automatic retry, only for a missing input element with the tab
    // still alive. The repeated `injecting` phase is the retry marker.
    if matches!(injection, Ok(Err(InjectError::InputNotFound))) && tab.is_alive() {
        if !sess.transition(service_id, ServicePhase::Injecting) {
            return;
        }
        if timeout_at(deadline, tokio::time::sleep(util::backoff(1)))
            .await
            .is_err()
        {
            sess.timeout(service_id, "injection");
            return;
        }
        injection = timeout_at(
            deadline,
            automation.injector.inject(tab.as_ref(), &query, descriptor),
        )
        .await;
    }

    match injection {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            sess.fail(service_id, ErrorKind::InjectionFailed, err.to_string());
            return;
        }
        Err(_elapsed) => {
            sess.timeout(service_id, "injection");
            return;
        }
    }

    if !sess.transition(service_id, ServicePhase::Submitted) {
        return;
    }
    if !sess.transition(service_id, ServicePhase::AwaitingReply) {
        return;
    }
    if !sess.transition(service_id, ServicePhase::Extracting) {
        return;
    }

    match automation
        .extractor
        .extract(tab.as_ref(), descriptor, deadline, injected_at)
        .await
    {
        Ok(reply) => sess.complete_service(service_id, reply),
        Err(crate::extract::ExtractError::Timeout) => sess.timeout(service_id, "extraction"),
        Err(err) => sess.fail(service_id, ErrorKind::Internal, err.to_string()),
    }
}
