//! Stopping a session mid-flight: every non-terminal service lands in
//! `cancelled`, exactly one terminal event carries the `cancelled`
//! status, and the session goes silent afterwards.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use samay_core::protocol::EventMsg;
use samay_core::protocol::Op;
use samay_core::protocol::OverallStatus;
use samay_core::protocol::ServicePhase;
use samay_core::service_descriptor::CompletionHeuristic;

use common::sim_descriptor;
use common::sim_page;
use common::spawn_harness;
use common::start_session;

#[tokio::test(start_paused = true)]
async fn stop_cancels_both_services_and_goes_silent() {
    let harness = spawn_harness(
        vec![
            sim_descriptor(
                "svc-a",
                30_000,
                CompletionHeuristic::StableDom {
                    quiet_window_ms: 500,
                },
            ),
            sim_descriptor("svc-b", 30_000, CompletionHeuristic::SpinnerAbsent),
        ],
        vec![
            sim_page("svc-a").reply_chunk(Duration::from_millis(2_000), "too late A"),
            sim_page("svc-b")
                .reply_chunk(Duration::from_millis(2_000), "too late B")
                .with_spinner("#spinner", Duration::from_millis(2_000)),
        ],
    );

    let start_sub = start_session(&harness.samay, "hello", &["svc-a", "svc-b"], None).await;

    // Read events until the session id is known, then stop at 500ms.
    let mut events = Vec::new();
    let session_id = loop {
        let event = harness.samay.next_event().await.expect("event");
        if let EventMsg::SessionStarted(started) = &event.msg {
            let id = started.session_id.clone();
            events.push(event);
            break id;
        }
        events.push(event);
    };

    tokio::time::sleep(Duration::from_millis(500)).await;
    let stop_sub = harness
        .samay
        .submit(Op::StopSession {
            session_id: session_id.clone(),
        })
        .await
        .expect("submit stop");

    // Drain until the stop ack; the terminal session event must already
    // be in flight by then.
    let mut saw_stop_ack = false;
    while !saw_stop_ack {
        let event = harness.samay.next_event().await.expect("event");
        if event.id == stop_sub && matches!(event.msg, EventMsg::SessionStopped(_)) {
            saw_stop_ack = true;
        }
        events.push(event);
    }

    let completes: Vec<_> = events
        .iter()
        .filter_map(|event| match &event.msg {
            EventMsg::SessionComplete(complete) => Some(complete),
            _ => None,
        })
        .collect();
    assert_eq!(completes.len(), 1, "exactly one terminal event");
    assert_eq!(completes[0].overall_status, OverallStatus::Cancelled);
    assert!(completes[0].aggregate.is_empty());

    // Both services ended in `cancelled`.
    for service_id in ["svc-a", "svc-b"] {
        let terminal = events
            .iter()
            .filter_map(|event| match &event.msg {
                EventMsg::ServiceProgress(p) if p.service_id == service_id => Some(p.to_phase),
                _ => None,
            })
            .next_back();
        assert_eq!(terminal, Some(ServicePhase::Cancelled), "{service_id}");
    }

    // Cancellation safety: nothing further for this session, even after
    // the scripted replies would have landed.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let quiet =
        tokio::time::timeout(Duration::from_secs(1), harness.samay.next_event()).await;
    assert!(
        quiet.is_err(),
        "no events may follow the terminal one, got {quiet:?}"
    );
    let _ = start_sub;
}

#[tokio::test(start_paused = true)]
async fn stopping_an_unknown_session_is_an_error() {
    let harness = spawn_harness(vec![], vec![]);
    let sub_id = harness
        .samay
        .submit(Op::StopSession {
            session_id: "no-such-session".into(),
        })
        .await
        .expect("submit");
    let event = harness.samay.next_event().await.expect("event");
    assert_eq!(event.id, sub_id);
    assert!(matches!(event.msg, EventMsg::Error(_)));
}
