//! Deadline behavior: a slow service surfaces whatever text was visible
//! as a partial reply (phase `done`), an empty container at the deadline
//! is a `timeout` phase, and partials still count toward `complete`.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use samay_core::protocol::ErrorKind;
use samay_core::protocol::OverallStatus;
use samay_core::protocol::ServicePhase;
use samay_core::service_descriptor::CompletionHeuristic;

use common::collect_session;
use common::fetch_snapshot;
use common::sim_descriptor;
use common::sim_page;
use common::spawn_harness;
use common::start_session;

#[tokio::test(start_paused = true)]
async fn slow_service_yields_partial_done() {
    let harness = spawn_harness(
        vec![
            sim_descriptor(
                "svc-a",
                30_000,
                CompletionHeuristic::StableDom {
                    quiet_window_ms: 500,
                },
            ),
            // svc-b's heuristic can only fire at 4s, past its 3s budget.
            sim_descriptor("svc-b", 3_000, CompletionHeuristic::SpinnerAbsent),
        ],
        vec![
            sim_page("svc-a").reply_chunk(Duration::from_millis(800), "world A"),
            sim_page("svc-b")
                .reply_chunk(Duration::from_millis(1_000), "world B so far")
                .reply_chunk(Duration::from_millis(4_000), " and the rest")
                .with_spinner("#spinner", Duration::from_millis(4_000)),
        ],
    );

    let sub_id = start_session(&harness.samay, "hello", &["svc-a", "svc-b"], None).await;
    let session = collect_session(&harness.samay, &sub_id).await;

    // Partials count as done, so the session is complete.
    assert_eq!(session.complete.overall_status, OverallStatus::Complete);

    let reply_a = &session.complete.aggregate["svc-a"];
    assert!(!reply_a.partial);
    assert_eq!(reply_a.text, "world A");

    let reply_b = &session.complete.aggregate["svc-b"];
    assert!(reply_b.partial);
    assert_eq!(reply_b.text, "world B so far");

    session.assert_transitions_legal();
    assert_eq!(
        session.phases_for("svc-b").last(),
        Some(&(ServicePhase::Extracting, ServicePhase::Done))
    );
}

#[tokio::test(start_paused = true)]
async fn empty_container_at_deadline_is_timeout() {
    let harness = spawn_harness(
        vec![
            sim_descriptor(
                "svc-a",
                30_000,
                CompletionHeuristic::StableDom {
                    quiet_window_ms: 300,
                },
            ),
            // svc-b never answers at all.
            sim_descriptor("svc-b", 2_000, CompletionHeuristic::SpinnerAbsent),
        ],
        vec![
            sim_page("svc-a").reply_chunk(Duration::from_millis(500), "answer"),
            sim_page("svc-b"),
        ],
    );

    let sub_id = start_session(&harness.samay, "hello", &["svc-a", "svc-b"], None).await;
    let session = collect_session(&harness.samay, &sub_id).await;

    // One service done, one timed out: partial session.
    assert_eq!(session.complete.overall_status, OverallStatus::Partial);
    assert_eq!(session.complete.aggregate.len(), 1);
    assert!(session.complete.aggregate.contains_key("svc-a"));

    assert_eq!(
        session.phases_for("svc-b").last(),
        Some(&(ServicePhase::Extracting, ServicePhase::Timeout))
    );

    // The snapshot keeps the timeout reason for the host UI.
    let session_id = session.complete.session_id.clone();
    let (snapshot, _) = fetch_snapshot(&harness.samay, &session_id).await;
    let state = &snapshot.services["svc-b"];
    assert_eq!(state.phase, ServicePhase::Timeout);
    assert_eq!(
        state.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::ExtractionTimeout)
    );
}

#[tokio::test(start_paused = true)]
async fn zero_timeout_is_immediate() {
    let harness = spawn_harness(
        vec![sim_descriptor(
            "svc-a",
            0,
            CompletionHeuristic::SpinnerAbsent,
        )],
        vec![sim_page("svc-a").reply_chunk(Duration::from_millis(100), "never seen")],
    );

    let sub_id = start_session(&harness.samay, "hello", &["svc-a"], None).await;
    let session = collect_session(&harness.samay, &sub_id).await;

    assert_eq!(session.complete.overall_status, OverallStatus::Error);
    assert!(session.complete.aggregate.is_empty());
    // The exact phase the deadline lands in depends on how far the
    // pipeline got within zero budget; the terminal phase must be
    // `timeout` either way.
    let (_, terminal) = *session.phases_for("svc-a").last().expect("transitions");
    assert_eq!(terminal, ServicePhase::Timeout);
    session.assert_transitions_legal();
}
