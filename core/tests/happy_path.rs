//! Two services answering at different speeds both land in the
//! aggregate, with a legal transition history and `complete` status.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use samay_core::protocol::OverallStatus;
use samay_core::protocol::ServicePhase;
use samay_core::service_descriptor::CompletionHeuristic;

use common::collect_session;
use common::sim_descriptor;
use common::sim_page;
use common::spawn_harness;
use common::start_session;

#[tokio::test(start_paused = true)]
async fn two_services_complete() {
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
            sim_page("svc-a").reply_chunk(Duration::from_millis(800), "world A"),
            sim_page("svc-b")
                .reply_chunk(Duration::from_millis(1_200), "world B")
                .with_spinner("#spinner", Duration::from_millis(1_200)),
        ],
    );

    let sub_id = start_session(&harness.samay, "hello", &["svc-a", "svc-b"], None).await;
    let session = collect_session(&harness.samay, &sub_id).await;

    assert_eq!(session.complete.overall_status, OverallStatus::Complete);
    assert_eq!(session.complete.aggregate.len(), 2);

    let reply_a = &session.complete.aggregate["svc-a"];
    assert_eq!(reply_a.text, "world A");
    assert!(!reply_a.partial);
    assert_eq!(reply_a.word_count, 2);

    let reply_b = &session.complete.aggregate["svc-b"];
    assert_eq!(reply_b.text, "world B");
    assert!(!reply_b.partial);

    // One service-response per service.
    assert_eq!(session.responses().len(), 2);

    // Every recorded transition is a legal DAG edge, and each service
    // walked the full happy path.
    session.assert_transitions_legal();
    let expected = vec![
        (ServicePhase::Pending, ServicePhase::TabOpening),
        (ServicePhase::TabOpening, ServicePhase::Injecting),
        (ServicePhase::Injecting, ServicePhase::Submitted),
        (ServicePhase::Submitted, ServicePhase::AwaitingReply),
        (ServicePhase::AwaitingReply, ServicePhase::Extracting),
        (ServicePhase::Extracting, ServicePhase::Done),
    ];
    assert_eq!(session.phases_for("svc-a"), expected);
    assert_eq!(session.phases_for("svc-b"), expected);

    // One tab per service, none shared.
    assert_eq!(harness.browser.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn tabs_are_reused_across_sessions() {
    let harness = spawn_harness(
        vec![sim_descriptor(
            "svc-a",
            30_000,
            CompletionHeuristic::StableDom {
                quiet_window_ms: 300,
            },
        )],
        vec![sim_page("svc-a").reply_chunk(Duration::from_millis(200), "first")],
    );

    let sub_one = start_session(&harness.samay, "one", &["svc-a"], None).await;
    collect_session(&harness.samay, &sub_one).await;

    let sub_two = start_session(&harness.samay, "two", &["svc-a"], None).await;
    let second = collect_session(&harness.samay, &sub_two).await;

    assert_eq!(second.complete.overall_status, OverallStatus::Complete);
    // The second session reused the first session's tab.
    assert_eq!(harness.browser.open_count(), 1);
}
