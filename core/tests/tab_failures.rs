//! Browser-level failures: popup blockers and unconfigured services are
//! fatal for the affected service only, and the session status reflects
//! what survived.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use samay_core::browser::Browser;
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
async fn popup_blocker_fails_the_only_service() {
    let harness = spawn_harness(
        vec![sim_descriptor(
            "svc-a",
            30_000,
            CompletionHeuristic::SpinnerAbsent,
        )],
        vec![sim_page("svc-a").reply_chunk(Duration::from_millis(100), "unreachable")],
    );
    harness.browser.set_refuse_new_tabs(true);

    let sub_id = start_session(&harness.samay, "hello", &["svc-a"], None).await;
    let session = collect_session(&harness.samay, &sub_id).await;

    assert_eq!(session.complete.overall_status, OverallStatus::Error);
    assert_eq!(
        session.phases_for("svc-a"),
        vec![
            (ServicePhase::Pending, ServicePhase::TabOpening),
            (ServicePhase::TabOpening, ServicePhase::Failed),
        ]
    );

    let session_id = session.complete.session_id.clone();
    let (snapshot, _) = fetch_snapshot(&harness.samay, &session_id).await;
    assert_eq!(
        snapshot.services["svc-a"].error.as_ref().map(|e| e.kind),
        Some(ErrorKind::TabOpenFailed)
    );
}

#[tokio::test(start_paused = true)]
async fn popup_blocker_with_a_surviving_service_is_partial() {
    let harness = spawn_harness(
        vec![
            sim_descriptor(
                "svc-a",
                30_000,
                CompletionHeuristic::StableDom {
                    quiet_window_ms: 300,
                },
            ),
            sim_descriptor("svc-b", 30_000, CompletionHeuristic::SpinnerAbsent),
        ],
        vec![
            sim_page("svc-a").reply_chunk(Duration::from_millis(200), "made it"),
            sim_page("svc-b").reply_chunk(Duration::from_millis(200), "unreachable"),
        ],
    );
    // svc-a already has a tab the orchestrator can adopt; svc-b needs a
    // fresh one and the blocker refuses it.
    harness
        .browser
        .open_tab("https://svc-a.example/")
        .await
        .expect("preopen");
    harness.browser.set_refuse_new_tabs(true);

    let sub_id = start_session(&harness.samay, "hello", &["svc-a", "svc-b"], None).await;
    let session = collect_session(&harness.samay, &sub_id).await;

    assert_eq!(session.complete.overall_status, OverallStatus::Partial);
    assert_eq!(session.complete.aggregate.len(), 1);
    assert_eq!(session.complete.aggregate["svc-a"].text, "made it");
    assert_eq!(
        session.phases_for("svc-b").last(),
        Some(&(ServicePhase::TabOpening, ServicePhase::Failed))
    );
}

#[tokio::test(start_paused = true)]
async fn unconfigured_service_fails_fast_and_others_proceed() {
    let harness = spawn_harness(
        vec![sim_descriptor(
            "svc-a",
            30_000,
            CompletionHeuristic::StableDom {
                quiet_window_ms: 300,
            },
        )],
        vec![sim_page("svc-a").reply_chunk(Duration::from_millis(200), "fine")],
    );

    let sub_id = start_session(&harness.samay, "hello", &["svc-a", "ghost"], None).await;
    let session = collect_session(&harness.samay, &sub_id).await;

    assert_eq!(session.complete.overall_status, OverallStatus::Partial);
    assert_eq!(session.complete.aggregate.len(), 1);
    assert_eq!(
        session.phases_for("ghost"),
        vec![(ServicePhase::Pending, ServicePhase::Failed)]
    );

    let session_id = session.complete.session_id.clone();
    let (snapshot, _) = fetch_snapshot(&harness.samay, &session_id).await;
    assert_eq!(
        snapshot.services["ghost"].error.as_ref().map(|e| e.kind),
        Some(ErrorKind::DescriptorNotFound)
    );
}

#[tokio::test(start_paused = true)]
async fn tab_dying_mid_extraction_surfaces_as_timeout() {
    let harness = spawn_harness(
        vec![sim_descriptor(
            "svc-a",
            2_000,
            CompletionHeuristic::SpinnerAbsent,
        )],
        vec![sim_page("svc-a").reply_chunk(Duration::from_millis(5_000), "never lands")],
    );

    let sub_id = start_session(&harness.samay, "hello", &["svc-a"], None).await;

    // Let injection finish, then close the tab under the extractor.
    tokio::time::sleep(Duration::from_millis(700)).await;
    for tab in harness.browser.tabs() {
        tab.kill();
    }

    let session = collect_session(&harness.samay, &sub_id).await;
    assert_eq!(session.complete.overall_status, OverallStatus::Error);
    let (_, terminal) = *session.phases_for("svc-a").last().expect("transitions");
    assert!(
        matches!(terminal, ServicePhase::Timeout | ServicePhase::Failed),
        "got {terminal:?}"
    );
}
