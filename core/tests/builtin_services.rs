//! The four stock service modules driven end-to-end against scripted
//! pages shaped like the real ones (same selectors, same completion
//! signals).

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use samay_core::Samay;
use samay_core::browser::Browser;
use samay_core::browser::InputKind;
use samay_core::config::Config;
use samay_core::config::ConfigOverrides;
use samay_core::protocol::OverallStatus;
use samay_core::sim::PageScript;
use samay_core::sim::SimBrowser;
use tempfile::TempDir;

use common::collect_session;
use common::start_session;

fn spawn_builtin(browser: &Arc<SimBrowser>, home: &TempDir) -> Samay {
    let config = Config::load_with_overrides(ConfigOverrides {
        samay_home: Some(home.path().to_path_buf()),
        tab_ready_grace: Some(Duration::from_millis(300)),
        ..Default::default()
    })
    .expect("config");
    Samay::spawn(config, Arc::clone(browser) as Arc<dyn Browser>)
}

#[tokio::test(start_paused = true)]
async fn chatgpt_module_reads_the_streaming_sentinel() {
    let home = TempDir::new().expect("tempdir");
    let browser = SimBrowser::new();
    browser.register(
        PageScript::new("https://chatgpt.com")
            .with_input("#prompt-textarea", InputKind::ContentEditable)
            .with_send("button[data-testid='send-button']")
            .with_reply("div[data-message-author-role='assistant']")
            .reply_chunk(Duration::from_millis(300), "Here you go.\nCopy code\nfn x() {}")
            .with_sentinel(
                "data-message-state",
                "streaming",
                "done",
                Duration::from_millis(900),
            ),
    );
    let samay = spawn_builtin(&browser, &home);

    let sub_id = start_session(&samay, "hello", &["chatgpt"], None).await;
    let session = collect_session(&samay, &sub_id).await;

    assert_eq!(session.complete.overall_status, OverallStatus::Complete);
    let reply = &session.complete.aggregate["chatgpt"];
    assert!(!reply.partial);
    // The copy-button label never reaches the aggregate.
    assert_eq!(reply.text, "Here you go.\nfn x() {}");
}

#[tokio::test(start_paused = true)]
async fn claude_module_settles_on_quiescence() {
    let home = TempDir::new().expect("tempdir");
    let browser = SimBrowser::new();
    browser.register(
        PageScript::new("https://claude.ai")
            .with_input("div[contenteditable='true'].ProseMirror", InputKind::ContentEditable)
            .with_send("button[aria-label='Send message']")
            .with_reply("div[data-testid='chat-message-content']")
            .reply_chunk(Duration::from_millis(300), "Thinking it through, ")
            .reply_chunk(Duration::from_millis(700), "here is the answer."),
    );
    let samay = spawn_builtin(&browser, &home);

    let sub_id = start_session(&samay, "hello", &["claude"], None).await;
    let session = collect_session(&samay, &sub_id).await;

    assert_eq!(session.complete.overall_status, OverallStatus::Complete);
    assert_eq!(
        session.complete.aggregate["claude"].text,
        "Thinking it through, here is the answer."
    );
}

#[tokio::test(start_paused = true)]
async fn gemini_module_waits_out_the_spinner() {
    let home = TempDir::new().expect("tempdir");
    let browser = SimBrowser::new();
    browser.register(
        PageScript::new("https://gemini.google.com")
            .with_input("rich-textarea div[contenteditable='true']", InputKind::ContentEditable)
            .with_send("button[aria-label='Send message']")
            .with_reply("message-content")
            .reply_chunk(Duration::from_millis(300), "Gemini's take.")
            .with_spinner("div.loading-indicator", Duration::from_millis(900)),
    );
    let samay = spawn_builtin(&browser, &home);

    let sub_id = start_session(&samay, "hello", &["gemini"], None).await;
    let session = collect_session(&samay, &sub_id).await;

    assert_eq!(session.complete.overall_status, OverallStatus::Complete);
    assert_eq!(session.complete.aggregate["gemini"].text, "Gemini's take.");
}

#[tokio::test(start_paused = true)]
async fn perplexity_module_harvests_citations_and_drops_related() {
    let home = TempDir::new().expect("tempdir");
    let browser = SimBrowser::new();
    browser.register(
        PageScript::new("https://www.perplexity.ai")
            .with_input("textarea[placeholder*='Ask']", InputKind::Value)
            .with_send("button[aria-label='Submit']")
            .with_reply("div.prose")
            .reply_chunk(
                Duration::from_millis(300),
                "Researched answer.\nRelated\nWhat about something else?",
            )
            .with_citations(
                "div.citations",
                Duration::from_millis(700),
                vec![
                    "https://source.example/a".to_string(),
                    "https://source.example/b".to_string(),
                ],
            ),
    );
    let samay = spawn_builtin(&browser, &home);

    let sub_id = start_session(&samay, "hello", &["perplexity"], None).await;
    let session = collect_session(&samay, &sub_id).await;

    assert_eq!(session.complete.overall_status, OverallStatus::Complete);
    let reply = &session.complete.aggregate["perplexity"];
    assert_eq!(reply.text, "Researched answer.");
    assert_eq!(
        reply.citations,
        vec![
            "https://source.example/a".to_string(),
            "https://source.example/b".to_string()
        ]
    );
}
