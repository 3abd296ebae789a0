//! Integration tests for `POST /chat`, the two-stage agent turn. Exercises the real router, a
//! real (fake-binary-backed) compute worker, and a minimal mock of the Ollama-compatible chat
//! endpoint, asserting on the SSE event sequence a caller actually observes.

mod common;

use std::time::Duration;

use weave_core::sse::SseEvent;

/// Drains whatever is already queued on `rx`, relying on the fact that by the time `/chat`'s
/// response comes back every SSE send for that turn has already happened synchronously inside
/// the handler — so this only needs a short idle timeout, not a race against the handler.
async fn drain(rx: &mut tokio::sync::mpsc::Receiver<SseEvent>) -> Vec<SseEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        events.push(event);
    }
    events
}

fn collapse_names(events: &[SseEvent]) -> Vec<&'static str> {
    let mut names: Vec<&'static str> = Vec::new();
    for event in events {
        let name = event.event_name();
        if names.last() != Some(&name) {
            names.push(name);
        }
    }
    names
}

#[tokio::test]
async fn agent_turn_with_generation_emits_events_in_spec_order() {
    let app = common::spawn_test_app().await;

    // Mint the session and register for its SSE stream before posting, so nothing the handler
    // sends is dropped for lack of a listener.
    let mint = app.server.post("/new-chat").await;
    mint.assert_status_ok();
    let session_id = common::session_id_from(&mint);
    let (mut rx, _guard) = app.state.sse.register(session_id).await;

    let response = app
        .server
        .post("/chat")
        .form(&[("message", "please TRIGGER_GENERATE a cat in space")])
        .await;
    response.assert_status_ok();

    let events = drain(&mut rx).await;
    assert_eq!(
        collapse_names(&events),
        vec![
            "connected",
            "agent-thinking",
            "agent-thinking",
            "agent-token",
            "prompt-update",
            "resolved-prompt",
            "settings-update",
            "generation-started",
            "image-ready",
            "agent-done",
        ]
    );

    let thinking: Vec<&SseEvent> = events
        .iter()
        .filter(|e| matches!(e, SseEvent::AgentThinking { .. }))
        .collect();
    assert_eq!(thinking.len(), 2);
    assert_eq!(thinking[0], &SseEvent::AgentThinking { started: false, expanded: false });
    assert_eq!(thinking[1], &SseEvent::AgentThinking { started: true, expanded: true });

    assert!(events.contains(&SseEvent::PromptUpdate { prompt: "a cat in space".into() }));
    assert!(events.contains(&SseEvent::ResolvedPrompt { prompt: "a cat in space".into() }));

    app.shutdown().await;
}

#[tokio::test]
async fn agent_turn_without_generation_skips_generation_events() {
    let app = common::spawn_test_app().await;

    let mint = app.server.post("/new-chat").await;
    mint.assert_status_ok();
    let session_id = common::session_id_from(&mint);
    let (mut rx, _guard) = app.state.sse.register(session_id).await;

    let response = app.server.post("/chat").form(&[("message", "just chatting, no image")]).await;
    response.assert_status_ok();

    let events = drain(&mut rx).await;
    let names = collapse_names(&events);
    assert!(!names.contains(&"generation-started"));
    assert!(!names.contains(&"image-ready"));
    assert_eq!(names.last(), Some(&"agent-done"));

    app.shutdown().await;
}

#[tokio::test]
async fn extraction_failing_twice_clears_history_instead_of_proceeding_to_stage_two() {
    let app = common::spawn_test_app().await;

    let mint = app.server.post("/new-chat").await;
    mint.assert_status_ok();
    let session_id = common::session_id_from(&mint);
    let (mut rx, _guard) = app.state.sse.register(session_id).await;

    let response = app.server.post("/chat").form(&[("message", "FORCE_EXTRACT_FAIL please")]).await;
    response.assert_status_ok();

    let events = drain(&mut rx).await;
    assert_eq!(collapse_names(&events), vec!["connected", "agent-thinking", "agent-retry", "error"]);
    assert!(events.contains(&SseEvent::Error {
        message: "I'm having trouble; starting fresh".into()
    }));

    app.shutdown().await;
}

#[tokio::test]
async fn generation_runs_concurrently_with_stage_two_streaming() {
    let app = common::spawn_test_app().await;
    app.set_compute_delay_ms(250);
    app.set_llm_delay_ms(250);

    let mint = app.server.post("/new-chat").await;
    mint.assert_status_ok();

    let started = std::time::Instant::now();
    let response = app
        .server
        .post("/chat")
        .form(&[("message", "please TRIGGER_GENERATE a cat in space")])
        .await;
    response.assert_status_ok();
    let elapsed = started.elapsed();

    // Sequential execution would take >= 500ms (250ms compute + 250ms Stage 2 reply); running
    // them as sibling tasks should keep the whole turn well under the sum.
    assert!(
        elapsed < Duration::from_millis(450),
        "expected compute and Stage 2 streaming to overlap, turn took {elapsed:?}"
    );

    app.shutdown().await;
}
