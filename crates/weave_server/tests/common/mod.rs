//! Shared harness for the multi-request integration tests in this directory: builds a real
//! [`AppState`] (real sessions root and runtime dir under `tempfile::tempdir`, a real
//! [`weave_compute::ComputeClient`] talking to the `fake_compute_worker` fixture binary over an
//! actual Unix socket, and a minimal in-process stand-in for the Ollama-compatible chat
//! endpoint) and wraps the real router in [`axum_test::TestServer`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::Json;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use axum_test::{TestServer, TestServerConfig};
use serde_json::{json, Value};
use tempfile::TempDir;

use weave_compute::ComputeClient;
use weave_core::conversation::GenerationSettings;
use weave_core::image_store::{EphemeralImageStore, SessionImageStore};
use weave_core::rate_limiter::RateLimiter;
use weave_core::session::SessionRegistry;
use weave_core::sse::SseBroker;
use weave_core::WeaveSettings;
use weave_llm::LlmClient;
use weave_server::state::AppState;

const FAKE_COMPUTE_WORKER: &str = env!("CARGO_BIN_EXE_fake_compute_worker");

/// A fully wired test instance. Holds the temp directories and the mock LLM server's join handle
/// alive for the instance's lifetime, and the router (not just one `TestServer`) so tests that
/// need a second, independent cookie jar for a second "session" can build one.
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    router: Router,
    llm_stage2_delay_ms: Arc<AtomicU64>,
    _sessions_dir: TempDir,
    _runtime_dir: TempDir,
    _llm_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// A second `TestServer` over the same router and [`AppState`], with its own cookie jar —
    /// i.e. a second browser session hitting the same backend.
    pub fn second_client(&self) -> TestServer {
        TestServer::new_with_config(self.router.clone(), test_server_config())
            .expect("failed to start second test server")
    }

    /// Sets the artificial delay the fake compute worker waits before replying to every request,
    /// used by the concurrency test to prove `generateImage` overlaps Stage 2 streaming rather
    /// than following it.
    pub fn set_compute_delay_ms(&self, ms: u64) {
        let marker = self.state.compute.socket_path().with_extension("delay_ms");
        std::fs::write(marker, ms.to_string()).expect("failed to write compute delay marker");
    }

    /// Sets the artificial delay the mock LLM endpoint waits before returning Stage 2's
    /// conversational reply.
    pub fn set_llm_delay_ms(&self, ms: u64) {
        self.llm_stage2_delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Tears down the fake compute worker process, mirroring the shutdown path `weave_server::run`
    /// uses in production. Tests should call this once they're done.
    pub async fn shutdown(&self) {
        if let Err(e) = weave_compute::shutdown(&self.state.compute).await {
            eprintln!("error shutting down fake compute worker in test: {e}");
        }
    }
}

/// Pulls the freshly minted session id out of a response's `Set-Cookie` header. Panics if the
/// response did not mint one — callers should hit an endpoint behind the session layer first
/// (anything but `/ready` and `/static/*`, see `routes.rs`).
pub fn session_id_from(response: &axum_test::TestResponse) -> String {
    let raw = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("response did not mint a session cookie")
        .to_str()
        .expect("Set-Cookie header was not valid UTF-8");
    raw.split(';')
        .next()
        .and_then(|kv| kv.split_once('='))
        .map(|(_, v)| v.to_owned())
        .expect("malformed Set-Cookie header")
}

fn test_server_config() -> TestServerConfig {
    TestServerConfig {
        save_cookies: true,
        ..Default::default()
    }
}

/// The mock chat endpoint's two response shapes, keyed off whether the request advertised any
/// tools: Stage 1 (extraction) always sends `update_generation`'s tool definition, Stage 2
/// (the conversational reply) never does. Driven by keywords in the caller's message so each
/// test can pick a scenario without any extra wiring:
///   `FORCE_EXTRACT_FAIL` — every extraction call answers 503, so both attempts fail
///   `TRIGGER_GENERATE`   — extraction resolves a prompt and asks the agent to generate it
/// Anything else resolves no prompt and does not trigger generation.
async fn mock_chat(stage2_delay_ms: Arc<AtomicU64>, Json(body): Json<Value>) -> Response {
    let tools_present = body
        .get("tools")
        .and_then(Value::as_array)
        .map(|tools| !tools.is_empty())
        .unwrap_or(false);
    let last_message = body["messages"]
        .as_array()
        .and_then(|messages| messages.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or("")
        .to_owned();

    if tools_present && last_message.contains("FORCE_EXTRACT_FAIL") {
        return (StatusCode::SERVICE_UNAVAILABLE, "model overloaded").into_response();
    }

    let body = if tools_present {
        extraction_chunks(&last_message)
    } else {
        if stage2_delay_ms.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(stage2_delay_ms.load(Ordering::SeqCst))).await;
        }
        reply_chunks()
    };
    ([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response()
}

fn extraction_chunks(message: &str) -> String {
    let generate_image = message.contains("TRIGGER_GENERATE");
    let mut arguments = json!({ "generate_image": generate_image });
    if generate_image {
        arguments["prompt"] = json!("a cat in space");
    }
    let call = json!({
        "message": {
            "role": "assistant",
            "content": "",
            "tool_calls": [{ "function": { "name": "update_generation", "arguments": arguments } }],
        },
        "done": false,
    });
    let done = json!({ "message": { "role": "assistant", "content": "" }, "done": true, "total_duration": 1 });
    format!("{call}\n{done}\n")
}

fn reply_chunks() -> String {
    let mut out = String::new();
    for token in ["Sure", ", generating", " that now."] {
        out.push_str(&json!({ "message": { "role": "assistant", "content": token }, "done": false }).to_string());
        out.push('\n');
    }
    out.push_str(&json!({ "message": { "role": "assistant", "content": "" }, "done": true, "total_duration": 1 }).to_string());
    out.push('\n');
    out
}

async fn mock_tags() -> &'static str {
    "{}"
}

/// Starts the mock Ollama-compatible endpoint on an ephemeral loopback port, returning its base
/// URL, the Stage 2 delay handle, and the task serving it (kept alive by the caller).
async fn spawn_mock_llm() -> (String, Arc<AtomicU64>, tokio::task::JoinHandle<()>) {
    let stage2_delay_ms = Arc::new(AtomicU64::new(0));
    let delay_for_router = stage2_delay_ms.clone();
    let router = Router::new()
        .route(
            "/api/chat",
            post(move |body: Json<Value>| mock_chat(delay_for_router.clone(), body)),
        )
        .route("/api/tags", get(mock_tags));

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
        .await
        .expect("failed to bind mock llm listener");
    let addr = listener.local_addr().expect("mock llm listener has no local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    (format!("http://{addr}"), stage2_delay_ms, task)
}

/// Builds a fresh [`TestApp`]: its own session root, runtime dir, fake compute worker process,
/// and mock LLM server, all torn down when the test drops it (the worker process only once
/// [`TestApp::shutdown`] is called).
pub async fn spawn_test_app() -> TestApp {
    let sessions_dir = tempfile::tempdir().expect("failed to create sessions tempdir");
    let runtime_dir = tempfile::tempdir().expect("failed to create runtime tempdir");

    let compute = ComputeClient::spawn(
        std::path::Path::new(FAKE_COMPUTE_WORKER),
        runtime_dir.path(),
        "compute.sock",
    )
    .await
    .expect("failed to spawn fake compute worker");

    let (llm_base_url, llm_stage2_delay_ms, llm_task) = spawn_mock_llm().await;

    let default_settings = GenerationSettings { steps: 20, cfg: 3.5, seed: -1 };
    let mut settings = WeaveSettings::default();
    settings.sessions_root = sessions_dir.path().to_owned();
    settings.runtime_dir = runtime_dir.path().to_owned();
    settings.ollama_url = llm_base_url.clone();
    // Small dimensions keep the fake worker's canned image tiny.
    settings.width = 64;
    settings.height = 64;

    let state = AppState {
        sessions: Arc::new(SessionRegistry::new(settings.sessions_root.clone(), default_settings)),
        sse: Arc::new(SseBroker::new()),
        rate_limiter: Arc::new(RateLimiter::new()),
        ephemeral_images: Arc::new(EphemeralImageStore::new()),
        session_images: Arc::new(SessionImageStore::new(settings.sessions_root.clone())),
        compute: Arc::new(compute),
        llm: Arc::new(LlmClient::new(llm_base_url)),
        agent_prompt: Arc::from("You are Weave. The pending generation prompt is: {prompt}"),
        agent_tools_prompt: Arc::from("Call update_generation with the user's desired prompt and parameters."),
        settings: Arc::new(settings),
    };

    let router = weave_server::routes::routes(state.clone());
    let server =
        TestServer::new_with_config(router.clone(), test_server_config()).expect("failed to start test server");

    TestApp {
        server,
        state,
        router,
        llm_stage2_delay_ms,
        _sessions_dir: sessions_dir,
        _runtime_dir: runtime_dir,
        _llm_task: llm_task,
    }
}
