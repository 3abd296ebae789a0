/* Copyright 2023- The Binedge, Lda team. All rights reserved.
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *     http://www.apache.org/licenses/LICENSE-2.0
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Weave: a local-first desktop image-generation orchestration backend. Ties a conversational
//! agent (via an Ollama-compatible chat endpoint) to an external compute worker process over a
//! private Unix socket, fronted by a small HTTP/SSE server for the desktop shell's UI.

#![deny(unsafe_code)]

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use weave_compute::ComputeClient;
use weave_core::image_store::{self, EphemeralImageStore, SessionImageStore};
use weave_core::rate_limiter::{self, RateLimiter};
use weave_core::session::SessionRegistry;
use weave_core::sse::SseBroker;
use weave_core::{GenerationSettings, WeaveSettings};
use weave_llm::LlmClient;

pub mod assets;
pub mod cli;
pub mod error;
pub mod generation;
pub mod graceful_shutdown;
pub mod handlers;
pub mod routes;
pub mod session_middleware;
pub mod state;
pub mod templates;

use error::WeaveError;
use state::AppState;

/// Name of the Unix socket the compute worker binds inside `settings.runtime_dir`.
const COMPUTE_SOCKET_NAME: &str = "compute.sock";

/// Builds process settings from parsed CLI flags, layered over [`WeaveSettings::default`] for
/// the fields the CLI doesn't own directly (the per-user sessions root and runtime directory).
fn settings_from_args(args: &cli::TopLevel) -> WeaveSettings {
    WeaveSettings {
        port: args.port,
        steps: args.steps,
        cfg: args.cfg,
        width: args.width,
        height: args.height,
        seed: args.seed,
        llm_seed: args.llm_seed,
        ollama_url: args.ollama_url.clone(),
        ollama_model: args.ollama_model.clone(),
        log_level: args.log_level.clone(),
        agent_prompt: args.agent_prompt.clone().into(),
        agent_tools_prompt: args.agent_tools_prompt.clone().into(),
        compute_worker: args.compute_worker.clone().into(),
        ..WeaveSettings::default()
    }
}

/// Reads a prompt file into an `Arc<str>`, wrapping I/O failures with the offending path so
/// operators can find a missing or misconfigured prompt file immediately at startup.
fn read_prompt_file(path: &std::path::Path) -> Result<Arc<str>, WeaveError> {
    std::fs::read_to_string(path)
        .map(|text| Arc::from(text.as_str()))
        .map_err(|e| WeaveError::Internal(format!("could not read {}: {e}", path.display())))
}

/// Runs Weave to completion: builds the shared application state, spawns the compute worker,
/// binds the HTTP listener, and serves until a `CTRL+C` signal starts a graceful shutdown.
pub async fn run(args: cli::TopLevel) -> Result<(), WeaveError> {
    let settings = settings_from_args(&args);
    settings
        .validate()
        .map_err(|e| WeaveError::Validation(e.to_string()))?;
    settings
        .ensure_directories()
        .map_err(|e| WeaveError::Internal(e.to_string()))?;

    let agent_prompt = read_prompt_file(&settings.agent_prompt)?;
    let agent_tools_prompt = read_prompt_file(&settings.agent_tools_prompt)?;

    let llm = Arc::new(LlmClient::new(settings.ollama_url.clone()));
    if !llm.is_reachable().await {
        warn!(
            ollama_url = %settings.ollama_url,
            "language model endpoint is not reachable yet; continuing, chat requests will fail until it is"
        );
    }

    let compute = Arc::new(
        ComputeClient::spawn(&settings.compute_worker, &settings.runtime_dir, COMPUTE_SOCKET_NAME)
            .await
            .map_err(WeaveError::from)?,
    );

    let default_settings = GenerationSettings {
        steps: settings.steps,
        cfg: settings.cfg,
        seed: settings.seed,
    };
    let settings = Arc::new(settings);

    let state = AppState {
        sessions: Arc::new(SessionRegistry::new(settings.sessions_root.clone(), default_settings)),
        sse: Arc::new(SseBroker::new()),
        rate_limiter: Arc::new(RateLimiter::new()),
        ephemeral_images: Arc::new(EphemeralImageStore::new()),
        session_images: Arc::new(SessionImageStore::new(settings.sessions_root.clone())),
        compute,
        llm,
        agent_prompt,
        agent_tools_prompt,
        settings: Arc::clone(&settings),
    };

    let cancel = CancellationToken::new();
    let rate_sweeper = tokio::spawn(rate_limiter::run_sweeper(
        Arc::clone(&state.rate_limiter),
        cancel.clone().cancelled_owned(),
    ));
    let image_sweeper = tokio::spawn(image_store::run_sweeper(
        Arc::clone(&state.ephemeral_images),
        cancel.clone().cancelled_owned(),
    ));

    let router = routes::routes(state.clone());
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", settings.port))
        .await
        .map_err(|e| WeaveError::Internal(format!("could not bind to port {}: {e}", settings.port)))?;
    info!(port = settings.port, "listening");

    let serve_result = axum::serve(listener, router)
        .with_graceful_shutdown(graceful_shutdown::global_shutdown_starts())
        .await;

    info!("shutting down");
    cancel.cancel();
    let _ = rate_sweeper.await;
    let _ = image_sweeper.await;

    if let Err(e) = weave_compute::shutdown(&state.compute).await {
        error!(error = %e, "error shutting down compute worker");
    }

    serve_result.map_err(|e| WeaveError::Internal(format!("server error: {e}")))
}
