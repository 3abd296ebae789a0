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

//! `GET /events` — the per-session SSE stream. Blocks until either the client disconnects or
//! the registration is superseded by a later connection for the same session (see
//! `weave_core::sse::SseBroker`).

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Extension;
use futures::stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::session_middleware::SessionId;
use crate::state::AppState;

pub async fn events(
    State(state): State<AppState>,
    Extension(SessionId(session_id)): Extension<SessionId>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (rx, guard) = state.sse.register(session_id).await;

    let stream = ReceiverStream::new(rx).map(move |event| {
        // Keeping `guard` alive for as long as this stream is polled is the whole point: it
        // deregisters the connection (freeing the session for a new one) only when the stream
        // itself is dropped, i.e. when the client disconnects.
        let _ = &guard;
        Ok(Event::default()
            .event(event.event_name())
            .data(event.data().to_string()))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keep-alive"),
    )
}
