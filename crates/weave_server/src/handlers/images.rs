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

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use tracing::warn;
use uuid::Uuid;

use crate::error::WeaveError;
use crate::session_middleware::SessionId;
use crate::state::AppState;

fn png_response(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "image/png")], bytes).into_response()
}

fn parse_ephemeral_id(raw: &str) -> Result<Uuid, WeaveError> {
    let raw = raw.strip_suffix(".png").unwrap_or(raw);
    Uuid::parse_str(raw).map_err(|_| WeaveError::Validation(format!("invalid image id: {raw}")))
}

/// `GET /images/{id}` and `GET /images/{id}.png` — an ephemeral, session-independent image.
pub async fn ephemeral_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, WeaveError> {
    let id = parse_ephemeral_id(&id)?;
    let (bytes, _width, _height) = state.ephemeral_images.get(id)?;
    Ok(png_response(bytes))
}

/// `GET /sessions/{sid}/images/{filename}` — a session-scoped image. 403s if the requesting
/// session does not match the path session, regardless of whether the image exists.
pub async fn session_image(
    State(state): State<AppState>,
    Extension(SessionId(caller_session)): Extension<SessionId>,
    Path((path_session, filename)): Path<(String, String)>,
) -> Result<Response, WeaveError> {
    if caller_session != path_session {
        warn!(
            caller_session,
            path_session, "rejected cross-session image access"
        );
        return Err(WeaveError::Forbidden);
    }

    let message_id: u64 = filename
        .strip_suffix(".png")
        .unwrap_or(&filename)
        .parse()
        .map_err(|_| WeaveError::Validation(format!("invalid image filename: {filename}")))?;

    let bytes = state.session_images.load(&path_session, message_id)?;
    Ok(png_response(bytes))
}
