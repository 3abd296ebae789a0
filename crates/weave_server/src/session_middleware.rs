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

//! Session-cookie middleware: every request is bound to a 128-bit hex session id, minted fresh
//! when the cookie is absent or malformed.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use data_encoding::HEXLOWER;
use rand::RngCore;
use time::Duration;

pub const SESSION_COOKIE_NAME: &str = "weave_session";
const SESSION_ID_BYTES: usize = 16;
const SESSION_MAX_AGE: Duration = Duration::hours(24);

/// A request-scoped extension carrying the caller's session id, attached by [`session_layer`].
#[derive(Debug, Clone)]
pub struct SessionId(pub String);

fn is_valid_session_id(value: &str) -> bool {
    value.len() == SESSION_ID_BYTES * 2 && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    HEXLOWER.encode(&bytes)
}

/// Reads the `weave_session` cookie, minting and setting a fresh one when it is missing or does
/// not look like a 32-character hex id. The resolved id is attached to the request as a
/// [`SessionId`] extension for downstream handlers to extract.
pub async fn session_layer(jar: CookieJar, mut request: Request, next: Next) -> Response {
    let existing = jar
        .get(SESSION_COOKIE_NAME)
        .map(|c| c.value().to_owned())
        .filter(|v| is_valid_session_id(v));

    let (session_id, fresh_cookie) = match existing {
        Some(id) => (id, None),
        None => {
            let id = generate_session_id();
            let cookie = Cookie::build((SESSION_COOKIE_NAME, id.clone()))
                .path("/")
                .http_only(true)
                .secure(true)
                .same_site(SameSite::Strict)
                .max_age(SESSION_MAX_AGE)
                .build();
            (id, Some(cookie))
        }
    };

    request.extensions_mut().insert(SessionId(session_id));

    let mut response = next.run(request).await;
    if let Some(cookie) = fresh_cookie {
        let jar = CookieJar::new().add(cookie);
        for value in jar.iter() {
            if let Ok(header) = value.encoded().to_string().parse() {
                response.headers_mut().append(axum::http::header::SET_COOKIE, header);
            }
        }
    }
    response
}
