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

use axum::extract::State;

use crate::state::AppState;
use crate::templates::IndexTemplate;

/// `GET /` — the chat UI, seeded with the server's default generation settings.
pub async fn index(State(state): State<AppState>) -> IndexTemplate {
    IndexTemplate {
        steps: state.settings.steps,
        cfg: state.settings.cfg,
        seed: state.settings.seed,
        width: state.settings.width,
        height: state.settings.height,
    }
}
