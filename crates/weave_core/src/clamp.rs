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

//! Clamping of generation parameters submitted by a user form or an agent tool call.

pub const MIN_STEPS: u32 = 1;
pub const MAX_STEPS: u32 = 100;
pub const MIN_CFG: f32 = 0.0;
pub const MAX_CFG: f32 = 20.0;
pub const MIN_SEED: i64 = -1;

/// A single field that had to be clamped, worded the way it is surfaced in chat
/// (`"steps 150→100 (maximum is 100)"`).
#[derive(Debug, Clone, PartialEq)]
pub struct ClampedField {
    pub field: &'static str,
    pub message: String,
}

/// The result of clamping a (steps, cfg, seed) triple: the in-range values, plus a record of
/// whatever had to move.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationClamp {
    pub steps: u32,
    pub cfg: f32,
    pub seed: i64,
    pub clamped: Vec<ClampedField>,
}

impl GenerationClamp {
    pub fn is_clamped(&self) -> bool {
        !self.clamped.is_empty()
    }
}

/// Clamps `steps` to `1..=100`, `cfg` to `0.0..=20.0`, and `seed` to `>= -1`, recording each
/// adjustment made.
pub fn clamp_generation(steps: u32, cfg: f32, seed: i64) -> GenerationClamp {
    let mut clamped = Vec::new();

    let clamped_steps = steps.clamp(MIN_STEPS, MAX_STEPS);
    if clamped_steps != steps {
        let message = if steps > MAX_STEPS {
            format!("steps {steps}→{clamped_steps} (maximum is {MAX_STEPS})")
        } else {
            format!("steps {steps}→{clamped_steps} (minimum is {MIN_STEPS})")
        };
        clamped.push(ClampedField { field: "steps", message });
    }

    let clamped_cfg = if !cfg.is_finite() {
        MIN_CFG
    } else {
        cfg.clamp(MIN_CFG, MAX_CFG)
    };
    if clamped_cfg != cfg {
        let message = if !cfg.is_finite() || cfg < MIN_CFG {
            format!("cfg {cfg}→{clamped_cfg} (minimum is {MIN_CFG})")
        } else {
            format!("cfg {cfg}→{clamped_cfg} (maximum is {MAX_CFG})")
        };
        clamped.push(ClampedField { field: "cfg", message });
    }

    let clamped_seed = seed.max(MIN_SEED);
    if clamped_seed != seed {
        clamped.push(ClampedField {
            field: "seed",
            message: format!("seed {seed}→{clamped_seed} (minimum is {MIN_SEED})"),
        });
    }

    GenerationClamp {
        steps: clamped_steps,
        cfg: clamped_cfg,
        seed: clamped_seed,
        clamped,
    }
}
