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

//! Command line interface.

use std::path::Path;

use weave_core::settings::defaults;

use crate::error::WeaveError;

/// Weave: a local-first desktop image-generation orchestration backend.
#[derive(argh::FromArgs, PartialEq, Debug)]
pub struct TopLevel {
    /// port to bind the HTTP server to (1024..65535)
    #[argh(option, default = "defaults::PORT")]
    pub port: u16,

    /// default number of diffusion steps (1..100)
    #[argh(option, default = "defaults::STEPS")]
    pub steps: u32,

    /// default classifier-free guidance scale (0..20)
    #[argh(option, default = "defaults::CFG")]
    pub cfg: f32,

    /// default image width in pixels (64..2048, multiple of 64)
    #[argh(option, default = "defaults::WIDTH")]
    pub width: u32,

    /// default image height in pixels (64..2048, multiple of 64)
    #[argh(option, default = "defaults::HEIGHT")]
    pub height: u32,

    /// default generation seed (>= -1; -1 means random)
    #[argh(option, default = "defaults::SEED")]
    pub seed: i64,

    /// seed passed to the language model (>= 0)
    #[argh(option, default = "defaults::LLM_SEED")]
    pub llm_seed: i64,

    /// base URL of the Ollama-compatible chat endpoint
    #[argh(option, default = "defaults::OLLAMA_URL.to_string()")]
    pub ollama_url: String,

    /// model name to request from the chat endpoint
    #[argh(option, default = "defaults::OLLAMA_MODEL.to_string()")]
    pub ollama_model: String,

    /// log verbosity: one of debug, info, warn, error
    #[argh(option, default = "defaults::LOG_LEVEL.to_string()")]
    pub log_level: String,

    /// path (relative to the working directory) to the conversational agent's system prompt
    #[argh(option, default = "defaults::AGENT_PROMPT.to_string()")]
    pub agent_prompt: String,

    /// path (relative to the working directory) to the extraction agent's system prompt
    #[argh(option, default = "defaults::AGENT_TOOLS_PROMPT.to_string()")]
    pub agent_tools_prompt: String,

    /// path to the compute worker binary, resolved via PATH if it has no directory component
    #[argh(option, default = "defaults::COMPUTE_WORKER.to_string()")]
    pub compute_worker: String,

    /// print the version and exit
    #[argh(switch)]
    pub version: bool,
}

const VALID_LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

fn is_relative_no_traversal(path: &str) -> bool {
    let path = Path::new(path);
    if path.is_absolute() {
        return false;
    }
    !path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
}

impl TopLevel {
    /// Validates every flag against the ranges the system documents, collecting every violation
    /// rather than stopping at the first so a single invalid invocation reports everything wrong
    /// with it at once.
    pub fn validate(&self) -> Result<(), WeaveError> {
        let mut errors = Vec::new();

        if !(1024..=65535).contains(&self.port) {
            errors.push(format!("--port {} is out of range (1024..65535)", self.port));
        }
        if !(1..=100).contains(&self.steps) {
            errors.push(format!("--steps {} is out of range (1..100)", self.steps));
        }
        if !(0.0..=20.0).contains(&self.cfg) || !self.cfg.is_finite() {
            errors.push(format!("--cfg {} is out of range (0..20)", self.cfg));
        }
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if !(64..=2048).contains(&value) || value % 64 != 0 {
                errors.push(format!(
                    "--{name} {value} must be in 64..2048 and a multiple of 64"
                ));
            }
        }
        if self.seed < -1 {
            errors.push(format!("--seed {} must be >= -1", self.seed));
        }
        if self.llm_seed < 0 {
            errors.push(format!("--llm-seed {} must be >= 0", self.llm_seed));
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            errors.push(format!(
                "--log-level {:?} must be one of {VALID_LOG_LEVELS:?}",
                self.log_level
            ));
        }
        for (name, value) in [
            ("agent-prompt", &self.agent_prompt),
            ("agent-tools-prompt", &self.agent_tools_prompt),
        ] {
            if !is_relative_no_traversal(value) {
                errors.push(format!(
                    "--{name} {value:?} must be a relative path with no `..` components"
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(WeaveError::Validation(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argh::FromArgs;

    fn defaults() -> TopLevel {
        TopLevel::from_args(&["weave"], &[]).expect("from_args failed")
    }

    #[test]
    fn parses_with_documented_defaults() {
        let args = defaults();
        assert_eq!(args.port, 8080);
        assert_eq!(args.steps, 20);
        assert_eq!(args.cfg, 3.5);
        assert_eq!(args.width, 1024);
        assert_eq!(args.height, 1024);
        assert_eq!(args.seed, -1);
        assert_eq!(args.llm_seed, 0);
        assert_eq!(args.ollama_url, "http://localhost:11434");
        assert_eq!(args.ollama_model, "llama3.1:8b");
        assert_eq!(args.log_level, "info");
        assert!(args.validate().is_ok());
    }

    #[test]
    fn overrides_individual_flags() {
        let args = TopLevel::from_args(&["weave"], &["--port", "9000", "--steps", "40"])
            .expect("from_args failed");
        assert_eq!(args.port, 9000);
        assert_eq!(args.steps, 40);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn rejects_port_below_range() {
        let mut args = defaults();
        args.port = 80;
        assert!(args.validate().is_err());
    }

    #[test]
    fn rejects_steps_out_of_range() {
        let mut args = defaults();
        args.steps = 0;
        assert!(args.validate().is_err());
        args.steps = 150;
        assert!(args.validate().is_err());
    }

    #[test]
    fn rejects_non_finite_cfg() {
        let mut args = defaults();
        args.cfg = f32::NAN;
        assert!(args.validate().is_err());
        args.cfg = 25.0;
        assert!(args.validate().is_err());
    }

    #[test]
    fn rejects_dimensions_not_a_multiple_of_64() {
        let mut args = defaults();
        args.width = 100;
        assert!(args.validate().is_err());
    }

    #[test]
    fn rejects_seed_below_minus_one() {
        let mut args = defaults();
        args.seed = -2;
        assert!(args.validate().is_err());
    }

    #[test]
    fn rejects_negative_llm_seed() {
        let mut args = defaults();
        args.llm_seed = -1;
        assert!(args.validate().is_err());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut args = defaults();
        args.log_level = "verbose".to_owned();
        assert!(args.validate().is_err());
    }

    #[test]
    fn rejects_absolute_agent_prompt_path() {
        let mut args = defaults();
        args.agent_prompt = "/etc/passwd".to_owned();
        assert!(args.validate().is_err());
    }

    #[test]
    fn rejects_agent_prompt_path_traversal() {
        let mut args = defaults();
        args.agent_prompt = "../../etc/passwd".to_owned();
        assert!(args.validate().is_err());
    }

    #[test]
    fn reports_every_violation_at_once() {
        let mut args = defaults();
        args.port = 1;
        args.steps = 0;
        args.seed = -5;
        let err = args.validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("--port"));
        assert!(message.contains("--steps"));
        assert!(message.contains("--seed"));
    }
}
