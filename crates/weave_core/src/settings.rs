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

//! Process-wide settings, resolved once at startup from CLI flags and defaults.
//!
//! Unlike some sibling projects in this workspace, Weave's settings are not hot-reloaded from
//! disk: every generation-affecting value that can change at runtime (prompt, steps, cfg, seed)
//! lives on the session instead, via [`crate::conversation::GenerationSettings`].

use std::path::PathBuf;

use directories::ProjectDirs;
use once_cell::sync::OnceCell;
use thiserror::Error;

/// The directories Weave stores per-session state and runtime sockets under.
pub static PROJECT_DIRS: OnceCell<ProjectDirs> = OnceCell::new();

fn project_dirs() -> &'static ProjectDirs {
    PROJECT_DIRS.get_or_init(|| {
        ProjectDirs::from("com", "Weave", "Weave").expect("could not determine project directories")
    })
}

/// Errors constructing or validating [`WeaveSettings`].
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid ollama url: {0}")]
    InvalidOllamaUrl(String),
}

/// Default values matching the CLI defaults described in Weave's operator-facing help text.
pub mod defaults {
    pub const PORT: u16 = 8080;
    pub const STEPS: u32 = 20;
    pub const CFG: f32 = 3.5;
    pub const WIDTH: u32 = 1024;
    pub const HEIGHT: u32 = 1024;
    pub const SEED: i64 = -1;
    pub const LLM_SEED: i64 = 0;
    pub const OLLAMA_URL: &str = "http://localhost:11434";
    pub const OLLAMA_MODEL: &str = "llama3.1:8b";
    pub const LOG_LEVEL: &str = "info";
    pub const AGENT_PROMPT: &str = "config/agents/ara.md";
    pub const AGENT_TOOLS_PROMPT: &str = "config/agents/ara_tools.md";
    pub const COMPUTE_WORKER: &str = "weave-compute-worker";
}

/// Process-wide configuration, resolved once at startup. Everything here is immutable for the
/// lifetime of the process; per-session generation parameters live elsewhere.
#[derive(Debug, Clone)]
pub struct WeaveSettings {
    pub port: u16,
    pub steps: u32,
    pub cfg: f32,
    pub width: u32,
    pub height: u32,
    pub seed: i64,
    pub llm_seed: i64,
    pub ollama_url: String,
    pub ollama_model: String,
    pub log_level: String,
    pub agent_prompt: PathBuf,
    pub agent_tools_prompt: PathBuf,
    pub compute_worker: PathBuf,
    pub sessions_root: PathBuf,
    pub runtime_dir: PathBuf,
}

impl Default for WeaveSettings {
    fn default() -> Self {
        let dirs = project_dirs();
        WeaveSettings {
            port: defaults::PORT,
            steps: defaults::STEPS,
            cfg: defaults::CFG,
            width: defaults::WIDTH,
            height: defaults::HEIGHT,
            seed: defaults::SEED,
            llm_seed: defaults::LLM_SEED,
            ollama_url: defaults::OLLAMA_URL.to_owned(),
            ollama_model: defaults::OLLAMA_MODEL.to_owned(),
            log_level: defaults::LOG_LEVEL.to_owned(),
            agent_prompt: PathBuf::from(defaults::AGENT_PROMPT),
            agent_tools_prompt: PathBuf::from(defaults::AGENT_TOOLS_PROMPT),
            compute_worker: PathBuf::from(defaults::COMPUTE_WORKER),
            sessions_root: dirs.data_dir().join("sessions"),
            runtime_dir: dirs
                .runtime_dir()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| dirs.cache_dir().join("run")),
        }
    }
}

impl WeaveSettings {
    /// Ensures the directories this settings object points at exist, creating them with
    /// owner-only permissions where that matters (the sessions root holds per-session images).
    pub fn ensure_directories(&self) -> Result<(), SettingsError> {
        for dir in [&self.sessions_root, &self.runtime_dir] {
            std::fs::create_dir_all(dir).map_err(|source| SettingsError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !self.ollama_url.starts_with("http://") && !self.ollama_url.starts_with("https://") {
            return Err(SettingsError::InvalidOllamaUrl(self.ollama_url.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = WeaveSettings::default();
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.steps, 20);
        assert_eq!(settings.seed, -1);
        assert_eq!(settings.ollama_model, "llama3.1:8b");
    }

    #[test]
    fn validate_rejects_non_http_ollama_url() {
        let mut settings = WeaveSettings::default();
        settings.ollama_url = "ftp://localhost".to_owned();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_accepts_http_and_https() {
        let mut settings = WeaveSettings::default();
        settings.ollama_url = "http://localhost:11434".to_owned();
        assert!(settings.validate().is_ok());
        settings.ollama_url = "https://ollama.internal".to_owned();
        assert!(settings.validate().is_ok());
    }
}
