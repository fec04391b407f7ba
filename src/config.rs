use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachConfig {
    // LLM configuration (OpenAI-compatible: Ollama, LM Studio, vLLM, OpenAI, etc.)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub llm_temperature: f32,

    // Persona and reply policy fed to the model as system text. The shipped
    // defaults are placeholders; operators supply the real coaching content.
    #[serde(default = "default_persona")]
    pub persona: String,
    #[serde(default = "default_style_line")]
    pub style_line: String,
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,
    #[serde(default = "default_apology_message")]
    pub apology_message: String,

    // Session engine
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Non-system turns kept in the model context window.
    #[serde(default = "default_max_context_messages")]
    pub max_context_messages: usize,
    /// Transcript retention per session; oldest entries drop past this.
    #[serde(default = "default_transcript_retention")]
    pub transcript_retention: usize,

    // Activity log store
    #[serde(default = "default_database_path")]
    pub database_path: String,

    // HTTP surface
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_persona() -> String {
    "You are a dealership sales-training coach. \
     Answer coaching commands from your policy text, run roleplay scenarios, \
     and collect daily activity numbers when asked."
        .to_string()
}

fn default_style_line() -> String {
    "Short, natural dealership language. ~2 sentences per turn. \
     End with a clear next step."
        .to_string()
}

fn default_welcome_message() -> String {
    "Welcome to the sales-training coach. Type a command like !help, \
     or just start talking."
        .to_string()
}

fn default_apology_message() -> String {
    "Sorry, I hit a problem processing that. Please try again in a moment."
        .to_string()
}

fn default_session_ttl_secs() -> u64 {
    30 * 60
}

fn default_max_context_messages() -> usize {
    15
}

fn default_transcript_retention() -> usize {
    30
}

fn default_database_path() -> String {
    "dealercoach_activity.db".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:8790".to_string()
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            llm_temperature: default_temperature(),
            persona: default_persona(),
            style_line: default_style_line(),
            welcome_message: default_welcome_message(),
            apology_message: default_apology_message(),
            session_ttl_secs: default_session_ttl_secs(),
            max_context_messages: default_max_context_messages(),
            transcript_retention: default_transcript_retention(),
            database_path: default_database_path(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl CoachConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("dealercoach_config.toml")
    }

    /// Load config from dealercoach_config.toml (next to executable),
    /// falling back to environment variables.
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<CoachConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config.with_env_overrides();
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::default().with_env_overrides()
    }

    /// Save config to file (next to executable)
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        Ok(())
    }

    /// Environment variables win over the file for deploy-time settings.
    fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = env::var("DEALERCOACH_LLM_URL") {
            self.llm_api_url = url;
        }
        if let Ok(model) = env::var("DEALERCOACH_LLM_MODEL") {
            self.llm_model = model;
        }
        if let Ok(key) = env::var("DEALERCOACH_LLM_API_KEY") {
            if !key.trim().is_empty() {
                self.llm_api_key = Some(key);
            }
        }
        if let Ok(bind) = env::var("DEALERCOACH_BIND") {
            self.bind_addr = bind;
        }
        if let Ok(db) = env::var("DEALERCOACH_DB") {
            self.database_path = db;
        }
        self
    }
}
