use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTEXT_WINDOW: u32 = 128_000;
pub const DEFAULT_MAX_PARALLEL_CALLS: u32 = 4;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 6;
pub const DEFAULT_TIMEOUT_SECS: u64 = 180;

/// Top-level config (`companion-keeper.toml` + `COMPANION_KEEPER_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompanionConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub budgets: BudgetsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default = "default_run_dir")]
    pub run_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            run_dir: default_run_dir(),
        }
    }
}

/// Run-shaping budgets — defaults used when a CLI invocation doesn't override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetsConfig {
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    #[serde(default = "default_max_parallel_calls")]
    pub max_parallel_calls: u32,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BudgetsConfig {
    fn default() -> Self {
        Self {
            context_window: default_context_window(),
            max_parallel_calls: default_max_parallel_calls(),
            retry_attempts: default_retry_attempts(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub openai_compat: Option<OpenAiCompatConfig>,
    pub local: Option<LocalProviderConfig>,
    pub proxy: Option<OpenAiCompatConfig>,
    pub anthropic: Option<AnthropicConfig>,
}

/// OpenAI-compatible chat-completions endpoint. Also used for "an
/// alternative proxy endpoint" (spec §6) by pointing `base_url` elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiCompatConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
}

/// Locally-hosted chat endpoint (Ollama-style), no authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalProviderConfig {
    #[serde(default = "default_local_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

fn default_cache_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.companion-keeper/extraction-cache", home)
}
fn default_run_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.companion-keeper/runs", home)
}
fn default_context_window() -> u32 {
    DEFAULT_CONTEXT_WINDOW
}
fn default_max_parallel_calls() -> u32 {
    DEFAULT_MAX_PARALLEL_CALLS
}
fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}
fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_chat_path() -> String {
    "/v1/chat/completions".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_local_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

impl CompanionConfig {
    /// Load config from a TOML file with `COMPANION_KEEPER_*` env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. `COMPANION_KEEPER_CONFIG` env var
    ///   3. `~/.companion-keeper/config.toml`
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("COMPANION_KEEPER_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: CompanionConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("COMPANION_KEEPER_").split("_"))
            .extract()
            .map_err(|e| crate::error::CompanionError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.companion-keeper/config.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_budgets() {
        let cfg = CompanionConfig::default();
        assert_eq!(cfg.budgets.max_parallel_calls, DEFAULT_MAX_PARALLEL_CALLS);
        assert_eq!(cfg.budgets.context_window, DEFAULT_CONTEXT_WINDOW);
    }
}
